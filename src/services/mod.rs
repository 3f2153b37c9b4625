pub(crate) mod pipeline;
pub(crate) mod rasterize;
pub(crate) mod recognition;
pub(crate) mod storage;
