pub(crate) mod tasks;
