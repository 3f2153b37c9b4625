use std::io::Cursor;

use image::ImageFormat;
use pdfium_render::prelude::*;
use thiserror::Error;

/// Longest edge of the rendered page. Keeps memory bounded for oversized
/// pages and matches the input size vision models work best with.
const MAX_RENDERED_PIXELS: i32 = 2048;

#[derive(Debug, Error)]
pub(crate) enum RasterizeError {
    #[error("failed to open PDF document: {0}")]
    Open(String),
    #[error("PDF document has no pages")]
    NoPages,
    #[error("failed to render PDF page: {0}")]
    Render(String),
    #[error("failed to encode rendered page: {0}")]
    Encode(String),
}

/// Renders the first page of a PDF into a PNG. Implementations are blocking;
/// callers run them on a blocking thread.
pub(crate) trait PageRasterizer: Send + Sync {
    fn first_page(&self, pdf_bytes: &[u8]) -> Result<Vec<u8>, RasterizeError>;
}

/// pdfium wraps a C++ library with thread-local state, so all calls stay on
/// the invoking thread and the binding is only loaded once per call site.
pub(crate) struct PdfiumRasterizer;

impl PdfiumRasterizer {
    pub(crate) fn new() -> Self {
        Self
    }
}

impl PageRasterizer for PdfiumRasterizer {
    fn first_page(&self, pdf_bytes: &[u8]) -> Result<Vec<u8>, RasterizeError> {
        let pdfium = Pdfium::default();

        let document = pdfium
            .load_pdf_from_byte_slice(pdf_bytes, None)
            .map_err(|err| RasterizeError::Open(format!("{err:?}")))?;

        let pages = document.pages();
        if pages.len() == 0 {
            return Err(RasterizeError::NoPages);
        }

        let render_config = PdfRenderConfig::new()
            .set_target_width(MAX_RENDERED_PIXELS)
            .set_maximum_height(MAX_RENDERED_PIXELS);

        let page = pages.get(0).map_err(|err| RasterizeError::Render(format!("{err:?}")))?;
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|err| RasterizeError::Render(format!("{err:?}")))?;

        let image = bitmap.as_image();

        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|err| RasterizeError::Encode(err.to_string()))?;

        Ok(png)
    }
}
