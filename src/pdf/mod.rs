//! Annotated PDF support

mod compositor;
#[cfg(feature = "pdf")]
mod mupdf_compositor;
mod writer;

pub use compositor::{
    CompositeError, DEFAULT_RASTER_DPI, PageComposition, PdfCompositor, RasterMode, RasterOutput,
    stack_overlay,
};
#[cfg(feature = "pdf")]
pub use mupdf_compositor::MupdfCompositor;
pub use writer::images_to_pdf;
