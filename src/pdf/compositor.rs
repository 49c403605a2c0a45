//! PDF page compositing capability

use std::path::{Path, PathBuf};

use image::RgbaImage;

/// Default rasterization density for composed PDF pages
pub const DEFAULT_RASTER_DPI: u32 = 300;

#[derive(Debug, thiserror::Error)]
pub enum CompositeError {
    #[cfg(feature = "pdf")]
    #[error("PDF engine: {0}")]
    Pdf(#[from] mupdf::error::Error),

    #[error("image: {0}")]
    Image(#[from] image::ImageError),

    #[error("page {page} is out of range ({count} pages)")]
    PageOutOfRange { page: usize, count: usize },

    #[error("{mode:?} rasterization produced no data")]
    EmptyOutput { mode: RasterMode },

    #[error("{detail}")]
    Generic { detail: String },
}

impl CompositeError {
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic { detail: msg.into() }
    }
}

/// One page lifted out of a source PDF, optionally carrying a mark layer
#[derive(Clone, Debug)]
pub struct PageComposition {
    pub source: PathBuf,
    /// 0-based page index in `source`
    pub page_index: usize,
    /// Page size in PDF points
    pub width: f32,
    pub height: f32,
    /// Drawn over the full page, stretched to its bounds
    pub overlay: Option<RgbaImage>,
}

/// Ways of getting a raster out of the converter, tried in order
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RasterMode {
    /// Converter writes the PNG to the target path itself
    DirectSave,
    /// PNG bytes returned in memory
    Buffer,
    /// PNG bytes returned base64 encoded
    Base64,
}

impl RasterMode {
    pub const FALLBACK_CHAIN: [RasterMode; 3] =
        [RasterMode::DirectSave, RasterMode::Buffer, RasterMode::Base64];
}

#[derive(Clone, Debug)]
pub enum RasterOutput {
    Saved(PathBuf),
    Buffer(Vec<u8>),
    Base64(String),
}

/// PDF operations needed by the annotated-PDF extractor
pub trait PdfCompositor: Send + Sync {
    fn page_count(&self, pdf: &Path) -> Result<usize, CompositeError>;

    /// Size of a page in PDF points
    fn page_size(&self, pdf: &Path, page_index: usize) -> Result<(f32, f32), CompositeError>;

    /// Lift a single page out of `pdf`
    fn extract_page(&self, pdf: &Path, page_index: usize)
    -> Result<PageComposition, CompositeError>;

    /// Composite a mark bitmap over the whole page
    fn overlay_marks(
        &self,
        page: &mut PageComposition,
        marks: RgbaImage,
    ) -> Result<(), CompositeError>;

    /// Rasterize the composed page to PNG
    fn rasterize(
        &self,
        page: &PageComposition,
        mode: RasterMode,
        dpi: u32,
        target: &Path,
    ) -> Result<RasterOutput, CompositeError>;

    /// Serialize the composed page as a one-page PDF
    fn to_standalone_pdf(&self, page: &PageComposition) -> Result<Vec<u8>, CompositeError>;
}

/// Stack `top` over `base`, stretching it to `base`'s size
pub fn stack_overlay(base: &mut RgbaImage, top: &RgbaImage) {
    if top.dimensions() == base.dimensions() {
        image::imageops::overlay(base, top, 0, 0);
    } else {
        let resized = image::imageops::resize(
            top,
            base.width(),
            base.height(),
            image::imageops::FilterType::Triangle,
        );
        image::imageops::overlay(base, &resized, 0, 0);
    }
}
