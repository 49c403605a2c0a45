//! Render job and response types

use std::time::Duration;

use image::RgbaImage;

use crate::note::{PageStrokes, RasterError};

/// Identifies one `render_pages` call on a pool
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BatchId(pub u64);

/// A contiguous run of pages sent to one worker
#[derive(Debug)]
pub struct RenderJob {
    pub batch: BatchId,
    pub chunk: usize,
    /// Owned copies; workers share nothing with the caller
    pub pages: Vec<PageStrokes>,
}

/// Response from render workers
#[derive(Debug)]
pub enum RenderResponse {
    Page {
        batch: BatchId,
        chunk: usize,
        index: usize,
        result: Result<RgbaImage, RenderError>,
    },

    /// Every page of the chunk has been answered
    ChunkDone { batch: BatchId, chunk: usize },
}

/// Why a single page produced no bitmap
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("rasterizer: {0}")]
    Raster(#[from] RasterError),

    #[error("rasterizer panicked: {message}")]
    Panicked { message: String },

    #[error("no answer from render worker within {0:?}")]
    Timeout(Duration),

    #[error("render cancelled")]
    Cancelled,

    #[error("render worker is gone")]
    WorkerGone,

    #[error("page index {0} is out of range")]
    NoSuchPage(usize),
}
