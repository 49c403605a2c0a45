//! Supernote `.note` / `.mark` container support

mod format;
mod parser;
pub mod rasterizer;
pub mod rle;

pub use format::*;
pub use parser::{FormatError, parse};
pub use rasterizer::{RasterError, RattaRasterizer, StrokeRasterizer, flatten_onto};
