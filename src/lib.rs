pub mod cache;
pub mod export;
pub mod extract;
pub mod note;
pub mod panic_handler;
pub mod pdf;
pub mod render;
pub mod settings;
pub mod storage;
pub mod viewer;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use cache::{CacheIndex, CacheType};
pub use extract::{ExtractError, ExtractOptions, ExtractionReport, Extractor};
pub use storage::{FsStorage, Scope, Storage};
pub use viewer::ViewerSession;
