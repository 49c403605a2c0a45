//! Incremental page extraction

mod engine;
mod locks;
mod note;
mod pdf;
mod plan;
mod report;

use std::path::PathBuf;

use crate::note::FormatError;
use crate::pdf::DEFAULT_RASTER_DPI;
use crate::render::PoolConfig;
use crate::storage::StorageError;

pub use engine::Extractor;
pub use locks::{KeyGuard, KeyedLocks};
pub use plan::{PagePlan, plan_pages};
pub use report::{ArtifactMap, ExtractStatus, ExtractionReport, PageFailure};

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("failed to parse {}: {source}", path.display())]
    Format {
        path: PathBuf,
        #[source]
        source: FormatError,
    },

    #[error("mark file {} does not exist", path.display())]
    MissingCompanionFile { path: PathBuf },

    #[error("unsupported file type {} (expected .note or .pdf)", path.display())]
    UnsupportedFileType { path: PathBuf },

    #[error("PDF support is not available in this build")]
    NoCompositor,
}

#[derive(Clone, Debug)]
pub struct ExtractOptions {
    /// Directory receiving page artifacts
    pub media_folder: PathBuf,
    /// Ignore the cache and render every page
    pub force: bool,
    pub pool: PoolConfig,
    pub raster_dpi: u32,
}

impl ExtractOptions {
    pub fn new(media_folder: impl Into<PathBuf>) -> Self {
        Self {
            media_folder: media_folder.into(),
            force: false,
            pool: PoolConfig::default(),
            raster_dpi: DEFAULT_RASTER_DPI,
        }
    }
}

/// Source kinds handled by [`Extractor::extract`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Note,
    Pdf,
}

impl SourceKind {
    pub fn from_path(path: &std::path::Path) -> Option<Self> {
        let ext = path.extension()?.to_string_lossy().to_lowercase();
        match ext.as_str() {
            "note" => Some(SourceKind::Note),
            "pdf" => Some(SourceKind::Pdf),
            _ => None,
        }
    }
}

/// Companion mark file of an annotated PDF
pub fn mark_file_path(pdf: &std::path::Path) -> PathBuf {
    let mut name = pdf.as_os_str().to_owned();
    name.push(".mark");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn source_kind_by_extension() {
        assert_eq!(SourceKind::from_path(Path::new("/a/b.NOTE")), Some(SourceKind::Note));
        assert_eq!(SourceKind::from_path(Path::new("b.pdf")), Some(SourceKind::Pdf));
        assert_eq!(SourceKind::from_path(Path::new("b.pdf.mark")), None);
        assert_eq!(SourceKind::from_path(Path::new("README")), None);
    }

    #[test]
    fn mark_file_appends_suffix() {
        assert_eq!(
            mark_file_path(Path::new("/docs/planner.pdf")),
            PathBuf::from("/docs/planner.pdf.mark")
        );
    }
}
