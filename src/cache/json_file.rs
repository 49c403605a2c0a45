//! Pretty-printed JSON cache file used by the CLI

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::index::{CacheBackend, CacheError};
use super::types::CacheFile;
use crate::storage::{Scope, Storage};

/// Default cache file name inside the media folder (or working directory)
pub const DEFAULT_CACHE_FILE_NAME: &str = ".supernote-viewer-cache.json";

pub struct JsonCacheFile {
    storage: Arc<dyn Storage>,
    path: PathBuf,
}

impl JsonCacheFile {
    pub fn new(storage: Arc<dyn Storage>, path: impl Into<PathBuf>) -> Self {
        Self {
            storage,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CacheBackend for JsonCacheFile {
    fn load(&self) -> Result<Option<CacheFile>, CacheError> {
        let bytes = match self.storage.read(&self.path, Scope::User) {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| CacheError::Corrupt {
                location: self.location(),
                source,
            })
    }

    fn save(&self, file: &CacheFile) -> Result<(), CacheError> {
        let content = serde_json::to_string_pretty(file).map_err(CacheError::Serialize)?;
        self.storage
            .write(&self.path, content.as_bytes(), Scope::User)?;
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::types::{CacheType, FileCacheEntry};
    use crate::storage::FsStorage;
    use tempfile::TempDir;

    #[test]
    fn saves_to_disk_and_loads_back() {
        let temp = TempDir::new().unwrap();
        let storage: Arc<dyn Storage> = Arc::new(FsStorage::new(temp.path().join("app")));
        let path = temp.path().join("nested").join(DEFAULT_CACHE_FILE_NAME);
        let backend = JsonCacheFile::new(storage, &path);

        assert!(backend.load().unwrap().is_none());

        let mut file = CacheFile::with_types(&[CacheType::Pdfs]);
        file.insert(CacheType::Pdfs, "/doc.pdf", FileCacheEntry::new("/doc.pdf", 99));
        backend.save(&file).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"lastModified\": 99"));
        assert_eq!(backend.load().unwrap(), Some(file));
    }

    #[test]
    fn corrupt_file_is_reported() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cache.json");
        std::fs::write(&path, "[1, 2").unwrap();
        let storage: Arc<dyn Storage> = Arc::new(FsStorage::new(temp.path().to_path_buf()));

        let err = JsonCacheFile::new(storage, &path).load().unwrap_err();
        assert!(matches!(err, CacheError::Corrupt { .. }));
    }
}
