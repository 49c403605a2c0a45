//! File-keyed extraction cache

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, warn};

use super::types::{CacheFile, CacheType, FileCacheEntry};
use crate::storage::{Scope, Storage, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache storage: {0}")]
    Storage(#[from] StorageError),

    #[error("cache {location} is corrupt: {source}")]
    Corrupt {
        location: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize cache: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Where a [`CacheFile`] is persisted
pub trait CacheBackend: Send + Sync {
    /// Stored structure; `Ok(None)` when nothing has been saved yet
    fn load(&self) -> Result<Option<CacheFile>, CacheError>;

    /// Atomically replace the stored structure
    fn save(&self, file: &CacheFile) -> Result<(), CacheError>;

    /// Human readable location for log messages
    fn location(&self) -> String;
}

/// Single writer of the extraction cache.
///
/// Holds the loaded structure in memory; `save` persists it through the
/// backend. Artifacts referenced by an entry are owned by the index and
/// removed with it.
pub struct CacheIndex {
    backend: Box<dyn CacheBackend>,
    storage: Arc<dyn Storage>,
    types: Vec<CacheType>,
    file: Mutex<Option<CacheFile>>,
}

impl CacheIndex {
    pub fn new(
        backend: Box<dyn CacheBackend>,
        storage: Arc<dyn Storage>,
        types: &[CacheType],
    ) -> Self {
        Self {
            backend,
            storage,
            types: types.to_vec(),
            file: Mutex::new(None),
        }
    }

    pub fn location(&self) -> String {
        self.backend.location()
    }

    /// Reload from the backend. Missing or unreadable caches yield an empty
    /// structure holding this index's cache types.
    pub fn load(&self) -> CacheFile {
        let mut loaded = match self.backend.load() {
            Ok(Some(file)) => file,
            Ok(None) => {
                debug!("No cache at {}, starting empty", self.backend.location());
                CacheFile::default()
            }
            Err(e) => {
                warn!("Ignoring unreadable cache: {e}");
                CacheFile::default()
            }
        };
        for t in &self.types {
            loaded.ensure_type(*t);
        }
        *self.lock() = Some(loaded.clone());
        loaded
    }

    /// Current in-memory structure
    pub fn snapshot(&self) -> CacheFile {
        self.with_file(|file| file.clone())
    }

    pub fn get(&self, cache_type: CacheType, key: &str) -> Option<FileCacheEntry> {
        self.with_file(|file| file.get(cache_type, key).cloned())
    }

    pub fn put(&self, cache_type: CacheType, key: &str, entry: FileCacheEntry) {
        self.with_file(|file| {
            file.insert(cache_type, key, entry);
        });
    }

    /// Update an entry in place; returns `false` when there is none
    pub fn update<F>(&self, cache_type: CacheType, key: &str, f: F) -> bool
    where
        F: FnOnce(&mut FileCacheEntry),
    {
        self.with_file(|file| match file.get_mut(cache_type, key) {
            Some(entry) => {
                f(entry);
                true
            }
            None => false,
        })
    }

    /// Remove an entry and delete its artifacts
    pub fn delete(&self, cache_type: CacheType, key: &str) -> Option<FileCacheEntry> {
        let removed = self.with_file(|file| file.remove(cache_type, key))?;
        self.delete_artifacts(&removed);
        Some(removed)
    }

    /// Remove every entry of a type; returns how many were dropped
    pub fn clear(&self, cache_type: CacheType) -> usize {
        let drained = self.with_file(|file| file.drain_type(cache_type));
        for (_, entry) in &drained {
            self.delete_artifacts(entry);
        }
        drained.len()
    }

    /// Persist the in-memory structure
    pub fn save(&self) -> Result<(), CacheError> {
        let mut guard = self.lock();
        let file = guard.get_or_insert_with(|| CacheFile::with_types(&self.types));
        self.backend.save(file)?;
        debug!("Saved {} cache entries to {}", file.len(), self.backend.location());
        Ok(())
    }

    /// Replace the in-memory structure and persist it
    pub fn save_file(&self, file: CacheFile) -> Result<(), CacheError> {
        *self.lock() = Some(file);
        self.save()
    }

    fn delete_artifacts(&self, entry: &FileCacheEntry) {
        for path in entry.artifact_paths() {
            if let Err(e) = self.storage.delete(path, Scope::User) {
                warn!("Failed to delete artifact {}: {e}", path.display());
            }
        }
    }

    fn with_file<R>(&self, f: impl FnOnce(&mut CacheFile) -> R) -> R {
        let needs_load = self.lock().is_none();
        if needs_load {
            self.load();
        }
        let mut guard = self.lock();
        let file = guard.get_or_insert_with(|| CacheFile::with_types(&self.types));
        f(file)
    }

    fn lock(&self) -> MutexGuard<'_, Option<CacheFile>> {
        self.file.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::JsonCacheFile;
    use crate::cache::types::PageExtractInfo;
    use crate::test_utils::MemoryStorage;
    use std::path::Path;

    fn index(storage: &Arc<MemoryStorage>) -> CacheIndex {
        let backend = JsonCacheFile::new(storage.clone(), "/cache/index.json");
        CacheIndex::new(Box::new(backend), storage.clone(), &[CacheType::Notes])
    }

    #[test]
    fn missing_cache_loads_empty_with_type() {
        let storage = Arc::new(MemoryStorage::new());
        let file = index(&storage).load();
        assert!(file.is_empty());
        assert!(file.has_type(CacheType::Notes));
    }

    #[test]
    fn corrupt_cache_loads_empty() {
        let storage = Arc::new(MemoryStorage::new());
        storage.insert("/cache/index.json", b"{ not json".to_vec());
        let file = index(&storage).load();
        assert!(file.is_empty());
    }

    #[test]
    fn put_save_and_reload() {
        let storage = Arc::new(MemoryStorage::new());
        let idx = index(&storage);
        idx.put(CacheType::Notes, "/a.note", FileCacheEntry::new("/a.note", 7));
        idx.save().unwrap();

        let reloaded = index(&storage);
        let entry = reloaded.get(CacheType::Notes, "/a.note").unwrap();
        assert_eq!(entry.last_modified, 7);
    }

    #[test]
    fn delete_removes_artifacts() {
        let storage = Arc::new(MemoryStorage::new());
        storage.insert("/out/a_page_1.png", vec![1]);
        let idx = index(&storage);
        let mut entry = FileCacheEntry::new("/a.note", 7);
        entry
            .pages
            .push(PageExtractInfo::new("1", 0, 3).with_artifact("/out/a_page_1.png", 7));
        // Missing artifact is tolerated
        entry
            .pages
            .push(PageExtractInfo::new("2", 1, 3).with_artifact("/out/a_page_2.png", 7));
        idx.put(CacheType::Notes, "/a.note", entry);

        assert!(idx.delete(CacheType::Notes, "/a.note").is_some());
        assert!(!storage.contains(Path::new("/out/a_page_1.png")));
        assert!(idx.get(CacheType::Notes, "/a.note").is_none());
    }

    #[test]
    fn clear_drops_all_entries_of_type() {
        let storage = Arc::new(MemoryStorage::new());
        let idx = index(&storage);
        idx.put(CacheType::Notes, "/a.note", FileCacheEntry::new("/a.note", 1));
        idx.put(CacheType::Notes, "/b.note", FileCacheEntry::new("/b.note", 1));
        assert_eq!(idx.clear(CacheType::Notes), 2);
        assert!(idx.snapshot().is_empty());
    }
}
