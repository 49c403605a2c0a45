//! Persisted key-value store of the interactive viewer
//!
//! One JSON document in the app-private scope. The extraction cache lives
//! under `fileCacheInfo`; the rest is viewer state.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use log::warn;
use serde::{Deserialize, Serialize};

use super::index::{CacheBackend, CacheError};
use super::types::CacheFile;
use crate::storage::{Scope, Storage};

pub const APP_STORE_FILE_NAME: &str = "app-store.json";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStore {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_folder: Option<String>,
    /// Artifact lookup: file path, or `filePath + pageNumber`, to artifact
    #[serde(default)]
    pub cache: BTreeMap<String, String>,
    #[serde(default)]
    pub file_cache_info: CacheFile,
    #[serde(default)]
    pub file_scroll_position: BTreeMap<String, f64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl AppStore {
    /// Composite artifact key of one page
    pub fn page_key(file_path: &str, page_number: &str) -> String {
        format!("{file_path}{page_number}")
    }

    /// Drop every artifact lookup belonging to `file_path`: the path itself
    /// and the path followed by a numeric page suffix
    pub fn forget_lookups(&mut self, file_path: &str) -> usize {
        let before = self.cache.len();
        self.cache.retain(|key, _| !is_lookup_of(key, file_path));
        before - self.cache.len()
    }
}

fn is_lookup_of(key: &str, file_path: &str) -> bool {
    key.strip_prefix(file_path)
        .is_some_and(|suffix| suffix.bytes().all(|b| b.is_ascii_digit()))
}

/// Shared handle to the store document; updates are read-modify-write under
/// one lock.
#[derive(Clone)]
pub struct AppStoreFile {
    storage: Arc<dyn Storage>,
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl AppStoreFile {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self::at(storage, APP_STORE_FILE_NAME)
    }

    /// Store at a path relative to the app root
    pub fn at(storage: Arc<dyn Storage>, path: impl Into<PathBuf>) -> Self {
        Self {
            storage,
            path: path.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn read(&self) -> Result<AppStore, CacheError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.read_unlocked()
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut AppStore) -> R) -> Result<R, CacheError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut store = match self.read_unlocked() {
            Ok(store) => store,
            Err(e @ CacheError::Corrupt { .. }) => {
                warn!("Replacing unreadable app store: {e}");
                AppStore::default()
            }
            Err(e) => return Err(e),
        };
        let result = f(&mut store);
        let content = serde_json::to_string_pretty(&store).map_err(CacheError::Serialize)?;
        self.storage
            .write(&self.path, content.as_bytes(), Scope::App)?;
        Ok(result)
    }

    fn read_unlocked(&self) -> Result<AppStore, CacheError> {
        let bytes = match self.storage.read(&self.path, Scope::App) {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return Ok(AppStore::default()),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes).map_err(|source| CacheError::Corrupt {
            location: self.path.display().to_string(),
            source,
        })
    }
}

/// Cache backend over the store's `fileCacheInfo`
pub struct AppStoreBackend {
    store: AppStoreFile,
}

impl AppStoreBackend {
    pub fn new(store: AppStoreFile) -> Self {
        Self { store }
    }
}

impl CacheBackend for AppStoreBackend {
    fn load(&self) -> Result<Option<CacheFile>, CacheError> {
        Ok(Some(self.store.read()?.file_cache_info))
    }

    fn save(&self, file: &CacheFile) -> Result<(), CacheError> {
        self.store.update(|store| store.file_cache_info = file.clone())
    }

    fn location(&self) -> String {
        format!("app store ({})", self.store.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::types::{CacheType, FileCacheEntry};
    use crate::test_utils::MemoryStorage;

    #[test]
    fn cache_backend_preserves_viewer_state() {
        let storage = Arc::new(MemoryStorage::new());
        let store = AppStoreFile::new(storage);
        store
            .update(|s| {
                s.base_folder = Some("/notes".to_string());
                s.file_scroll_position.insert("/notes/a.note".to_string(), 120.5);
            })
            .unwrap();

        let backend = AppStoreBackend::new(store.clone());
        let mut file = CacheFile::with_types(&[CacheType::Notes]);
        let mut entry = FileCacheEntry::new("/notes/a.note", 10);
        entry.last_viewed_page = Some(3);
        file.insert(CacheType::Notes, "/notes/a.note", entry);
        backend.save(&file).unwrap();

        let read = store.read().unwrap();
        assert_eq!(read.base_folder.as_deref(), Some("/notes"));
        assert_eq!(read.file_scroll_position["/notes/a.note"], 120.5);
        assert_eq!(
            read.file_cache_info
                .get(CacheType::Notes, "/notes/a.note")
                .and_then(|e| e.last_viewed_page),
            Some(3)
        );
        assert_eq!(backend.load().unwrap(), Some(read.file_cache_info));
    }

    #[test]
    fn forget_lookups_drops_composite_keys() {
        let mut store = AppStore::default();
        store
            .cache
            .insert(AppStore::page_key("/n/a.note", "1"), "/c/a_1.png".into());
        store
            .cache
            .insert(AppStore::page_key("/n/a.note", "2"), "/c/a_2.png".into());
        store
            .cache
            .insert(AppStore::page_key("/n/b.note", "1"), "/c/b_1.png".into());

        assert_eq!(store.forget_lookups("/n/a.note"), 2);
        assert_eq!(store.cache.len(), 1);
    }

    #[test]
    fn forget_lookups_keeps_files_sharing_a_prefix() {
        let mut store = AppStore::default();
        store.cache.insert("/n/day.note".into(), "/c/day.png".into());
        store
            .cache
            .insert(AppStore::page_key("/n/day.note", "12"), "/c/day_12.png".into());
        store
            .cache
            .insert(AppStore::page_key("/n/day.note.pdf", "1"), "/c/pdf_1.png".into());

        assert_eq!(store.forget_lookups("/n/day.note"), 2);
        assert!(store.cache.contains_key("/n/day.note.pdf1"));
    }

    #[test]
    fn update_replaces_corrupt_document() {
        let storage = Arc::new(MemoryStorage::new());
        storage.insert("/app/app-store.json", b"{ corrupt".to_vec());
        let store = AppStoreFile::new(storage);
        assert!(matches!(store.read(), Err(CacheError::Corrupt { .. })));

        store
            .update(|s| s.base_folder = Some("/notes".to_string()))
            .unwrap();

        assert_eq!(store.read().unwrap().base_folder.as_deref(), Some("/notes"));
    }
}
