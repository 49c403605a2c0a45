//! Durable extraction cache

mod app_store;
mod index;
mod json_file;
mod types;

pub use app_store::{APP_STORE_FILE_NAME, AppStore, AppStoreBackend, AppStoreFile};
pub use index::{CacheBackend, CacheError, CacheIndex};
pub use json_file::{DEFAULT_CACHE_FILE_NAME, JsonCacheFile};
pub use types::{CacheFile, CacheType, FileCacheEntry, PageExtractInfo};
