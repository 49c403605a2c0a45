//! Persisted cache records

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

/// Namespace of a cache entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CacheType {
    Notes,
    Pdfs,
}

impl CacheType {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheType::Notes => "notes",
            CacheType::Pdfs => "pdfs",
        }
    }
}

impl fmt::Display for CacheType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cached state of one extracted page
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageExtractInfo {
    #[serde(deserialize_with = "string_or_number")]
    pub page_number: String,
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub marks_count: u32,
    #[serde(
        default,
        alias = "imageFilePath",
        skip_serializing_if = "Option::is_none"
    )]
    pub artifact_path: Option<PathBuf>,
    /// Standalone PDF kept when the page could not be rasterized. Owned by
    /// the cache like `artifact_path`, but never reused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degraded_path: Option<PathBuf>,
    #[serde(
        default,
        deserialize_with = "optional_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_modified: Option<i64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl PageExtractInfo {
    pub fn new(page_number: impl Into<String>, index: usize, marks_count: u32) -> Self {
        Self {
            page_number: page_number.into(),
            index,
            marks_count,
            artifact_path: None,
            degraded_path: None,
            last_modified: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_artifact(mut self, path: impl Into<PathBuf>, last_modified: i64) -> Self {
        self.artifact_path = Some(path.into());
        self.last_modified = Some(last_modified);
        self
    }
}

/// Cached state of one source file
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileCacheEntry {
    #[serde(default)]
    pub file_path: String,
    /// Source mtime in epoch milliseconds; for PDFs the newer of PDF and mark
    #[serde(deserialize_with = "millis")]
    pub last_modified: i64,
    #[serde(default)]
    pub pages: Vec<PageExtractInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_viewed_page: Option<usize>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl FileCacheEntry {
    pub fn new(file_path: impl Into<String>, last_modified: i64) -> Self {
        Self {
            file_path: file_path.into(),
            last_modified,
            pages: Vec::new(),
            last_viewed_page: None,
            extra: BTreeMap::new(),
        }
    }

    /// Cached page with this external page number
    pub fn page(&self, page_number: &str) -> Option<&PageExtractInfo> {
        self.pages.iter().find(|p| p.page_number == page_number)
    }

    /// Every file the entry owns, degraded PDFs included
    pub fn artifact_paths(&self) -> impl Iterator<Item = &Path> {
        self.pages.iter().flat_map(|p| {
            p.artifact_path
                .as_deref()
                .into_iter()
                .chain(p.degraded_path.as_deref())
        })
    }
}

/// `cacheType -> fileKey -> entry`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheFile {
    types: BTreeMap<String, BTreeMap<String, FileCacheEntry>>,
}

impl CacheFile {
    /// Empty structure holding the given cache types
    pub fn with_types(types: &[CacheType]) -> Self {
        let mut file = Self::default();
        for t in types {
            file.ensure_type(*t);
        }
        file
    }

    pub fn ensure_type(&mut self, cache_type: CacheType) {
        self.types.entry(cache_type.as_str().to_string()).or_default();
    }

    pub fn get(&self, cache_type: CacheType, key: &str) -> Option<&FileCacheEntry> {
        self.types.get(cache_type.as_str())?.get(key)
    }

    pub fn get_mut(&mut self, cache_type: CacheType, key: &str) -> Option<&mut FileCacheEntry> {
        self.types.get_mut(cache_type.as_str())?.get_mut(key)
    }

    pub fn insert(
        &mut self,
        cache_type: CacheType,
        key: impl Into<String>,
        entry: FileCacheEntry,
    ) -> Option<FileCacheEntry> {
        self.types
            .entry(cache_type.as_str().to_string())
            .or_default()
            .insert(key.into(), entry)
    }

    pub fn remove(&mut self, cache_type: CacheType, key: &str) -> Option<FileCacheEntry> {
        self.types.get_mut(cache_type.as_str())?.remove(key)
    }

    /// Remove every entry of a type, keeping the (now empty) type
    pub fn drain_type(&mut self, cache_type: CacheType) -> Vec<(String, FileCacheEntry)> {
        match self.types.get_mut(cache_type.as_str()) {
            Some(entries) => std::mem::take(entries).into_iter().collect(),
            None => Vec::new(),
        }
    }

    pub fn entries(&self, cache_type: CacheType) -> impl Iterator<Item = (&str, &FileCacheEntry)> {
        self.types
            .get(cache_type.as_str())
            .into_iter()
            .flat_map(|m| m.iter().map(|(k, v)| (k.as_str(), v)))
    }

    pub fn has_type(&self, cache_type: CacheType) -> bool {
        self.types.contains_key(cache_type.as_str())
    }

    pub fn len(&self) -> usize {
        self.types.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberSerde {
    Int(i64),
    Float(f64),
    Text(String),
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match NumberSerde::deserialize(deserializer)? {
        NumberSerde::Int(n) => n.to_string(),
        NumberSerde::Float(f) => f.to_string(),
        NumberSerde::Text(s) => s,
    })
}

fn number_to_millis<E: serde::de::Error>(value: NumberSerde) -> Result<i64, E> {
    match value {
        NumberSerde::Int(n) => Ok(n),
        // Legacy caches stored fractional mtimeMs values
        NumberSerde::Float(f) => Ok(f.trunc() as i64),
        NumberSerde::Text(s) => s
            .trim()
            .parse::<f64>()
            .map(|f| f.trunc() as i64)
            .map_err(|_| E::custom(format!("invalid timestamp {s:?}"))),
    }
}

fn millis<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    number_to_millis(NumberSerde::deserialize(deserializer)?)
}

fn optional_millis<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<NumberSerde>::deserialize(deserializer)? {
        None => Ok(None),
        Some(value) => number_to_millis(value).map(Some),
    }
}
