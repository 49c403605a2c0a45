//! Outcome of one extraction call

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::cache::{CacheType, FileCacheEntry};

/// Artifacts of a file after an extraction
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArtifactMap {
    /// Notes: aligned to page index, `None` where no artifact exists
    ByIndex(Vec<Option<PathBuf>>),
    /// Annotated PDFs: keyed by external page number
    ByPageNumber(BTreeMap<String, PathBuf>),
}

impl ArtifactMap {
    /// Notes are aligned to the `page_count` pages of the current document;
    /// cached indices outside it are ignored.
    pub(crate) fn from_entry(
        cache_type: CacheType,
        entry: &FileCacheEntry,
        page_count: usize,
    ) -> Self {
        match cache_type {
            CacheType::Notes => {
                let mut paths = vec![None; page_count];
                for page in &entry.pages {
                    if let Some(slot) = paths.get_mut(page.index) {
                        *slot = page.artifact_path.clone();
                    }
                }
                ArtifactMap::ByIndex(paths)
            }
            CacheType::Pdfs => ArtifactMap::ByPageNumber(
                entry
                    .pages
                    .iter()
                    .filter_map(|p| {
                        p.artifact_path
                            .clone()
                            .map(|path| (p.page_number.clone(), path))
                    })
                    .collect(),
            ),
        }
    }

    /// Number of pages with an artifact
    pub fn len(&self) -> usize {
        match self {
            ArtifactMap::ByIndex(paths) => paths.iter().flatten().count(),
            ArtifactMap::ByPageNumber(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(page label, artifact)` in page order. Notes are labelled by
    /// 1-based position, PDFs by page number.
    pub fn pages(&self) -> Vec<(String, &Path)> {
        match self {
            ArtifactMap::ByIndex(paths) => paths
                .iter()
                .enumerate()
                .filter_map(|(i, p)| p.as_deref().map(|p| ((i + 1).to_string(), p)))
                .collect(),
            ArtifactMap::ByPageNumber(map) => {
                let mut pages: Vec<(String, &Path)> = map
                    .iter()
                    .map(|(n, p)| (n.clone(), p.as_path()))
                    .collect();
                pages.sort_by_key(|(n, _)| page_sort_key(n));
                pages
            }
        }
    }

    /// Artifact of a numbered page
    pub fn get(&self, page_number: u32) -> Option<&Path> {
        match self {
            ArtifactMap::ByIndex(paths) => (page_number as usize)
                .checked_sub(1)
                .and_then(|i| paths.get(i))
                .and_then(|p| p.as_deref()),
            ArtifactMap::ByPageNumber(map) => map.get(&page_number.to_string()).map(PathBuf::as_path),
        }
    }
}

fn page_sort_key(number: &str) -> (u64, String) {
    (number.parse().unwrap_or(u64::MAX), number.to_string())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtractStatus {
    Success,
    /// Some pages failed or were degraded; the rest is cached
    Partial,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageFailure {
    pub page_number: String,
    pub index: usize,
    pub reason: String,
}

#[derive(Clone, Debug)]
pub struct ExtractionReport {
    pub file_key: String,
    pub cache_type: CacheType,
    pub status: ExtractStatus,
    pub artifacts: ArtifactMap,
    /// Page numbers rendered in this call
    pub rendered: Vec<String>,
    /// Page numbers served from the cache
    pub reused: Vec<String>,
    /// Zero-mark page numbers that were not rendered
    pub blank: Vec<String>,
    /// Pages kept as a standalone PDF because rasterization failed
    pub degraded: Vec<(String, PathBuf)>,
    pub failures: Vec<PageFailure>,
    /// Unchanged timestamp; nothing was rendered or written
    pub fast_path: bool,
    /// Set when the cache could not be persisted
    pub save_warning: Option<String>,
}

impl ExtractionReport {
    /// Numeric page numbers (re)rendered in this call, degraded ones included
    pub fn touched(&self) -> BTreeSet<u32> {
        self.rendered
            .iter()
            .chain(self.degraded.iter().map(|(n, _)| n))
            .filter_map(|n| n.parse().ok())
            .collect()
    }

    pub fn render_count(&self) -> usize {
        self.rendered.len()
    }

    pub fn is_partial(&self) -> bool {
        self.status == ExtractStatus::Partial
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PageExtractInfo;

    #[test]
    fn note_entries_map_by_index() {
        let mut entry = FileCacheEntry::new("/a.note", 1);
        entry.pages.push(PageExtractInfo::new("1", 0, 0));
        entry
            .pages
            .push(PageExtractInfo::new("2", 1, 3).with_artifact("/m/a_page_2.png", 1));

        let map = ArtifactMap::from_entry(CacheType::Notes, &entry, 2);
        assert_eq!(
            map,
            ArtifactMap::ByIndex(vec![None, Some(PathBuf::from("/m/a_page_2.png"))])
        );
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(2), Some(Path::new("/m/a_page_2.png")));
        assert_eq!(map.get(0), None);
    }

    #[test]
    fn cached_indices_outside_the_document_are_ignored() {
        let mut entry = FileCacheEntry::new("/a.note", 1);
        entry
            .pages
            .push(PageExtractInfo::new("1", 0, 1).with_artifact("/m/a_page_1.png", 1));
        entry
            .pages
            .push(PageExtractInfo::new("2", usize::MAX, 1).with_artifact("/m/a_page_2.png", 1));
        entry
            .pages
            .push(PageExtractInfo::new("3", 7, 1).with_artifact("/m/a_page_3.png", 1));

        let map = ArtifactMap::from_entry(CacheType::Notes, &entry, 3);
        assert_eq!(
            map,
            ArtifactMap::ByIndex(vec![Some(PathBuf::from("/m/a_page_1.png")), None, None])
        );
    }

    #[test]
    fn pdf_pages_sort_numerically() {
        let mut map = BTreeMap::new();
        map.insert("10".to_string(), PathBuf::from("/m/p10.png"));
        map.insert("9".to_string(), PathBuf::from("/m/p9.png"));
        let map = ArtifactMap::ByPageNumber(map);

        let labels: Vec<_> = map.pages().into_iter().map(|(n, _)| n).collect();
        assert_eq!(labels, vec!["9", "10"]);
    }
}
