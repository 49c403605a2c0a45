//! Shared incremental extraction flow

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};

use super::note::NotePages;
use super::pdf::PdfPages;
use super::plan::plan_pages;
use super::report::{ArtifactMap, ExtractStatus, ExtractionReport, PageFailure};
use super::{ExtractError, ExtractOptions, KeyedLocks, SourceKind, mark_file_path};
use crate::cache::{CacheIndex, CacheType, FileCacheEntry, PageExtractInfo};
use crate::note::{self, NoteDocument, StrokeRasterizer};
use crate::pdf::PdfCompositor;
use crate::storage::{Scope, Storage};

/// Result of rendering the stale pages of one call
#[derive(Debug, Default)]
pub(crate) struct RenderOutcome {
    /// Page index -> written artifact
    pub artifacts: BTreeMap<usize, PathBuf>,
    /// Page index -> standalone PDF written instead of an image
    pub degraded: BTreeMap<usize, PathBuf>,
    pub failures: Vec<PageFailure>,
}

/// Renders and persists the artifacts of stale pages
pub(crate) trait PageRenderer {
    fn render(&mut self, pages: &[PageExtractInfo]) -> RenderOutcome;
}

/// Identity of a source within the cache
struct Source {
    key: String,
    timestamp: i64,
    stem: String,
}

pub struct Extractor {
    storage: Arc<dyn Storage>,
    cache: Arc<CacheIndex>,
    rasterizer: Arc<dyn StrokeRasterizer>,
    compositor: Option<Arc<dyn PdfCompositor>>,
    locks: Arc<KeyedLocks>,
    options: ExtractOptions,
}

impl Extractor {
    pub fn new(
        storage: Arc<dyn Storage>,
        cache: Arc<CacheIndex>,
        rasterizer: Arc<dyn StrokeRasterizer>,
        options: ExtractOptions,
    ) -> Self {
        Self {
            storage,
            cache,
            rasterizer,
            compositor: None,
            locks: Arc::new(KeyedLocks::new()),
            options,
        }
    }

    #[must_use]
    pub fn with_compositor(mut self, compositor: Arc<dyn PdfCompositor>) -> Self {
        self.compositor = Some(compositor);
        self
    }

    /// Share per-file locks with other extractors
    #[must_use]
    pub fn with_locks(mut self, locks: Arc<KeyedLocks>) -> Self {
        self.locks = locks;
        self
    }

    pub fn options(&self) -> &ExtractOptions {
        &self.options
    }

    pub fn cache(&self) -> &Arc<CacheIndex> {
        &self.cache
    }

    /// Extract a `.note` file or an annotated `.pdf`, chosen by extension
    pub fn extract(&self, path: &Path) -> Result<ExtractionReport, ExtractError> {
        match SourceKind::from_path(path) {
            Some(SourceKind::Note) => self.extract_note(path),
            Some(SourceKind::Pdf) => self.extract_pdf(path),
            None => Err(ExtractError::UnsupportedFileType {
                path: path.to_path_buf(),
            }),
        }
    }

    pub fn extract_note(&self, path: &Path) -> Result<ExtractionReport, ExtractError> {
        let canonical = self.storage.canonicalize(path)?;
        let source = Source {
            key: canonical.to_string_lossy().into_owned(),
            timestamp: self.storage.modified(&canonical)?,
            stem: file_stem(&canonical),
        };
        let _guard = self.locks.lock(&source.key);
        info!("Processing note {}", source.key);

        let doc = self.load_document(&canonical)?;
        let mut renderer = NotePages {
            doc: &doc,
            storage: self.storage.as_ref(),
            rasterizer: Arc::clone(&self.rasterizer),
            pool: self.options.pool.clone(),
            out_dir: &self.options.media_folder,
            stem: &source.stem,
        };
        self.run(&source, CacheType::Notes, &doc, &mut renderer)
    }

    pub fn extract_pdf(&self, path: &Path) -> Result<ExtractionReport, ExtractError> {
        let compositor = self.compositor.as_ref().ok_or(ExtractError::NoCompositor)?;

        let canonical = self.storage.canonicalize(path)?;
        let mark_path = mark_file_path(&canonical);
        if !self.storage.exists(&mark_path, Scope::User) {
            return Err(ExtractError::MissingCompanionFile { path: mark_path });
        }

        let pdf_time = self.storage.modified(&canonical)?;
        let mark_time = self.storage.modified(&mark_path)?;
        let source = Source {
            key: canonical.to_string_lossy().into_owned(),
            timestamp: pdf_time.max(mark_time),
            stem: file_stem(&canonical),
        };
        let _guard = self.locks.lock(&source.key);
        info!("Processing PDF {} with marks", source.key);

        let marks = self.load_document(&mark_path)?;
        let mut renderer = PdfPages {
            pdf: &canonical,
            marks: &marks,
            compositor: compositor.as_ref(),
            storage: self.storage.as_ref(),
            rasterizer: Arc::clone(&self.rasterizer),
            pool: self.options.pool.clone(),
            out_dir: &self.options.media_folder,
            stem: &source.stem,
            dpi: self.options.raster_dpi,
        };
        self.run(&source, CacheType::Pdfs, &marks, &mut renderer)
    }

    fn load_document(&self, path: &Path) -> Result<NoteDocument, ExtractError> {
        let bytes = self.storage.read(path, Scope::User)?;
        note::parse(&bytes).map_err(|source| ExtractError::Format {
            path: path.to_path_buf(),
            source,
        })
    }

    fn run(
        &self,
        source: &Source,
        cache_type: CacheType,
        doc: &NoteDocument,
        renderer: &mut dyn PageRenderer,
    ) -> Result<ExtractionReport, ExtractError> {
        let current: Vec<PageExtractInfo> = doc
            .pages
            .iter()
            .map(|p| PageExtractInfo::new(p.number.clone(), p.index, p.marks_count))
            .collect();

        let cached = self.cache.get(cache_type, &source.key);

        let unchanged = cached
            .as_ref()
            .filter(|entry| !self.options.force && entry.last_modified == source.timestamp);
        if let Some(entry) = unchanged {
            info!("No changes detected in {}, skipping extraction", source.key);
            let reused = entry.pages.iter().map(|p| p.page_number.clone()).collect();
            return Ok(ExtractionReport {
                file_key: source.key.clone(),
                cache_type,
                status: ExtractStatus::Success,
                artifacts: ArtifactMap::from_entry(cache_type, entry, doc.pages.len()),
                rendered: Vec::new(),
                reused,
                blank: Vec::new(),
                degraded: Vec::new(),
                failures: Vec::new(),
                fast_path: true,
                save_warning: None,
            });
        }

        let plan = plan_pages(&current, cached.as_ref(), self.options.force, |path| {
            self.storage.exists(path, Scope::User)
        });
        info!(
            "{}: {} pages to render, {} reused, {} blank",
            source.key,
            plan.render.len(),
            plan.reuse.len(),
            plan.blank.len()
        );

        let outcome = if plan.render.is_empty() {
            RenderOutcome::default()
        } else {
            if let Err(e) = self
                .storage
                .create_dir(&self.options.media_folder, Scope::User)
            {
                warn!("Failed to create {}: {e}", self.options.media_folder.display());
            }
            renderer.render(&plan.render)
        };

        // Merge in current page order
        let mut by_number: BTreeMap<&str, PageExtractInfo> = BTreeMap::new();
        for page in &plan.reuse {
            by_number.insert(page.page_number.as_str(), page.clone());
        }
        for page in &plan.blank {
            by_number.insert(page.page_number.as_str(), page.clone());
        }
        let mut rendered = Vec::new();
        for page in &plan.render {
            let mut info = page.clone();
            if let Some(path) = outcome.artifacts.get(&page.index) {
                info.artifact_path = Some(path.clone());
                info.last_modified = Some(source.timestamp);
                rendered.push(page.page_number.clone());
            } else if let Some(path) = outcome.degraded.get(&page.index) {
                info.degraded_path = Some(path.clone());
                info.last_modified = Some(source.timestamp);
            }
            by_number.insert(page.page_number.as_str(), info);
        }
        let pages: Vec<PageExtractInfo> = current
            .iter()
            .filter_map(|p| by_number.remove(p.page_number.as_str()))
            .collect();

        let mut entry = FileCacheEntry::new(source.key.clone(), source.timestamp);
        if let Some(previous) = cached.as_ref() {
            entry.last_viewed_page = previous.last_viewed_page;
            entry.extra = previous.extra.clone();
        }
        entry.pages = pages;

        self.cache.put(cache_type, &source.key, entry.clone());
        let save_warning = match self.cache.save() {
            Ok(()) => {
                // Orphans go only once the saved cache stops referencing them
                if let Some(previous) = cached.as_ref() {
                    self.delete_orphans(previous, &entry);
                }
                None
            }
            Err(e) => {
                warn!("Failed to save cache {}: {e}", self.cache.location());
                Some(e.to_string())
            }
        };

        let degraded: Vec<(String, PathBuf)> = outcome
            .degraded
            .iter()
            .filter_map(|(index, path)| {
                doc.page(*index).map(|p| (p.number.clone(), path.clone()))
            })
            .collect();
        let status = if outcome.failures.is_empty() && degraded.is_empty() {
            ExtractStatus::Success
        } else {
            ExtractStatus::Partial
        };

        Ok(ExtractionReport {
            file_key: source.key.clone(),
            cache_type,
            status,
            artifacts: ArtifactMap::from_entry(cache_type, &entry, doc.pages.len()),
            rendered,
            reused: plan.reuse.iter().map(|p| p.page_number.clone()).collect(),
            blank: plan.blank.iter().map(|p| p.page_number.clone()).collect(),
            degraded,
            failures: outcome.failures,
            fast_path: false,
            save_warning,
        })
    }

    /// Delete artifacts the previous entry owned and the new one dropped
    fn delete_orphans(&self, previous: &FileCacheEntry, current: &FileCacheEntry) {
        let kept: BTreeSet<&Path> = current.artifact_paths().collect();
        for path in previous.artifact_paths() {
            if kept.contains(path) {
                continue;
            }
            debug!("Deleting orphaned artifact {}", path.display());
            if let Err(e) = self.storage.delete(path, Scope::User) {
                warn!("Failed to delete {}: {e}", path.display());
            }
        }
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "page".to_string())
}
