//! Interactive viewer state on top of the extraction engine
//!
//! Artifacts of opened files live in the app-private cache directory, one
//! sub-directory per file named after the md5 of its cache key. The cache
//! index is stored in the app store next to the browsing state.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use log::{debug, info};

use crate::cache::{AppStore, AppStoreBackend, AppStoreFile, CacheIndex, CacheType};
use crate::extract::{
    ExtractOptions, ExtractionReport, Extractor, KeyedLocks, SourceKind,
};
use crate::note::StrokeRasterizer;
use crate::pdf::{DEFAULT_RASTER_DPI, PdfCompositor};
use crate::render::PoolConfig;
use crate::storage::{FileEntry, FileType, Storage};

/// A file ready to be shown
#[derive(Debug)]
pub struct OpenedFile {
    pub report: ExtractionReport,
    pub last_viewed_page: Option<usize>,
    pub scroll_position: Option<f64>,
}

pub struct ViewerSession {
    storage: Arc<dyn Storage>,
    store: AppStoreFile,
    cache: Arc<CacheIndex>,
    rasterizer: Arc<dyn StrokeRasterizer>,
    compositor: Option<Arc<dyn PdfCompositor>>,
    locks: Arc<KeyedLocks>,
    cache_root: PathBuf,
    pool: PoolConfig,
    raster_dpi: u32,
}

impl ViewerSession {
    /// `cache_root` is the absolute directory receiving page artifacts
    pub fn new(
        storage: Arc<dyn Storage>,
        cache_root: PathBuf,
        rasterizer: Arc<dyn StrokeRasterizer>,
    ) -> Self {
        let store = AppStoreFile::new(Arc::clone(&storage));
        let cache = CacheIndex::new(
            Box::new(AppStoreBackend::new(store.clone())),
            Arc::clone(&storage),
            &[CacheType::Notes, CacheType::Pdfs],
        );
        Self {
            storage,
            store,
            cache: Arc::new(cache),
            rasterizer,
            compositor: None,
            locks: Arc::new(KeyedLocks::new()),
            cache_root,
            pool: PoolConfig::default(),
            raster_dpi: DEFAULT_RASTER_DPI,
        }
    }

    #[must_use]
    pub fn with_compositor(mut self, compositor: Arc<dyn PdfCompositor>) -> Self {
        self.compositor = Some(compositor);
        self
    }

    #[must_use]
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    #[must_use]
    pub fn with_raster_dpi(mut self, dpi: u32) -> Self {
        self.raster_dpi = dpi;
        self
    }

    pub fn cache(&self) -> &Arc<CacheIndex> {
        &self.cache
    }

    pub fn base_folder(&self) -> Result<Option<PathBuf>> {
        let store = self.store.read().context("Failed to read app store")?;
        Ok(store.base_folder.map(PathBuf::from))
    }

    pub fn set_base_folder(&self, folder: &Path) -> Result<PathBuf> {
        let folder = self
            .storage
            .canonicalize(folder)
            .with_context(|| format!("Folder {} does not exist", folder.display()))?;
        let value = folder.to_string_lossy().into_owned();
        self.store
            .update(|store| store.base_folder = Some(value))
            .context("Failed to save base folder")?;
        Ok(folder)
    }

    /// Notes, PDFs and sub-directories of `dir`, sorted by name
    pub fn list_folder(&self, dir: &Path) -> Result<Vec<FileEntry>> {
        let entries = self
            .storage
            .list_files(dir)
            .with_context(|| format!("Failed to list {}", dir.display()))?;
        Ok(entries
            .into_iter()
            .filter(|e| !e.name.starts_with('.'))
            .filter(|e| e.file_type() != FileType::Unknown)
            .collect())
    }

    /// Extract pages of `path` as needed and record their artifacts
    pub fn open(&self, path: &Path) -> Result<OpenedFile> {
        let (key, cache_type) = self.identify(path)?;

        let mut options = ExtractOptions::new(self.artifact_dir(&key));
        options.pool = self.pool.clone();
        options.raster_dpi = self.raster_dpi;
        let mut extractor = Extractor::new(
            Arc::clone(&self.storage),
            Arc::clone(&self.cache),
            Arc::clone(&self.rasterizer),
            options,
        )
        .with_locks(Arc::clone(&self.locks));
        if let Some(compositor) = &self.compositor {
            extractor = extractor.with_compositor(Arc::clone(compositor));
        }

        let report = extractor
            .extract(Path::new(&key))
            .with_context(|| format!("Failed to open {}", path.display()))?;
        info!(
            "Opened {} ({} pages rendered, {} reused)",
            key,
            report.render_count(),
            report.reused.len()
        );

        let lookups: Vec<(String, String)> = report
            .artifacts
            .pages()
            .into_iter()
            .map(|(label, artifact)| {
                (
                    AppStore::page_key(&key, &label),
                    artifact.to_string_lossy().into_owned(),
                )
            })
            .collect();
        let scroll_position = self
            .store
            .update(|store| {
                store.forget_lookups(&key);
                store.cache.extend(lookups);
                store.file_scroll_position.get(&key).copied()
            })
            .context("Failed to update app store")?;

        let last_viewed_page = self
            .cache
            .get(cache_type, &key)
            .and_then(|entry| entry.last_viewed_page);

        Ok(OpenedFile {
            report,
            last_viewed_page,
            scroll_position,
        })
    }

    pub fn set_last_viewed_page(&self, path: &Path, page: usize) -> Result<()> {
        let (key, cache_type) = self.identify(path)?;
        let updated = self.cache.update(cache_type, &key, |entry| {
            entry.last_viewed_page = Some(page);
        });
        if !updated {
            bail!("{} has not been opened", path.display());
        }
        self.cache.save().context("Failed to save last viewed page")?;
        debug!("Last viewed page of {key} is {page}");
        Ok(())
    }

    pub fn set_scroll_position(&self, path: &Path, position: f64) -> Result<()> {
        let (key, _) = self.identify(path)?;
        self.store
            .update(|store| store.file_scroll_position.insert(key, position))
            .context("Failed to save scroll position")?;
        Ok(())
    }

    pub fn scroll_position(&self, path: &Path) -> Result<Option<f64>> {
        let (key, _) = self.identify(path)?;
        let store = self.store.read().context("Failed to read app store")?;
        Ok(store.file_scroll_position.get(&key).copied())
    }

    /// Drop everything cached for `path`, artifacts included. Returns
    /// whether the file had a cache entry.
    pub fn forget(&self, path: &Path) -> Result<bool> {
        let (key, cache_type) = self.identify(path)?;
        let removed = self.cache.delete(cache_type, &key).is_some();
        if removed {
            self.cache.save().context("Failed to save cache")?;
        }
        let lookups = self
            .store
            .update(|store| {
                store.file_scroll_position.remove(&key);
                store.forget_lookups(&key)
            })
            .context("Failed to update app store")?;
        info!("Forgot {key} ({lookups} lookups)");
        Ok(removed)
    }

    fn identify(&self, path: &Path) -> Result<(String, CacheType)> {
        let cache_type = match SourceKind::from_path(path) {
            Some(SourceKind::Note) => CacheType::Notes,
            Some(SourceKind::Pdf) => CacheType::Pdfs,
            None => bail!("{} is not a note or PDF", path.display()),
        };
        let canonical = self
            .storage
            .canonicalize(path)
            .with_context(|| format!("File {} does not exist", path.display()))?;
        Ok((canonical.to_string_lossy().into_owned(), cache_type))
    }

    fn artifact_dir(&self, key: &str) -> PathBuf {
        self.cache_root
            .join(format!("{:x}", md5::compute(key.as_bytes())))
    }
}
