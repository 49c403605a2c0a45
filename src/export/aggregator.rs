//! Bucket files built from extracted pages
//!
//! Every bucket touched by an extraction gets its generated region rewritten
//! in `<title>.md`; the reflect bucket is composed into `<title>.pdf`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::DynamicImage;
use log::{debug, info};

use super::buckets::{Bucket, BucketConfig, REFLECT_SECTION};
use super::filename::{relative_link, sanitize_filename};
use super::region::{RegionMarkers, RegionUpdate, upsert_region};
use super::template::{DAY_TEMPLATE, PLAIN_TEMPLATE, TemplateEngine, calendar_variables};
use crate::extract::ArtifactMap;
use crate::pdf::images_to_pdf;
use crate::storage::{Scope, Storage, StorageError};

/// Display width hint appended to bucket image links
const IMAGE_WIDTH: u32 = 900;

#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("failed to decode {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to compose PDF: {0}")]
    Pdf(#[source] std::io::Error),

    #[error("invalid bucket config {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("{path} is not valid UTF-8")]
    Encoding { path: PathBuf },
}

/// Read a bucket config YAML file
pub fn load_bucket_config(storage: &dyn Storage, path: &Path) -> Result<BucketConfig, AggregateError> {
    let bytes = storage.read(path, Scope::User)?;
    let text = String::from_utf8(bytes).map_err(|_| AggregateError::Encoding {
        path: path.to_path_buf(),
    })?;
    BucketConfig::from_yaml(&text).map_err(|source| AggregateError::Config {
        path: path.to_path_buf(),
        source,
    })
}

pub struct MarkdownAggregator {
    storage: Arc<dyn Storage>,
    output_dir: PathBuf,
    link_base: PathBuf,
    markers: RegionMarkers,
}

impl MarkdownAggregator {
    /// Links are written relative to the parent of `media_folder`
    pub fn new(storage: Arc<dyn Storage>, output_dir: PathBuf, media_folder: &Path) -> Self {
        let link_base = media_folder
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(media_folder)
            .to_path_buf();
        Self {
            storage,
            output_dir,
            link_base,
            markers: RegionMarkers::default(),
        }
    }

    #[must_use]
    pub fn with_markers(mut self, markers: RegionMarkers) -> Self {
        self.markers = markers;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Rewrite every bucket that holds a page from `touched`. Returns the
    /// files written.
    pub fn update_buckets(
        &self,
        artifacts: &ArtifactMap,
        touched: &BTreeSet<u32>,
        config: &BucketConfig,
    ) -> Result<Vec<PathBuf>, AggregateError> {
        let mut written = Vec::new();

        for (section, buckets) in config.sections() {
            for bucket in buckets {
                if !bucket.page_numbers.iter().any(|n| touched.contains(n)) {
                    continue;
                }
                let pages: Vec<(u32, &Path)> = bucket
                    .page_numbers
                    .iter()
                    .filter_map(|&n| artifacts.get(n).map(|path| (n, path)))
                    .collect();
                if pages.is_empty() {
                    debug!("Bucket {} has no extracted pages yet", bucket.title);
                    continue;
                }

                let path = if section == REFLECT_SECTION {
                    self.write_reflect_pdf(bucket, &pages)?
                } else {
                    self.write_bucket_markdown(bucket, &pages)?
                };
                if let Some(path) = path {
                    written.push(path);
                }
            }
        }

        info!("Updated {} bucket files", written.len());
        Ok(written)
    }

    /// One Markdown file with a section per page. `target` is either a
    /// directory or an `.md` file.
    pub fn write_note_markdown(
        &self,
        stem: &str,
        artifacts: &ArtifactMap,
        target: &Path,
    ) -> Result<PathBuf, AggregateError> {
        let path = if target
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("md"))
        {
            target.to_path_buf()
        } else {
            target.join(format!("{}.md", sanitize_filename(stem)))
        };

        let block = artifacts
            .pages()
            .iter()
            .map(|(label, artifact)| {
                format!(
                    "## Page {label}\n\n![Page {label}]({})\n",
                    relative_link(&self.link_base, artifact)
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let mut vars = std::collections::BTreeMap::new();
        vars.insert("title".to_string(), stem.to_string());
        let seed = TemplateEngine::render(PLAIN_TEMPLATE, &vars);

        self.upsert_file(&path, &block, || seed)?;
        Ok(path)
    }

    fn write_bucket_markdown(
        &self,
        bucket: &Bucket,
        pages: &[(u32, &Path)],
    ) -> Result<Option<PathBuf>, AggregateError> {
        let path = self
            .output_dir
            .join(format!("{}.md", sanitize_filename(&bucket.title)));

        let block = pages
            .iter()
            .map(|(n, artifact)| {
                format!(
                    "![Page {n}|{IMAGE_WIDTH}]({})",
                    relative_link(&self.link_base, artifact)
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let changed = self.upsert_file(&path, &block, || Self::seed(bucket))?;
        Ok(changed.then_some(path))
    }

    fn seed(bucket: &Bucket) -> String {
        match bucket.date().filter(|_| bucket.use_template) {
            Some(date) => TemplateEngine::render(DAY_TEMPLATE, &calendar_variables(&bucket.title, date)),
            None => {
                let mut vars = std::collections::BTreeMap::new();
                vars.insert("title".to_string(), bucket.title.clone());
                TemplateEngine::render(PLAIN_TEMPLATE, &vars)
            }
        }
    }

    /// Put `block` into the generated region of `path`, creating the file
    /// from `seed` when missing. `false` when the content was already current.
    fn upsert_file(
        &self,
        path: &Path,
        block: &str,
        seed: impl FnOnce() -> String,
    ) -> Result<bool, AggregateError> {
        let existing = match self.storage.read(path, Scope::User) {
            Ok(bytes) => Some(String::from_utf8(bytes).map_err(|_| AggregateError::Encoding {
                path: path.to_path_buf(),
            })?),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        };

        let base = existing.clone().unwrap_or_else(seed);
        let (content, update) = upsert_region(&base, block, &self.markers);
        if existing.as_deref() == Some(content.as_str()) {
            debug!("{} is up to date", path.display());
            return Ok(false);
        }

        self.storage.write(path, content.as_bytes(), Scope::User)?;
        match (existing.is_some(), update) {
            (false, _) => info!("Created {}", path.display()),
            (true, RegionUpdate::Replaced) => info!("Updated region in {}", path.display()),
            (true, RegionUpdate::Appended) => info!("Appended region to {}", path.display()),
        }
        Ok(true)
    }

    fn write_reflect_pdf(
        &self,
        bucket: &Bucket,
        pages: &[(u32, &Path)],
    ) -> Result<Option<PathBuf>, AggregateError> {
        let images = pages
            .iter()
            .map(|(_, artifact)| self.load_image(artifact))
            .collect::<Result<Vec<DynamicImage>, _>>()?;

        let bytes = images_to_pdf(&images).map_err(AggregateError::Pdf)?;
        let path = self
            .output_dir
            .join(format!("{}.pdf", sanitize_filename(&bucket.title)));
        self.storage.write(&path, &bytes, Scope::User)?;
        info!("Composed {} pages into {}", images.len(), path.display());
        Ok(Some(path))
    }

    fn load_image(&self, path: &Path) -> Result<DynamicImage, AggregateError> {
        let bytes = self.storage.read(path, Scope::User)?;
        image::load_from_memory(&bytes).map_err(|source| AggregateError::Image {
            path: path.to_path_buf(),
            source,
        })
    }
}
