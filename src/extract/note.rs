//! Page artifacts of standalone notes

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{ImageFormat, RgbaImage};
use log::{info, warn};

use super::engine::{PageRenderer, RenderOutcome};
use super::report::PageFailure;
use crate::cache::PageExtractInfo;
use crate::note::{NoteDocument, StrokeRasterizer, flatten_onto};
use crate::render::{PoolConfig, RenderPool};
use crate::storage::{Scope, Storage};

const PAGE_BACKGROUND: [u8; 3] = [0xff, 0xff, 0xff];

pub(crate) struct NotePages<'a> {
    pub doc: &'a NoteDocument,
    pub storage: &'a dyn Storage,
    pub rasterizer: Arc<dyn StrokeRasterizer>,
    pub pool: PoolConfig,
    pub out_dir: &'a Path,
    pub stem: &'a str,
}

impl NotePages<'_> {
    /// `<stem>_page_<index + 1>.png`
    fn artifact_path(&self, index: usize) -> PathBuf {
        self.out_dir
            .join(format!("{}_page_{}.png", self.stem, index + 1))
    }
}

impl PageRenderer for NotePages<'_> {
    fn render(&mut self, pages: &[PageExtractInfo]) -> RenderOutcome {
        info!("Rendering {} pages of {}", pages.len(), self.stem);
        let indices: Vec<usize> = pages.iter().map(|p| p.index).collect();

        let batch = {
            let mut pool = RenderPool::new(Arc::clone(&self.rasterizer), self.pool.clone());
            pool.render_pages(self.doc, &indices)
        };

        let mut outcome = RenderOutcome::default();
        for page in pages {
            let Some(image) = batch.images.get(&page.index) else {
                let reason = batch
                    .failures
                    .get(&page.index)
                    .map_or_else(|| "no image produced".to_string(), ToString::to_string);
                outcome.failures.push(PageFailure {
                    page_number: page.page_number.clone(),
                    index: page.index,
                    reason,
                });
                continue;
            };

            let path = self.artifact_path(page.index);
            match save_png(self.storage, &path, image) {
                Ok(()) => {
                    info!("Saved {}", path.display());
                    outcome.artifacts.insert(page.index, path);
                }
                Err(reason) => {
                    warn!("Failed to save page {}: {reason}", page.page_number);
                    outcome.failures.push(PageFailure {
                        page_number: page.page_number.clone(),
                        index: page.index,
                        reason,
                    });
                }
            }
        }
        outcome
    }
}

fn save_png(storage: &dyn Storage, path: &Path, image: &RgbaImage) -> Result<(), String> {
    let flat = flatten_onto(image, PAGE_BACKGROUND);
    let mut bytes = Cursor::new(Vec::new());
    flat.write_to(&mut bytes, ImageFormat::Png)
        .map_err(|e| format!("PNG encoding failed: {e}"))?;
    storage
        .write(path, bytes.get_ref(), Scope::User)
        .map_err(|e| e.to_string())
}
