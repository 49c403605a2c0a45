//! Page artifacts of annotated PDFs
//!
//! Each mark-file page names the PDF page it annotates. Stale pages are
//! lifted out of the PDF, get their mark layer composited on top and are
//! rasterized through the fallback chain. A page nothing can rasterize is
//! kept as a standalone PDF.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::RgbaImage;
use log::{info, warn};

use super::engine::{PageRenderer, RenderOutcome};
use super::report::PageFailure;
use crate::cache::PageExtractInfo;
use crate::note::{NoteDocument, StrokeRasterizer};
use crate::pdf::{PageComposition, PdfCompositor, RasterMode, RasterOutput};
use crate::render::{PoolConfig, RenderError, RenderPool};
use crate::storage::{Scope, Storage};

const DATA_URL_PREFIX: &str = "data:image/png;base64,";

pub(crate) struct PdfPages<'a> {
    pub pdf: &'a Path,
    pub marks: &'a NoteDocument,
    pub compositor: &'a dyn PdfCompositor,
    pub storage: &'a dyn Storage,
    pub rasterizer: Arc<dyn StrokeRasterizer>,
    pub pool: PoolConfig,
    pub out_dir: &'a Path,
    pub stem: &'a str,
    pub dpi: u32,
}

enum PageResult {
    Image(PathBuf),
    Degraded(PathBuf),
}

impl PdfPages<'_> {
    fn artifact_path(&self, page_number: &str, ext: &str) -> PathBuf {
        self.out_dir
            .join(format!("{}_page_{page_number}.{ext}", self.stem))
    }

    /// Mark layers of every stale page that has strokes
    fn render_marks(
        &self,
        pages: &[PageExtractInfo],
    ) -> (BTreeMap<usize, RgbaImage>, BTreeMap<usize, RenderError>) {
        let strokes: Vec<_> = pages
            .iter()
            .filter(|p| p.marks_count > 0)
            .filter_map(|p| self.marks.page(p.index))
            .map(|p| p.strokes.without_background())
            .collect();
        if strokes.is_empty() {
            return (BTreeMap::new(), BTreeMap::new());
        }

        let mut pool = RenderPool::new(Arc::clone(&self.rasterizer), self.pool.clone());
        let batch = pool.render(strokes);
        (batch.images, batch.failures)
    }

    fn process_page(
        &self,
        page: &PageExtractInfo,
        marks: Option<RgbaImage>,
    ) -> Result<PageResult, String> {
        let page_index = page
            .page_number
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .ok_or_else(|| format!("page number {:?} is not a PDF page", page.page_number))?;

        let mut composition = self
            .compositor
            .extract_page(self.pdf, page_index)
            .map_err(|e| format!("failed to extract page: {e}"))?;

        if let Some(marks) = marks {
            self.compositor
                .overlay_marks(&mut composition, marks)
                .map_err(|e| format!("failed to apply marks: {e}"))?;
        }

        let target = self.artifact_path(&page.page_number, "png");
        for mode in RasterMode::FALLBACK_CHAIN {
            match self.rasterize(&composition, mode, &target) {
                Ok(true) => return Ok(PageResult::Image(target)),
                Ok(false) => {
                    info!(
                        "{mode:?} conversion of page {} produced nothing, trying next",
                        page.page_number
                    );
                }
                Err(e) => {
                    warn!(
                        "{mode:?} conversion of page {} failed: {e}",
                        page.page_number
                    );
                }
            }
        }

        warn!(
            "All conversions failed for page {}, keeping it as PDF",
            page.page_number
        );
        let pdf_path = self.artifact_path(&page.page_number, "pdf");
        let bytes = self
            .compositor
            .to_standalone_pdf(&composition)
            .map_err(|e| format!("conversion failed and PDF fallback failed: {e}"))?;
        self.storage
            .write(&pdf_path, &bytes, Scope::User)
            .map_err(|e| format!("conversion failed and PDF fallback failed: {e}"))?;
        Ok(PageResult::Degraded(pdf_path))
    }

    /// `Ok(true)` once `target` holds the PNG
    fn rasterize(
        &self,
        composition: &PageComposition,
        mode: RasterMode,
        target: &Path,
    ) -> Result<bool, String> {
        let output = self
            .compositor
            .rasterize(composition, mode, self.dpi, target)
            .map_err(|e| e.to_string())?;

        let bytes = match output {
            RasterOutput::Saved(path) => {
                return Ok(path == target && self.storage.exists(target, Scope::User));
            }
            RasterOutput::Buffer(bytes) => bytes,
            RasterOutput::Base64(text) => {
                let data = text.trim();
                let data = data.strip_prefix(DATA_URL_PREFIX).unwrap_or(data);
                STANDARD
                    .decode(data)
                    .map_err(|e| format!("invalid base64: {e}"))?
            }
        };
        if bytes.is_empty() {
            return Ok(false);
        }
        self.storage
            .write(target, &bytes, Scope::User)
            .map_err(|e| e.to_string())?;
        Ok(true)
    }
}

impl PageRenderer for PdfPages<'_> {
    fn render(&mut self, pages: &[PageExtractInfo]) -> RenderOutcome {
        info!(
            "Extracting {} marked pages from {}",
            pages.len(),
            self.pdf.display()
        );
        let (mut mark_images, mark_failures) = self.render_marks(pages);

        let mut outcome = RenderOutcome::default();
        for page in pages {
            let marks = if page.marks_count > 0 {
                match mark_images.remove(&page.index) {
                    Some(image) => Some(image),
                    None => {
                        let reason = mark_failures
                            .get(&page.index)
                            .map_or_else(|| "mark layer missing".to_string(), |e| e.to_string());
                        outcome.failures.push(PageFailure {
                            page_number: page.page_number.clone(),
                            index: page.index,
                            reason: format!("marks: {reason}"),
                        });
                        continue;
                    }
                }
            } else {
                None
            };

            match self.process_page(page, marks) {
                Ok(PageResult::Image(path)) => {
                    info!("Saved image for page {}: {}", page.page_number, path.display());
                    outcome.artifacts.insert(page.index, path);
                }
                Ok(PageResult::Degraded(path)) => {
                    outcome.degraded.insert(page.index, path);
                }
                Err(reason) => {
                    warn!("Error processing page {}: {reason}", page.page_number);
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
