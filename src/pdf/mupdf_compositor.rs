//! MuPDF-backed compositor

use std::io::Cursor;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{DynamicImage, ImageFormat, RgbImage, RgbaImage};
use log::debug;
use mupdf::{Colorspace, Document, Matrix, Pixmap};

use super::compositor::{
    CompositeError, PageComposition, PdfCompositor, RasterMode, RasterOutput, stack_overlay,
};
use super::writer::images_to_pdf;

/// Density of pages written by [`PdfCompositor::to_standalone_pdf`]
const STANDALONE_DPI: u32 = 150;

#[derive(Clone, Copy, Debug, Default)]
pub struct MupdfCompositor;

impl MupdfCompositor {
    fn open(pdf: &Path) -> Result<Document, CompositeError> {
        Ok(Document::open(pdf.to_string_lossy().as_ref())?)
    }

    fn load_page(doc: &Document, page_index: usize) -> Result<mupdf::Page, CompositeError> {
        let count = doc.page_count()? as usize;
        if page_index >= count {
            return Err(CompositeError::PageOutOfRange {
                page: page_index,
                count,
            });
        }
        Ok(doc.load_page(page_index as i32)?)
    }

    /// Render the page at `dpi` with its overlay composited on top
    fn render(&self, page: &PageComposition, dpi: u32) -> Result<RgbaImage, CompositeError> {
        let doc = Self::open(&page.source)?;
        let pdf_page = Self::load_page(&doc, page.page_index)?;

        let scale = dpi as f32 / 72.0;
        let matrix = Matrix::new_scale(scale, scale);
        let pixmap = pdf_page.to_pixmap(&matrix, &Colorspace::device_rgb(), false, false)?;

        let mut raster = DynamicImage::ImageRgb8(pixmap_to_rgb(&pixmap)?).to_rgba8();
        if let Some(overlay) = &page.overlay {
            stack_overlay(&mut raster, overlay);
        }
        debug!(
            "Rendered page {} of {} at {dpi} dpi ({}x{})",
            page.page_index + 1,
            page.source.display(),
            raster.width(),
            raster.height()
        );
        Ok(raster)
    }
}

impl PdfCompositor for MupdfCompositor {
    fn page_count(&self, pdf: &Path) -> Result<usize, CompositeError> {
        Ok(Self::open(pdf)?.page_count()? as usize)
    }

    fn page_size(&self, pdf: &Path, page_index: usize) -> Result<(f32, f32), CompositeError> {
        let doc = Self::open(pdf)?;
        let bounds = Self::load_page(&doc, page_index)?.bounds()?;
        Ok((bounds.x1 - bounds.x0, bounds.y1 - bounds.y0))
    }

    fn extract_page(
        &self,
        pdf: &Path,
        page_index: usize,
    ) -> Result<PageComposition, CompositeError> {
        let (width, height) = self.page_size(pdf, page_index)?;
        Ok(PageComposition {
            source: pdf.to_path_buf(),
            page_index,
            width,
            height,
            overlay: None,
        })
    }

    fn overlay_marks(
        &self,
        page: &mut PageComposition,
        marks: RgbaImage,
    ) -> Result<(), CompositeError> {
        match &mut page.overlay {
            Some(existing) => stack_overlay(existing, &marks),
            None => page.overlay = Some(marks),
        }
        Ok(())
    }

    fn rasterize(
        &self,
        page: &PageComposition,
        mode: RasterMode,
        dpi: u32,
        target: &Path,
    ) -> Result<RasterOutput, CompositeError> {
        let raster = self.render(page, dpi)?;
        match mode {
            RasterMode::DirectSave => {
                raster.save_with_format(target, ImageFormat::Png)?;
                Ok(RasterOutput::Saved(target.to_path_buf()))
            }
            RasterMode::Buffer => Ok(RasterOutput::Buffer(encode_png(&raster)?)),
            RasterMode::Base64 => Ok(RasterOutput::Base64(STANDARD.encode(encode_png(&raster)?))),
        }
    }

    fn to_standalone_pdf(&self, page: &PageComposition) -> Result<Vec<u8>, CompositeError> {
        let raster = self.render(page, STANDALONE_DPI)?;
        images_to_pdf(&[DynamicImage::ImageRgba8(raster)])
            .map_err(|e| CompositeError::generic(format!("failed to write PDF: {e}")))
    }
}

fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, CompositeError> {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

fn pixmap_to_rgb(pixmap: &Pixmap) -> Result<RgbImage, CompositeError> {
    let n = pixmap.n() as usize;
    if n < 3 {
        return Err(CompositeError::generic(format!(
            "Unsupported pixmap format: {n} channels"
        )));
    }

    let width = pixmap.width() as usize;
    let height = pixmap.height() as usize;
    let stride = pixmap.stride() as usize;
    let samples = pixmap.samples();
    let row_bytes = width * n;
    if samples.len() < stride.saturating_mul(height) || row_bytes > stride {
        return Err(CompositeError::generic("Pixmap buffer size mismatch"));
    }

    let mut out = Vec::with_capacity(width * height * 3);
    for y in 0..height {
        let row = &samples[y * stride..y * stride + row_bytes];
        if n == 3 {
            out.extend_from_slice(row);
        } else {
            for px in row.chunks_exact(n) {
                out.extend_from_slice(&px[..3]);
            }
        }
    }

    RgbImage::from_raw(width as u32, height as u32, out)
        .ok_or_else(|| CompositeError::generic("Pixmap dimensions do not match its samples"))
}
