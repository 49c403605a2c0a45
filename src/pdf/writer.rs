//! Minimal image-only PDF writer
//!
//! Each image becomes one page whose media box equals its pixel size, with
//! the pixels stored as a FlateDecode RGB image XObject.

use std::io::Write;

use flate2::Compression;
use flate2::write::ZlibEncoder;
use image::DynamicImage;

/// Serialize `images` as a multi-page PDF, one page per image
pub fn images_to_pdf(images: &[DynamicImage]) -> Result<Vec<u8>, std::io::Error> {
    let mut pdf = PdfBuilder::new();

    // 1: catalog, 2: page tree, then page/image/content triples
    let page_ids: Vec<usize> = (0..images.len()).map(|i| 3 + i * 3).collect();

    pdf.object(1, b"<< /Type /Catalog /Pages 2 0 R >>")?;

    let kids = page_ids
        .iter()
        .map(|id| format!("{id} 0 R"))
        .collect::<Vec<_>>()
        .join(" ");
    pdf.object(
        2,
        format!("<< /Type /Pages /Kids [{kids}] /Count {} >>", images.len()).as_bytes(),
    )?;

    for (image, &page_id) in images.iter().zip(&page_ids) {
        let image_id = page_id + 1;
        let content_id = page_id + 2;
        let (width, height) = (image.width(), image.height());

        pdf.object(
            page_id,
            format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {width} {height}] \
                 /Resources << /XObject << /Im0 {image_id} 0 R >> >> \
                 /Contents {content_id} 0 R >>"
            )
            .as_bytes(),
        )?;

        let pixels = compress(image.to_rgb8().as_raw())?;
        pdf.stream(
            image_id,
            &format!(
                "/Type /XObject /Subtype /Image /Width {width} /Height {height} \
                 /ColorSpace /DeviceRGB /BitsPerComponent 8 /Filter /FlateDecode"
            ),
            &pixels,
        )?;

        let content = format!("q {width} 0 0 {height} 0 0 cm /Im0 Do Q");
        pdf.stream(content_id, "", content.as_bytes())?;
    }

    pdf.finish(2 + images.len() * 3)
}

fn compress(data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

struct PdfBuilder {
    out: Vec<u8>,
    /// `(object id, byte offset)`
    offsets: Vec<(usize, usize)>,
}

impl PdfBuilder {
    fn new() -> Self {
        let mut out = Vec::new();
        out.extend_from_slice(b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n");
        Self {
            out,
            offsets: Vec::new(),
        }
    }

    fn object(&mut self, id: usize, body: &[u8]) -> Result<(), std::io::Error> {
        self.offsets.push((id, self.out.len()));
        writeln!(self.out, "{id} 0 obj")?;
        self.out.extend_from_slice(body);
        self.out.extend_from_slice(b"\nendobj\n");
        Ok(())
    }

    fn stream(&mut self, id: usize, dict: &str, data: &[u8]) -> Result<(), std::io::Error> {
        self.offsets.push((id, self.out.len()));
        write!(
            self.out,
            "{id} 0 obj\n<< {dict} /Length {} >>\nstream\n",
            data.len()
        )?;
        self.out.extend_from_slice(data);
        self.out.extend_from_slice(b"\nendstream\nendobj\n");
        Ok(())
    }

    fn finish(mut self, object_count: usize) -> Result<Vec<u8>, std::io::Error> {
        self.offsets.sort_by_key(|(id, _)| *id);
        let xref_offset = self.out.len();
        writeln!(self.out, "xref\n0 {}", object_count + 1)?;
        self.out.extend_from_slice(b"0000000000 65535 f \n");
        for (_, offset) in &self.offsets {
            writeln!(self.out, "{offset:010} 00000 n ")?;
        }
        write!(
            self.out,
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_offset}\n%%EOF\n",
            object_count + 1
        )?;
        Ok(self.out)
    }
}
