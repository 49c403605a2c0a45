//! Turning a page's encoded layers into pixels

use image::{Rgba, RgbaImage};

use super::format::{LayerProtocol, PageStrokes};
use super::rle::{self, RleError};

#[derive(Debug, thiserror::Error)]
pub enum RasterError {
    #[error("layer {layer}: {source}")]
    Rle {
        layer: String,
        #[source]
        source: RleError,
    },

    #[error("layer {layer}: {source}")]
    Png {
        layer: String,
        #[source]
        source: image::ImageError,
    },

    #[error("{detail}")]
    Generic { detail: String },
}

impl RasterError {
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic { detail: msg.into() }
    }
}

/// Converts one page's stroke data into a bitmap.
///
/// Implementations must be safe to call from several render workers at once.
pub trait StrokeRasterizer: Send + Sync {
    fn rasterize(&self, page: &PageStrokes) -> Result<RgbaImage, RasterError>;
}

/// Decoder for the device's own layer encodings
#[derive(Clone, Copy, Debug, Default)]
pub struct RattaRasterizer;

impl StrokeRasterizer for RattaRasterizer {
    fn rasterize(&self, page: &PageStrokes) -> Result<RgbaImage, RasterError> {
        let mut canvas = RgbaImage::new(page.width, page.height);

        for layer in &page.layers {
            match &layer.protocol {
                LayerProtocol::RattaRle => {
                    let codes = rle::decode(&layer.bitmap, page.width, page.height).map_err(
                        |source| RasterError::Rle {
                            layer: layer.name.to_string(),
                            source,
                        },
                    )?;
                    for (pixel, &code) in canvas.pixels_mut().zip(codes.iter()) {
                        if let Some(rgba) = rle::color_rgba(code) {
                            *pixel = Rgba(rgba);
                        }
                    }
                }
                LayerProtocol::Png => {
                    let decoded = image::load_from_memory(&layer.bitmap)
                        .map_err(|source| RasterError::Png {
                            layer: layer.name.to_string(),
                            source,
                        })?
                        .to_rgba8();
                    image::imageops::overlay(&mut canvas, &decoded, 0, 0);
                }
                LayerProtocol::Other(name) => {
                    log::warn!(
                        "Skipping layer {} of page {} with unknown protocol {name}",
                        layer.name,
                        page.index + 1
                    );
                }
            }
        }

        Ok(canvas)
    }
}

/// Composite `image` over an opaque background color
pub fn flatten_onto(image: &RgbaImage, background: [u8; 3]) -> RgbaImage {
    let mut out = RgbaImage::from_pixel(
        image.width(),
        image.height(),
        Rgba([background[0], background[1], background[2], 0xff]),
    );
    image::imageops::overlay(&mut out, image, 0, 0);
    out
}
