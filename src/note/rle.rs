//! `RATTA_RLE` layer bitmap decoder
//!
//! The stream is a sequence of `(color, length)` byte pairs. A length with
//! the high bit set is held and either combined with the next pair of the
//! same color or flushed as a multiple of 128 pixels. `0xff` is a fixed
//! 0x4000 pixel run.

pub const COLOR_BLACK: u8 = 0x61;
pub const COLOR_BACKGROUND: u8 = 0x62;
pub const COLOR_DARK_GRAY: u8 = 0x63;
pub const COLOR_GRAY: u8 = 0x64;
pub const COLOR_WHITE: u8 = 0x65;
pub const COLOR_MARKER_BLACK: u8 = 0x66;
pub const COLOR_MARKER_DARK_GRAY: u8 = 0x67;
pub const COLOR_MARKER_GRAY: u8 = 0x68;

const SPECIAL_LENGTH_MARKER: u8 = 0xff;
const SPECIAL_LENGTH: usize = 0x4000;

#[derive(Debug, thiserror::Error)]
pub enum RleError {
    #[error("decoded {actual} pixels, expected {expected}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// Decode into one color code per pixel, row-major
pub fn decode(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>, RleError> {
    let expected = width as usize * height as usize;
    let mut out: Vec<u8> = Vec::with_capacity(expected);
    let mut holder: Option<(u8, u8)> = None;

    let push = |out: &mut Vec<u8>, color: u8, run: usize| -> Result<(), RleError> {
        if out.len() + run > expected {
            return Err(RleError::LengthMismatch {
                expected,
                actual: out.len() + run,
            });
        }
        out.resize(out.len() + run, color);
        Ok(())
    };

    for pair in data.chunks_exact(2) {
        let (color, length) = (pair[0], pair[1]);

        if let Some((held_color, held_length)) = holder.take() {
            if color == held_color {
                let run = 1 + length as usize + (((held_length & 0x7f) as usize + 1) << 7);
                push(&mut out, color, run)?;
                continue;
            }
            push(&mut out, held_color, ((held_length & 0x7f) as usize + 1) << 7)?;
        }

        if length == SPECIAL_LENGTH_MARKER {
            push(&mut out, color, SPECIAL_LENGTH)?;
        } else if length & 0x80 != 0 {
            holder = Some((color, length));
        } else {
            push(&mut out, color, length as usize + 1)?;
        }
    }

    if let Some((color, length)) = holder {
        let run = adjust_tail_length(length, out.len(), expected);
        if run > 0 {
            push(&mut out, color, run)?;
        }
    }

    if out.len() != expected {
        return Err(RleError::LengthMismatch {
            expected,
            actual: out.len(),
        });
    }
    Ok(out)
}

/// A held run at the end of the stream is truncated to the largest
/// power-of-two multiple that still fits the page.
fn adjust_tail_length(length: u8, current: usize, total: usize) -> usize {
    let gap = total.saturating_sub(current);
    for shift in (0..8).rev() {
        let run = ((length & 0x7f) as usize + 1) << shift;
        if run <= gap {
            return run;
        }
    }
    0
}

/// RGBA for a color code; `None` for transparent background
pub fn color_rgba(code: u8) -> Option<[u8; 4]> {
    match code {
        COLOR_BACKGROUND => None,
        COLOR_BLACK | COLOR_MARKER_BLACK => Some([0x00, 0x00, 0x00, 0xff]),
        COLOR_DARK_GRAY | COLOR_MARKER_DARK_GRAY => Some([0x9d, 0x9d, 0x9d, 0xff]),
        COLOR_GRAY | COLOR_MARKER_GRAY => Some([0xc9, 0xc9, 0xc9, 0xff]),
        COLOR_WHITE => Some([0xfe, 0xfe, 0xfe, 0xff]),
        // Newer firmware stores the gray level directly
        gray => Some([gray, gray, gray, 0xff]),
    }
}

/// Encode color codes as plain runs of at most 128 pixels
pub fn encode(pixels: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < pixels.len() {
        let color = pixels[i];
        let mut run = 1;
        while i + run < pixels.len() && pixels[i + run] == color && run < 128 {
            run += 1;
        }
        out.push(color);
        out.push((run - 1) as u8);
        i += run;
    }
    out
}
