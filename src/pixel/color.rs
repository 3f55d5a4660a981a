//! RGB to transfer-syntax pixel encoding conversion.

use crate::error::{DicomizeError, Result};

use super::{PixelBuffer, PixelEncoding};

/// Converts opaque tiles into the pixel encoding a transfer syntax requires.
///
/// Stateless. A buffer already in the target encoding is returned as is, so
/// applying the converter twice never converts twice.
#[derive(Debug, Clone, Copy, Default)]
pub struct ColorSpaceConverter;

impl ColorSpaceConverter {
    /// Create a converter.
    pub fn new() -> Self {
        Self
    }

    /// Convert `buffer` to `target`.
    pub fn convert(&self, buffer: PixelBuffer, target: PixelEncoding) -> Result<PixelBuffer> {
        if buffer.encoding == target {
            return Ok(buffer);
        }
        if buffer.samples_per_pixel != 3 {
            return Err(DicomizeError::pixel_format(format!(
                "color conversion needs 3 samples per pixel, got {}",
                buffer.samples_per_pixel
            )));
        }

        match (buffer.encoding, target) {
            (PixelEncoding::Rgb, PixelEncoding::YCbCr) => Ok(rgb_to_ycbcr(buffer)),
            (from, to) => Err(DicomizeError::pixel_format(format!(
                "cannot convert {} pixels to {}",
                from.name(),
                to.name()
            ))),
        }
    }
}

/// ITU-R BT.601 full-range (JFIF) RGB to YCbCr.
fn rgb_to_ycbcr(mut buffer: PixelBuffer) -> PixelBuffer {
    let max = buffer.max_sample_value() as f64;
    let half = (max + 1.0) / 2.0;
    let pixels = buffer.width as usize * buffer.height as usize;

    for pixel in 0..pixels {
        let base = pixel * 3;
        let r = buffer.sample(base) as f64;
        let g = buffer.sample(base + 1) as f64;
        let b = buffer.sample(base + 2) as f64;

        let y = 0.299 * r + 0.587 * g + 0.114 * b;
        let cb = half - 0.168736 * r - 0.331264 * g + 0.5 * b;
        let cr = half + 0.5 * r - 0.418688 * g - 0.081312 * b;

        buffer.set_sample(base, clamp_sample(y, max));
        buffer.set_sample(base + 1, clamp_sample(cb, max));
        buffer.set_sample(base + 2, clamp_sample(cr, max));
    }

    buffer.encoding = PixelEncoding::YCbCr;
    buffer
}

fn clamp_sample(value: f64, max: f64) -> u16 {
    value.round().clamp(0.0, max) as u16
}
