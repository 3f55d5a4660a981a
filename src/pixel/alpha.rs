//! Alpha channel removal by compositing against the run background.

use crate::error::{DicomizeError, Result};

use super::{BackgroundColor, PixelBuffer};

/// Composites tiles with an alpha channel onto a fixed background color.
///
/// `out = (fg * a + bg * (max - a)) / max`, evaluated in integers at the
/// source bit depth with round-to-nearest. A zero alpha yields the background
/// exactly; a full alpha yields the foreground exactly.
#[derive(Debug, Clone, Copy)]
pub struct AlphaNormalizer {
    background: BackgroundColor,
}

impl AlphaNormalizer {
    /// Create a normalizer for the run's background color.
    pub fn new(background: BackgroundColor) -> Self {
        Self { background }
    }

    /// The background color pixels are composited against.
    pub fn background(&self) -> BackgroundColor {
        self.background
    }

    /// Return an opaque three-channel version of `buffer`.
    ///
    /// Three-channel input is returned untouched.
    pub fn normalize(&self, buffer: PixelBuffer) -> Result<PixelBuffer> {
        match buffer.samples_per_pixel {
            3 => Ok(buffer),
            4 => Ok(self.composite(&buffer)),
            n => Err(DicomizeError::pixel_format(format!(
                "expected 3 or 4 samples per pixel, got {}",
                n
            ))),
        }
    }

    fn composite(&self, buffer: &PixelBuffer) -> PixelBuffer {
        let max = buffer.max_sample_value() as u64;
        let bits = buffer.bits_per_sample;
        let background = [
            self.background.sample(0, bits) as u64,
            self.background.sample(1, bits) as u64,
            self.background.sample(2, bits) as u64,
        ];

        let pixels = buffer.width as usize * buffer.height as usize;
        let mut out = PixelBuffer {
            width: buffer.width,
            height: buffer.height,
            samples_per_pixel: 3,
            bits_per_sample: bits,
            encoding: buffer.encoding,
            data: vec![0; pixels * 3 * buffer.bytes_per_sample()],
        };

        for pixel in 0..pixels {
            let alpha = buffer.sample(pixel * 4 + 3) as u64;
            for (channel, bg) in background.iter().enumerate() {
                let fg = buffer.sample(pixel * 4 + channel) as u64;
                let value = (fg * alpha + bg * (max - alpha) + max / 2) / max;
                out.set_sample(pixel * 3 + channel, value as u16);
            }
        }

        out
    }
}
