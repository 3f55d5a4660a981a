//! Tile pixel buffers and per-tile pixel normalization.
//!
//! Every tile travels through the pipeline as a [`PixelBuffer`]: interleaved
//! samples, 8 or 16 bits each (16-bit samples are little-endian), tagged with
//! the [`PixelEncoding`] they are currently expressed in.
//!
//! - [`AlphaNormalizer`] composites RGBA tiles against the run's background.
//! - [`ColorSpaceConverter`] brings opaque RGB tiles into the encoding the
//!   selected transfer syntax requires.

mod alpha;
mod color;

pub use alpha::AlphaNormalizer;
pub use color::ColorSpaceConverter;

use serde::{Deserialize, Serialize};

use crate::error::{DicomizeError, Result};

/// Pixel encoding of tile samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelEncoding {
    /// Red, green, blue.
    Rgb,
    /// ITU-R BT.601 full-range luma and chroma.
    YCbCr,
    /// Indexed color through a palette lookup table.
    Palette,
}

impl PixelEncoding {
    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            PixelEncoding::Rgb => "RGB",
            PixelEncoding::YCbCr => "YCbCr",
            PixelEncoding::Palette => "Palette",
        }
    }
}

/// Background color used for alpha compositing and edge padding.
///
/// Resolved once per conversion and passed by value to every component that
/// needs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackgroundColor {
    /// Red component.
    pub r: u8,
    /// Green component.
    pub g: u8,
    /// Blue component.
    pub b: u8,
}

impl BackgroundColor {
    /// Opaque white, the default slide background.
    pub const WHITE: BackgroundColor = BackgroundColor { r: 255, g: 255, b: 255 };

    /// Create a background color from its components.
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Resolve the run background: explicit override, then reader hint, then white.
    pub fn resolve(override_color: Option<[u8; 3]>, hint: Option<[u8; 3]>) -> Self {
        match override_color.or(hint) {
            Some([r, g, b]) => Self::new(r, g, b),
            None => {
                log::debug!("No background color hint, using white");
                Self::WHITE
            }
        }
    }

    /// Components as an array.
    pub fn to_array(self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }

    /// Component scaled to the given bit depth (8 → 16 bits multiplies by 257).
    pub fn sample(self, channel: usize, bits_per_sample: u16) -> u16 {
        let value = self.to_array()[channel] as u16;
        if bits_per_sample > 8 {
            value * 257
        } else {
            value
        }
    }
}

impl Default for BackgroundColor {
    fn default() -> Self {
        Self::WHITE
    }
}

/// Interleaved tile pixel data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Samples per pixel (3 = RGB/YCbCr, 4 = RGBA).
    pub samples_per_pixel: u16,
    /// Bits per sample (8 or 16).
    pub bits_per_sample: u16,
    /// Encoding of the color samples.
    pub encoding: PixelEncoding,
    /// Raw sample bytes, row-major, interleaved.
    pub data: Vec<u8>,
}

impl PixelBuffer {
    /// Create a buffer, validating bit depth and data length.
    pub fn new(
        width: u32,
        height: u32,
        samples_per_pixel: u16,
        bits_per_sample: u16,
        encoding: PixelEncoding,
        data: Vec<u8>,
    ) -> Result<Self> {
        if bits_per_sample != 8 && bits_per_sample != 16 {
            return Err(DicomizeError::pixel_format(format!(
                "unsupported bit depth {}",
                bits_per_sample
            )));
        }
        let buffer = Self {
            width,
            height,
            samples_per_pixel,
            bits_per_sample,
            encoding,
            data,
        };
        let expected = buffer.expected_size();
        if buffer.data.len() != expected {
            return Err(DicomizeError::pixel_format(format!(
                "pixel data size mismatch: expected {} bytes, got {}",
                expected,
                buffer.data.len()
            )));
        }
        Ok(buffer)
    }

    /// Create an 8-bit RGB buffer.
    pub fn rgb8(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        Self::new(width, height, 3, 8, PixelEncoding::Rgb, data)
    }

    /// Create an 8-bit RGBA buffer.
    pub fn rgba8(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        Self::new(width, height, 4, 8, PixelEncoding::Rgb, data)
    }

    /// Create a buffer where every pixel holds the given background color.
    ///
    /// A fourth (alpha) channel, if requested, is fully opaque.
    pub fn filled(
        width: u32,
        height: u32,
        samples_per_pixel: u16,
        bits_per_sample: u16,
        background: BackgroundColor,
    ) -> Self {
        let pixel = background_pixel(samples_per_pixel, bits_per_sample, background);
        let count = width as usize * height as usize;
        let mut data = Vec::with_capacity(count * pixel.len());
        for _ in 0..count {
            data.extend_from_slice(&pixel);
        }
        Self {
            width,
            height,
            samples_per_pixel,
            bits_per_sample,
            encoding: PixelEncoding::Rgb,
            data,
        }
    }

    /// Bytes used by a single sample.
    pub fn bytes_per_sample(&self) -> usize {
        ((self.bits_per_sample + 7) / 8) as usize
    }

    /// Bytes used by a single pixel.
    pub fn bytes_per_pixel(&self) -> usize {
        self.bytes_per_sample() * self.samples_per_pixel as usize
    }

    /// Largest representable sample value.
    pub fn max_sample_value(&self) -> u32 {
        (1u32 << self.bits_per_sample) - 1
    }

    /// Expected length of `data` in bytes.
    pub fn expected_size(&self) -> usize {
        self.width as usize * self.height as usize * self.bytes_per_pixel()
    }

    /// Whether the buffer carries an alpha channel.
    pub fn has_alpha(&self) -> bool {
        self.samples_per_pixel == 4
    }

    /// Read sample `index` (counted in samples, not bytes).
    pub fn sample(&self, index: usize) -> u16 {
        if self.bits_per_sample > 8 {
            u16::from_le_bytes([self.data[index * 2], self.data[index * 2 + 1]])
        } else {
            self.data[index] as u16
        }
    }

    /// Write sample `index` (counted in samples, not bytes).
    pub fn set_sample(&mut self, index: usize, value: u16) {
        if self.bits_per_sample > 8 {
            let bytes = value.to_le_bytes();
            self.data[index * 2] = bytes[0];
            self.data[index * 2 + 1] = bytes[1];
        } else {
            self.data[index] = value as u8;
        }
    }

    /// Whether every pixel has the same sample values.
    pub fn is_uniform(&self) -> bool {
        let pixel = self.bytes_per_pixel();
        match self.data.get(..pixel) {
            Some(first) => self.data.chunks_exact(pixel).all(|p| p == first),
            None => true,
        }
    }

    /// Pad the buffer to `width` x `height`, filling new pixels with the background.
    ///
    /// The existing pixels keep their position in the top-left corner. A buffer
    /// already at the requested size is returned unchanged.
    pub fn pad_to(self, width: u32, height: u32, background: BackgroundColor) -> Result<Self> {
        if self.width == width && self.height == height {
            return Ok(self);
        }
        if self.width > width || self.height > height {
            return Err(DicomizeError::pixel_format(format!(
                "{}x{} region does not fit in a {}x{} tile",
                self.width, self.height, width, height
            )));
        }

        let mut padded = Self::filled(
            width,
            height,
            self.samples_per_pixel,
            self.bits_per_sample,
            background,
        );
        padded.encoding = self.encoding;

        let src_stride = self.width as usize * self.bytes_per_pixel();
        let dst_stride = width as usize * self.bytes_per_pixel();
        for (row, src) in self.data.chunks_exact(src_stride.max(1)).enumerate() {
            if src_stride == 0 {
                break;
            }
            let start = row * dst_stride;
            padded.data[start..start + src_stride].copy_from_slice(src);
        }
        Ok(padded)
    }
}

/// Byte pattern of one background pixel at the given layout.
fn background_pixel(samples_per_pixel: u16, bits_per_sample: u16, background: BackgroundColor) -> Vec<u8> {
    let wide = bits_per_sample > 8;
    let mut pixel = Vec::with_capacity(samples_per_pixel as usize * 2);
    for channel in 0..samples_per_pixel as usize {
        let value = if channel < 3 {
            background.sample(channel, bits_per_sample)
        } else if wide {
            u16::MAX
        } else {
            u8::MAX as u16
        };
        if wide {
            pixel.extend_from_slice(&value.to_le_bytes());
        } else {
            pixel.push(value as u8);
        }
    }
    pixel
}
