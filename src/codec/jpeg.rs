//! Baseline JPEG codec.
//!
//! Tiles arrive already converted to YCbCr, so the encoder is fed YCbCr
//! samples directly and performs no color conversion of its own.

use image::ImageFormat;
use jpeg_encoder::{ColorType, Encoder};

use crate::config::{transfer_syntax, DEFAULT_JPEG_QUALITY};
use crate::error::{DicomizeError, Result};
use crate::pixel::{PixelBuffer, PixelEncoding};

use super::traits::{Codec, CodecCapabilities, CodecInfo};

const NAME: &str = "JPEG Baseline";

/// Baseline (8-bit, Huffman) JPEG codec.
#[derive(Debug, Clone, Copy)]
pub struct JpegCodec {
    quality: u8,
}

impl JpegCodec {
    /// Create a codec with the given quality (clamped to 1-100).
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    /// Encoder quality.
    pub fn quality(&self) -> u8 {
        self.quality
    }
}

impl Default for JpegCodec {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

impl Codec for JpegCodec {
    fn encode(&self, tile: &PixelBuffer) -> Result<Vec<u8>> {
        self.check_tile(tile)?;
        let width = u16::try_from(tile.width)
            .map_err(|_| DicomizeError::encode(NAME, "tile wider than 65535 pixels"))?;
        let height = u16::try_from(tile.height)
            .map_err(|_| DicomizeError::encode(NAME, "tile taller than 65535 pixels"))?;

        let mut out = Vec::new();
        let encoder = Encoder::new(&mut out, self.quality);
        encoder
            .encode(&tile.data, width, height, ColorType::Ycbcr)
            .map_err(|e| DicomizeError::encode(NAME, e.to_string()))?;

        log::debug!(
            "JPEG encoded {}x{} tile to {} bytes (quality {})",
            tile.width,
            tile.height,
            out.len(),
            self.quality
        );
        Ok(out)
    }

    /// Decode a frame to RGB samples.
    fn decode(
        &self,
        data: &[u8],
        width: u32,
        height: u32,
        _samples_per_pixel: u16,
        _bits_per_sample: u16,
    ) -> Result<PixelBuffer> {
        let image = image::load_from_memory_with_format(data, ImageFormat::Jpeg)
            .map_err(|e| DicomizeError::encode(NAME, e.to_string()))?;
        if image.width() != width || image.height() != height {
            return Err(DicomizeError::encode(
                NAME,
                format!(
                    "decoded {}x{} frame, expected {}x{}",
                    image.width(),
                    image.height(),
                    width,
                    height
                ),
            ));
        }
        PixelBuffer::rgb8(width, height, image.to_rgb8().into_raw())
    }

    fn info(&self) -> CodecInfo {
        CodecInfo {
            name: NAME,
            lossy: true,
            transfer_syntax: transfer_syntax::JPEG_BASELINE,
        }
    }

    fn capabilities(&self) -> CodecCapabilities {
        CodecCapabilities {
            max_bits_per_sample: 8,
            samples_per_pixel: 3,
            input_encoding: PixelEncoding::YCbCr,
            supports_decode: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel::{BackgroundColor, ColorSpaceConverter};

    fn ycbcr_tile(color: BackgroundColor, size: u32) -> PixelBuffer {
        ColorSpaceConverter::new()
            .convert(PixelBuffer::filled(size, size, 3, 8, color), PixelEncoding::YCbCr)
            .unwrap()
    }

    #[test]
    fn test_encode_produces_jfif() {
        let data = JpegCodec::default()
            .encode(&ycbcr_tile(BackgroundColor::WHITE, 64))
            .unwrap();
        assert_eq!(&data[0..2], &[0xFF, 0xD8]);
        assert_eq!(&data[data.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn test_round_trip_color_is_close() {
        let codec = JpegCodec::new(95);
        let color = BackgroundColor::new(200, 40, 90);
        let data = codec.encode(&ycbcr_tile(color, 32)).unwrap();

        let decoded = codec.decode(&data, 32, 32, 3, 8).unwrap();
        let center = ((16 * 32 + 16) * 3) as usize;
        for (channel, expected) in color.to_array().iter().enumerate() {
            let actual = decoded.data[center + channel] as i32;
            assert!(
                (actual - *expected as i32).abs() <= 4,
                "channel {}: {} vs {}",
                channel,
                actual,
                expected
            );
        }
    }

    #[test]
    fn test_rejects_rgb_input() {
        let tile = PixelBuffer::filled(8, 8, 3, 8, BackgroundColor::WHITE);
        let err = JpegCodec::default().encode(&tile).unwrap_err();
        assert!(matches!(err, DicomizeError::Encode { codec: NAME, .. }));
    }

    #[test]
    fn test_rejects_sixteen_bit() {
        let tile = PixelBuffer::new(2, 2, 3, 16, PixelEncoding::YCbCr, vec![0; 24]).unwrap();
        assert!(!JpegCodec::default().can_encode(&tile));
    }
}
