//! Passthrough codec for native pixel data.

use crate::config::transfer_syntax;
use crate::error::{DicomizeError, Result};
use crate::pixel::{PixelBuffer, PixelEncoding};

use super::traits::{Codec, CodecCapabilities, CodecInfo};

/// Stores tile samples as they are (little-endian for 16-bit).
#[derive(Debug, Clone, Copy, Default)]
pub struct UncompressedCodec;

impl Codec for UncompressedCodec {
    fn encode(&self, tile: &PixelBuffer) -> Result<Vec<u8>> {
        self.check_tile(tile)?;
        Ok(tile.data.clone())
    }

    fn decode(
        &self,
        data: &[u8],
        width: u32,
        height: u32,
        samples_per_pixel: u16,
        bits_per_sample: u16,
    ) -> Result<PixelBuffer> {
        PixelBuffer::new(
            width,
            height,
            samples_per_pixel,
            bits_per_sample,
            PixelEncoding::Rgb,
            data.to_vec(),
        )
        .map_err(|e| DicomizeError::encode("Uncompressed", e.to_string()))
    }

    fn info(&self) -> CodecInfo {
        CodecInfo {
            name: "Uncompressed",
            lossy: false,
            transfer_syntax: transfer_syntax::EXPLICIT_VR_LITTLE_ENDIAN,
        }
    }

    fn capabilities(&self) -> CodecCapabilities {
        CodecCapabilities {
            max_bits_per_sample: 16,
            samples_per_pixel: 3,
            input_encoding: PixelEncoding::Rgb,
            supports_decode: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel::BackgroundColor;

    #[test]
    fn test_uniform_tile_round_trips() {
        let tile = PixelBuffer::filled(16, 16, 3, 8, BackgroundColor::new(12, 34, 56));
        let codec = UncompressedCodec;

        let encoded = codec.encode(&tile).unwrap();
        assert_eq!(encoded.len(), 16 * 16 * 3);

        let decoded = codec.decode(&encoded, 16, 16, 3, 8).unwrap();
        assert_eq!(decoded, tile);
    }

    #[test]
    fn test_sixteen_bit_is_accepted() {
        let tile = PixelBuffer::filled(2, 2, 3, 16, BackgroundColor::WHITE);
        let encoded = UncompressedCodec.encode(&tile).unwrap();
        assert_eq!(encoded.len(), 24);
    }

    #[test]
    fn test_decode_checks_length() {
        assert!(UncompressedCodec.decode(&[0; 5], 2, 2, 3, 8).is_err());
    }

    #[test]
    fn test_rejects_alpha() {
        let tile = PixelBuffer::filled(2, 2, 4, 8, BackgroundColor::WHITE);
        assert!(UncompressedCodec.encode(&tile).is_err());
    }
}
