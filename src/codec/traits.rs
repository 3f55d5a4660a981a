//! Codec trait definitions.

use crate::error::{DicomizeError, Result};
use crate::pixel::{PixelBuffer, PixelEncoding};

/// Information about a codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecInfo {
    /// Human-readable codec name, used in error messages.
    pub name: &'static str,
    /// Whether encoding discards information.
    pub lossy: bool,
    /// DICOM Transfer Syntax UID of the produced frames.
    pub transfer_syntax: &'static str,
}

/// What a codec accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecCapabilities {
    /// Maximum supported bits per sample.
    pub max_bits_per_sample: u16,
    /// Required samples per pixel.
    pub samples_per_pixel: u16,
    /// Pixel encoding tiles must already be in.
    pub input_encoding: PixelEncoding,
    /// Whether [`Codec::decode`] is available.
    pub supports_decode: bool,
}

/// Trait for tile encoders.
pub trait Codec: Send + Sync {
    /// Encode one opaque tile into a frame.
    fn encode(&self, tile: &PixelBuffer) -> Result<Vec<u8>>;

    /// Decode a frame back into pixels.
    ///
    /// # Arguments
    /// * `data` - Encoded frame
    /// * `width` - Frame width in pixels
    /// * `height` - Frame height in pixels
    /// * `samples_per_pixel` - Samples per pixel of the encoded tile
    /// * `bits_per_sample` - Bits per sample of the encoded tile
    fn decode(
        &self,
        _data: &[u8],
        _width: u32,
        _height: u32,
        _samples_per_pixel: u16,
        _bits_per_sample: u16,
    ) -> Result<PixelBuffer> {
        Err(DicomizeError::encode(
            self.info().name,
            "decoding is not supported",
        ))
    }

    /// Get codec information.
    fn info(&self) -> CodecInfo;

    /// Get codec capabilities.
    fn capabilities(&self) -> CodecCapabilities;

    /// Whether the codec can handle the given tile.
    fn can_encode(&self, tile: &PixelBuffer) -> bool {
        self.check_tile(tile).is_ok()
    }

    /// Reject tiles the codec cannot handle with an encode error.
    fn check_tile(&self, tile: &PixelBuffer) -> Result<()> {
        let caps = self.capabilities();
        let name = self.info().name;
        if tile.bits_per_sample > caps.max_bits_per_sample {
            return Err(DicomizeError::encode(
                name,
                format!(
                    "{}-bit samples exceed the {}-bit limit",
                    tile.bits_per_sample, caps.max_bits_per_sample
                ),
            ));
        }
        if tile.samples_per_pixel != caps.samples_per_pixel {
            return Err(DicomizeError::encode(
                name,
                format!(
                    "expected {} samples per pixel, got {}",
                    caps.samples_per_pixel, tile.samples_per_pixel
                ),
            ));
        }
        if tile.encoding != caps.input_encoding {
            return Err(DicomizeError::encode(
                name,
                format!(
                    "expected {} pixels, got {}",
                    caps.input_encoding.name(),
                    tile.encoding.name()
                ),
            ));
        }
        if tile.width == 0 || tile.height == 0 {
            return Err(DicomizeError::encode(name, "empty tile"));
        }
        Ok(())
    }
}
