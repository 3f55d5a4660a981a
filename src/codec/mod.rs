//! Tile codecs and their DICOM transfer-syntax bindings.
//!
//! This module provides the `Codec` trait and implementations for:
//! - Native (uncompressed) pixel data
//! - Baseline JPEG (via jpeg-encoder)
//! - JPEG 2000, reversible and irreversible (native encoder)
//!
//! [`CodecAdapter`] is the closed set of codecs a conversion can run with.

mod jpeg;
mod jpeg2000;
mod traits;
mod uncompressed;

pub use jpeg::JpegCodec;
pub use jpeg2000::{Jpeg2000Codec, Jpeg2000Mode};
pub use traits::{Codec, CodecCapabilities, CodecInfo};
pub use uncompressed::UncompressedCodec;

use crate::config::{CodecChoice, ConversionConfig, TransferSyntaxBinding};
use crate::error::{DicomizeError, Result};
use crate::pixel::{PixelBuffer, PixelEncoding};

/// Codec selected for a conversion run.
#[derive(Debug, Clone, Copy)]
pub enum CodecAdapter {
    /// Native pixel data.
    Uncompressed(UncompressedCodec),
    /// Baseline JPEG.
    BaselineJpeg(JpegCodec),
    /// Reversible JPEG 2000.
    Jpeg2000Lossless(Jpeg2000Codec),
    /// Irreversible JPEG 2000.
    Jpeg2000Lossy(Jpeg2000Codec),
}

impl CodecAdapter {
    /// Native pixel data codec.
    pub fn uncompressed() -> Self {
        Self::Uncompressed(UncompressedCodec)
    }

    /// Baseline JPEG at `quality`.
    pub fn baseline_jpeg(quality: u8) -> Self {
        Self::BaselineJpeg(JpegCodec::new(quality))
    }

    /// Lossless JPEG 2000.
    pub fn jpeg2000_lossless() -> Self {
        Self::Jpeg2000Lossless(Jpeg2000Codec::lossless())
    }

    /// Lossy JPEG 2000 at `quality`.
    pub fn jpeg2000_lossy(quality: u8) -> Self {
        Self::Jpeg2000Lossy(Jpeg2000Codec::lossy(quality))
    }

    /// Create the codec a configuration asks for.
    pub fn from_config(config: &ConversionConfig) -> Self {
        match config.codec {
            CodecChoice::Uncompressed => Self::uncompressed(),
            CodecChoice::Jpeg => Self::baseline_jpeg(config.jpeg_quality),
            CodecChoice::Jpeg2000Lossless => Self::jpeg2000_lossless(),
            CodecChoice::Jpeg2000 => Self::jpeg2000_lossy(config.jpeg2000_quality),
        }
    }

    /// The configuration choice this codec corresponds to.
    pub fn choice(&self) -> CodecChoice {
        match self {
            Self::Uncompressed(_) => CodecChoice::Uncompressed,
            Self::BaselineJpeg(_) => CodecChoice::Jpeg,
            Self::Jpeg2000Lossless(_) => CodecChoice::Jpeg2000Lossless,
            Self::Jpeg2000Lossy(_) => CodecChoice::Jpeg2000,
        }
    }

    /// Transfer-syntax binding of the produced frames.
    pub fn binding(&self) -> TransferSyntaxBinding {
        self.choice().binding()
    }

    /// DICOM Transfer Syntax UID of the produced frames.
    pub fn transfer_syntax_uid(&self) -> &'static str {
        self.codec().info().transfer_syntax
    }

    /// Pixel encoding tiles must be converted to before encoding.
    pub fn required_pixel_encoding(&self) -> PixelEncoding {
        self.codec().capabilities().input_encoding
    }

    /// Codec name.
    pub fn name(&self) -> &'static str {
        self.codec().info().name
    }

    /// The underlying codec.
    pub fn codec(&self) -> &dyn Codec {
        match self {
            Self::Uncompressed(codec) => codec,
            Self::BaselineJpeg(codec) => codec,
            Self::Jpeg2000Lossless(codec) | Self::Jpeg2000Lossy(codec) => codec,
        }
    }

    /// Encode a full-size tile.
    ///
    /// The buffer must already be padded to the run tile size.
    pub fn encode(&self, tile: &PixelBuffer, tile_width: u32, tile_height: u32) -> Result<Vec<u8>> {
        if tile.width != tile_width || tile.height != tile_height {
            return Err(DicomizeError::encode(
                self.name(),
                format!(
                    "{}x{} buffer does not match the {}x{} tile size",
                    tile.width, tile.height, tile_width, tile_height
                ),
            ));
        }
        self.codec().encode(tile)
    }

    /// Decode a frame, for codecs that support it.
    pub fn decode(
        &self,
        data: &[u8],
        width: u32,
        height: u32,
        samples_per_pixel: u16,
        bits_per_sample: u16,
    ) -> Result<PixelBuffer> {
        self.codec()
            .decode(data, width, height, samples_per_pixel, bits_per_sample)
    }
}
