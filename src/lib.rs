//! Whole-Slide Image to DICOM Conversion Library
//!
//! Re-encodes every tile of a pyramidal whole-slide image into DICOM
//! multi-frame pixel data, one VL Whole Slide Microscopy instance per level.
//!
//! # Features
//!
//! - **Codecs**: uncompressed, baseline JPEG and JPEG 2000 (reversible and irreversible)
//! - **Tiling**: edge tiles padded with the slide background, frames in TILED_FULL order
//! - **Encapsulation**: basic offset table and fragment items built per frame
//! - **Parallel encoding**: bounded in-flight tiles with in-order delivery
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use wsi_dicomize::{CodecChoice, ConversionConfig, ConversionPipeline, ImagePyramidSource};
//! use wsi_dicomize::dicom::WsiDatasetBuilder;
//!
//! let source = ImagePyramidSource::open("slide.tiff", 256, None)?;
//! let pipeline = ConversionPipeline::new(ConversionConfig::with_codec(CodecChoice::Jpeg2000));
//! let writer = WsiDatasetBuilder::new().build();
//!
//! let stats = pipeline.run(&source, |level| writer.write_level(level, "out").map(|_| ()))?;
//! println!("Compression ratio: {:.2}:1", stats.compression_ratio());
//! ```
//!
//! # Pixel handling
//!
//! Tiles pass through a fixed chain before encoding: region read, padding to
//! the full tile size, alpha compositing onto the background, then conversion
//! to the color encoding the transfer syntax expects (RGB, or YCbCr for JPEG).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cli;
pub mod codec;
pub mod config;
pub mod dicom;
pub mod error;
pub mod pipeline;
pub mod pixel;
pub mod progress;
pub mod source;

// Re-export commonly used types
pub use codec::{Codec, CodecAdapter, CodecInfo, Jpeg2000Codec, JpegCodec, UncompressedCodec};
pub use config::{CodecChoice, ConversionConfig, TransferSyntaxBinding};
pub use crate::dicom::{MultiFrameAssembler, MultiFrameStream, WsiDatasetBuilder, WsiInstanceWriter};
pub use error::{DicomizeError, Result, TileCoord};
pub use pipeline::{ConversionPipeline, ConversionStats, LevelOutput, PyramidTileSequencer};
pub use pixel::{AlphaNormalizer, BackgroundColor, ColorSpaceConverter, PixelBuffer, PixelEncoding};
pub use progress::{CallbackProgress, ChannelProgress, NullProgress, ProgressHandler};
pub use source::{ImagePyramidSource, PyramidLevel, SourceImageAdapter};

/// Library version information.
pub mod version {
    /// Library version string.
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");

    /// Library name.
    pub const NAME: &str = env!("CARGO_PKG_NAME");

    /// Get full version string.
    pub fn full_version() -> String {
        format!("{} {}", NAME, VERSION)
    }
}
