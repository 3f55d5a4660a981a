//! Configuration types for conversion settings and transfer-syntax bindings.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dicom::SpecimenInfo;
use crate::error::{DicomizeError, Result};
use crate::pixel::PixelEncoding;

/// Default baseline JPEG quality (1-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Default JPEG 2000 lossy quality (1-100).
pub const DEFAULT_JPEG2000_QUALITY: u8 = 80;

/// Default number of encoded tiles allowed in flight per worker.
pub const DEFAULT_IN_FLIGHT_PER_WORKER: usize = 4;

/// Target codec for the converted pixel data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CodecChoice {
    /// Raw samples, Explicit VR Little Endian.
    Uncompressed,
    /// Baseline (8-bit, Huffman) JPEG.
    #[default]
    Jpeg,
    /// Reversible JPEG 2000.
    Jpeg2000Lossless,
    /// Irreversible JPEG 2000.
    Jpeg2000,
}

impl CodecChoice {
    /// Immutable transfer-syntax binding for this codec.
    pub fn binding(&self) -> TransferSyntaxBinding {
        match self {
            CodecChoice::Uncompressed => TransferSyntaxBinding {
                uid: transfer_syntax::EXPLICIT_VR_LITTLE_ENDIAN,
                name: "Explicit VR Little Endian",
                pixel_encoding: PixelEncoding::Rgb,
                photometric_interpretation: "RGB",
                lossy: false,
                encapsulated: false,
            },
            CodecChoice::Jpeg => TransferSyntaxBinding {
                uid: transfer_syntax::JPEG_BASELINE,
                name: "JPEG Baseline (Process 1)",
                pixel_encoding: PixelEncoding::YCbCr,
                photometric_interpretation: "YBR_FULL_422",
                lossy: true,
                encapsulated: true,
            },
            CodecChoice::Jpeg2000Lossless => TransferSyntaxBinding {
                uid: transfer_syntax::JPEG_2000_LOSSLESS,
                name: "JPEG 2000 Image Compression (Lossless Only)",
                pixel_encoding: PixelEncoding::Rgb,
                photometric_interpretation: "YBR_RCT",
                lossy: false,
                encapsulated: true,
            },
            CodecChoice::Jpeg2000 => TransferSyntaxBinding {
                uid: transfer_syntax::JPEG_2000_LOSSY,
                name: "JPEG 2000 Image Compression",
                pixel_encoding: PixelEncoding::Rgb,
                photometric_interpretation: "YBR_ICT",
                lossy: true,
                encapsulated: true,
            },
        }
    }
}

/// Logical codec choice mapped to its DICOM transfer syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSyntaxBinding {
    /// Transfer syntax UID.
    pub uid: &'static str,
    /// Transfer syntax name.
    pub name: &'static str,
    /// Pixel encoding tiles must be in before encoding.
    pub pixel_encoding: PixelEncoding,
    /// Photometric Interpretation of the stored frames.
    pub photometric_interpretation: &'static str,
    /// Whether the codec discards information.
    pub lossy: bool,
    /// Whether pixel data is stored as encapsulated fragments.
    pub encapsulated: bool,
}

/// Configuration for a conversion run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    /// Codec to encode tiles with.
    pub codec: CodecChoice,
    /// Baseline JPEG quality (1-100).
    pub jpeg_quality: u8,
    /// JPEG 2000 lossy quality (1-100).
    pub jpeg2000_quality: u8,
    /// Tile size override; `None` keeps the source's level 0 tile size.
    pub tile_size: Option<u32>,
    /// Background color override; `None` uses the source hint or white.
    pub background: Option<[u8; 3]>,
    /// Encoding worker threads; `None` uses all CPUs, 1 encodes serially.
    pub workers: Option<usize>,
    /// Maximum encoded tiles buffered ahead of the assembler; `None` scales with workers.
    pub max_in_flight: Option<usize>,
    /// Number of pyramid levels to build for flat input images.
    pub levels: Option<usize>,
    /// Slide and sample description for the specimen module.
    pub specimen: SpecimenInfo,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            codec: CodecChoice::Jpeg,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            jpeg2000_quality: DEFAULT_JPEG2000_QUALITY,
            tile_size: None,
            background: None,
            workers: None,
            max_in_flight: None,
            levels: None,
            specimen: SpecimenInfo::default(),
        }
    }
}

impl ConversionConfig {
    /// Create a configuration for the given codec with default settings.
    pub fn with_codec(codec: CodecChoice) -> Self {
        Self {
            codec,
            ..Default::default()
        }
    }

    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| DicomizeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file.
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Serialize the configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| DicomizeError::Config(e.to_string()))
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(DicomizeError::Config(format!(
                "JPEG quality must be within 1-100, got {}",
                self.jpeg_quality
            )));
        }
        if !(1..=100).contains(&self.jpeg2000_quality) {
            return Err(DicomizeError::Config(format!(
                "JPEG 2000 quality must be within 1-100, got {}",
                self.jpeg2000_quality
            )));
        }
        if self.tile_size == Some(0) {
            return Err(DicomizeError::Config("tile size must be positive".into()));
        }
        if let Some(size) = self.tile_size {
            if size > u16::MAX as u32 {
                return Err(DicomizeError::Config(format!(
                    "tile size {} exceeds the DICOM Rows/Columns range",
                    size
                )));
            }
        }
        if self.workers == Some(0) {
            return Err(DicomizeError::Config("worker count must be positive".into()));
        }
        if self.max_in_flight == Some(0) {
            return Err(DicomizeError::Config("in-flight bound must be positive".into()));
        }
        if self.levels == Some(0) {
            return Err(DicomizeError::Config("level count must be positive".into()));
        }
        self.specimen.prepare()?;
        Ok(())
    }

    /// Resolved encoding worker count.
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(num_cpus::get).max(1)
    }

    /// Resolved reorder window size.
    pub fn in_flight_limit(&self) -> usize {
        self.max_in_flight
            .unwrap_or(self.worker_count() * DEFAULT_IN_FLIGHT_PER_WORKER)
            .max(1)
    }
}

/// Transfer syntax UIDs for DICOM.
pub mod transfer_syntax {
    /// Explicit VR Little Endian (uncompressed)
    pub const EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1";
    /// JPEG Baseline (Process 1)
    pub const JPEG_BASELINE: &str = "1.2.840.10008.1.2.4.50";
    /// JPEG 2000 Lossless
    pub const JPEG_2000_LOSSLESS: &str = "1.2.840.10008.1.2.4.90";
    /// JPEG 2000 Lossy
    pub const JPEG_2000_LOSSY: &str = "1.2.840.10008.1.2.4.91";
}
