//! Error types for the whole-slide conversion library.

use std::fmt;

use thiserror::Error;

/// Result type alias for the library.
pub type Result<T> = std::result::Result<T, DicomizeError>;

/// Position of a tile within the source pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoord {
    /// Pyramid level (0 = highest resolution).
    pub level: usize,
    /// Tile row within the level.
    pub row: u32,
    /// Tile column within the level.
    pub col: u32,
}

impl TileCoord {
    /// Create a new tile coordinate.
    pub fn new(level: usize, row: u32, col: u32) -> Self {
        Self { level, row, col }
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "level {} tile (row {}, col {})", self.level, self.row, self.col)
    }
}

/// Optional tile location attached to an error.
///
/// Leaf components (normalizer, codecs) do not know where a buffer came from;
/// the sequencer fills the location in before the error leaves the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TileLocation(pub Option<TileCoord>);

impl fmt::Display for TileLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(coord) => write!(f, " at {}", coord),
            None => Ok(()),
        }
    }
}

/// Main error type for the conversion library.
#[derive(Error, Debug)]
pub enum DicomizeError {
    /// The upstream reader could not service a region.
    #[error("Source read error{at}: {message}")]
    SourceRead {
        /// Offending tile, if known.
        at: TileLocation,
        /// Underlying cause.
        message: String,
    },

    /// Unsupported channel count, bit depth or pixel encoding.
    #[error("Invalid pixel format{at}: {message}")]
    InvalidPixelFormat {
        /// Offending tile, if known.
        at: TileLocation,
        /// Description of the rejected format.
        message: String,
    },

    /// A codec rejected a tile buffer.
    #[error("Encode error in {codec}{at}: {message}")]
    Encode {
        /// Name of the codec that failed.
        codec: &'static str,
        /// Offending tile, if known.
        at: TileLocation,
        /// Underlying cause.
        message: String,
    },

    /// Internal frame sequencing invariant violated.
    #[error("Assembly error on level {level}: {message}")]
    Assembly {
        /// Level being assembled.
        level: usize,
        /// Description of the violated invariant.
        message: String,
    },

    /// The source pyramid does not satisfy the level invariants.
    #[error("Invalid pyramid: {0}")]
    InvalidPyramid(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error building or writing a DICOM dataset.
    #[error("DICOM error: {0}")]
    Dicom(String),

    /// The conversion was cancelled between tiles.
    #[error("Conversion cancelled on level {level}")]
    Cancelled {
        /// Level that was being converted.
        level: usize,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DicomizeError {
    /// Build a source read error without tile context.
    pub fn source_read(message: impl Into<String>) -> Self {
        Self::SourceRead {
            at: TileLocation::default(),
            message: message.into(),
        }
    }

    /// Build a pixel format error without tile context.
    pub fn pixel_format(message: impl Into<String>) -> Self {
        Self::InvalidPixelFormat {
            at: TileLocation::default(),
            message: message.into(),
        }
    }

    /// Build an encode error without tile context.
    pub fn encode(codec: &'static str, message: impl Into<String>) -> Self {
        Self::Encode {
            codec,
            at: TileLocation::default(),
            message: message.into(),
        }
    }

    /// Attach a tile coordinate to a tile-scoped error that has none yet.
    pub fn at_tile(mut self, coord: TileCoord) -> Self {
        match &mut self {
            Self::SourceRead { at, .. }
            | Self::InvalidPixelFormat { at, .. }
            | Self::Encode { at, .. } => {
                if at.0.is_none() {
                    at.0 = Some(coord);
                }
            }
            _ => {}
        }
        self
    }

    /// Tile coordinate carried by this error, if any.
    pub fn tile(&self) -> Option<TileCoord> {
        match self {
            Self::SourceRead { at, .. }
            | Self::InvalidPixelFormat { at, .. }
            | Self::Encode { at, .. } => at.0,
            _ => None,
        }
    }
}

impl From<image::ImageError> for DicomizeError {
    fn from(err: image::ImageError) -> Self {
        DicomizeError::source_read(err.to_string())
    }
}

impl From<dicom_object::ReadError> for DicomizeError {
    fn from(err: dicom_object::ReadError) -> Self {
        DicomizeError::Dicom(err.to_string())
    }
}

impl From<dicom_object::WriteError> for DicomizeError {
    fn from(err: dicom_object::WriteError) -> Self {
        DicomizeError::Dicom(err.to_string())
    }
}
