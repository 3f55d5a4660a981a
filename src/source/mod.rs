//! Access to pyramidal source images.
//!
//! A [`SourceImageAdapter`] hides the native slide reader behind level
//! metadata and region reads. The pipeline never touches a vendor format
//! directly; it asks for regions in level coordinates and receives
//! [`PixelBuffer`]s.

mod memory;

pub use memory::{ImagePyramidSource, DEFAULT_TILE_SIZE};

use serde::{Deserialize, Serialize};

use crate::error::{DicomizeError, Result};
use crate::pixel::PixelBuffer;

/// One resolution layer of a source pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PyramidLevel {
    /// Level index, 0 being the highest resolution.
    pub index: usize,
    /// Level width in pixels.
    pub width: u32,
    /// Level height in pixels.
    pub height: u32,
    /// Native tile width.
    pub tile_width: u32,
    /// Native tile height.
    pub tile_height: u32,
    /// Downsample factor relative to level 0.
    pub downsample: f64,
}

impl PyramidLevel {
    /// Number of tile columns for the given tile width.
    pub fn tiles_across(&self, tile_width: u32) -> u32 {
        self.width.div_ceil(tile_width)
    }

    /// Number of tile rows for the given tile height.
    pub fn tiles_down(&self, tile_height: u32) -> u32 {
        self.height.div_ceil(tile_height)
    }

    /// Total number of tiles for the given tile size.
    pub fn tile_count(&self, tile_width: u32, tile_height: u32) -> usize {
        self.tiles_across(tile_width) as usize * self.tiles_down(tile_height) as usize
    }
}

/// Capability interface over a native pyramidal reader.
///
/// Implementations must be shareable across encoding workers.
pub trait SourceImageAdapter: Send + Sync {
    /// Number of pyramid levels.
    fn level_count(&self) -> usize;

    /// Metadata for `level`.
    fn level_info(&self, level: usize) -> Result<PyramidLevel>;

    /// Read a region of `level` in level pixel coordinates.
    ///
    /// The returned buffer holds the in-bounds part of the region, so regions
    /// crossing the right or bottom edge come back smaller than requested. A
    /// region starting outside the level is an error.
    fn read_region(&self, level: usize, x: u32, y: u32, width: u32, height: u32)
        -> Result<PixelBuffer>;

    /// Read a native tile of `level`, clipped at the level edges.
    fn read_tile(&self, level: usize, row: u32, col: u32) -> Result<PixelBuffer> {
        let info = self.level_info(level)?;
        self.read_region(
            level,
            col * info.tile_width,
            row * info.tile_height,
            info.tile_width,
            info.tile_height,
        )
    }

    /// Background color recorded by the reader, if any.
    fn background_color(&self) -> Option<[u8; 3]> {
        None
    }
}

/// Collect and check the level metadata of `source`.
///
/// Levels must be non-empty, indexed in order and carry strictly increasing
/// downsample factors.
pub fn validate_pyramid(source: &dyn SourceImageAdapter) -> Result<Vec<PyramidLevel>> {
    let count = source.level_count();
    if count == 0 {
        return Err(DicomizeError::InvalidPyramid("source has no levels".into()));
    }

    let mut levels: Vec<PyramidLevel> = Vec::with_capacity(count);
    for index in 0..count {
        let level = source.level_info(index)?;
        if level.index != index {
            return Err(DicomizeError::InvalidPyramid(format!(
                "level {} reports index {}",
                index, level.index
            )));
        }
        if level.width == 0 || level.height == 0 {
            return Err(DicomizeError::InvalidPyramid(format!(
                "level {} has empty dimensions {}x{}",
                index, level.width, level.height
            )));
        }
        if level.tile_width == 0 || level.tile_height == 0 {
            return Err(DicomizeError::InvalidPyramid(format!(
                "level {} has empty tile size",
                index
            )));
        }
        if let Some(previous) = levels.last() {
            if level.downsample <= previous.downsample {
                return Err(DicomizeError::InvalidPyramid(format!(
                    "downsample factors must increase: level {} is {} after {}",
                    index, level.downsample, previous.downsample
                )));
            }
        }
        levels.push(level);
    }
    Ok(levels)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedLevels(Vec<PyramidLevel>);

    impl SourceImageAdapter for FixedLevels {
        fn level_count(&self) -> usize {
            self.0.len()
        }

        fn level_info(&self, level: usize) -> Result<PyramidLevel> {
            self.0
                .get(level)
                .copied()
                .ok_or_else(|| DicomizeError::source_read(format!("no level {}", level)))
        }

        fn read_region(&self, _: usize, _: u32, _: u32, w: u32, h: u32) -> Result<PixelBuffer> {
            PixelBuffer::rgb8(w, h, vec![0; (w * h * 3) as usize])
        }
    }

    fn level(index: usize, size: u32, downsample: f64) -> PyramidLevel {
        PyramidLevel {
            index,
            width: size,
            height: size,
            tile_width: 256,
            tile_height: 256,
            downsample,
        }
    }

    #[test]
    fn test_tile_grid() {
        let info = PyramidLevel {
            index: 0,
            width: 1000,
            height: 513,
            tile_width: 256,
            tile_height: 256,
            downsample: 1.0,
        };
        assert_eq!(info.tiles_across(256), 4);
        assert_eq!(info.tiles_down(256), 3);
        assert_eq!(info.tile_count(256, 256), 12);
        assert_eq!(info.tile_count(1000, 1000), 1);
    }

    #[test]
    fn test_valid_pyramid() {
        let source = FixedLevels(vec![level(0, 512, 1.0), level(1, 256, 2.0)]);
        let levels = validate_pyramid(&source).unwrap();
        assert_eq!(levels.len(), 2);
    }

    #[test]
    fn test_non_increasing_downsample_rejected() {
        let source = FixedLevels(vec![level(0, 512, 1.0), level(1, 512, 1.0)]);
        let err = validate_pyramid(&source).unwrap_err();
        assert!(matches!(err, DicomizeError::InvalidPyramid(_)));
    }

    #[test]
    fn test_empty_source_rejected() {
        assert!(validate_pyramid(&FixedLevels(Vec::new())).is_err());
    }

    #[test]
    fn test_default_read_tile_uses_native_tile_size() {
        let source = FixedLevels(vec![level(0, 512, 1.0)]);
        let tile = source.read_tile(0, 1, 1).unwrap();
        assert_eq!((tile.width, tile.height), (256, 256));
    }
}
