//! Per-tile read, normalize and encode.

use crate::codec::CodecAdapter;
use crate::error::{Result, TileCoord};
use crate::pixel::{AlphaNormalizer, BackgroundColor, ColorSpaceConverter};
use crate::source::{PyramidLevel, SourceImageAdapter};

/// Tile grid of one level at the run tile size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelGrid {
    /// Source level metadata.
    pub level: PyramidLevel,
    /// Run tile width.
    pub tile_width: u32,
    /// Run tile height.
    pub tile_height: u32,
    /// Tile columns.
    pub tiles_across: u32,
    /// Tile rows.
    pub tiles_down: u32,
}

impl LevelGrid {
    /// Grid of `level` cut into `tile_width` x `tile_height` tiles.
    pub fn new(level: PyramidLevel, tile_width: u32, tile_height: u32) -> Self {
        Self {
            level,
            tile_width,
            tile_height,
            tiles_across: level.tiles_across(tile_width),
            tiles_down: level.tiles_down(tile_height),
        }
    }

    /// Level index.
    pub fn index(&self) -> usize {
        self.level.index
    }

    /// Number of frames the level produces.
    pub fn tile_count(&self) -> usize {
        self.tiles_across as usize * self.tiles_down as usize
    }

    /// Tile coordinate of row-major sequence index `index`.
    pub fn coord(&self, index: usize) -> TileCoord {
        let across = self.tiles_across as usize;
        TileCoord::new(self.level.index, (index / across) as u32, (index % across) as u32)
    }
}

/// One encoded frame and its place in the level's frame order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedTileRecord {
    /// Pyramid level.
    pub level: usize,
    /// Row-major position within the level.
    pub index: usize,
    /// Encoded frame.
    pub data: Vec<u8>,
}

impl EncodedTileRecord {
    /// Create a record.
    pub fn new(level: usize, index: usize, data: Vec<u8>) -> Self {
        Self { level, index, data }
    }

    /// Encoded length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the frame is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Turns source regions into encoded frames.
///
/// Holds only immutable run state, so one instance is shared by every
/// worker.
#[derive(Debug, Clone, Copy)]
pub struct TileEncoder {
    tile_width: u32,
    tile_height: u32,
    background: BackgroundColor,
    normalizer: AlphaNormalizer,
    converter: ColorSpaceConverter,
    codec: CodecAdapter,
}

impl TileEncoder {
    /// Create an encoder for the run.
    pub fn new(tile_width: u32, tile_height: u32, background: BackgroundColor, codec: CodecAdapter) -> Self {
        Self {
            tile_width,
            tile_height,
            background,
            normalizer: AlphaNormalizer::new(background),
            converter: ColorSpaceConverter::new(),
            codec,
        }
    }

    /// Codec frames are encoded with.
    pub fn codec(&self) -> &CodecAdapter {
        &self.codec
    }

    /// Run background color.
    pub fn background(&self) -> BackgroundColor {
        self.background
    }

    /// Read, pad, normalize and encode tile `index` of `grid`.
    ///
    /// Errors from any stage carry the tile coordinate.
    pub fn encode(
        &self,
        source: &dyn SourceImageAdapter,
        grid: &LevelGrid,
        index: usize,
    ) -> Result<EncodedTileRecord> {
        let coord = grid.coord(index);
        self.encode_at(source, coord)
            .map(|data| EncodedTileRecord::new(coord.level, index, data))
            .map_err(|e| e.at_tile(coord))
    }

    fn encode_at(&self, source: &dyn SourceImageAdapter, coord: TileCoord) -> Result<Vec<u8>> {
        let region = source.read_region(
            coord.level,
            coord.col * self.tile_width,
            coord.row * self.tile_height,
            self.tile_width,
            self.tile_height,
        )?;
        let padded = region.pad_to(self.tile_width, self.tile_height, self.background)?;
        let opaque = self.normalizer.normalize(padded)?;
        let converted = self
            .converter
            .convert(opaque, self.codec.required_pixel_encoding())?;
        let data = self.codec.encode(&converted, self.tile_width, self.tile_height)?;

        log::debug!("Encoded {} into {} bytes", coord, data.len());
        Ok(data)
    }
}
