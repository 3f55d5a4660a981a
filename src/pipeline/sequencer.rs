//! Serial walk over every tile of the pyramid.

use std::iter::FusedIterator;

use crate::error::{DicomizeError, Result};
use crate::progress::ProgressHandler;
use crate::source::SourceImageAdapter;

use super::tile::{EncodedTileRecord, LevelGrid, TileEncoder};

/// Lazy, single-pass sequence of encoded tiles.
///
/// Visits level 0 first; within a level, tiles go left to right along a row,
/// then row by row. Each tile is read, encoded and yielded before the next
/// one is requested. After the first error, or once the last tile of the last
/// level was produced, the iterator only returns `None`.
pub struct PyramidTileSequencer<'a> {
    source: &'a dyn SourceImageAdapter,
    encoder: &'a TileEncoder,
    grids: &'a [LevelGrid],
    cancel: Option<&'a dyn ProgressHandler>,
    level: usize,
    index: usize,
    done: bool,
}

impl<'a> PyramidTileSequencer<'a> {
    /// Walk `grids` in order, reading tiles from `source`.
    pub fn new(
        source: &'a dyn SourceImageAdapter,
        encoder: &'a TileEncoder,
        grids: &'a [LevelGrid],
    ) -> Self {
        Self {
            source,
            encoder,
            grids,
            cancel: None,
            level: 0,
            index: 0,
            done: false,
        }
    }

    /// Stop with [`DicomizeError::Cancelled`] once `handler` asks to cancel.
    pub fn with_cancellation(mut self, handler: &'a dyn ProgressHandler) -> Self {
        self.cancel = Some(handler);
        self
    }

    /// Tiles that remain to be produced.
    pub fn remaining(&self) -> usize {
        if self.done {
            return 0;
        }
        self.grids
            .iter()
            .skip(self.level)
            .map(LevelGrid::tile_count)
            .sum::<usize>()
            - self.index
    }

    fn advance(&mut self) {
        self.index += 1;
        while self.level < self.grids.len() && self.index >= self.grids[self.level].tile_count() {
            self.level += 1;
            self.index = 0;
        }
    }
}

impl Iterator for PyramidTileSequencer<'_> {
    type Item = Result<EncodedTileRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        // Skip levels without tiles.
        while self.level < self.grids.len() && self.grids[self.level].tile_count() == 0 {
            self.level += 1;
        }
        let Some(grid) = self.grids.get(self.level) else {
            self.done = true;
            return None;
        };

        if self.cancel.is_some_and(|handler| handler.is_cancelled()) {
            self.done = true;
            return Some(Err(DicomizeError::Cancelled {
                level: grid.index(),
            }));
        }

        let result = self.encoder.encode(self.source, grid, self.index);
        match result {
            Ok(_) => self.advance(),
            Err(_) => self.done = true,
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining()))
    }
}

impl FusedIterator for PyramidTileSequencer<'_> {}
