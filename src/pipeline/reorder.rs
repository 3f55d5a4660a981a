//! Parallel tile encoding with in-order delivery.
//!
//! Workers claim tile indices from a [`DispatchWindow`], encode them and send
//! the results over a bounded channel. The calling thread feeds the results
//! through a [`ReorderBuffer`] and hands them on in sequence order. At most
//! `capacity` tiles are claimed but not yet delivered at any time, which
//! bounds both the channel and the reorder buffer.

use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Condvar, Mutex, PoisonError};

use rayon::ThreadPool;

use crate::error::{DicomizeError, Result};
use crate::progress::ProgressHandler;
use crate::source::SourceImageAdapter;

use super::tile::{EncodedTileRecord, LevelGrid, TileEncoder};

/// Holds out-of-order records until their predecessors arrive.
#[derive(Debug)]
pub struct ReorderBuffer {
    level: usize,
    next: usize,
    pending: BTreeMap<usize, EncodedTileRecord>,
}

impl ReorderBuffer {
    /// Empty buffer expecting record 0 of `level`.
    pub fn new(level: usize) -> Self {
        Self {
            level,
            next: 0,
            pending: BTreeMap::new(),
        }
    }

    /// Index of the next record to release.
    pub fn next_index(&self) -> usize {
        self.next
    }

    /// Records waiting for a predecessor.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Accept a record. Duplicates and already released indices are
    /// sequencing defects.
    pub fn insert(&mut self, record: EncodedTileRecord) -> Result<()> {
        if record.level != self.level
            || record.index < self.next
            || self.pending.contains_key(&record.index)
        {
            return Err(DicomizeError::Assembly {
                level: self.level,
                message: format!(
                    "unexpected record {} of level {} (next is {})",
                    record.index, record.level, self.next
                ),
            });
        }
        self.pending.insert(record.index, record);
        Ok(())
    }

    /// Release the next record if it has arrived.
    pub fn pop_ready(&mut self) -> Option<EncodedTileRecord> {
        let entry = self.pending.first_entry()?;
        if *entry.key() != self.next {
            return None;
        }
        self.next += 1;
        Some(entry.remove())
    }
}

#[derive(Debug)]
struct WindowState {
    next: usize,
    released: usize,
    closed: bool,
}

/// Hands out tile indices no further than `capacity` ahead of delivery.
#[derive(Debug)]
pub(crate) struct DispatchWindow {
    total: usize,
    capacity: usize,
    state: Mutex<WindowState>,
    progress: Condvar,
}

impl DispatchWindow {
    pub(crate) fn new(total: usize, capacity: usize) -> Self {
        Self {
            total,
            capacity: capacity.max(1),
            state: Mutex::new(WindowState {
                next: 0,
                released: 0,
                closed: false,
            }),
            progress: Condvar::new(),
        }
    }

    /// Next index to encode; `None` once exhausted or closed.
    pub(crate) fn claim(&self) -> Option<usize> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if state.closed || state.next >= self.total {
                return None;
            }
            if state.next < state.released + self.capacity {
                let index = state.next;
                state.next += 1;
                return Some(index);
            }
            state = self
                .progress
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// `count` more records left the reorder buffer.
    pub(crate) fn release(&self, count: usize) {
        if count == 0 {
            return;
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.released += count;
        self.progress.notify_all();
    }

    /// Stop handing out indices.
    pub(crate) fn close(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.closed = true;
        self.progress.notify_all();
    }
}

/// Encode every tile of `grid` on `pool`, delivering records to `sink` in
/// sequence order on the calling thread.
///
/// The first failure (read, codec, cancellation or sink error) closes the
/// window; tiles still in flight are dropped.
#[allow(clippy::too_many_arguments)]
pub fn encode_level_parallel(
    pool: &ThreadPool,
    workers: usize,
    capacity: usize,
    source: &dyn SourceImageAdapter,
    encoder: &TileEncoder,
    grid: &LevelGrid,
    handler: &dyn ProgressHandler,
    sink: &mut dyn FnMut(EncodedTileRecord) -> Result<()>,
) -> Result<()> {
    let total = grid.tile_count();
    let capacity = capacity.max(1);
    let window = DispatchWindow::new(total, capacity);
    let (tx, rx) = mpsc::sync_channel(capacity);

    pool.in_place_scope(|scope| {
        for _ in 0..workers.max(1).min(total.max(1)) {
            let tx = tx.clone();
            let window = &window;
            scope.spawn(move |_| encode_worker(window, tx, source, encoder, grid, handler));
        }
        drop(tx);

        let outcome = deliver_in_order(rx, &window, grid, sink);
        if outcome.is_err() {
            window.close();
        }
        outcome
    })
}

fn encode_worker(
    window: &DispatchWindow,
    tx: SyncSender<Result<EncodedTileRecord>>,
    source: &dyn SourceImageAdapter,
    encoder: &TileEncoder,
    grid: &LevelGrid,
    handler: &dyn ProgressHandler,
) {
    while let Some(index) = window.claim() {
        let result = if handler.is_cancelled() {
            Err(DicomizeError::Cancelled { level: grid.index() })
        } else {
            encoder.encode(source, grid, index)
        };
        let failed = result.is_err();
        if tx.send(result).is_err() || failed {
            window.close();
            return;
        }
    }
}

fn deliver_in_order(
    rx: Receiver<Result<EncodedTileRecord>>,
    window: &DispatchWindow,
    grid: &LevelGrid,
    sink: &mut dyn FnMut(EncodedTileRecord) -> Result<()>,
) -> Result<()> {
    let total = grid.tile_count();
    let mut reorder = ReorderBuffer::new(grid.index());

    while reorder.next_index() < total {
        let record = match rx.recv() {
            Ok(result) => result?,
            Err(_) => break,
        };
        reorder.insert(record)?;

        let mut released = 0;
        while let Some(ready) = reorder.pop_ready() {
            sink(ready)?;
            released += 1;
        }
        window.release(released);
    }

    if reorder.next_index() != total {
        return Err(DicomizeError::Assembly {
            level: grid.index(),
            message: format!(
                "workers stopped after {} of {} tiles",
                reorder.next_index(),
                total
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecAdapter;
    use crate::pixel::{BackgroundColor, PixelBuffer};
    use crate::progress::{CallbackProgress, NullProgress};
    use crate::source::ImagePyramidSource;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn record(index: usize) -> EncodedTileRecord {
        EncodedTileRecord::new(0, index, vec![index as u8])
    }

    #[test]
    fn test_reorder_releases_contiguous_runs() {
        let mut buffer = ReorderBuffer::new(0);
        buffer.insert(record(2)).unwrap();
        buffer.insert(record(1)).unwrap();
        assert!(buffer.pop_ready().is_none());

        buffer.insert(record(0)).unwrap();
        let released: Vec<_> = std::iter::from_fn(|| buffer.pop_ready())
            .map(|r| r.index)
            .collect();
        assert_eq!(released, vec![0, 1, 2]);
        assert_eq!(buffer.pending(), 0);
        assert_eq!(buffer.next_index(), 3);
    }

    #[test]
    fn test_reorder_rejects_duplicates() {
        let mut buffer = ReorderBuffer::new(0);
        buffer.insert(record(1)).unwrap();
        assert!(buffer.insert(record(1)).is_err());

        buffer.insert(record(0)).unwrap();
        while buffer.pop_ready().is_some() {}
        assert!(buffer.insert(record(0)).is_err());
    }

    #[test]
    fn test_window_blocks_until_release() {
        let window = Arc::new(DispatchWindow::new(4, 2));
        assert_eq!(window.claim(), Some(0));
        assert_eq!(window.claim(), Some(1));

        let waiter = {
            let window = window.clone();
            std::thread::spawn(move || window.claim())
        };
        window.release(1);
        assert_eq!(waiter.join().unwrap(), Some(2));
    }

    #[test]
    fn test_window_close_wakes_waiters() {
        let window = Arc::new(DispatchWindow::new(10, 1));
        assert_eq!(window.claim(), Some(0));
        let waiter = {
            let window = window.clone();
            std::thread::spawn(move || window.claim())
        };
        window.close();
        assert_eq!(waiter.join().unwrap(), None);
    }

    fn striped_source() -> ImagePyramidSource {
        let (width, height) = (37u32, 29u32);
        let data = (0..width * height)
            .flat_map(|i| [(i % 251) as u8, (i % 13) as u8, (i / 7 % 256) as u8])
            .collect();
        let pixels = PixelBuffer::rgb8(width, height, data).unwrap();
        ImagePyramidSource::from_levels(vec![pixels], 8, 8).unwrap()
    }

    fn pool(threads: usize) -> ThreadPool {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .unwrap()
    }

    #[test]
    fn test_parallel_delivers_in_sequence_order() {
        let source = striped_source();
        let grid = LevelGrid::new(source.level_info(0).unwrap(), 8, 8);
        let encoder = TileEncoder::new(8, 8, BackgroundColor::WHITE, CodecAdapter::uncompressed());

        let mut parallel = Vec::new();
        encode_level_parallel(
            &pool(4),
            4,
            3,
            &source,
            &encoder,
            &grid,
            &NullProgress,
            &mut |record: EncodedTileRecord| -> Result<()> {
                parallel.push(record);
                Ok(())
            },
        )
        .unwrap();

        let serial: Vec<_> = (0..grid.tile_count())
            .map(|index| encoder.encode(&source, &grid, index).unwrap())
            .collect();
        assert_eq!(parallel, serial);
    }

    #[test]
    fn test_sink_error_aborts() {
        let source = striped_source();
        let grid = LevelGrid::new(source.level_info(0).unwrap(), 8, 8);
        let encoder = TileEncoder::new(8, 8, BackgroundColor::WHITE, CodecAdapter::uncompressed());
        let delivered = AtomicUsize::new(0);

        let err = encode_level_parallel(
            &pool(2),
            2,
            2,
            &source,
            &encoder,
            &grid,
            &NullProgress,
            &mut |_: EncodedTileRecord| -> Result<()> {
                if delivered.fetch_add(1, Ordering::SeqCst) == 3 {
                    return Err(DicomizeError::Internal("sink full".into()));
                }
                Ok(())
            },
        )
        .unwrap_err();
        assert!(matches!(err, DicomizeError::Internal(_)));
        assert_eq!(delivered.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_cancelled_before_start() {
        let source = striped_source();
        let grid = LevelGrid::new(source.level_info(0).unwrap(), 8, 8);
        let encoder = TileEncoder::new(8, 8, BackgroundColor::WHITE, CodecAdapter::uncompressed());
        let progress = CallbackProgress::new(|_| {});
        progress.cancel();

        let err = encode_level_parallel(
            &pool(2),
            2,
            4,
            &source,
            &encoder,
            &grid,
            &progress,
            &mut |_: EncodedTileRecord| -> Result<()> { Ok(()) },
        )
        .unwrap_err();
        assert!(matches!(err, DicomizeError::Cancelled { level: 0 }));
    }
}
