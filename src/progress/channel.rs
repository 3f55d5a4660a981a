//! Progress delivered over an MPSC channel.
//!
//! The conversion thread only ever sends; a UI thread drains the
//! [`ProgressReceiver`] at its own pace and may cancel the run through it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{DicomizeError, TileCoord};
use crate::pipeline::ConversionStats;

use super::handler::{ProgressEvent, ProgressHandler};

/// Handler that forwards every event into a channel.
///
/// # Example
///
/// ```rust,ignore
/// use wsi_dicomize::progress::ChannelProgress;
///
/// let (progress, receiver) = ChannelProgress::new();
/// std::thread::spawn(move || {
///     for event in receiver.until_finished() {
///         println!("{}", event);
///     }
/// });
///
/// let pipeline = ConversionPipeline::new(config).with_progress(progress);
/// ```
pub struct ChannelProgress {
    events: Sender<ProgressEvent>,
    stop: Arc<AtomicBool>,
}

impl ChannelProgress {
    /// Create a handler paired with the receiving end.
    pub fn new() -> (Self, ProgressReceiver) {
        let (events, inbox) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let handler = Self {
            events,
            stop: Arc::clone(&stop),
        };
        (handler, ProgressReceiver { inbox, stop })
    }

    /// Stop the run before its next tile.
    pub fn cancel(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    // A dropped receiver just means nobody is watching.
    fn send(&self, event: ProgressEvent) {
        let _ = self.events.send(event);
    }
}

impl ProgressHandler for ChannelProgress {
    fn on_progress(&self, event: &ProgressEvent) {
        self.send(event.clone());
    }

    fn on_error(&self, error: &DicomizeError, tile: Option<TileCoord>) {
        self.send(ProgressEvent::for_error(error, tile));
    }

    fn on_complete(&self, stats: &ConversionStats) {
        self.send(ProgressEvent::complete(stats));
    }

    fn is_cancelled(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

/// Receiving end of a [`ChannelProgress`].
pub struct ProgressReceiver {
    inbox: Receiver<ProgressEvent>,
    stop: Arc<AtomicBool>,
}

impl ProgressReceiver {
    /// Blocking iterator that ends after the terminal event, or when the
    /// handler is dropped.
    pub fn until_finished(&self) -> impl Iterator<Item = ProgressEvent> + '_ {
        let mut finished = false;
        std::iter::from_fn(move || {
            if finished {
                return None;
            }
            let event = self.inbox.recv().ok()?;
            finished = event.phase.is_terminal();
            Some(event)
        })
    }

    /// Drain everything queued and keep only the newest event.
    ///
    /// Suits a display that redraws on a timer and only needs the current state.
    pub fn latest(&self) -> Option<ProgressEvent> {
        self.inbox.try_iter().last()
    }

    /// Wait up to `timeout` for the next event.
    ///
    /// `None` on timeout and once the handler is gone.
    pub fn next_within(&self, timeout: Duration) -> Option<ProgressEvent> {
        match self.inbox.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Stop the run before its next tile.
    pub fn cancel(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Whether either end asked to stop.
    pub fn is_cancelled(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}
