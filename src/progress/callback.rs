//! Callback-based progress reporting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{DicomizeError, TileCoord};
use crate::pipeline::ConversionStats;

use super::handler::{ProgressEvent, ProgressHandler};

type ErrorCallback = Arc<dyn Fn(&DicomizeError, Option<TileCoord>) + Send + Sync>;
type CompleteCallback = Arc<dyn Fn(&ConversionStats) + Send + Sync>;

/// A progress handler that invokes a callback function.
///
/// # Example
///
/// ```rust,ignore
/// use wsi_dicomize::progress::CallbackProgress;
///
/// let progress = CallbackProgress::new(|event| {
///     println!("[{:.1}%] {}", event.overall_progress * 100.0, event.message);
/// })
/// .on_complete(|stats| println!("{} frames", stats.frames));
///
/// // Stops the run before its next tile.
/// progress.cancel();
/// ```
pub struct CallbackProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    callback: F,
    failure_hook: Option<ErrorCallback>,
    finish_hook: Option<CompleteCallback>,
    stop: Arc<AtomicBool>,
}

impl<F> CallbackProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    /// Create a new callback progress handler.
    pub fn new(callback: F) -> Self {
        Self {
            callback,
            failure_hook: None,
            finish_hook: None,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Set an error callback.
    pub fn on_error<E>(mut self, callback: E) -> Self
    where
        E: Fn(&DicomizeError, Option<TileCoord>) + Send + Sync + 'static,
    {
        self.failure_hook = Some(Arc::new(callback));
        self
    }

    /// Set a completion callback.
    pub fn on_complete<C>(mut self, callback: C) -> Self
    where
        C: Fn(&ConversionStats) + Send + Sync + 'static,
    {
        self.finish_hook = Some(Arc::new(callback));
        self
    }

    /// Flag shared with this handler; storing `true` cancels the run.
    ///
    /// Lets the callback itself, or another thread, stop a conversion.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Request cancellation of the current run.
    pub fn cancel(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Reset the cancellation flag.
    pub fn reset(&self) {
        self.stop.store(false, Ordering::SeqCst);
    }
}

impl<F> ProgressHandler for CallbackProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: &ProgressEvent) {
        (self.callback)(event.clone());
    }

    fn on_error(&self, error: &DicomizeError, tile: Option<TileCoord>) {
        if let Some(ref callback) = self.failure_hook {
            callback(error, tile);
        }
        (self.callback)(ProgressEvent::for_error(error, tile));
    }

    fn on_complete(&self, stats: &ConversionStats) {
        if let Some(ref callback) = self.finish_hook {
            callback(stats);
        }
        (self.callback)(ProgressEvent::complete(stats));
    }

    fn is_cancelled(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressPhase;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    #[test]
    fn test_every_event_reaches_callback() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();

        let progress = CallbackProgress::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        progress.on_progress(&ProgressEvent::default());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failure_hook_receives_tile() {
        let seen = Arc::new(Mutex::new(None));
        let slot = seen.clone();

        let progress = CallbackProgress::new(|_| {}).on_error(move |_, tile| {
            *slot.lock().unwrap() = tile;
        });

        let error = DicomizeError::source_read("gone").at_tile(TileCoord::new(1, 0, 2));
        ProgressHandler::on_error(&progress, &error, error.tile());
        assert_eq!(*seen.lock().unwrap(), Some(TileCoord::new(1, 0, 2)));
    }

    #[test]
    fn test_finish_hook() {
        let frames = Arc::new(AtomicUsize::new(0));
        let sink = frames.clone();

        let progress = CallbackProgress::new(|_| {}).on_complete(move |stats| {
            sink.store(stats.frames, Ordering::SeqCst);
        });

        let stats = ConversionStats {
            frames: 5,
            ..Default::default()
        };
        ProgressHandler::on_complete(&progress, &stats);
        assert_eq!(frames.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_cancel_flag_is_shared() {
        let progress = CallbackProgress::new(|_| {});
        let flag = progress.cancel_flag();

        assert!(!progress.is_cancelled());
        flag.store(true, Ordering::SeqCst);
        assert!(progress.is_cancelled());
        progress.reset();
        assert!(!progress.is_cancelled());
    }

    #[test]
    fn test_callback_sees_terminal_phases() {
        let phases = Arc::new(Mutex::new(Vec::new()));
        let log = phases.clone();
        let progress = CallbackProgress::new(move |event| log.lock().unwrap().push(event.phase));

        let stats = ConversionStats {
            frames: 2,
            ..Default::default()
        };
        ProgressHandler::on_complete(&progress, &stats);
        let error = DicomizeError::Cancelled { level: 1 };
        ProgressHandler::on_error(&progress, &error, Some(TileCoord::new(1, 0, 0)));

        assert_eq!(
            *phases.lock().unwrap(),
            vec![ProgressPhase::Complete, ProgressPhase::Failed]
        );
    }
}
