//! Progress handler trait and related types.

use crate::error::{DicomizeError, TileCoord};
use crate::pipeline::ConversionStats;

/// Phase of a conversion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressPhase {
    /// Opening the source and validating its pyramid.
    Reading,
    /// Reading and encoding tiles of a level.
    Encoding,
    /// Packaging encoded frames into a pixel-data stream.
    Assembling,
    /// Writing a level instance to disk.
    Writing,
    /// Run completed successfully.
    Complete,
    /// Run failed.
    Failed,
}

impl ProgressPhase {
    /// Get a human-readable description of the phase.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Reading => "Reading pyramid",
            Self::Encoding => "Encoding tiles",
            Self::Assembling => "Assembling frames",
            Self::Writing => "Writing instance",
            Self::Complete => "Complete",
            Self::Failed => "Failed",
        }
    }

    /// Check if this is a terminal phase.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

impl std::fmt::Display for ProgressPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Progress event emitted during a conversion.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    /// Current phase of operation.
    pub phase: ProgressPhase,

    /// Pyramid level being processed.
    pub level: Option<usize>,

    /// Number of levels in the run.
    pub total_levels: usize,

    /// Tiles finished on the current level.
    pub tiles_completed: usize,

    /// Tiles on the current level.
    pub tiles_total: usize,

    /// Progress within the current level (0.0 to 1.0).
    pub level_progress: f64,

    /// Progress over all tiles of the run (0.0 to 1.0).
    pub overall_progress: f64,

    /// Encoded bytes produced so far.
    pub bytes_encoded: u64,

    /// Status message.
    pub message: String,
}

impl Default for ProgressEvent {
    fn default() -> Self {
        Self {
            phase: ProgressPhase::Reading,
            level: None,
            total_levels: 0,
            tiles_completed: 0,
            tiles_total: 0,
            level_progress: 0.0,
            overall_progress: 0.0,
            bytes_encoded: 0,
            message: String::new(),
        }
    }
}

impl ProgressEvent {
    /// Create a new progress event for a specific phase.
    pub fn new(phase: ProgressPhase) -> Self {
        Self {
            phase,
            message: phase.description().into(),
            ..Default::default()
        }
    }

    /// Create a reading phase event.
    pub fn reading(total_levels: usize) -> Self {
        Self {
            phase: ProgressPhase::Reading,
            total_levels,
            message: format!("Read pyramid with {} levels", total_levels),
            ..Default::default()
        }
    }

    /// Create an encoding phase event for a level.
    pub fn encoding(level: usize, tiles_completed: usize, tiles_total: usize) -> Self {
        let level_progress = if tiles_total > 0 {
            tiles_completed as f64 / tiles_total as f64
        } else {
            1.0
        };
        Self {
            phase: ProgressPhase::Encoding,
            level: Some(level),
            tiles_completed,
            tiles_total,
            level_progress,
            message: format!("Encoding level {}", level),
            ..Default::default()
        }
    }

    /// Create an event for a level-scoped phase.
    pub fn for_level(phase: ProgressPhase, level: usize) -> Self {
        Self {
            phase,
            level: Some(level),
            level_progress: 1.0,
            message: format!("{} for level {}", phase.description(), level),
            ..Self::new(phase)
        }
    }

    /// Create a completion event.
    pub fn complete(stats: &ConversionStats) -> Self {
        Self {
            phase: ProgressPhase::Complete,
            total_levels: stats.levels,
            tiles_completed: stats.frames,
            tiles_total: stats.frames,
            level_progress: 1.0,
            overall_progress: 1.0,
            bytes_encoded: stats.encoded_bytes,
            message: format!("Converted {} frames in {} levels", stats.frames, stats.levels),
            ..Default::default()
        }
    }

    /// Create a failure event.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::new(ProgressPhase::Failed)
        }
    }

    /// Failure event for `error`, naming the tile it happened on.
    pub fn for_error(error: &DicomizeError, tile: Option<TileCoord>) -> Self {
        let mut event = Self::failed(error.to_string());
        if let Some(coord) = tile {
            event.level = Some(coord.level);
            event.message = format!("tile ({}, {}): {}", coord.row, coord.col, event.message);
        }
        event
    }

    /// Set run-wide progress information.
    pub fn with_run_progress(
        mut self,
        tiles_done: usize,
        tiles_in_run: usize,
        total_levels: usize,
        bytes_encoded: u64,
    ) -> Self {
        self.total_levels = total_levels;
        self.bytes_encoded = bytes_encoded;
        if tiles_in_run > 0 {
            self.overall_progress = tiles_done as f64 / tiles_in_run as f64;
        }
        self
    }
}

impl std::fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.level {
            Some(level) if self.tiles_total > 0 => write!(
                f,
                "[level {} {}/{}] {}: {}",
                level, self.tiles_completed, self.tiles_total, self.phase, self.message
            ),
            _ => write!(f, "{}: {}", self.phase, self.message),
        }
    }
}

/// Trait for handling progress updates during a conversion.
///
/// # Example
///
/// ```rust,ignore
/// use wsi_dicomize::progress::{ProgressHandler, ProgressEvent};
/// use wsi_dicomize::error::{DicomizeError, TileCoord};
/// use wsi_dicomize::pipeline::ConversionStats;
///
/// struct Printer;
///
/// impl ProgressHandler for Printer {
///     fn on_progress(&self, event: &ProgressEvent) {
///         println!("{}", event);
///     }
///
///     fn on_error(&self, error: &DicomizeError, tile: Option<TileCoord>) {
///         eprintln!("Error: {} ({:?})", error, tile);
///     }
///
///     fn on_complete(&self, stats: &ConversionStats) {
///         println!("{} frames written", stats.frames);
///     }
/// }
/// ```
pub trait ProgressHandler: Send + Sync {
    /// Called when progress is updated.
    fn on_progress(&self, event: &ProgressEvent);

    /// Called when the run fails.
    ///
    /// # Arguments
    ///
    /// * `error` - The error that aborted the run
    /// * `tile` - The tile being processed when it occurred (if known)
    fn on_error(&self, error: &DicomizeError, tile: Option<TileCoord>) {
        let _ = (error, tile);
    }

    /// Called when the run completes.
    fn on_complete(&self, stats: &ConversionStats) {
        let _ = stats;
    }

    /// Check if the run should be cancelled.
    ///
    /// Polled between tiles; returning `true` aborts the current level.
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// A no-op progress handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgress;

impl ProgressHandler for NullProgress {
    fn on_progress(&self, _event: &ProgressEvent) {}
}
