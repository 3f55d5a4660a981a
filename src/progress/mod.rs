//! Progress reporting and cancellation for conversion runs.
//!
//! Handlers receive per-level and per-tile events and are polled for
//! cancellation between tiles.
//!
//! # Example
//!
//! ```rust,ignore
//! use wsi_dicomize::progress::CallbackProgress;
//!
//! let progress = CallbackProgress::new(|event| {
//!     println!("Progress: {:.1}%", event.overall_progress * 100.0);
//! });
//! let pipeline = ConversionPipeline::new(config).with_progress(progress);
//! ```

mod callback;
mod channel;
mod handler;

pub use callback::CallbackProgress;
pub use channel::{ChannelProgress, ProgressReceiver};
pub use handler::{NullProgress, ProgressEvent, ProgressHandler, ProgressPhase};
