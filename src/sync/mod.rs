//! Stream synchronization module
//!
//! Coordinates the capture and playback contexts: message passing between
//! them, timing snapshots, drift correction and the per-block processing
//! loop that feeds the echo canceller.

mod capture;
mod drift;
mod engine;
mod error;
mod link;
mod message;
pub mod messenger;
mod playback;
mod skip;
mod snapshot;
mod stats;

pub use capture::CaptureContext;
pub use drift::{
    Correction, DriftController, DriftOutcome, DriftState, DriftTimer, TimerCommand,
    MAX_ALIGNED_DIFF_USEC, TIMER_THREAD_NAME,
};
pub use engine::{DeviceState, EchoCancelEngine, StreamEndpoints};
pub use error::EngineError;
pub use link::{BOTH_ACTIVE, SINK_ACTIVE, SOURCE_ACTIVE};
pub use message::{CaptureMessage, PlaybackMessage};
pub use messenger::{channel, send, Inbox, Poster, Reply};
pub use playback::PlaybackContext;
pub use skip::{SkipState, SAFETY_MARGIN_FRAMES};
pub use snapshot::{calc_diff, SinkSnapshot, SourceSnapshot};
pub use stats::{ProcessingStats, StatsSnapshot};
