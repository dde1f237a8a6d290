//! aec-sync - Real-time echo cancellation between independently clocked devices
//!
//! This library aligns a capture stream with the playback stream it picks up
//! as echo, runs an echo canceller on the aligned blocks, and keeps the two
//! streams aligned as the device clocks drift apart.

pub mod audio;
pub mod canceller;
pub mod config;
pub mod sync;

pub use audio::{AudioBlock, BlockQueue, SampleFormat, SampleSpec};
pub use canceller::{CancellerArgs, CancellerMethod, EchoCanceller};
pub use config::EchoCancelConfig;
pub use sync::{CaptureContext, DeviceState, EchoCancelEngine, PlaybackContext, StreamEndpoints};
