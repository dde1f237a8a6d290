//! Canceller error types

use thiserror::Error;

/// Errors raised while setting up an echo canceller
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CancellerError {
    #[error("Unknown echo canceller: {0}")]
    UnknownMethod(String),

    #[error("Invalid {name} specification: {value} (allowed {min}-{max})")]
    OutOfRange {
        name: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    #[error("Invalid canceller argument: {0}")]
    InvalidArgument(String),

    #[error("Unsupported channel count: {0}")]
    UnsupportedChannels(u16),

    #[error("Frame of {frame_size_ms} ms at {rate} Hz holds no samples")]
    EmptyBlock { frame_size_ms: u32, rate: u32 },
}
