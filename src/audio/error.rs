//! Audio error types

use thiserror::Error;

/// Errors that can occur in the audio subsystem
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open device: {0}")]
    DeviceOpenFailed(String),

    #[error("Unsupported configuration: {0}")]
    UnsupportedConfig(String),

    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("Recording error: {0}")]
    RecordingError(String),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Errors returned by [`BlockQueue`](super::BlockQueue) mutations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue overflow: {requested} bytes queued, limit {max}")]
    Overflow { requested: usize, max: usize },

    #[error("Block of {len} bytes is not aligned to {base}-byte frames")]
    Unaligned { len: usize, base: usize },
}
