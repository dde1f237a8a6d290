//! Engine error types

use thiserror::Error;

use crate::audio::AudioError;
use crate::canceller::CancellerError;
use crate::config::ConfigError;

/// Errors raised while setting up the echo-cancel engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Canceller setup failed: {0}")]
    Canceller(#[from] CancellerError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Canceller block size must be at least one frame")]
    EmptyBlock,

    #[error("Failed to start drift timer: {0}")]
    Timer(#[source] std::io::Error),
}
