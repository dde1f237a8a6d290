//! Sample format description and byte/time conversions

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::AudioError;

/// Microseconds per second
pub const USEC_PER_SEC: u64 = 1_000_000;

/// Maximum number of interleaved channels a stream may carry
pub const MAX_CHANNELS: u16 = 8;

/// PCM sample encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    /// Signed 16-bit little endian
    #[default]
    S16le,
    /// 32-bit IEEE float little endian
    F32le,
}

impl SampleFormat {
    /// Size of one sample in bytes
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::S16le => 2,
            SampleFormat::F32le => 4,
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleFormat::S16le => write!(f, "s16le"),
            SampleFormat::F32le => write!(f, "f32le"),
        }
    }
}

impl FromStr for SampleFormat {
    type Err = AudioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "s16le" | "s16" | "s16ne" => Ok(SampleFormat::S16le),
            "f32le" | "float32le" | "f32" => Ok(SampleFormat::F32le),
            other => Err(AudioError::UnsupportedConfig(format!(
                "unknown sample format: {}",
                other
            ))),
        }
    }
}

/// Format of one interleaved PCM stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleSpec {
    /// Sample encoding
    pub format: SampleFormat,
    /// Sample rate in Hz
    pub rate: u32,
    /// Number of interleaved channels
    pub channels: u16,
}

impl Default for SampleSpec {
    fn default() -> Self {
        Self {
            format: SampleFormat::S16le,
            rate: 16000,
            channels: 1,
        }
    }
}

impl SampleSpec {
    /// Create a new sample spec
    pub fn new(format: SampleFormat, rate: u32, channels: u16) -> Self {
        Self {
            format,
            rate,
            channels,
        }
    }

    /// Check that rate and channel count are usable
    pub fn validate(&self) -> Result<(), AudioError> {
        if self.rate == 0 {
            return Err(AudioError::UnsupportedConfig(
                "sample rate must be non-zero".into(),
            ));
        }
        if self.channels == 0 || self.channels > MAX_CHANNELS {
            return Err(AudioError::UnsupportedConfig(format!(
                "unsupported channel count: {} (1-{} allowed)",
                self.channels, MAX_CHANNELS
            )));
        }
        Ok(())
    }

    /// Bytes per interleaved frame
    pub fn frame_size(&self) -> usize {
        self.format.bytes_per_sample() * self.channels as usize
    }

    /// Bytes per second of audio
    pub fn bytes_per_second(&self) -> u64 {
        self.frame_size() as u64 * self.rate as u64
    }

    /// Convert a duration to a whole number of frames, expressed in bytes.
    ///
    /// Rounds down to the frame boundary.
    pub fn usec_to_bytes(&self, usec: u64) -> usize {
        let frames = (usec as u128 * self.rate as u128) / USEC_PER_SEC as u128;
        frames as usize * self.frame_size()
    }

    /// Convert a byte count to a duration, ignoring any partial frame.
    pub fn bytes_to_usec(&self, bytes: u64) -> u64 {
        let frames = bytes / self.frame_size() as u64;
        ((frames as u128 * USEC_PER_SEC as u128) / self.rate as u128) as u64
    }

    /// Convert frames to bytes
    pub fn frames_to_bytes(&self, frames: usize) -> usize {
        frames * self.frame_size()
    }
}

impl fmt::Display for SampleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}ch {}Hz", self.format, self.channels, self.rate)
    }
}
