//! Echo canceller capability
//!
//! A canceller takes one block of captured audio and the playback block that
//! was heard at the same moment, and returns the captured block with the
//! playback contribution removed. The sync layer owns block pairing and
//! timing; a canceller only sees aligned, equally sized blocks.

mod error;
mod nlms;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::audio::{AudioBlock, SampleFormat, SampleSpec, MAX_CHANNELS};
use crate::config::ModArgs;

pub use error::CancellerError;
pub use nlms::NlmsCanceller;

/// Default canceller frame size in milliseconds
pub const DEFAULT_FRAME_SIZE_MS: u32 = 20;
/// Default adaptive filter length in milliseconds
pub const DEFAULT_FILTER_SIZE_MS: u32 = 200;

const FRAME_SIZE_MS_RANGE: (u32, u32) = (1, 200);
const FILTER_SIZE_MS_RANGE: (u32, u32) = (1, 2000);

/// Echo cancellation algorithm.
///
/// Implementations receive signed 16-bit interleaved blocks of exactly
/// [`block_size_frames`](EchoCanceller::block_size_frames) frames.
pub trait EchoCanceller: Send {
    /// Algorithm name
    fn name(&self) -> &'static str;

    /// Frames per processed block
    fn block_size_frames(&self) -> usize;

    /// Cancel `playback` out of `capture`, writing the result to `out`.
    ///
    /// All three buffers have the same length.
    fn run(&mut self, capture: &[u8], playback: &[u8], out: &mut [u8]);

    /// Release algorithm state. The canceller is not used afterwards.
    fn done(&mut self) {}
}

/// Run a canceller on one block pair.
///
/// Mismatched block lengths leave the capture block unchanged.
pub fn cancel_block(
    canceller: &mut dyn EchoCanceller,
    capture: &AudioBlock,
    playback: &AudioBlock,
) -> AudioBlock {
    if capture.len() != playback.len() {
        warn!(
            "Canceller block mismatch: capture {} bytes, playback {} bytes",
            capture.len(),
            playback.len()
        );
        return capture.clone();
    }
    let mut out = vec![0u8; capture.len()];
    canceller.run(capture.as_bytes(), playback.as_bytes(), &mut out);
    AudioBlock::new(out)
}

/// Canceller that passes the capture signal through unchanged
pub struct NullCanceller {
    block_frames: usize,
}

impl NullCanceller {
    pub fn new(block_frames: usize) -> Self {
        Self { block_frames }
    }
}

impl EchoCanceller for NullCanceller {
    fn name(&self) -> &'static str {
        "null"
    }

    fn block_size_frames(&self) -> usize {
        self.block_frames
    }

    fn run(&mut self, capture: &[u8], _playback: &[u8], out: &mut [u8]) {
        out.copy_from_slice(capture);
    }
}

/// Available canceller implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CancellerMethod {
    #[default]
    Nlms,
    Null,
}

impl fmt::Display for CancellerMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancellerMethod::Nlms => write!(f, "nlms"),
            CancellerMethod::Null => write!(f, "null"),
        }
    }
}

impl FromStr for CancellerMethod {
    type Err = CancellerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nlms" => Ok(CancellerMethod::Nlms),
            "null" | "none" => Ok(CancellerMethod::Null),
            other => Err(CancellerError::UnknownMethod(other.to_string())),
        }
    }
}

/// Tunables shared by all cancellers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CancellerArgs {
    /// Block length in milliseconds (1-200)
    pub frame_size_ms: u32,
    /// Adaptive filter length in milliseconds (1-2000)
    pub filter_size_ms: u32,
}

impl Default for CancellerArgs {
    fn default() -> Self {
        Self {
            frame_size_ms: DEFAULT_FRAME_SIZE_MS,
            filter_size_ms: DEFAULT_FILTER_SIZE_MS,
        }
    }
}

impl CancellerArgs {
    /// Parse `frame_size_ms=.. filter_size_ms=..`, leaving missing keys at their defaults
    pub fn parse(args: &str) -> Result<Self, CancellerError> {
        let args = ModArgs::parse(args).map_err(|e| CancellerError::InvalidArgument(e.to_string()))?;
        let mut parsed = Self::default();
        for (key, value) in args.iter() {
            let target = match key {
                "frame_size_ms" => &mut parsed.frame_size_ms,
                "filter_size_ms" => &mut parsed.filter_size_ms,
                other => {
                    return Err(CancellerError::InvalidArgument(format!(
                        "unknown key: {}",
                        other
                    )))
                }
            };
            *target = value
                .parse()
                .map_err(|_| CancellerError::InvalidArgument(format!("{}={}", key, value)))?;
        }
        parsed.validate()?;
        Ok(parsed)
    }

    /// Check both sizes against their allowed ranges
    pub fn validate(&self) -> Result<(), CancellerError> {
        check_range("frame_size_ms", self.frame_size_ms, FRAME_SIZE_MS_RANGE)?;
        check_range("filter_size_ms", self.filter_size_ms, FILTER_SIZE_MS_RANGE)
    }
}

fn check_range(name: &'static str, value: u32, (min, max): (u32, u32)) -> Result<(), CancellerError> {
    if value < min || value > max {
        return Err(CancellerError::OutOfRange {
            name,
            value,
            min,
            max,
        });
    }
    Ok(())
}

/// Frames per block: the largest power of two not above `rate * frame_size_ms / 1000`
pub fn block_size_frames(rate: u32, frame_size_ms: u32) -> Result<usize, CancellerError> {
    let frames = (rate as u64 * frame_size_ms as u64 / 1000) as usize;
    if frames == 0 {
        return Err(CancellerError::EmptyBlock {
            frame_size_ms,
            rate,
        });
    }
    Ok(1usize << (usize::BITS - 1 - frames.leading_zeros()))
}

/// Create a canceller.
///
/// Fixates both stream specs to what the canceller processes: signed 16-bit
/// samples, with the playback spec equal to the capture spec.
pub fn init(
    method: CancellerMethod,
    source_spec: &mut SampleSpec,
    sink_spec: &mut SampleSpec,
    args: &CancellerArgs,
) -> Result<Box<dyn EchoCanceller>, CancellerError> {
    if source_spec.channels == 0 || source_spec.channels > MAX_CHANNELS {
        return Err(CancellerError::UnsupportedChannels(source_spec.channels));
    }
    args.validate()?;

    let block_frames = block_size_frames(source_spec.rate, args.frame_size_ms)?;

    source_spec.format = SampleFormat::S16le;
    *sink_spec = *source_spec;

    let canceller: Box<dyn EchoCanceller> = match method {
        CancellerMethod::Nlms => {
            let taps = (source_spec.rate as u64 * args.filter_size_ms as u64 / 1000) as usize;
            Box::new(NlmsCanceller::new(*source_spec, block_frames, taps))
        }
        CancellerMethod::Null => Box::new(NullCanceller::new(block_frames)),
    };

    info!(
        "Echo canceller {} ready: {}, {} frames per block",
        canceller.name(),
        source_spec,
        block_frames
    );
    Ok(canceller)
}
