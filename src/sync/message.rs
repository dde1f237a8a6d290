//! Messages exchanged between the engine contexts

use crate::audio::AudioBlock;

use super::engine::DeviceState;
use super::messenger::Reply;
use super::snapshot::{SinkSnapshot, SourceSnapshot};

/// Messages handled by the capture context
#[derive(Debug)]
pub enum CaptureMessage {
    /// A block the playback context just rendered
    Post(AudioBlock),
    /// The playback side rewound this many bytes
    Rewind(usize),
    /// Reply with the current capture timing
    LatencySnapshot(Reply<SourceSnapshot>),
    /// Realign the streams by this offset in microseconds
    ApplyDiffTime(i64),
    /// Playback timing for the resync request numbered `epoch`
    SinkTiming { epoch: u64, snapshot: SinkSnapshot },
    /// The capture device changed state
    SetState(DeviceState),
}

/// Messages handled by the playback context
#[derive(Debug)]
pub enum PlaybackMessage {
    /// Reply with the current playback timing
    LatencySnapshot(Reply<SinkSnapshot>),
    /// The playback device changed state
    SetState(DeviceState),
}
