//! Pending byte skips used to realign the two streams

use tracing::debug;

use crate::audio::SampleSpec;

/// Extra frames skipped on playback-side corrections to absorb jitter
pub const SAFETY_MARGIN_FRAMES: usize = 10;

/// Bytes still to be skipped on either stream.
///
/// At most one side is non-zero at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SkipState {
    source: usize,
    sink: usize,
}

impl SkipState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Captured bytes still to be skipped
    pub fn source(&self) -> usize {
        self.source
    }

    /// Playback bytes still to be skipped
    pub fn sink(&self) -> usize {
        self.sink
    }

    pub fn is_idle(&self) -> bool {
        self.source == 0 && self.sink == 0
    }

    /// Turn a measured offset into a pending skip. Returns whether the state changed.
    ///
    /// A negative offset means capture is ahead of playback, so playback data
    /// is skipped (with a safety margin). A positive offset skips captured
    /// data. Offsets shorter than one frame change nothing.
    pub fn apply_diff_time(&mut self, diff_usec: i64, spec: &SampleSpec) -> bool {
        if diff_usec < 0 {
            let mut bytes = spec.usec_to_bytes(diff_usec.unsigned_abs());
            if bytes == 0 {
                return false;
            }
            bytes += spec.frames_to_bytes(SAFETY_MARGIN_FRAMES);
            debug!("Playback after capture ({} usec), skipping {} playback bytes", diff_usec, bytes);
            self.sink = bytes;
            self.source = 0;
            true
        } else if diff_usec > 0 {
            let bytes = spec.usec_to_bytes(diff_usec as u64);
            if bytes == 0 {
                return false;
            }
            debug!("Playback too far ahead ({} usec), skipping {} capture bytes", diff_usec, bytes);
            self.source = bytes;
            self.sink = 0;
            true
        } else {
            false
        }
    }

    /// Consume up to `available` bytes of the source skip, returning the amount consumed
    pub fn take_source(&mut self, available: usize) -> usize {
        let n = self.source.min(available);
        self.source -= n;
        n
    }

    /// Consume up to `available` bytes of the sink skip, returning the amount consumed
    pub fn take_sink(&mut self, available: usize) -> usize {
        let n = self.sink.min(available);
        self.sink -= n;
        n
    }
}
