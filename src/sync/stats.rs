//! Processing counters readable from any thread

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Live counters updated by the engine contexts
#[derive(Debug, Default)]
pub struct ProcessingStats {
    blocks_cancelled: AtomicU64,
    blocks_passthrough: AtomicU64,
    source_bytes_skipped: AtomicU64,
    sink_bytes_skipped: AtomicU64,
    resyncs: AtomicU64,
    corrections: AtomicU64,
    underruns: AtomicU64,
    posts_dropped: AtomicU64,
}

impl ProcessingStats {
    /// Count blocks run through the canceller
    pub fn add_cancelled(&self, n: u64) {
        self.blocks_cancelled.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_passthrough(&self, n: u64) {
        self.blocks_passthrough.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_source_skipped(&self, n: u64) {
        self.source_bytes_skipped.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_sink_skipped(&self, n: u64) {
        self.sink_bytes_skipped.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_resync(&self, n: u64) {
        self.resyncs.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_correction(&self, n: u64) {
        self.corrections.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_underrun(&self, n: u64) {
        self.underruns.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_dropped_post(&self, n: u64) {
        self.posts_dropped.fetch_add(n, Ordering::Relaxed);
    }

    /// Copy of all counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            blocks_cancelled: self.blocks_cancelled.load(Ordering::Relaxed),
            blocks_passthrough: self.blocks_passthrough.load(Ordering::Relaxed),
            source_bytes_skipped: self.source_bytes_skipped.load(Ordering::Relaxed),
            sink_bytes_skipped: self.sink_bytes_skipped.load(Ordering::Relaxed),
            resyncs: self.resyncs.load(Ordering::Relaxed),
            corrections: self.corrections.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            posts_dropped: self.posts_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ProcessingStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Blocks run through the canceller
    pub blocks_cancelled: u64,
    /// Blocks forwarded unfiltered
    pub blocks_passthrough: u64,
    /// Captured bytes dropped to realign
    pub source_bytes_skipped: u64,
    /// Playback bytes dropped to realign
    pub sink_bytes_skipped: u64,
    /// Resyncs run by the capture context
    pub resyncs: u64,
    /// Offset corrections that changed the skip state
    pub corrections: u64,
    /// Playback underruns
    pub underruns: u64,
    /// Messages lost to a full or closed channel
    pub posts_dropped: u64,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cancelled={} passthrough={} skipped(capture={}B playback={}B) resyncs={} corrections={} underruns={} dropped={}",
            self.blocks_cancelled,
            self.blocks_passthrough,
            self.source_bytes_skipped,
            self.sink_bytes_skipped,
            self.resyncs,
            self.corrections,
            self.underruns,
            self.posts_dropped
        )
    }
}
