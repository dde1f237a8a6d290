//! State shared between the control plane and both real-time contexts

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};

use super::stats::ProcessingStats;

/// Capture device bit in the active mask
pub const SOURCE_ACTIVE: u8 = 1;
/// Playback device bit in the active mask
pub const SINK_ACTIVE: u8 = 2;
/// Both devices running
pub const BOTH_ACTIVE: u8 = SOURCE_ACTIVE | SINK_ACTIVE;

/// Atomics the contexts and the control plane coordinate through
#[derive(Debug)]
pub(crate) struct StreamLink {
    linked: AtomicBool,
    resync: AtomicBool,
    /// Bumped by every resync request; playback timing is tagged with it
    resync_epoch: AtomicU64,
    active: AtomicU8,
    pub(crate) stats: ProcessingStats,
}

impl StreamLink {
    pub(crate) fn new() -> Self {
        Self {
            linked: AtomicBool::new(true),
            resync: AtomicBool::new(false),
            resync_epoch: AtomicU64::new(0),
            active: AtomicU8::new(0),
            stats: ProcessingStats::default(),
        }
    }

    pub(crate) fn is_linked(&self) -> bool {
        self.linked.load(Ordering::Acquire)
    }

    pub(crate) fn unlink(&self) {
        self.linked.store(false, Ordering::Release);
    }

    /// Ask for a resync against playback timing taken from now on
    pub(crate) fn request_resync(&self) {
        self.resync_epoch.fetch_add(1, Ordering::AcqRel);
        self.resync.store(true, Ordering::Release);
    }

    /// Set the resync flag again without invalidating timing already sent
    pub(crate) fn rearm_resync(&self) {
        self.resync.store(true, Ordering::Release);
    }

    pub(crate) fn resync_epoch(&self) -> u64 {
        self.resync_epoch.load(Ordering::Acquire)
    }

    /// Clear and return the resync request
    pub(crate) fn take_resync(&self) -> bool {
        self.resync.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn resync_pending(&self) -> bool {
        self.resync.load(Ordering::Acquire)
    }

    /// Set or clear a device bit, returning the mask before the change
    pub(crate) fn set_active(&self, bit: u8, active: bool) -> u8 {
        if active {
            self.active.fetch_or(bit, Ordering::AcqRel)
        } else {
            self.active.fetch_and(!bit, Ordering::AcqRel)
        }
    }

    pub(crate) fn active_mask(&self) -> u8 {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn both_active(&self) -> bool {
        self.active_mask() == BOTH_ACTIVE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_mask() {
        let link = StreamLink::new();
        assert_eq!(link.set_active(SOURCE_ACTIVE, true), 0);
        assert!(!link.both_active());
        assert_eq!(link.set_active(SINK_ACTIVE, true), SOURCE_ACTIVE);
        assert!(link.both_active());
        assert_eq!(link.set_active(SINK_ACTIVE, true), BOTH_ACTIVE);
        assert_eq!(link.set_active(SOURCE_ACTIVE, false), BOTH_ACTIVE);
        assert_eq!(link.active_mask(), SINK_ACTIVE);
    }

    #[test]
    fn test_resync_is_taken_once() {
        let link = StreamLink::new();
        assert!(!link.take_resync());
        link.request_resync();
        assert!(link.resync_pending());
        assert!(link.take_resync());
        assert!(!link.take_resync());
    }

    #[test]
    fn test_request_bumps_epoch_rearm_does_not() {
        let link = StreamLink::new();
        link.request_resync();
        let epoch = link.resync_epoch();
        link.take_resync();
        link.rearm_resync();
        assert!(link.resync_pending());
        assert_eq!(link.resync_epoch(), epoch);
        link.request_resync();
        assert_eq!(link.resync_epoch(), epoch + 1);
    }
}
