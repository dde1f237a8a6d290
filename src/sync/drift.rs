//! Drift measurement and correction policy
//!
//! The controller runs on the control thread. Each check requests a timing
//! snapshot from both contexts, computes the offset between them and, when
//! it is outside tolerance, posts a correction to the capture context.
//! Corrections are skip-based; the stream rate is never adjusted.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::audio::SampleSpec;

use super::message::{CaptureMessage, PlaybackMessage};
use super::messenger::{send, Poster};
use super::snapshot::calc_diff;

/// Offsets above this many microseconds are corrected even when playback leads
pub const MAX_ALIGNED_DIFF_USEC: i64 = 1000;

/// Name of the drift timer thread
pub const TIMER_THREAD_NAME: &str = "aec-drift";

/// Controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftState {
    Idle,
    AwaitingSnapshot,
    Correcting,
}

/// Action taken for a measured offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correction {
    /// Within tolerance
    None,
    /// Capture is ahead of playback; cancellation cannot work until fixed
    Urgent,
    /// Playback leads by more than the tolerance
    NonUrgent,
}

impl Correction {
    /// Policy for an offset in microseconds
    pub fn for_diff(diff_usec: i64) -> Self {
        if diff_usec < 0 {
            Correction::Urgent
        } else if diff_usec > MAX_ALIGNED_DIFF_USEC {
            Correction::NonUrgent
        } else {
            Correction::None
        }
    }
}

/// Result of one drift check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftOutcome {
    /// Not both devices are running
    Inactive,
    /// A snapshot request was not answered
    Canceled,
    /// Offset within tolerance
    Aligned { diff_usec: i64 },
    /// A correction was posted to the capture context
    Corrected { diff_usec: i64, correction: Correction },
}

/// Snapshot-based drift controller
#[derive(Debug)]
pub struct DriftController {
    spec: SampleSpec,
    timeout: Duration,
    state: DriftState,
}

impl DriftController {
    pub fn new(spec: SampleSpec, timeout: Duration) -> Self {
        Self {
            spec,
            timeout,
            state: DriftState::Idle,
        }
    }

    pub fn state(&self) -> DriftState {
        self.state
    }

    /// Measure the offset between the contexts and post a correction if needed.
    ///
    /// Blocks for up to twice the snapshot timeout. Call only from the
    /// control thread.
    pub fn check(
        &mut self,
        capture: &mut Poster<CaptureMessage>,
        playback: &mut Poster<PlaybackMessage>,
    ) -> DriftOutcome {
        self.state = DriftState::AwaitingSnapshot;

        let Some(source) = send(capture, CaptureMessage::LatencySnapshot, self.timeout) else {
            debug!("Capture snapshot canceled");
            self.state = DriftState::Idle;
            return DriftOutcome::Canceled;
        };
        let Some(sink) = send(playback, PlaybackMessage::LatencySnapshot, self.timeout) else {
            debug!("Playback snapshot canceled");
            self.state = DriftState::Idle;
            return DriftOutcome::Canceled;
        };

        let diff_usec = calc_diff(&sink, &source, &self.spec);
        debug!(
            "Drift check: diff {} usec (sink {:?}, source {:?})",
            diff_usec, sink, source
        );

        let correction = Correction::for_diff(diff_usec);
        if correction == Correction::None {
            self.state = DriftState::Idle;
            return DriftOutcome::Aligned { diff_usec };
        }

        self.state = DriftState::Correcting;
        if !capture.post(CaptureMessage::ApplyDiffTime(diff_usec)) {
            warn!("Failed to post drift correction of {} usec", diff_usec);
        }
        self.state = DriftState::Idle;
        DriftOutcome::Corrected {
            diff_usec,
            correction,
        }
    }
}

/// Commands for the drift timer thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerCommand {
    /// Restart the period from now
    Rearm,
    Shutdown,
}

/// Periodic drift check thread
pub struct DriftTimer {
    commands: Sender<TimerCommand>,
    handle: Option<JoinHandle<()>>,
}

impl DriftTimer {
    /// Start a thread calling `tick` every `period` until shut down
    pub fn spawn<F>(period: Duration, mut tick: F) -> std::io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let (commands, rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name(TIMER_THREAD_NAME.into())
            .spawn(move || {
                info!("Drift timer started, period {:?}", period);
                loop {
                    match rx.recv_timeout(period) {
                        Ok(TimerCommand::Rearm) => continue,
                        Ok(TimerCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => tick(),
                    }
                }
                info!("Drift timer stopped");
            })?;
        Ok(Self {
            commands,
            handle: Some(handle),
        })
    }

    /// Restart the period
    pub fn rearm(&self) {
        let _ = self.commands.send(TimerCommand::Rearm);
    }

    /// Stop the thread and wait for it to exit
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.commands.send(TimerCommand::Shutdown);
            if handle.join().is_err() {
                warn!("Drift timer thread panicked");
            }
        }
    }
}

impl Drop for DriftTimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
