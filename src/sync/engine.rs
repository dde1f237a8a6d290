//! Engine setup, control plane and teardown
//!
//! [`EchoCancelEngine::build`] creates everything a session needs in one
//! step: the canceller, both real-time contexts, the channels between them
//! and the drift timer. Either all of it is created or none of it is.
//!
//! The engine itself stays on the control side. It tracks which devices are
//! running, triggers resyncs on activation and runs drift checks. The two
//! contexts are handed to the device threads that own them.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::audio::{
    AecRecorder, CaptureEndpoint, Clock, DeviceLatency, RenderEndpoint, SampleFormat, SampleSpec,
};
use crate::canceller::{self, EchoCanceller};
use crate::config::EchoCancelConfig;

use super::capture::{CaptureContext, CaptureParts};
use super::drift::{DriftController, DriftOutcome, DriftTimer};
use super::error::EngineError;
use super::link::{StreamLink, BOTH_ACTIVE, SINK_ACTIVE, SOURCE_ACTIVE};
use super::message::{CaptureMessage, PlaybackMessage};
use super::messenger::{channel, Poster};
use super::playback::{PlaybackContext, PlaybackParts};
use super::stats::StatsSnapshot;

/// Device run state reported to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Running,
    Suspended,
}

/// Devices and time source a session runs against
pub struct StreamEndpoints {
    /// Time source shared by both contexts
    pub clock: Arc<dyn Clock>,
    /// Latency of the capture device
    pub capture_latency: Box<dyn DeviceLatency>,
    /// Latency of the playback device
    pub playback_latency: Box<dyn DeviceLatency>,
    /// Consumer of the echo-cancelled stream
    pub downstream: Box<dyn CaptureEndpoint>,
    /// Producer of the audio to play
    pub upstream: Box<dyn RenderEndpoint>,
}

/// Control-thread side of the channels into both contexts
struct ControlPlane {
    to_capture: Poster<CaptureMessage>,
    to_playback: Poster<PlaybackMessage>,
    drift: DriftController,
}

impl ControlPlane {
    fn check_drift(&mut self) -> DriftOutcome {
        let ControlPlane {
            to_capture,
            to_playback,
            drift,
        } = self;
        drift.check(to_capture, to_playback)
    }
}

/// A running echo-cancel session
pub struct EchoCancelEngine {
    spec: SampleSpec,
    block_bytes: usize,
    link: Arc<StreamLink>,
    control: Arc<Mutex<ControlPlane>>,
    timer: Option<DriftTimer>,
}

impl EchoCancelEngine {
    /// Set up a session with the canceller named in `config`
    pub fn build(
        config: &EchoCancelConfig,
        endpoints: StreamEndpoints,
    ) -> Result<(Self, CaptureContext, PlaybackContext), EngineError> {
        config.validate()?;
        let mut source_spec = config.sample_spec();
        let mut sink_spec = source_spec;
        let canceller = canceller::init(
            config.aec_method,
            &mut source_spec,
            &mut sink_spec,
            &config.aec_args,
        )?;
        Self::assemble(config, source_spec, canceller, endpoints)
    }

    /// Set up a session around an existing canceller
    pub fn build_with_canceller(
        config: &EchoCancelConfig,
        canceller: Box<dyn EchoCanceller>,
        endpoints: StreamEndpoints,
    ) -> Result<(Self, CaptureContext, PlaybackContext), EngineError> {
        config.validate()?;
        let mut spec = config.sample_spec();
        spec.format = SampleFormat::S16le;
        Self::assemble(config, spec, canceller, endpoints)
    }

    fn assemble(
        config: &EchoCancelConfig,
        spec: SampleSpec,
        canceller: Box<dyn EchoCanceller>,
        endpoints: StreamEndpoints,
    ) -> Result<(Self, CaptureContext, PlaybackContext), EngineError> {
        if canceller.block_size_frames() == 0 {
            return Err(EngineError::EmptyBlock);
        }
        let block_bytes = canceller.block_size_frames() * spec.frame_size();

        let link = Arc::new(StreamLink::new());
        let capacity = config.message_capacity;
        let (data_poster, data_inbox) = channel(capacity);
        let (control_poster, control_inbox) = channel(capacity);
        let (playback_poster, playback_inbox) = channel(capacity);

        let control = Arc::new(Mutex::new(ControlPlane {
            to_capture: control_poster,
            to_playback: playback_poster,
            drift: DriftController::new(spec, config.snapshot_timeout()),
        }));

        let timer = match config.adjust_interval() {
            Some(period) => {
                let control = control.clone();
                let link = link.clone();
                let timer = DriftTimer::spawn(period, move || {
                    if link.is_linked() && link.both_active() {
                        let outcome = control.lock().check_drift();
                        debug!("Periodic drift check: {:?}", outcome);
                    }
                })
                .map_err(EngineError::Timer)?;
                Some(timer)
            }
            None => None,
        };

        let recorder = config
            .save_aec
            .then(|| AecRecorder::create(&config.dump_dir));

        let capture = CaptureContext::new(CaptureParts {
            spec,
            canceller,
            downstream: endpoints.downstream,
            latency: endpoints.capture_latency,
            clock: endpoints.clock.clone(),
            recorder,
            data_inbox,
            control_inbox,
            drain_limit: capacity,
            link: link.clone(),
        });

        let playback = PlaybackContext::new(PlaybackParts {
            upstream: endpoints.upstream,
            latency: endpoints.playback_latency,
            clock: endpoints.clock,
            to_capture: data_poster,
            inbox: playback_inbox,
            drain_limit: capacity,
            link: link.clone(),
        });

        info!(
            "Echo-cancel engine ready: {}, block {} bytes, drift check {}",
            spec,
            block_bytes,
            match config.adjust_interval() {
                Some(period) => format!("every {:?}", period),
                None => "disabled".to_string(),
            }
        );

        let engine = Self {
            spec,
            block_bytes,
            link,
            control,
            timer,
        };
        Ok((engine, capture, playback))
    }

    /// Negotiated stream format
    pub fn sample_spec(&self) -> SampleSpec {
        self.spec
    }

    /// Canceller block length in bytes
    pub fn block_bytes(&self) -> usize {
        self.block_bytes
    }

    /// Report a capture device state change.
    ///
    /// Repeated reports of the current state are ignored. A change reaches the
    /// capture context on its next tick; starting also requests a resync.
    pub fn set_source_state(&self, state: DeviceState) {
        self.set_device_state(SOURCE_ACTIVE, state, "capture");
    }

    /// Report a playback device state change, see [`Self::set_source_state`]
    pub fn set_sink_state(&self, state: DeviceState) {
        self.set_device_state(SINK_ACTIVE, state, "playback");
    }

    fn set_device_state(&self, bit: u8, state: DeviceState, name: &str) {
        let running = state == DeviceState::Running;
        let previous = self.link.set_active(bit, running);
        if (previous & bit != 0) == running {
            debug!("{} device already {:?}", name, state);
            return;
        }

        self.notify_context(bit, state);

        if running {
            let mask = previous | bit;
            self.link.request_resync();
            debug!("{} device running, active mask {}", name, mask);
            if mask == BOTH_ACTIVE {
                if let Some(timer) = self.timer.as_ref() {
                    timer.rearm();
                }
            }
        } else {
            debug!("{} device suspended, active mask {}", name, previous & !bit);
        }
    }

    /// Hand a state change to the context owning the device
    fn notify_context(&self, bit: u8, state: DeviceState) {
        let mut control = self.control.lock();
        let posted = if bit == SOURCE_ACTIVE {
            control.to_capture.post(CaptureMessage::SetState(state))
        } else {
            control.to_playback.post(PlaybackMessage::SetState(state))
        };
        if !posted {
            self.link.stats.add_dropped_post(1);
        }
    }

    /// Whether both devices are running
    pub fn is_active(&self) -> bool {
        self.link.both_active()
    }

    /// Ask the capture context to realign on its next tick
    pub fn request_resync(&self) {
        self.link.request_resync();
    }

    /// Whether a resync is requested and not yet run
    pub fn resync_pending(&self) -> bool {
        self.link.resync_pending()
    }

    /// Run one drift check now.
    ///
    /// Blocks until both contexts answer or the snapshot timeout expires,
    /// so both device threads must be ticking.
    pub fn check_drift(&self) -> DriftOutcome {
        if !self.link.is_linked() || !self.link.both_active() {
            return DriftOutcome::Inactive;
        }
        self.control.lock().check_drift()
    }

    /// Post an offset correction to the capture context
    pub fn post_diff_time(&self, diff_usec: i64) -> bool {
        let posted = self
            .control
            .lock()
            .to_capture
            .post(CaptureMessage::ApplyDiffTime(diff_usec));
        if !posted {
            self.link.stats.add_dropped_post(1);
        }
        posted
    }

    /// Current processing counters
    pub fn stats(&self) -> StatsSnapshot {
        self.link.stats.snapshot()
    }

    /// Stop the drift timer and unlink both contexts.
    ///
    /// Contexts ignore device callbacks afterwards. Their queues and the
    /// canceller are released when the device threads drop them.
    pub fn shutdown(&mut self) {
        if let Some(mut timer) = self.timer.take() {
            timer.shutdown();
        }
        if self.link.is_linked() {
            self.link.unlink();
            info!("Echo-cancel engine shut down: {}", self.stats());
        }
    }
}

impl Drop for EchoCancelEngine {
    fn drop(&mut self) {
        self.shutdown();
        if self.link.active_mask() != 0 {
            warn!("Engine dropped while devices were still active");
        }
    }
}
