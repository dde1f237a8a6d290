//! Playback context
//!
//! Owned by the playback device thread. Each render pulls audio from the
//! upstream producer, hands it to the device and forwards a reference copy
//! to the capture context, where it becomes the cancellation reference.
//!
//! Only blocks the capture context accepted count as sent. While a resync is
//! pending, one timing snapshot per request follows the forwarded block.

use std::sync::Arc;

use tracing::{debug, info};

use crate::audio::{AudioBlock, Clock, DeviceLatency, RenderEndpoint};

use super::engine::DeviceState;
use super::link::StreamLink;
use super::message::{CaptureMessage, PlaybackMessage};
use super::messenger::{Inbox, Poster};
use super::snapshot::SinkSnapshot;

/// Everything the playback context owns apart from its inbox
struct PlaybackStream {
    upstream: Box<dyn RenderEndpoint>,
    latency: Box<dyn DeviceLatency>,
    clock: Arc<dyn Clock>,
    to_capture: Poster<CaptureMessage>,
    send_counter: i64,
    in_underrun: bool,
    /// Resync request the last timing snapshot was sent for
    timing_epoch: Option<u64>,
    link: Arc<StreamLink>,
}

/// Real-time state of the playback side
pub struct PlaybackContext {
    inbox: Inbox<PlaybackMessage>,
    drain_limit: usize,
    stream: PlaybackStream,
}

/// Collaborators of a playback context
pub(crate) struct PlaybackParts {
    pub upstream: Box<dyn RenderEndpoint>,
    pub latency: Box<dyn DeviceLatency>,
    pub clock: Arc<dyn Clock>,
    pub to_capture: Poster<CaptureMessage>,
    pub inbox: Inbox<PlaybackMessage>,
    pub drain_limit: usize,
    pub link: Arc<StreamLink>,
}

impl PlaybackContext {
    pub(crate) fn new(parts: PlaybackParts) -> Self {
        Self {
            inbox: parts.inbox,
            drain_limit: parts.drain_limit,
            stream: PlaybackStream {
                upstream: parts.upstream,
                latency: parts.latency,
                clock: parts.clock,
                to_capture: parts.to_capture,
                send_counter: 0,
                in_underrun: false,
                timing_epoch: None,
                link: parts.link,
            },
        }
    }

    /// Produce `nbytes` for the playback device
    pub fn render(&mut self, nbytes: usize) -> AudioBlock {
        if !self.stream.link.is_linked() {
            return AudioBlock::silence(nbytes);
        }

        let block = self.stream.render(nbytes);

        let limit = self.drain_limit;
        let stream = &mut self.stream;
        self.inbox.drain(limit, |msg| stream.handle_message(msg));

        block
    }

    /// The playback device rewound `nbytes` it had not played yet
    pub fn process_rewind(&mut self, nbytes: usize) {
        if !self.stream.link.is_linked() || nbytes == 0 {
            return;
        }
        let stream = &mut self.stream;
        stream.upstream.rewind(nbytes);
        if stream.post(CaptureMessage::Rewind(nbytes)) {
            stream.send_counter -= nbytes as i64;
        }
        debug!("Playback rewind of {} bytes", nbytes);
    }

    /// Current timing state
    pub fn snapshot(&self) -> SinkSnapshot {
        self.stream.snapshot()
    }

    /// Bytes forwarded to the capture context, minus rewinds
    pub fn send_counter(&self) -> i64 {
        self.stream.send_counter
    }
}

impl Drop for PlaybackContext {
    fn drop(&mut self) {
        info!("Playback context released");
    }
}

impl PlaybackStream {
    fn render(&mut self, nbytes: usize) -> AudioBlock {
        let rendered = self.upstream.render(nbytes);

        if rendered.underrun_bytes > 0 {
            if !self.in_underrun {
                debug!("Playback underrun");
                self.link.stats.add_underrun(1);
                self.in_underrun = true;
            }
        } else if self.in_underrun {
            debug!("Handling end of underrun");
            self.in_underrun = false;
            self.link.request_resync();
        }

        let block = rendered.block;
        if self.post(CaptureMessage::Post(block.clone())) {
            self.send_counter += block.len() as i64;
        }
        self.post_timing();
        block
    }

    /// Send timing for the pending resync request, once per request
    fn post_timing(&mut self) {
        if !self.link.resync_pending() {
            return;
        }
        let epoch = self.link.resync_epoch();
        if self.timing_epoch == Some(epoch) {
            return;
        }
        let snapshot = self.snapshot();
        if self.post(CaptureMessage::SinkTiming { epoch, snapshot }) {
            self.timing_epoch = Some(epoch);
        }
    }

    fn post(&mut self, message: CaptureMessage) -> bool {
        let posted = self.to_capture.post(message);
        if !posted {
            self.link.stats.add_dropped_post(1);
        }
        posted
    }

    fn handle_message(&mut self, message: PlaybackMessage) {
        match message {
            PlaybackMessage::LatencySnapshot(reply) => reply.send(self.snapshot()),
            PlaybackMessage::SetState(DeviceState::Suspended) => {
                self.in_underrun = false;
                debug!("Playback context suspended");
            }
            PlaybackMessage::SetState(DeviceState::Running) => {
                debug!("Playback context resumed");
            }
        }
    }

    fn snapshot(&self) -> SinkSnapshot {
        SinkSnapshot {
            now_usec: self.clock.now_usec(),
            latency_usec: self.latency.latency_usec(),
            delay_bytes: self.latency.delay_bytes(),
            send_counter: self.send_counter,
        }
    }
}
