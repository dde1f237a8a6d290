//! Capture context: the stream processing loop
//!
//! Owned by the capture device thread. Every captured block drives one tick:
//! pending messages are handled, and the captured audio is paired block by
//! block with the mirrored playback audio, run through the canceller and
//! forwarded downstream.
//!
//! A requested resync runs while the data inbox is drained, at the playback
//! timing message for the current request. At that point every block rendered
//! before the timing was taken has been received and nothing after it, so the
//! two snapshots describe the same stream position.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::audio::{
    AecRecorder, AudioBlock, BlockQueue, CaptureEndpoint, Clock, DeviceLatency, SampleSpec,
    MAX_QUEUE_LENGTH,
};
use crate::canceller::{cancel_block, EchoCanceller};

use super::engine::DeviceState;
use super::link::StreamLink;
use super::message::CaptureMessage;
use super::messenger::Inbox;
use super::skip::SkipState;
use super::snapshot::{calc_diff, SinkSnapshot, SourceSnapshot};

/// Everything the capture context owns apart from its inboxes
struct CaptureStream {
    spec: SampleSpec,
    block_bytes: usize,
    capture_queue: BlockQueue,
    mirror_queue: BlockQueue,
    skip: SkipState,
    recv_counter: i64,
    suspended: bool,
    /// Device reported running again; cleared once stale playback is drained
    resume_pending: bool,
    canceller: Box<dyn EchoCanceller>,
    downstream: Box<dyn CaptureEndpoint>,
    latency: Box<dyn DeviceLatency>,
    clock: Arc<dyn Clock>,
    recorder: Option<AecRecorder>,
    link: Arc<StreamLink>,
}

/// Real-time state of the capture side
pub struct CaptureContext {
    data_inbox: Inbox<CaptureMessage>,
    control_inbox: Inbox<CaptureMessage>,
    drain_limit: usize,
    stream: CaptureStream,
}

/// Collaborators of a capture context
pub(crate) struct CaptureParts {
    pub spec: SampleSpec,
    pub canceller: Box<dyn EchoCanceller>,
    pub downstream: Box<dyn CaptureEndpoint>,
    pub latency: Box<dyn DeviceLatency>,
    pub clock: Arc<dyn Clock>,
    pub recorder: Option<AecRecorder>,
    pub data_inbox: Inbox<CaptureMessage>,
    pub control_inbox: Inbox<CaptureMessage>,
    pub drain_limit: usize,
    pub link: Arc<StreamLink>,
}

impl CaptureContext {
    pub(crate) fn new(parts: CaptureParts) -> Self {
        let frame_size = parts.spec.frame_size();
        let block_bytes = parts.canceller.block_size_frames() * frame_size;

        let capture_queue = BlockQueue::new(frame_size, MAX_QUEUE_LENGTH);
        let mut mirror_queue = BlockQueue::new(frame_size, MAX_QUEUE_LENGTH);
        // Keep one second of played audio for downstream rewinds
        mirror_queue.set_max_rewind(parts.spec.bytes_per_second() as usize);

        Self {
            data_inbox: parts.data_inbox,
            control_inbox: parts.control_inbox,
            drain_limit: parts.drain_limit,
            stream: CaptureStream {
                spec: parts.spec,
                block_bytes,
                capture_queue,
                mirror_queue,
                skip: SkipState::new(),
                recv_counter: 0,
                suspended: false,
                resume_pending: false,
                canceller: parts.canceller,
                downstream: parts.downstream,
                latency: parts.latency,
                clock: parts.clock,
                recorder: parts.recorder,
                link: parts.link,
            },
        }
    }

    /// Process one block delivered by the capture device
    pub fn push(&mut self, block: AudioBlock) {
        if !self.stream.link.is_linked() {
            debug!("Capture push after unlink ignored");
            return;
        }

        self.drain_messages();

        if let Err(e) = self.stream.capture_queue.push(block) {
            warn!("Dropping captured audio: {}", e);
        }

        self.stream.process();
    }

    /// The downstream consumer rewound `nbytes` of cancelled output
    pub fn process_rewind(&mut self, nbytes: usize) {
        if !self.stream.link.is_linked() {
            return;
        }
        let stream = &mut self.stream;
        stream.downstream.rewind(nbytes);
        // Re-read older playback data for the re-captured region
        let rewound = stream.mirror_queue.rewind(nbytes);
        stream
            .capture_queue
            .seek_relative(-(nbytes as i64), true);
        debug!("Capture rewind of {} bytes, mirror rewound {}", nbytes, rewound);
    }

    /// Current timing state
    pub fn snapshot(&self) -> SourceSnapshot {
        self.stream.snapshot()
    }

    /// Realign by `diff_usec`, as if a correction message arrived
    pub fn apply_diff_time(&mut self, diff_usec: i64) {
        self.stream.apply_diff_time(diff_usec);
    }

    /// Pending skips
    pub fn skip_state(&self) -> SkipState {
        self.stream.skip
    }

    /// Bytes of captured audio waiting for a full block
    pub fn capture_queue_len(&self) -> usize {
        self.stream.capture_queue.length()
    }

    /// Bytes of playback audio waiting to be paired
    pub fn mirror_queue_len(&self) -> usize {
        self.stream.mirror_queue.length()
    }

    /// Playback bytes received so far, minus rewinds
    pub fn recv_counter(&self) -> i64 {
        self.stream.recv_counter
    }

    /// Whether the capture device was last reported suspended
    pub fn is_suspended(&self) -> bool {
        self.stream.suspended
    }

    /// Canceller block length in bytes
    pub fn block_bytes(&self) -> usize {
        self.stream.block_bytes
    }

    fn drain_messages(&mut self) {
        let limit = self.drain_limit;
        let stream = &mut self.stream;
        // State changes first, so playback queued before a suspension is discarded
        self.control_inbox.drain(limit, |msg| stream.handle_message(msg));
        self.data_inbox.drain(limit, |msg| stream.handle_message(msg));
        if stream.resume_pending {
            stream.resume();
        }
    }
}

impl Drop for CaptureContext {
    fn drop(&mut self) {
        self.stream.canceller.done();
        if let Some(recorder) = self.stream.recorder.as_mut() {
            recorder.flush();
        }
        info!("Capture context released");
    }
}

impl CaptureStream {
    fn handle_message(&mut self, message: CaptureMessage) {
        match message {
            CaptureMessage::Post(block) => {
                let len = block.len();
                if self.suspended {
                    self.mirror_queue.flush_write(true);
                } else if let Err(e) = self.mirror_queue.push(block) {
                    warn!("Dropping playback audio: {}", e);
                }
                self.recv_counter += len as i64;
            }
            CaptureMessage::Rewind(nbytes) => {
                if self.suspended {
                    self.mirror_queue.flush_write(true);
                } else {
                    self.mirror_queue.seek_relative(-(nbytes as i64), true);
                }
                self.recv_counter -= nbytes as i64;
            }
            CaptureMessage::LatencySnapshot(reply) => reply.send(self.snapshot()),
            CaptureMessage::ApplyDiffTime(diff_usec) => self.apply_diff_time(diff_usec),
            CaptureMessage::SinkTiming { epoch, snapshot } => {
                self.handle_sink_timing(epoch, snapshot)
            }
            CaptureMessage::SetState(state) => self.set_state(state),
        }
    }

    fn set_state(&mut self, state: DeviceState) {
        match state {
            DeviceState::Suspended => {
                self.suspended = true;
                self.resume_pending = false;
                self.capture_queue.flush_write(true);
                self.mirror_queue.flush_write(true);
                debug!("Capture context suspended");
            }
            DeviceState::Running => {
                if self.suspended {
                    self.resume_pending = true;
                }
            }
        }
    }

    fn resume(&mut self) {
        self.suspended = false;
        self.resume_pending = false;
        // Timing taken while suspended refers to discarded playback
        self.link.request_resync();
        debug!("Capture context resumed");
    }

    fn snapshot(&self) -> SourceSnapshot {
        SourceSnapshot {
            now_usec: self.clock.now_usec(),
            latency_usec: self.latency.latency_usec(),
            delay_bytes: self.latency.delay_bytes(),
            recv_counter: self.recv_counter,
            capture_len: self.capture_queue.length() + self.skip.sink(),
            playback_len: self.mirror_queue.length() + self.skip.source(),
        }
    }

    fn apply_diff_time(&mut self, diff_usec: i64) {
        if self.skip.apply_diff_time(diff_usec, &self.spec) {
            self.link.stats.add_correction(1);
        }
    }

    fn handle_sink_timing(&mut self, epoch: u64, sink: SinkSnapshot) {
        if self.suspended
            || !self.link.resync_pending()
            || epoch != self.link.resync_epoch()
            || !self.link.take_resync()
        {
            return;
        }

        let source = self.snapshot();
        let diff_usec = calc_diff(&sink, &source, &self.spec);
        debug!("Resync: diff {} usec", diff_usec);
        self.apply_diff_time(diff_usec);
        self.link.stats.add_resync(1);

        if self.link.resync_epoch() != epoch {
            // Requested again while this one ran
            self.link.rearm_resync();
        }
    }

    fn process(&mut self) {
        let block = self.block_bytes;

        while self.capture_queue.length() >= block {
            if self.skip.source() > 0 {
                let skipped = self.skip.take_source(block);
                self.capture_queue.drop(skipped);
                self.link.stats.add_source_skipped(skipped as u64);
                continue;
            }

            let captured = self.capture_queue.peek_fixed(block);

            if self.mirror_queue.length() >= block && self.skip.sink() == 0 {
                let played = self.mirror_queue.peek_fixed(block);
                let cancelled = cancel_block(self.canceller.as_mut(), &captured, &played);
                if let Some(recorder) = self.recorder.as_mut() {
                    recorder.write_frame(&captured, &played, &cancelled);
                }
                self.downstream.post(cancelled);
                self.mirror_queue.drop(block);
                self.link.stats.add_cancelled(1);
            } else {
                if self.skip.sink() > 0 {
                    let skipped = self.skip.take_sink(self.mirror_queue.length());
                    self.mirror_queue.drop(skipped);
                    self.link.stats.add_sink_skipped(skipped as u64);
                }
                self.downstream.post(captured);
                self.link.stats.add_passthrough(1);
            }

            self.capture_queue.drop(block);
        }
    }
}
