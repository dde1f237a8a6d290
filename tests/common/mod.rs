//! Synthetic devices shared by the integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use aec_sync::audio::{
    AudioBlock, CaptureEndpoint, Clock, DeviceLatency, RawFileSource, RenderEndpoint, Rendered,
};
use aec_sync::canceller::EchoCanceller;
use aec_sync::config::EchoCancelConfig;
use aec_sync::sync::{CaptureContext, EchoCancelEngine, PlaybackContext, StreamEndpoints};

/// 20 ms at 8 kHz
pub const BLOCK_FRAMES: usize = 160;
pub const BLOCK_BYTES: usize = BLOCK_FRAMES * 2;

/// Clock that only moves when told to
#[derive(Clone, Default)]
pub struct FakeClock(pub Arc<AtomicU64>);

impl FakeClock {
    pub fn at(usec: u64) -> Self {
        Self(Arc::new(AtomicU64::new(usec)))
    }

    pub fn advance(&self, usec: u64) {
        self.0.fetch_add(usec, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now_usec(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Constant device latency
pub struct FixedLatency(pub u64);

impl DeviceLatency for FixedLatency {
    fn latency_usec(&self) -> u64 {
        self.0
    }
}

/// Everything the engine forwarded downstream
#[derive(Clone, Default)]
pub struct Collected {
    pub blocks: Arc<Mutex<Vec<AudioBlock>>>,
    pub rewinds: Arc<Mutex<Vec<usize>>>,
    pub dropped: Arc<AtomicBool>,
}

impl Collected {
    pub fn total_bytes(&self) -> usize {
        self.blocks.lock().unwrap().iter().map(|b| b.len()).sum()
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.blocks
            .lock()
            .unwrap()
            .iter()
            .flat_map(|b| b.as_bytes().to_vec())
            .collect()
    }
}

pub struct CollectingSink(pub Collected);

impl CaptureEndpoint for CollectingSink {
    fn post(&mut self, block: AudioBlock) {
        self.0.blocks.lock().unwrap().push(block);
    }

    fn rewind(&mut self, nbytes: usize) {
        self.0.rewinds.lock().unwrap().push(nbytes);
    }
}

impl Drop for CollectingSink {
    fn drop(&mut self) {
        self.0.dropped.store(true, Ordering::SeqCst);
    }
}

/// Canceller invocation: (capture samples, playback samples)
pub type Call = (Vec<i16>, Vec<i16>);

/// Canceller that records its inputs and returns the capture block negated
pub struct RecordingCanceller {
    pub frames: usize,
    pub calls: Arc<Mutex<Vec<Call>>>,
}

impl EchoCanceller for RecordingCanceller {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn block_size_frames(&self) -> usize {
        self.frames
    }

    fn run(&mut self, capture: &[u8], playback: &[u8], out: &mut [u8]) {
        let rec = AudioBlock::new(capture.to_vec()).to_i16();
        let play = AudioBlock::new(playback.to_vec()).to_i16();
        let negated: Vec<i16> = rec.iter().map(|s| s.wrapping_neg()).collect();
        out.copy_from_slice(AudioBlock::from_i16(&negated).as_bytes());
        self.calls.lock().unwrap().push((rec, play));
    }
}

/// Upstream whose underruns follow a script, one entry per render
pub struct ScriptedSource {
    pub underruns: VecDeque<usize>,
}

impl RenderEndpoint for ScriptedSource {
    fn render(&mut self, nbytes: usize) -> Rendered {
        Rendered {
            block: AudioBlock::silence(nbytes),
            underrun_bytes: self.underruns.pop_front().unwrap_or(0).min(nbytes),
        }
    }
}

/// Samples `start, start + 1, ...`
pub fn ramp(start: i16, len: usize) -> AudioBlock {
    let samples: Vec<i16> = (0..len).map(|i| start.wrapping_add(i as i16)).collect();
    AudioBlock::from_i16(&samples)
}

/// Upstream playing a long ramp starting at zero
pub fn ramp_source() -> Box<dyn RenderEndpoint> {
    Box::new(RawFileSource::from_block(ramp(0, 16000), false))
}

/// 8 kHz mono, no periodic drift checks
pub fn config_8k() -> EchoCancelConfig {
    let mut config = EchoCancelConfig::from_modargs("rate=8000 channels=1 adjust_time=0")
        .expect("valid test config");
    config.snapshot_timeout_ms = 2000;
    config
}

pub struct Session {
    pub engine: EchoCancelEngine,
    pub capture: CaptureContext,
    pub playback: PlaybackContext,
    pub output: Collected,
    pub calls: Arc<Mutex<Vec<Call>>>,
    pub clock: FakeClock,
}

/// Build a session around a [`RecordingCanceller`] with 160-frame blocks
pub fn session_with(
    upstream: Box<dyn RenderEndpoint>,
    clock: FakeClock,
    capture_latency: u64,
    playback_latency: u64,
) -> Session {
    let output = Collected::default();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let canceller = Box::new(RecordingCanceller {
        frames: BLOCK_FRAMES,
        calls: calls.clone(),
    });

    let (engine, capture, playback) = EchoCancelEngine::build_with_canceller(
        &config_8k(),
        canceller,
        StreamEndpoints {
            clock: Arc::new(clock.clone()),
            capture_latency: Box::new(FixedLatency(capture_latency)),
            playback_latency: Box::new(FixedLatency(playback_latency)),
            downstream: Box::new(CollectingSink(output.clone())),
            upstream,
        },
    )
    .expect("session setup");

    Session {
        engine,
        capture,
        playback,
        output,
        calls,
        clock,
    }
}

/// Session with a ramp upstream, a fixed clock and zero latencies
pub fn session() -> Session {
    session_with(ramp_source(), FakeClock::at(1_000_000), 0, 0)
}
