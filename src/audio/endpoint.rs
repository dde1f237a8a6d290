//! Device abstraction seen by the engine
//!
//! Devices hand captured blocks to the engine and pull rendered blocks from
//! it. The engine exposes the same shapes for its own virtual endpoints, so it
//! can sit transparently between an application and real hardware.

use std::f32::consts::PI;
use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::warn;

use super::block::AudioBlock;
use super::error::AudioError;
use super::format::SampleSpec;

/// Monotonic time source shared by both real-time contexts
pub trait Clock: Send + Sync {
    /// Current time in microseconds
    fn now_usec(&self) -> u64;
}

/// Clock backed by [`Instant`], counting from its creation
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_usec(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }
}

/// Latency query on a real device.
///
/// For a playback device, latency is the time until every byte handed to the
/// device so far has been played. For a capture device, it is the time
/// elapsed since the last byte delivered to the engine was captured.
pub trait DeviceLatency: Send {
    /// Device latency in microseconds
    fn latency_usec(&self) -> u64;

    /// Bytes buffered between the device and the engine, outside the device latency
    fn delay_bytes(&self) -> usize {
        0
    }
}

/// Latency values published by another thread (typically a driver callback)
#[derive(Debug, Clone, Default)]
pub struct SharedLatency {
    latency_usec: Arc<AtomicU64>,
    delay_bytes: Arc<AtomicUsize>,
}

impl SharedLatency {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a new latency value
    pub fn set_latency_usec(&self, usec: u64) {
        self.latency_usec.store(usec, Ordering::Relaxed);
    }

    /// Publish a new delay value
    pub fn set_delay_bytes(&self, bytes: usize) {
        self.delay_bytes.store(bytes, Ordering::Relaxed);
    }
}

impl DeviceLatency for SharedLatency {
    fn latency_usec(&self) -> u64 {
        self.latency_usec.load(Ordering::Relaxed)
    }

    fn delay_bytes(&self) -> usize {
        self.delay_bytes.load(Ordering::Relaxed)
    }
}

/// Downstream consumer of a capture-side stream (the virtual source)
pub trait CaptureEndpoint: Send {
    /// Receive one block of produced audio
    fn post(&mut self, block: AudioBlock);

    /// The consumer rewound; `nbytes` of previously posted audio will be produced again
    fn rewind(&mut self, _nbytes: usize) {}
}

/// Result of rendering audio from the virtual sink
#[derive(Debug, Clone)]
pub struct Rendered {
    /// Exactly the requested number of bytes
    pub block: AudioBlock,
    /// How many trailing bytes were padded with silence because no data was available
    pub underrun_bytes: usize,
}

/// Upstream producer of a playback-side stream (what applications play into the virtual sink)
pub trait RenderEndpoint: Send {
    /// Produce exactly `nbytes` bytes
    fn render(&mut self, nbytes: usize) -> Rendered;

    /// Re-render the last `nbytes` bytes on the next call
    fn rewind(&mut self, _nbytes: usize) {}
}

/// Sine tone generator, used as a test signal for the virtual sink
pub struct ToneGenerator {
    spec: SampleSpec,
    frequency: f32,
    amplitude: f32,
    position: u64,
}

impl ToneGenerator {
    /// Create a tone of `frequency` Hz with amplitude in 0.0..=1.0
    pub fn new(spec: SampleSpec, frequency: f32, amplitude: f32) -> Self {
        Self {
            spec,
            frequency,
            amplitude: amplitude.clamp(0.0, 1.0),
            position: 0,
        }
    }

    /// Render `frames` frames of the tone as signed 16-bit samples
    pub fn samples(&mut self, frames: usize) -> Vec<i16> {
        let channels = self.spec.channels as usize;
        let mut out = Vec::with_capacity(frames * channels);
        for _ in 0..frames {
            let t = self.position as f32 / self.spec.rate as f32;
            let value = (2.0 * PI * self.frequency * t).sin() * self.amplitude;
            let sample = (value * i16::MAX as f32) as i16;
            for _ in 0..channels {
                out.push(sample);
            }
            self.position += 1;
        }
        out
    }
}

impl RenderEndpoint for ToneGenerator {
    fn render(&mut self, nbytes: usize) -> Rendered {
        let frames = nbytes / self.spec.frame_size();
        Rendered {
            block: AudioBlock::from_i16(&self.samples(frames)),
            underrun_bytes: 0,
        }
    }

    fn rewind(&mut self, nbytes: usize) {
        let frames = (nbytes / self.spec.frame_size()) as u64;
        self.position = self.position.saturating_sub(frames);
    }
}

/// Plays a raw PCM file through the virtual sink, padding with silence once it ends
pub struct RawFileSource {
    data: AudioBlock,
    position: usize,
    looping: bool,
}

impl RawFileSource {
    /// Load a headerless PCM file matching the stream's sample spec
    pub fn open<P: AsRef<Path>>(path: P, spec: &SampleSpec, looping: bool) -> Result<Self, AudioError> {
        let mut file = File::open(path.as_ref()).map_err(|e| {
            AudioError::DeviceOpenFailed(format!("{}: {}", path.as_ref().display(), e))
        })?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .map_err(|e| AudioError::StreamError(format!("Failed to read source file: {}", e)))?;
        let aligned = bytes.len() - bytes.len() % spec.frame_size();
        bytes.truncate(aligned);
        Ok(Self::from_block(AudioBlock::new(bytes), looping))
    }

    /// Play back an in-memory block
    pub fn from_block(data: AudioBlock, looping: bool) -> Self {
        Self {
            data,
            position: 0,
            looping,
        }
    }
}

impl RenderEndpoint for RawFileSource {
    fn render(&mut self, nbytes: usize) -> Rendered {
        let mut out = Vec::with_capacity(nbytes);
        while out.len() < nbytes {
            if self.position >= self.data.len() {
                if self.looping && !self.data.is_empty() {
                    self.position = 0;
                } else {
                    break;
                }
            }
            let take = (nbytes - out.len()).min(self.data.len() - self.position);
            out.extend_from_slice(&self.data.as_bytes()[self.position..self.position + take]);
            self.position += take;
        }
        let underrun_bytes = nbytes - out.len();
        out.resize(nbytes, 0);
        Rendered {
            block: AudioBlock::new(out),
            underrun_bytes,
        }
    }

    fn rewind(&mut self, nbytes: usize) {
        self.position = self.position.saturating_sub(nbytes);
    }
}

/// Writes the echo-cancelled stream to a headerless PCM file
pub struct RawFileSink {
    writer: BufWriter<File>,
    bytes_written: u64,
}

impl RawFileSink {
    /// Create (or truncate) the output file
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, AudioError> {
        let file = File::create(path.as_ref()).map_err(|e| {
            AudioError::RecordingError(format!("{}: {}", path.as_ref().display(), e))
        })?;
        Ok(Self {
            writer: BufWriter::new(file),
            bytes_written: 0,
        })
    }

    /// Bytes currently in the file
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

impl CaptureEndpoint for RawFileSink {
    fn post(&mut self, block: AudioBlock) {
        match self.writer.write_all(block.as_bytes()) {
            Ok(()) => self.bytes_written += block.len() as u64,
            Err(e) => warn!("Failed to write output: {}", e),
        }
    }

    fn rewind(&mut self, nbytes: usize) {
        // Rewritten audio overwrites the rewound region
        let amount = (nbytes as u64).min(self.bytes_written);
        match self.writer.seek(SeekFrom::Current(-(amount as i64))) {
            Ok(_) => self.bytes_written -= amount,
            Err(e) => warn!("Failed to rewind output: {}", e),
        }
    }
}

impl Drop for RawFileSink {
    fn drop(&mut self) {
        if let Err(e) = self.writer.flush() {
            warn!("Failed to flush output: {}", e);
        }
    }
}
