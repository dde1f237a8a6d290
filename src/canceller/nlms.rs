//! Normalized least-mean-squares echo canceller
//!
//! One adaptive FIR filter per channel models the echo path from the
//! speaker reference to the microphone. The filter output is the echo
//! estimate, and the error signal (microphone minus estimate) is both the
//! cancelled output and the adaptation input.

use crate::audio::SampleSpec;

use super::EchoCanceller;

/// Adaptation step size
const STEP_SIZE: f32 = 0.3;
/// Regularization added to the reference power
const REGULARIZATION: f32 = 1e-3;

/// Filter state of one channel
struct ChannelFilter {
    weights: Vec<f32>,
    /// Reference history, stored twice so the newest `taps` samples are always contiguous
    history: Vec<f32>,
    pos: usize,
    power: f32,
}

impl ChannelFilter {
    fn new(taps: usize) -> Self {
        Self {
            weights: vec![0.0; taps],
            history: vec![0.0; taps * 2],
            pos: 0,
            power: 0.0,
        }
    }

    fn process(&mut self, mic: f32, reference: f32) -> f32 {
        let taps = self.weights.len();

        self.pos = (self.pos + taps - 1) % taps;
        let oldest = self.history[self.pos];
        self.history[self.pos] = reference;
        self.history[self.pos + taps] = reference;
        self.power = (self.power + reference * reference - oldest * oldest).max(0.0);

        let window = &self.history[self.pos..self.pos + taps];
        let estimate: f32 = self
            .weights
            .iter()
            .zip(window)
            .map(|(w, x)| w * x)
            .sum();

        let error = mic - estimate;
        let step = STEP_SIZE * error / (self.power + REGULARIZATION);
        for (w, x) in self.weights.iter_mut().zip(window) {
            *w += step * x;
        }
        error
    }
}

/// NLMS echo canceller over signed 16-bit interleaved PCM
pub struct NlmsCanceller {
    channels: usize,
    block_frames: usize,
    filters: Vec<ChannelFilter>,
}

impl NlmsCanceller {
    /// Create a canceller for `block_frames`-frame blocks with `taps` filter taps per channel
    pub fn new(spec: SampleSpec, block_frames: usize, taps: usize) -> Self {
        let channels = spec.channels as usize;
        let taps = taps.max(1);
        Self {
            channels,
            block_frames,
            filters: (0..channels).map(|_| ChannelFilter::new(taps)).collect(),
        }
    }

    /// Number of taps per channel
    pub fn taps(&self) -> usize {
        self.filters.first().map(|f| f.weights.len()).unwrap_or(0)
    }
}

impl EchoCanceller for NlmsCanceller {
    fn name(&self) -> &'static str {
        "nlms"
    }

    fn block_size_frames(&self) -> usize {
        self.block_frames
    }

    fn run(&mut self, capture: &[u8], playback: &[u8], out: &mut [u8]) {
        if self.filters.is_empty() {
            // Released by done()
            out.copy_from_slice(capture);
            return;
        }

        let samples = capture
            .chunks_exact(2)
            .zip(playback.chunks_exact(2))
            .zip(out.chunks_exact_mut(2));

        for (i, ((rec, play), dst)) in samples.enumerate() {
            let mic = i16::from_le_bytes([rec[0], rec[1]]) as f32 / 32768.0;
            let reference = i16::from_le_bytes([play[0], play[1]]) as f32 / 32768.0;
            let filtered = self.filters[i % self.channels].process(mic, reference);
            let value = (filtered * 32768.0).round().clamp(-32768.0, 32767.0) as i16;
            dst.copy_from_slice(&value.to_le_bytes());
        }
    }

    fn done(&mut self) {
        self.filters.clear();
    }
}
