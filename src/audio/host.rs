//! Hardware glue: drives the engine contexts from cpal device callbacks

use std::sync::mpsc::Sender;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use tracing::{debug, error, info, warn};

use crate::sync::{CaptureContext, PlaybackContext};

use super::block::AudioBlock;
use super::device::{find_device, DeviceDirection, DeviceId};
use super::endpoint::SharedLatency;
use super::error::AudioError;
use super::format::{SampleFormat, SampleSpec};

/// Events that can occur during audio streaming
#[derive(Debug, Clone)]
pub enum AudioEvent {
    /// Input device was disconnected
    InputDeviceDisconnected,
    /// Output device was disconnected
    OutputDeviceDisconnected,
    /// Stream error occurred
    StreamError(String),
}

/// Owns the cpal streams feeding a session
pub struct DeviceHost {
    spec: SampleSpec,
    capture_stream: Option<Stream>,
    playback_stream: Option<Stream>,
    event_tx: Option<Sender<AudioEvent>>,
}

impl DeviceHost {
    /// Create a host for streams of `spec` (must be s16le, converted to f32 at the device)
    pub fn new(spec: SampleSpec) -> Result<Self, AudioError> {
        if spec.format != SampleFormat::S16le {
            return Err(AudioError::UnsupportedConfig(format!(
                "device host streams s16le, got {}",
                spec.format
            )));
        }
        Ok(Self {
            spec,
            capture_stream: None,
            playback_stream: None,
            event_tx: None,
        })
    }

    /// Send device errors and disconnects to `tx`
    pub fn set_event_sender(&mut self, tx: Sender<AudioEvent>) {
        self.event_tx = Some(tx);
    }

    fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            channels: self.spec.channels,
            sample_rate: cpal::SampleRate(self.spec.rate),
            buffer_size: cpal::BufferSize::Default,
        }
    }

    fn error_callback(
        &self,
        direction: DeviceDirection,
    ) -> impl FnMut(cpal::StreamError) + Send + 'static {
        let event_tx = self.event_tx.clone();
        move |err: cpal::StreamError| {
            error!("{} stream error: {:?}", direction, err);
            let event = match err {
                cpal::StreamError::DeviceNotAvailable => {
                    warn!("{} device disconnected", direction);
                    match direction {
                        DeviceDirection::Input => AudioEvent::InputDeviceDisconnected,
                        DeviceDirection::Output => AudioEvent::OutputDeviceDisconnected,
                    }
                }
                other => AudioEvent::StreamError(other.to_string()),
            };
            if let Some(ref tx) = event_tx {
                let _ = tx.send(event);
            }
        }
    }

    /// Start the capture device, pushing every captured block into `context`.
    ///
    /// Device latency is published to `latency`, which the context reads.
    pub fn start_capture(
        &mut self,
        device_id: Option<&DeviceId>,
        mut context: CaptureContext,
        latency: SharedLatency,
    ) -> Result<(), AudioError> {
        let device = find_device(DeviceDirection::Input, device_id)?;
        info!("Starting capture on device: {}", device.name().unwrap_or_default());

        let config = self.stream_config();
        let err_fn = self.error_callback(DeviceDirection::Input);
        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], info: &cpal::InputCallbackInfo| {
                    let ts = info.timestamp();
                    if let Some(delay) = ts.callback.duration_since(&ts.capture) {
                        latency.set_latency_usec(delay.as_micros() as u64);
                    }
                    context.push(AudioBlock::new(f32_to_s16le(data)));
                },
                err_fn,
                None,
            )
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        stream
            .play()
            .map_err(|e| AudioError::StreamError(e.to_string()))?;
        self.capture_stream = Some(stream);
        debug!("Capture started: {}", self.spec);
        Ok(())
    }

    /// Start the playback device, rendering every buffer from `context`
    pub fn start_playback(
        &mut self,
        device_id: Option<&DeviceId>,
        mut context: PlaybackContext,
        latency: SharedLatency,
    ) -> Result<(), AudioError> {
        let device = find_device(DeviceDirection::Output, device_id)?;
        info!("Starting playback on device: {}", device.name().unwrap_or_default());

        let config = self.stream_config();
        let err_fn = self.error_callback(DeviceDirection::Output);
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], info: &cpal::OutputCallbackInfo| {
                    let ts = info.timestamp();
                    if let Some(delay) = ts.playback.duration_since(&ts.callback) {
                        latency.set_latency_usec(delay.as_micros() as u64);
                    }
                    let block = context.render(data.len() * 2);
                    s16le_to_f32(block.as_bytes(), data);
                },
                err_fn,
                None,
            )
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        stream
            .play()
            .map_err(|e| AudioError::StreamError(e.to_string()))?;
        self.playback_stream = Some(stream);
        debug!("Playback started: {}", self.spec);
        Ok(())
    }

    /// Stop both devices, releasing the contexts they own
    pub fn stop(&mut self) {
        if self.capture_stream.take().is_some() {
            info!("Capture stopped");
        }
        if self.playback_stream.take().is_some() {
            info!("Playback stopped");
        }
    }
}

impl Drop for DeviceHost {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Convert float samples to signed 16-bit little endian bytes
fn f32_to_s16le(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let value = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Convert signed 16-bit little endian bytes into float samples
fn s16le_to_f32(bytes: &[u8], out: &mut [f32]) {
    for (dst, src) in out.iter_mut().zip(bytes.chunks_exact(2)) {
        *dst = i16::from_le_bytes([src[0], src[1]]) as f32 / 32768.0;
    }
}
