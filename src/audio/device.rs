//! Audio device enumeration and lookup

use std::fmt;

use cpal::traits::{DeviceTrait, HostTrait};

use super::error::AudioError;
use super::format::SampleSpec;

/// Rates worth offering for speech processing
const CANDIDATE_RATES: [u32; 6] = [8000, 16000, 32000, 44100, 48000, 96000];

/// Unique identifier for an audio device
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(pub String);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Direction of an audio device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceDirection {
    /// Capture (microphone)
    Input,
    /// Playback (speaker)
    Output,
}

impl fmt::Display for DeviceDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceDirection::Input => write!(f, "input"),
            DeviceDirection::Output => write!(f, "output"),
        }
    }
}

/// Information about an audio device
#[derive(Debug, Clone)]
pub struct AudioDevice {
    /// Device identifier
    pub id: DeviceId,
    /// Display name
    pub name: String,
    /// Capture or playback
    pub direction: DeviceDirection,
    /// Candidate sample rates the device accepts (Hz)
    pub supported_rates: Vec<u32>,
    /// Largest supported channel count
    pub max_channels: u16,
    /// Whether this is the host's default device
    pub is_default: bool,
}

impl AudioDevice {
    /// Whether the device can run a stream of this spec
    pub fn supports(&self, spec: &SampleSpec) -> bool {
        self.supported_rates.contains(&spec.rate) && spec.channels <= self.max_channels
    }
}

/// List available input (capture) devices
pub fn list_input_devices() -> Vec<AudioDevice> {
    list_devices(DeviceDirection::Input)
}

/// List available output (playback) devices
pub fn list_output_devices() -> Vec<AudioDevice> {
    list_devices(DeviceDirection::Output)
}

/// List available devices of one direction
pub fn list_devices(direction: DeviceDirection) -> Vec<AudioDevice> {
    let host = cpal::default_host();
    let (default_device, devices) = match direction {
        DeviceDirection::Input => (host.default_input_device(), host.input_devices()),
        DeviceDirection::Output => (host.default_output_device(), host.output_devices()),
    };
    let default_name = default_device.as_ref().and_then(|d| d.name().ok());

    devices
        .map(|devices| {
            devices
                .filter_map(|device| {
                    let name = device.name().ok()?;
                    let (supported_rates, max_channels) = capabilities(&device, direction);
                    Some(AudioDevice {
                        id: DeviceId(name.clone()),
                        is_default: default_name.as_ref() == Some(&name),
                        name,
                        direction,
                        supported_rates,
                        max_channels,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Open a device by id, or the host default when `id` is `None`
pub fn find_device(
    direction: DeviceDirection,
    id: Option<&DeviceId>,
) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();
    match id {
        Some(id) => {
            let mut devices = match direction {
                DeviceDirection::Input => host.input_devices(),
                DeviceDirection::Output => host.output_devices(),
            }
            .map_err(|e| AudioError::DeviceOpenFailed(e.to_string()))?;
            devices
                .find(|d| d.name().ok().as_ref() == Some(&id.0))
                .ok_or_else(|| AudioError::DeviceNotFound(id.0.clone()))
        }
        None => match direction {
            DeviceDirection::Input => host.default_input_device(),
            DeviceDirection::Output => host.default_output_device(),
        }
        .ok_or_else(|| AudioError::DeviceNotFound(format!("No default {} device", direction))),
    }
}

/// Supported candidate rates and the largest channel count
fn capabilities(device: &cpal::Device, direction: DeviceDirection) -> (Vec<u32>, u16) {
    let configs: Vec<_> = match direction {
        DeviceDirection::Input => device.supported_input_configs().into_iter().flatten().collect(),
        DeviceDirection::Output => device.supported_output_configs().into_iter().flatten().collect(),
    };

    let mut rates = Vec::new();
    let mut max_channels = 0;
    for config in configs {
        for rate in CANDIDATE_RATES {
            if rate >= config.min_sample_rate().0
                && rate <= config.max_sample_rate().0
                && !rates.contains(&rate)
            {
                rates.push(rate);
            }
        }
        max_channels = max_channels.max(config.channels());
    }
    rates.sort_unstable();
    (rates, max_channels)
}
