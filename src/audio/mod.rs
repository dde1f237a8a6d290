//! Audio module
//!
//! Sample formats, shared PCM blocks, the byte-addressed block queue, the
//! device abstraction seen by the engine, diagnostic dumps and the cpal
//! device glue.

mod block;
mod block_queue;
mod device;
mod endpoint;
mod error;
mod format;
mod host;
mod recording;

pub use block::AudioBlock;
pub use block_queue::{BlockQueue, MAX_QUEUE_LENGTH};
pub use device::{
    find_device, list_devices, list_input_devices, list_output_devices, AudioDevice,
    DeviceDirection, DeviceId,
};
pub use endpoint::{
    CaptureEndpoint, Clock, DeviceLatency, MonotonicClock, RawFileSink, RawFileSource,
    RenderEndpoint, Rendered, SharedLatency, ToneGenerator,
};
pub use error::{AudioError, QueueError};
pub use format::{SampleFormat, SampleSpec, MAX_CHANNELS, USEC_PER_SEC};
pub use host::{AudioEvent, DeviceHost};
pub use recording::{AecRecorder, CANCELED_FILE, CAPTURED_FILE, PLAYED_FILE};
