// Resampler adapter
//
// Converts host planar float audio into the interleaved format a device session
// negotiated: channel remap, sample-rate conversion, then sample encoding.

pub mod rubato;

pub use self::rubato::{RubatoResampler, RubatoResamplerFactory};

use super::error::ResampleError;
use super::types::{DeviceFormat, HostAudioSpec};

/// Output of one resample call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResampledAudio {
    /// Interleaved device-format bytes
    pub data: Vec<u8>,
    pub frames: usize,
    /// Latency the conversion adds, in nanoseconds
    pub ts_offset_ns: u64,
}

/// A live host-to-device converter. Dropping it releases it.
pub trait AudioResampler: Send {
    fn resample(&mut self, planes: &[Vec<f32>], frames: usize)
        -> Result<ResampledAudio, ResampleError>;

    fn output_format(&self) -> DeviceFormat;
}

/// Creates resamplers; `None` means the conversion is not possible
pub trait ResamplerFactory: Send + Sync {
    fn create(&self, from: &HostAudioSpec, to: &DeviceFormat) -> Option<Box<dyn AudioResampler>>;
}
