// Audio module - per-source monitoring to output devices
//
// - types: formats, host layout and audio packets
// - error: session and resampler errors
// - buffer: byte FIFO shared by the buffering sessions
// - resampling: host planar float -> device interleaved format
// - effects: monitor DSP, volume curve, level metering
// - devices: output sessions per backend and device discovery
// - monitor: the per-source monitor state machine
// - output_router: one output track sent to several devices

pub mod buffer;
pub mod devices;
pub mod effects;
pub mod error;
pub mod monitor;
pub mod output_router;
pub mod resampling;
pub mod types;

pub use error::{ResampleError, SessionError};
pub use monitor::{AudioMonitor, FeedOutcome};
pub use output_router::{OutputTrackRouter, RoutedDeviceSettings, RouterSettings};
pub use types::{
    AudioDeviceInfo, AudioPacket, DeviceFormat, HostAudioSpec, SampleFormat, SpeakerLayout,
};
