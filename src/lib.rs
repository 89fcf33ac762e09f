// Audio monitor library
//
// Renders the audio of a host source to an output device while the host keeps
// mixing it normally:
// - audio: sessions per platform (CoreAudio, WASAPI, PulseAudio, VBAN), resampling,
//   monitor DSP and the AudioMonitor state machine
// - filter: the per-source filter glue (settings, delay queue, mute handling)
// - log / types: ambient logging helpers and crate-wide constants

pub mod audio;
pub mod filter;
pub mod log;
pub mod types;

pub use audio::{
    AudioDeviceInfo, AudioMonitor, AudioPacket, DeviceFormat, FeedOutcome, HostAudioSpec,
    OutputTrackRouter, SampleFormat, SessionError, SpeakerLayout,
};
pub use filter::{FilterEvent, MonitorFilter, MonitorFilterSettings, MuteMode};
