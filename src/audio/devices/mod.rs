// Audio devices module - output sessions and device discovery
//
// - session: the DeviceSession contract every backend implements
// - vban: VBAN UDP streaming (all platforms)
// - coreaudio_queue: AudioQueue playback (macOS)
// - wasapi: shared-mode render client (Windows)
// - pulse: PulseAudio playback stream (Linux, `pulseaudio` feature)
// - queue_pump / latency / shared: backend-independent buffering and lifetime helpers
// - enumeration: live device lists and id/name reconciliation

pub mod enumeration;
pub mod latency;
pub mod queue_pump;
pub mod session;
pub mod shared;
pub mod vban;

#[cfg(target_os = "macos")]
pub mod coreaudio_queue;

#[cfg(target_os = "windows")]
pub mod wasapi;

#[cfg(all(target_os = "linux", feature = "pulseaudio"))]
pub mod pulse;

pub use enumeration::{default_enumerator, resolve_device, DeviceEnumerator, DeviceResolution, StaticDeviceList};
pub use session::{DeviceSession, UnsupportedSession};
pub use vban::{VbanConfig, VbanSession};

#[cfg(test)]
pub use session::MockDeviceSession;

/// Session for the platform's native output backend
#[allow(unused_variables)]
pub fn create_native_session(stream_name: &str) -> Box<dyn DeviceSession> {
    #[cfg(target_os = "macos")]
    let session: Box<dyn DeviceSession> = Box::new(coreaudio_queue::AudioQueueSession::new());
    #[cfg(target_os = "windows")]
    let session: Box<dyn DeviceSession> = Box::new(wasapi::WasapiSession::new());
    #[cfg(all(target_os = "linux", feature = "pulseaudio"))]
    let session: Box<dyn DeviceSession> = Box::new(pulse::PulseSession::new(stream_name));
    #[cfg(not(any(
        target_os = "macos",
        target_os = "windows",
        all(target_os = "linux", feature = "pulseaudio")
    )))]
    let session: Box<dyn DeviceSession> = Box::new(UnsupportedSession);
    session
}

/// Picks the backend for a monitor: VBAN when a port is given, native otherwise
pub fn create_session(stream_name: &str, vban: Option<VbanConfig>) -> Box<dyn DeviceSession> {
    match vban {
        Some(config) => Box::new(VbanSession::new(config)),
        None => create_native_session(stream_name),
    }
}
