use crate::audio::error::SessionError;
use crate::audio::types::{DeviceFormat, HostAudioSpec, SampleFormat};

/// One open connection to an output: a native device stream or a network socket
///
/// Every backend honors the same contract:
/// - `start` negotiates a format and acquires all native handles, or acquires
///   nothing and returns the error. Partial acquisitions are released before returning.
/// - `stop` releases everything and is a no-op on a stopped session.
/// - `write` hands interleaved bytes in the negotiated format to the device. Fatal
///   errors (see [`SessionError::is_fatal`]) mean the session must be stopped.
#[cfg_attr(test, mockall::automock)]
pub trait DeviceSession: Send {
    /// Backend tag used in logs
    fn name(&self) -> &'static str;

    fn start(&mut self, device_id: &str, host: &HostAudioSpec)
        -> Result<DeviceFormat, SessionError>;

    fn stop(&mut self);

    fn write(&mut self, data: &[u8], frames: usize) -> Result<(), SessionError>;

    fn is_active(&self) -> bool;

    /// Whether mono/balance apply to this output. Network sessions forward the
    /// host channel layout untouched.
    fn supports_channel_mixing(&self) -> bool;

    /// Changes the requested stream format. Returns true when the value changed
    /// and a running session needs a restart to pick it up.
    fn configure(&mut self, format: Option<SampleFormat>, sample_rate: Option<u32>) -> bool;
}

/// Session for platforms without a native backend: `start` always fails
#[derive(Debug, Default)]
pub struct UnsupportedSession;

impl DeviceSession for UnsupportedSession {
    fn name(&self) -> &'static str {
        "unsupported"
    }

    fn start(&mut self, _device_id: &str, _host: &HostAudioSpec) -> Result<DeviceFormat, SessionError> {
        Err(SessionError::NotSupported("no native audio backend compiled in"))
    }

    fn stop(&mut self) {}

    fn write(&mut self, _data: &[u8], _frames: usize) -> Result<(), SessionError> {
        Err(SessionError::Inactive)
    }

    fn is_active(&self) -> bool {
        false
    }

    fn supports_channel_mixing(&self) -> bool {
        true
    }

    fn configure(&mut self, _format: Option<SampleFormat>, _sample_rate: Option<u32>) -> bool {
        false
    }
}
