// Output device discovery
//
// Enumerators feed the property sheet and the device-name reconciliation done on
// every settings update. Ids are whatever the matching session backend accepts.

use crate::audio::types::AudioDeviceInfo;
use crate::types::DEFAULT_DEVICE_ID;

/// Source of the live output device list
pub trait DeviceEnumerator: Send + Sync {
    fn devices(&self) -> Vec<AudioDeviceInfo>;
}

/// Fixed device list, used when no enumeration backend is compiled in
#[derive(Debug, Clone, Default)]
pub struct StaticDeviceList {
    devices: Vec<AudioDeviceInfo>,
}

impl StaticDeviceList {
    pub fn new(devices: Vec<AudioDeviceInfo>) -> Self {
        Self { devices }
    }
}

impl DeviceEnumerator for StaticDeviceList {
    fn devices(&self) -> Vec<AudioDeviceInfo> {
        self.devices.clone()
    }
}

/// Output devices of the default cpal host, keyed by device name
#[cfg(feature = "cpal")]
#[derive(Debug, Default)]
pub struct CpalDeviceEnumerator;

#[cfg(feature = "cpal")]
impl DeviceEnumerator for CpalDeviceEnumerator {
    fn devices(&self) -> Vec<AudioDeviceInfo> {
        use cpal::traits::{DeviceTrait, HostTrait};

        let host = cpal::default_host();
        let devices = match host.output_devices() {
            Ok(devices) => devices,
            Err(e) => {
                tracing::warn!("Failed to enumerate output devices: {}", e);
                return Vec::new();
            }
        };
        devices
            .filter_map(|device| device.name().ok())
            .map(|name| AudioDeviceInfo::new(name.clone(), name))
            .collect()
    }
}

/// PulseAudio sinks, keyed by sink name
#[cfg(all(target_os = "linux", feature = "pulseaudio"))]
#[derive(Debug, Default)]
pub struct PulseDeviceEnumerator;

#[cfg(all(target_os = "linux", feature = "pulseaudio"))]
impl DeviceEnumerator for PulseDeviceEnumerator {
    fn devices(&self) -> Vec<AudioDeviceInfo> {
        let sinks = super::pulse::PulseRuntime::acquire().and_then(|runtime| runtime.sinks());
        match sinks {
            Ok(sinks) => sinks,
            Err(e) => {
                tracing::warn!("Failed to list PulseAudio sinks: {}", e);
                Vec::new()
            }
        }
    }
}

/// Enumerator for the backend this build plays through
pub fn default_enumerator() -> Box<dyn DeviceEnumerator> {
    #[cfg(all(target_os = "linux", feature = "pulseaudio"))]
    let enumerator: Box<dyn DeviceEnumerator> = Box::new(PulseDeviceEnumerator);
    #[cfg(all(feature = "cpal", not(all(target_os = "linux", feature = "pulseaudio"))))]
    let enumerator: Box<dyn DeviceEnumerator> = Box::new(CpalDeviceEnumerator);
    #[cfg(not(any(feature = "cpal", all(target_os = "linux", feature = "pulseaudio"))))]
    let enumerator: Box<dyn DeviceEnumerator> = Box::new(StaticDeviceList::default());
    enumerator
}

/// Outcome of matching a saved `(id, name)` pair against the live list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceResolution {
    /// Id is present; carries its current name
    Found(AudioDeviceInfo),
    /// Id is gone but a device with the saved name exists under a new id
    Renamed(AudioDeviceInfo),
    /// Neither matched; keep the saved id
    Missing,
}

/// Reconciles a saved device id/name with the current device list.
/// `"default"` and empty ids are never rewritten.
pub fn resolve_device(devices: &[AudioDeviceInfo], id: &str, name: &str) -> DeviceResolution {
    if id.is_empty() || id == DEFAULT_DEVICE_ID {
        return DeviceResolution::Missing;
    }
    if let Some(device) = devices.iter().find(|d| d.id == id) {
        return DeviceResolution::Found(device.clone());
    }
    if !name.is_empty() {
        if let Some(device) = devices.iter().find(|d| d.name == name) {
            return DeviceResolution::Renamed(device.clone());
        }
    }
    DeviceResolution::Missing
}
