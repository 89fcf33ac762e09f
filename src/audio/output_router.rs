// Output-track router
//
// Sends the final mix of one host output track to any number of devices, each
// through its own AudioMonitor with an independent volume, mute and lock.

use super::devices::{create_native_session, DeviceSession};
use super::effects::{ChannelLevel, LevelMeter};
use super::monitor::{AudioMonitor, FeedOutcome};
use super::resampling::{ResamplerFactory, RubatoResamplerFactory};
use super::types::{AudioPacket, HostAudioSpec};
use anyhow::{Context, Result};
use colored::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Builds the session for a routed device id
pub type SessionFactory = Arc<dyn Fn(&str) -> Box<dyn DeviceSession> + Send + Sync>;

/// Persisted state of one routed device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutedDeviceSettings {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "unity")]
    pub volume: f32,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub locked: bool,
}

fn unity() -> f32 {
    1.0
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouterSettings {
    #[serde(default)]
    pub devices: Vec<RoutedDeviceSettings>,
}

struct RoutedDevice {
    settings: RoutedDeviceSettings,
    monitor: AudioMonitor,
}

pub struct OutputTrackRouter {
    track: usize,
    host: HostAudioSpec,
    devices: Vec<RoutedDevice>,
    meter: LevelMeter,
    levels: Vec<ChannelLevel>,
    sessions: SessionFactory,
    resamplers: Arc<dyn ResamplerFactory>,
}

impl std::fmt::Debug for OutputTrackRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputTrackRouter")
            .field("track", &self.track)
            .field("host", &self.host)
            .field("devices", &self.devices.iter().map(|d| &d.settings).collect::<Vec<_>>())
            .finish()
    }
}

impl OutputTrackRouter {
    pub fn new(track: usize, host: HostAudioSpec) -> Self {
        let stream_name = format!("Output track {}", track + 1);
        let sessions: SessionFactory = Arc::new(move |_: &str| create_native_session(&stream_name));
        Self::with_factories(track, host, sessions, Arc::new(RubatoResamplerFactory))
    }

    pub fn with_factories(
        track: usize,
        host: HostAudioSpec,
        sessions: SessionFactory,
        resamplers: Arc<dyn ResamplerFactory>,
    ) -> Self {
        Self {
            track,
            host,
            devices: Vec::new(),
            meter: LevelMeter::new(host.sample_rate, host.channels()),
            levels: Vec::new(),
            sessions,
            resamplers,
        }
    }

    fn find(&self, id: &str) -> Option<&RoutedDevice> {
        self.devices.iter().find(|d| d.settings.id == id)
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut RoutedDevice> {
        self.devices.iter_mut().find(|d| d.settings.id == id)
    }

    pub fn has_device(&self, id: &str) -> bool {
        self.find(id).is_some()
    }

    /// Routes the track to a device at unity gain. Empty or already routed ids
    /// are ignored. Returns whether a device was added.
    pub fn add_device(&mut self, id: &str, name: &str) -> bool {
        self.add_with_settings(RoutedDeviceSettings {
            id: id.to_string(),
            name: name.to_string(),
            volume: 1.0,
            muted: false,
            locked: false,
        })
    }

    fn add_with_settings(&mut self, settings: RoutedDeviceSettings) -> bool {
        if settings.id.is_empty() || self.has_device(&settings.id) {
            return false;
        }
        let monitor = AudioMonitor::with_session(
            &settings.id,
            self.host,
            (self.sessions)(&settings.id),
            Arc::clone(&self.resamplers),
        );
        monitor.set_volume(if settings.muted { 0.0 } else { settings.volume });
        if !settings.muted {
            monitor.start();
        }
        info!(
            "🔀 {}: track {} -> '{}' ({})",
            "ROUTER".magenta(),
            self.track + 1,
            settings.name,
            settings.id
        );
        self.devices.push(RoutedDevice { settings, monitor });
        true
    }

    pub fn remove_device(&mut self, id: &str) -> bool {
        let before = self.devices.len();
        self.devices.retain(|d| d.settings.id != id);
        let removed = self.devices.len() != before;
        if removed {
            info!("🔀 {}: track {} no longer routed to '{}'", "ROUTER".magenta(), self.track + 1, id);
        }
        removed
    }

    /// Sets a device's linear gain; locked devices keep their volume
    pub fn set_device_volume(&mut self, id: &str, volume: f32) -> bool {
        let Some(device) = self.find_mut(id) else {
            return false;
        };
        if device.settings.locked {
            return false;
        }
        device.settings.volume = volume.max(0.0);
        if !device.settings.muted {
            device.monitor.set_volume(device.settings.volume);
        }
        true
    }

    pub fn set_device_muted(&mut self, id: &str, muted: bool) -> bool {
        let Some(device) = self.find_mut(id) else {
            return false;
        };
        device.settings.muted = muted;
        device
            .monitor
            .set_volume(if muted { 0.0 } else { device.settings.volume });
        true
    }

    pub fn set_device_locked(&mut self, id: &str, locked: bool) -> bool {
        let Some(device) = self.find_mut(id) else {
            return false;
        };
        device.settings.locked = locked;
        true
    }

    pub fn device_settings(&self, id: &str) -> Option<&RoutedDeviceSettings> {
        self.find(id).map(|d| &d.settings)
    }

    /// Meters the block and forwards it to every non-muted device
    pub fn feed(&mut self, packet: &AudioPacket) -> Vec<FeedOutcome> {
        self.levels = self.meter.process(packet);
        self.devices
            .iter()
            .filter(|d| !d.settings.muted)
            .map(|d| d.monitor.feed_audio(packet))
            .collect()
    }

    /// Levels of the last fed block
    pub fn levels(&self) -> &[ChannelLevel] {
        &self.levels
    }

    pub fn settings(&self) -> RouterSettings {
        RouterSettings {
            devices: self.devices.iter().map(|d| d.settings.clone()).collect(),
        }
    }

    pub fn to_settings(&self) -> Result<String> {
        serde_json::to_string(&self.settings()).context("Failed to serialize output router settings")
    }

    /// Replaces the routed devices with the ones stored in `json`
    pub fn load_settings(&mut self, json: &str) -> Result<()> {
        let settings: RouterSettings =
            serde_json::from_str(json).context("Failed to parse output router settings")?;
        self.devices.clear();
        for device in settings.devices {
            self.add_with_settings(device);
        }
        Ok(())
    }

    pub fn from_settings(track: usize, host: HostAudioSpec, json: &str) -> Result<Self> {
        let mut router = Self::new(track, host);
        router.load_settings(json)?;
        Ok(router)
    }
}
