// Persisted filter settings
//
// Key names match the host's settings document. Every key is optional on load;
// out-of-range values are clamped rather than rejected.

use crate::audio::types::SampleFormat;
use crate::types::{DEFAULT_DEVICE_ID, MAX_DELAY_MS, VBAN_DEFAULT_PORT, VBAN_DEVICE_ID};
use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};

/// Which host signal silences the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum MuteMode {
    #[default]
    Never,
    /// Muted while the source is not part of an active output
    NotActiveOutput,
    /// Muted while the parent source is muted
    SourceMuted,
}

impl TryFrom<i64> for MuteMode {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MuteMode::Never),
            1 => Ok(MuteMode::NotActiveOutput),
            2 => Ok(MuteMode::SourceMuted),
            other => Err(format!("unknown mute mode {}", other)),
        }
    }
}

impl From<MuteMode> for i64 {
    fn from(mode: MuteMode) -> Self {
        match mode {
            MuteMode::Never => 0,
            MuteMode::NotActiveOutput => 1,
            MuteMode::SourceMuted => 2,
        }
    }
}

/// Unknown or missing format codes fall back to float
fn lenient_format<'de, D>(deserializer: D) -> Result<SampleFormat, D::Error>
where
    D: Deserializer<'de>,
{
    let code = Option::<i64>::deserialize(deserializer)?;
    Ok(code.and_then(SampleFormat::from_host_code).unwrap_or_default())
}

/// Where a filter's monitor sends audio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorTarget {
    /// Device id, or VBAN host name/IP
    pub device_id: String,
    /// Non-zero for VBAN
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorFilterSettings {
    pub device: String,
    #[serde(rename = "deviceName")]
    pub device_name: String,
    /// Percent, 0-100
    pub volume: f64,
    pub locked: bool,
    pub linked: bool,
    pub mono: bool,
    /// -1 (left) .. 1 (right)
    pub balance: f64,
    pub mute: MuteMode,
    pub mute_stop_start: bool,
    /// Milliseconds, 0-10000
    pub delay: f64,
    pub ip: String,
    pub port: u16,
    #[serde(deserialize_with = "lenient_format")]
    pub format: SampleFormat,
    /// 0 means the host rate
    pub samples_per_sec: u32,
    pub custom_color: bool,
    pub color: i64,
}

impl Default for MonitorFilterSettings {
    fn default() -> Self {
        Self {
            device: DEFAULT_DEVICE_ID.to_string(),
            device_name: String::new(),
            volume: 100.0,
            locked: false,
            linked: false,
            mono: false,
            balance: 0.0,
            mute: MuteMode::Never,
            mute_stop_start: false,
            delay: 0.0,
            ip: String::new(),
            port: VBAN_DEFAULT_PORT,
            format: SampleFormat::Float,
            samples_per_sec: 0,
            custom_color: false,
            color: 0,
        }
    }
}

fn clamp_or(value: f64, min: f64, max: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback
    }
}

impl MonitorFilterSettings {
    /// Parses a settings document, filling missing keys with defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let mut settings: Self =
            serde_json::from_str(json).context("Failed to parse monitor filter settings")?;
        settings.clamp();
        Ok(settings)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize monitor filter settings")
    }

    pub fn clamp(&mut self) {
        self.volume = clamp_or(self.volume, 0.0, 100.0, 100.0);
        self.balance = clamp_or(self.balance, -1.0, 1.0, 0.0);
        self.delay = clamp_or(self.delay, 0.0, MAX_DELAY_MS as f64, 0.0);
    }

    /// Linear gain of the volume slider
    pub fn gain(&self) -> f32 {
        (self.volume / 100.0) as f32
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.volume = clamp_or(gain as f64 * 100.0, 0.0, 100.0, 100.0);
    }

    pub fn delay_ms(&self) -> u32 {
        self.delay.round() as u32
    }

    pub fn is_vban(&self) -> bool {
        self.device == VBAN_DEVICE_ID
    }

    pub fn target(&self) -> MonitorTarget {
        if self.is_vban() {
            MonitorTarget {
                device_id: self.ip.clone(),
                port: self.port,
            }
        } else {
            MonitorTarget {
                device_id: self.device.clone(),
                port: 0,
            }
        }
    }
}
