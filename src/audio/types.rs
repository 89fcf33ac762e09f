use serde::{Deserialize, Serialize};
use std::fmt;

/// Sample encoding of a negotiated device stream (always interleaved)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "i64", into = "i64")]
pub enum SampleFormat {
    U8,
    S16,
    S32,
    #[default]
    Float,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::S16 => 2,
            SampleFormat::S32 | SampleFormat::Float => 4,
        }
    }

    /// Data type code carried in byte 7 of a VBAN header
    pub fn vban_code(self) -> u8 {
        match self {
            SampleFormat::U8 => 0,
            SampleFormat::S16 => 1,
            SampleFormat::S32 => 3,
            SampleFormat::Float => 4,
        }
    }

    /// Host format number (1 = u8, 2 = s16, 3 = s32, 4 = float)
    pub fn host_code(self) -> i64 {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::S16 => 2,
            SampleFormat::S32 => 3,
            SampleFormat::Float => 4,
        }
    }

    pub fn from_host_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(SampleFormat::U8),
            2 => Some(SampleFormat::S16),
            3 => Some(SampleFormat::S32),
            4 => Some(SampleFormat::Float),
            _ => None,
        }
    }
}

impl TryFrom<i64> for SampleFormat {
    type Error = String;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        SampleFormat::from_host_code(code).ok_or_else(|| format!("unknown sample format {}", code))
    }
}

impl From<SampleFormat> for i64 {
    fn from(format: SampleFormat) -> Self {
        format.host_code()
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SampleFormat::U8 => "u8",
            SampleFormat::S16 => "s16",
            SampleFormat::S32 => "s32",
            SampleFormat::Float => "f32",
        };
        f.write_str(name)
    }
}

/// Speaker layout of the host mix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SpeakerLayout {
    Unknown,
    Mono,
    #[default]
    Stereo,
    TwoPointOne,
    FourPointZero,
    FourPointOne,
    FivePointOne,
    SevenPointOne,
}

impl SpeakerLayout {
    pub fn channels(self) -> u16 {
        match self {
            SpeakerLayout::Unknown => 0,
            SpeakerLayout::Mono => 1,
            SpeakerLayout::Stereo => 2,
            SpeakerLayout::TwoPointOne => 3,
            SpeakerLayout::FourPointZero => 4,
            SpeakerLayout::FourPointOne => 5,
            SpeakerLayout::FivePointOne => 6,
            SpeakerLayout::SevenPointOne => 8,
        }
    }

    /// Layout for a channel count, `Unknown` for counts no layout uses (e.g. 7)
    pub fn from_channels(channels: u16) -> Self {
        match channels {
            1 => SpeakerLayout::Mono,
            2 => SpeakerLayout::Stereo,
            3 => SpeakerLayout::TwoPointOne,
            4 => SpeakerLayout::FourPointZero,
            5 => SpeakerLayout::FourPointOne,
            6 => SpeakerLayout::FivePointOne,
            8 => SpeakerLayout::SevenPointOne,
            _ => SpeakerLayout::Unknown,
        }
    }
}

/// Format of the planar float audio the host delivers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostAudioSpec {
    pub sample_rate: u32,
    pub speakers: SpeakerLayout,
}

impl HostAudioSpec {
    pub fn new(sample_rate: u32, speakers: SpeakerLayout) -> Self {
        Self {
            sample_rate,
            speakers,
        }
    }

    pub fn channels(&self) -> u16 {
        self.speakers.channels()
    }
}

impl Default for HostAudioSpec {
    fn default() -> Self {
        Self::new(crate::types::DEFAULT_SAMPLE_RATE, SpeakerLayout::Stereo)
    }
}

/// Negotiated interleaved format of a device session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
}

impl DeviceFormat {
    pub fn new(sample_rate: u32, channels: u16, format: SampleFormat) -> Self {
        Self {
            sample_rate,
            channels,
            format,
        }
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * self.format.bytes_per_sample()
    }
}

impl fmt::Display for DeviceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Hz {}ch {}", self.sample_rate, self.channels, self.format)
    }
}

/// One block of planar float audio from the host pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct AudioPacket {
    /// One plane per channel, each `frames` samples long
    pub planes: Vec<Vec<f32>>,
    pub frames: usize,
    /// Host timestamp in nanoseconds
    pub timestamp_ns: u64,
}

impl AudioPacket {
    pub fn new(planes: Vec<Vec<f32>>, timestamp_ns: u64) -> Self {
        let frames = planes.iter().map(Vec::len).min().unwrap_or(0);
        Self {
            planes,
            frames,
            timestamp_ns,
        }
    }

    pub fn silent(channels: u16, frames: usize, timestamp_ns: u64) -> Self {
        Self::new(vec![vec![0.0; frames]; channels as usize], timestamp_ns)
    }

    pub fn channels(&self) -> usize {
        self.planes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames == 0 || self.planes.is_empty()
    }
}

/// Output device as shown to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioDeviceInfo {
    pub id: String,
    pub name: String,
}

impl AudioDeviceInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}
