// Monitor DSP: volume, mono downmix and balance on interleaved device-format bytes
//
// Runs in place on the resampled buffer, always in the order volume -> mono -> balance.
// Integer formats follow the device representation exactly: gains are applied to the
// raw sample value and casts back saturate at the type bounds.

use crate::audio::types::{DeviceFormat, SampleFormat};
use crate::types::DSP_EPSILON;
use std::f32::consts::FRAC_PI_2;

/// Per-block DSP parameters, snapshotted from the monitor's atomics
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DspParams {
    pub volume: f32,
    pub mono: bool,
    pub balance: f32,
}

impl Default for DspParams {
    fn default() -> Self {
        Self {
            volume: 1.0,
            mono: false,
            balance: 0.0,
        }
    }
}

impl DspParams {
    /// True when processing would leave every sample unchanged
    pub fn is_identity(&self, channels: u16) -> bool {
        !self.volume_active() && !self.mono_active(channels) && !self.balance_active(channels)
    }

    fn volume_active(&self) -> bool {
        (self.volume - 1.0).abs() >= DSP_EPSILON
    }

    fn mono_active(&self, channels: u16) -> bool {
        self.mono && channels > 1
    }

    fn balance_active(&self, channels: u16) -> bool {
        channels > 1 && (balance_position(self.balance) - 0.5).abs() >= DSP_EPSILON
    }
}

/// Maps balance [-1, 1] to the pan position [0, 1]
fn balance_position(balance: f32) -> f32 {
    (balance.clamp(-1.0, 1.0) + 1.0) / 2.0
}

/// Gains applied to channel 0 and channel 1 for a balance value
pub fn balance_gains(balance: f32) -> (f32, f32) {
    let bal = balance_position(balance);
    (((1.0 - bal) * FRAC_PI_2).sin(), (bal * FRAC_PI_2).sin())
}

/// Sample types the monitor can render to
trait PcmSample: Copy {
    const SIZE: usize;
    type Sum: Copy;
    const ZERO: Self::Sum;

    fn load(bytes: &[u8]) -> Self;
    fn store(self, bytes: &mut [u8]);
    fn scaled(self, gain: f32) -> Self;
    fn accumulate(sum: Self::Sum, sample: Self) -> Self::Sum;
    fn mean(sum: Self::Sum, count: usize) -> Self;
}

impl PcmSample for f32 {
    const SIZE: usize = 4;
    type Sum = f32;
    const ZERO: f32 = 0.0;

    fn load(bytes: &[u8]) -> Self {
        f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    fn store(self, bytes: &mut [u8]) {
        bytes.copy_from_slice(&self.to_le_bytes());
    }

    fn scaled(self, gain: f32) -> Self {
        self * gain
    }

    fn accumulate(sum: f32, sample: Self) -> f32 {
        sum + sample
    }

    fn mean(sum: f32, count: usize) -> Self {
        sum / count as f32
    }
}

impl PcmSample for i32 {
    const SIZE: usize = 4;
    type Sum = i64;
    const ZERO: i64 = 0;

    fn load(bytes: &[u8]) -> Self {
        i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    fn store(self, bytes: &mut [u8]) {
        bytes.copy_from_slice(&self.to_le_bytes());
    }

    fn scaled(self, gain: f32) -> Self {
        (self as f32 * gain) as i32
    }

    fn accumulate(sum: i64, sample: Self) -> i64 {
        sum + sample as i64
    }

    fn mean(sum: i64, count: usize) -> Self {
        (sum / count as i64) as i32
    }
}

impl PcmSample for i16 {
    const SIZE: usize = 2;
    type Sum = i64;
    const ZERO: i64 = 0;

    fn load(bytes: &[u8]) -> Self {
        i16::from_le_bytes([bytes[0], bytes[1]])
    }

    fn store(self, bytes: &mut [u8]) {
        bytes.copy_from_slice(&self.to_le_bytes());
    }

    fn scaled(self, gain: f32) -> Self {
        (self as f32 * gain) as i16
    }

    fn accumulate(sum: i64, sample: Self) -> i64 {
        sum + sample as i64
    }

    fn mean(sum: i64, count: usize) -> Self {
        (sum / count as i64) as i16
    }
}

impl PcmSample for u8 {
    const SIZE: usize = 1;
    type Sum = u64;
    const ZERO: u64 = 0;

    fn load(bytes: &[u8]) -> Self {
        bytes[0]
    }

    fn store(self, bytes: &mut [u8]) {
        bytes[0] = self;
    }

    fn scaled(self, gain: f32) -> Self {
        (self as f32 * gain) as u8
    }

    fn accumulate(sum: u64, sample: Self) -> u64 {
        sum + sample as u64
    }

    fn mean(sum: u64, count: usize) -> Self {
        (sum / count as u64) as u8
    }
}

/// Applies volume, mono and balance in place. Trailing bytes that do not form a
/// whole frame are left untouched.
pub fn apply_monitor_dsp(data: &mut [u8], format: &DeviceFormat, params: &DspParams) {
    if format.channels == 0 || params.is_identity(format.channels) {
        return;
    }
    match format.format {
        SampleFormat::Float => process::<f32>(data, format.channels, params),
        SampleFormat::S32 => process::<i32>(data, format.channels, params),
        SampleFormat::S16 => process::<i16>(data, format.channels, params),
        SampleFormat::U8 => process::<u8>(data, format.channels, params),
    }
}

/// Volume only, for sessions that forward channels untouched (VBAN)
pub fn apply_volume_only(data: &mut [u8], format: &DeviceFormat, volume: f32) {
    let params = DspParams {
        volume,
        ..DspParams::default()
    };
    apply_monitor_dsp(data, format, &params);
}

fn process<T: PcmSample>(data: &mut [u8], channels: u16, params: &DspParams) {
    let channels = channels as usize;
    let frame_bytes = channels * T::SIZE;

    if params.volume_active() {
        for chunk in data.chunks_exact_mut(T::SIZE) {
            T::load(chunk).scaled(params.volume).store(chunk);
        }
    }

    if params.mono_active(channels as u16) {
        for frame in data.chunks_exact_mut(frame_bytes) {
            let sum = frame
                .chunks_exact(T::SIZE)
                .fold(T::ZERO, |sum, s| T::accumulate(sum, T::load(s)));
            let avg = T::mean(sum, channels);
            for chunk in frame.chunks_exact_mut(T::SIZE) {
                avg.store(chunk);
            }
        }
    }

    if params.balance_active(channels as u16) {
        let (left, right) = balance_gains(params.balance);
        for frame in data.chunks_exact_mut(frame_bytes) {
            let (first, rest) = frame.split_at_mut(T::SIZE);
            T::load(first).scaled(left).store(first);
            let second = &mut rest[..T::SIZE];
            T::load(second).scaled(right).store(second);
        }
    }
}
