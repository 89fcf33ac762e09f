// Output track level meter
//
// Per channel and per block: RMS magnitude, the block's own peak, and a held
// peak that falls at a fixed dB rate so meters stay readable between transients.
// All levels are reported in dB, -inf for silence.

use super::volume_curve::mul_to_db;
use crate::audio::types::AudioPacket;

/// Fall rate of the held peak
const PEAK_DECAY_DB_PER_SEC: f32 = 11.76;
/// Held peaks below this read as silence
const METER_FLOOR_DB: f32 = -96.0;

/// Levels of one channel in dB (-inf for silence)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelLevel {
    pub magnitude_db: f32,
    pub peak_db: f32,
    /// Peak of the latest block only, without decay
    pub input_peak_db: f32,
}

#[derive(Debug, Clone, Copy)]
struct HeldPeak {
    db: f32,
}

impl HeldPeak {
    fn update(&mut self, block_peak_db: f32, elapsed_secs: f32) -> f32 {
        let decayed = self.db - PEAK_DECAY_DB_PER_SEC * elapsed_secs;
        self.db = if block_peak_db >= decayed {
            block_peak_db
        } else if decayed < METER_FLOOR_DB {
            f32::NEG_INFINITY
        } else {
            decayed
        };
        self.db
    }
}

fn block_rms(block: &[f32]) -> f32 {
    if block.is_empty() {
        return 0.0;
    }
    let sum: f32 = block.iter().map(|s| s * s).sum();
    (sum / block.len() as f32).sqrt()
}

fn block_peak(block: &[f32]) -> f32 {
    block.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
}

/// Per-channel magnitude/peak meter over planar host audio
#[derive(Debug)]
pub struct LevelMeter {
    sample_rate: u32,
    held: Vec<HeldPeak>,
}

impl LevelMeter {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            held: vec![HeldPeak { db: f32::NEG_INFINITY }; channels as usize],
        }
    }

    /// Feeds one packet and returns the levels of every metered channel.
    /// A change in channel count restarts the held peaks.
    pub fn process(&mut self, packet: &AudioPacket) -> Vec<ChannelLevel> {
        if packet.channels() != self.held.len() {
            *self = Self::new(self.sample_rate, packet.channels() as u16);
        }
        let elapsed = packet.frames as f32 / self.sample_rate as f32;

        packet
            .planes
            .iter()
            .zip(self.held.iter_mut())
            .map(|(plane, held)| {
                let block = &plane[..packet.frames.min(plane.len())];
                let input_peak_db = mul_to_db(block_peak(block));
                ChannelLevel {
                    magnitude_db: mul_to_db(block_rms(block)),
                    peak_db: held.update(input_peak_db, elapsed),
                    input_peak_db,
                }
            })
            .collect()
    }
}
