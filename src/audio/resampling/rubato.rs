use super::{AudioResampler, ResampledAudio, ResamplerFactory};
use crate::audio::error::ResampleError;
use crate::audio::types::{DeviceFormat, HostAudioSpec, SampleFormat};
use colored::*;
use rubato::{FftFixedIn, Resampler as _};
use tracing::{info, warn};

/// Input frames per FFT chunk when the rates differ
const CHUNK_SIZE_IN: usize = 256;
/// Sub chunks per FFT chunk
const SUB_CHUNKS: usize = 2;

/// Host planar float -> device interleaved converter built on rubato's FftFixedIn
///
/// When both rates match no FFT resampler is built and frames pass straight
/// through the channel remap and sample encoding.
pub struct RubatoResampler {
    from: HostAudioSpec,
    to: DeviceFormat,
    /// Present only when the sample rates differ
    resampler: Option<FftFixedIn<f32>>,
    /// Remapped input frames waiting for a full chunk
    pending: Vec<Vec<f32>>,
    /// Reused remap output, one plane per device channel
    remapped: Vec<Vec<f32>>,
}

impl std::fmt::Debug for RubatoResampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RubatoResampler")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("fft", &self.resampler.is_some())
            .field("pending_frames", &self.pending.first().map_or(0, Vec::len))
            .finish()
    }
}

impl RubatoResampler {
    pub fn new(from: HostAudioSpec, to: DeviceFormat) -> Result<Self, ResampleError> {
        if from.channels() == 0 || to.channels == 0 {
            return Err(ResampleError::Construction {
                from: from.sample_rate,
                to: to.sample_rate,
                reason: "zero channels".to_string(),
            });
        }
        if from.sample_rate == 0 || to.sample_rate == 0 {
            return Err(ResampleError::Construction {
                from: from.sample_rate,
                to: to.sample_rate,
                reason: "zero sample rate".to_string(),
            });
        }

        let channels = to.channels as usize;
        let resampler = if from.sample_rate != to.sample_rate {
            info!(
                "🎯 {}: Creating FftFixedIn resampler {}Hz→{}Hz with {} input frames",
                "MONITOR_SRC".blue(),
                from.sample_rate,
                to.sample_rate,
                CHUNK_SIZE_IN
            );
            let fft = FftFixedIn::<f32>::new(
                from.sample_rate as usize,
                to.sample_rate as usize,
                CHUNK_SIZE_IN,
                SUB_CHUNKS,
                channels,
            )
            .map_err(|e| ResampleError::Construction {
                from: from.sample_rate,
                to: to.sample_rate,
                reason: e.to_string(),
            })?;
            Some(fft)
        } else {
            None
        };

        Ok(Self {
            from,
            to,
            resampler,
            pending: vec![Vec::with_capacity(CHUNK_SIZE_IN * 2); channels],
            remapped: vec![Vec::new(); channels],
        })
    }

    /// Maps host channels onto device channels: mono devices get the average,
    /// mono sources are duplicated, extra device channels stay silent and extra
    /// host channels are dropped.
    fn remap_channels(&mut self, planes: &[Vec<f32>], frames: usize) {
        let src_channels = planes.len();
        for (dst_index, dst) in self.remapped.iter_mut().enumerate() {
            dst.clear();
            if self.to.channels == 1 && src_channels > 1 {
                dst.extend((0..frames).map(|i| {
                    planes.iter().map(|p| p[i]).sum::<f32>() / src_channels as f32
                }));
            } else if src_channels == 1 {
                dst.extend_from_slice(&planes[0][..frames]);
            } else if let Some(plane) = planes.get(dst_index) {
                dst.extend_from_slice(&plane[..frames]);
            } else {
                dst.resize(frames, 0.0);
            }
        }
    }

}

impl AudioResampler for RubatoResampler {
    fn resample(
        &mut self,
        planes: &[Vec<f32>],
        frames: usize,
    ) -> Result<ResampledAudio, ResampleError> {
        let expected = self.from.channels() as usize;
        if planes.len() < expected || planes.is_empty() {
            return Err(ResampleError::PlaneMismatch {
                expected,
                actual: planes.len(),
            });
        }
        let frames = planes[..expected]
            .iter()
            .map(Vec::len)
            .fold(frames, usize::min);

        self.remap_channels(&planes[..expected], frames);

        let mut result = ResampledAudio::default();
        let remapped = std::mem::take(&mut self.remapped);

        let Some(fft) = self.resampler.as_mut() else {
            encode_interleaved(&remapped, frames, &self.to, &mut result.data);
            result.frames = frames;
            self.remapped = remapped;
            return Ok(result);
        };

        for (pending, plane) in self.pending.iter_mut().zip(remapped.iter()) {
            pending.extend_from_slice(plane);
        }
        result.ts_offset_ns =
            fft.output_delay() as u64 * 1_000_000_000 / self.to.sample_rate as u64;

        let mut produced: Vec<Vec<f32>> = Vec::new();
        loop {
            let needed = fft.input_frames_next();
            if self.pending[0].len() < needed {
                break;
            }
            let chunk: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|p| p.drain(..needed).collect())
                .collect();
            let out = fft.process(&chunk, None).map_err(|e| {
                warn!("{}: resample failed: {}", "MONITOR_SRC".blue(), e);
                ResampleError::Process(e.to_string())
            })?;
            if produced.is_empty() {
                produced = out;
            } else {
                for (dst, src) in produced.iter_mut().zip(out) {
                    dst.extend(src);
                }
            }
        }
        let out_frames = produced.first().map_or(0, Vec::len);
        encode_interleaved(&produced, out_frames, &self.to, &mut result.data);
        result.frames = out_frames;

        self.remapped = remapped;
        Ok(result)
    }

    fn output_format(&self) -> DeviceFormat {
        self.to
    }
}

fn encode_interleaved(planes: &[Vec<f32>], frames: usize, to: &DeviceFormat, out: &mut Vec<u8>) {
    out.reserve(frames * to.bytes_per_frame());
    for frame in 0..frames {
        for plane in planes {
            encode_sample(plane[frame], to.format, out);
        }
    }
}

fn encode_sample(sample: f32, format: SampleFormat, out: &mut Vec<u8>) {
    match format {
        SampleFormat::Float => out.extend_from_slice(&sample.to_le_bytes()),
        SampleFormat::S32 => {
            let v = (sample.clamp(-1.0, 1.0) as f64 * i32::MAX as f64) as i32;
            out.extend_from_slice(&v.to_le_bytes());
        }
        SampleFormat::S16 => {
            let v = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            out.extend_from_slice(&v.to_le_bytes());
        }
        SampleFormat::U8 => {
            out.push((sample.clamp(-1.0, 1.0) * 127.0 + 128.0) as u8);
        }
    }
}

/// Builds [`RubatoResampler`]s, logging construction failures
#[derive(Debug, Default, Clone, Copy)]
pub struct RubatoResamplerFactory;

impl ResamplerFactory for RubatoResamplerFactory {
    fn create(&self, from: &HostAudioSpec, to: &DeviceFormat) -> Option<Box<dyn AudioResampler>> {
        match RubatoResampler::new(*from, *to) {
            Ok(resampler) => Some(Box::new(resampler)),
            Err(e) => {
                warn!("{}: {}", "MONITOR_SRC".blue(), e);
                None
            }
        }
    }
}
