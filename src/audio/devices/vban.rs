// VBAN network session
//
// Streams the monitored audio as VBAN datagrams instead of playing it locally.
// The device id of a VBAN monitor is the destination host name or IP address.
// Header layout (28 bytes):
//   0..4   "VBAN"
//   4      sample-rate index
//   5      frames in packet - 1
//   6      channels - 1
//   7      data type code
//   8..24  stream name, zero padded
//   24..28 running frame counter, little endian

use super::session::DeviceSession;
use crate::audio::error::SessionError;
use crate::audio::types::{DeviceFormat, HostAudioSpec, SampleFormat};
use crate::types::{
    VBAN_HEADER_SIZE, VBAN_MAX_FRAMES_PER_PACKET, VBAN_MAX_PAYLOAD, VBAN_STREAM_NAME_LEN,
};
use colored::*;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use tracing::{info, warn};

/// Sample rates VBAN can signal, in index order
const VBAN_SAMPLE_RATES: [u32; 21] = [
    6000, 12000, 24000, 48000, 96000, 192000, 384000, 8000, 16000, 32000, 64000, 128000,
    256000, 512000, 11025, 22050, 44100, 88200, 176400, 352800, 705600,
];

/// Index of a sample rate in the VBAN rate table
pub fn vban_sample_rate_index(sample_rate: u32) -> Option<u8> {
    VBAN_SAMPLE_RATES
        .iter()
        .position(|&rate| rate == sample_rate)
        .map(|index| index as u8)
}

/// Splits interleaved audio into VBAN datagrams
#[derive(Debug, Clone)]
pub struct VbanPacketizer {
    sample_rate_index: u8,
    channels: u16,
    format: SampleFormat,
    stream_name: [u8; VBAN_STREAM_NAME_LEN],
    frame_counter: u32,
}

impl VbanPacketizer {
    pub fn new(
        format: DeviceFormat,
        stream_name: &str,
    ) -> Result<Self, SessionError> {
        let sample_rate_index = vban_sample_rate_index(format.sample_rate)
            .ok_or(SessionError::UnsupportedSampleRate(format.sample_rate))?;
        if format.channels == 0 || format.channels > 256 {
            return Err(SessionError::UnsupportedChannels(format.channels));
        }

        // Names are cut at 16 bytes, not at a char boundary
        let mut name = [0u8; VBAN_STREAM_NAME_LEN];
        let bytes = stream_name.as_bytes();
        let len = bytes.len().min(VBAN_STREAM_NAME_LEN);
        name[..len].copy_from_slice(&bytes[..len]);

        Ok(Self {
            sample_rate_index,
            channels: format.channels,
            format: format.format,
            stream_name: name,
            frame_counter: 0,
        })
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * self.format.bytes_per_sample()
    }

    /// Frames carried by a full packet
    pub fn frames_per_packet(&self) -> usize {
        (VBAN_MAX_PAYLOAD / self.bytes_per_frame()).clamp(1, VBAN_MAX_FRAMES_PER_PACKET)
    }

    /// Counter value the next packet will carry
    pub fn frame_counter(&self) -> u32 {
        self.frame_counter
    }

    /// Calls `send` once per datagram, in order. Incomplete trailing frames are dropped.
    pub fn packetize<F>(&mut self, data: &[u8], frames: usize, mut send: F)
    where
        F: FnMut(&[u8]),
    {
        let frame_bytes = self.bytes_per_frame();
        let frames = frames.min(data.len() / frame_bytes);
        let per_packet = self.frames_per_packet();
        let mut packet = Vec::with_capacity(VBAN_HEADER_SIZE + per_packet * frame_bytes);

        let mut pos = 0;
        while pos < frames {
            let count = per_packet.min(frames - pos);
            packet.clear();
            packet.extend_from_slice(b"VBAN");
            packet.push(self.sample_rate_index);
            packet.push((count - 1) as u8);
            packet.push((self.channels - 1) as u8);
            packet.push(self.format.vban_code());
            packet.extend_from_slice(&self.stream_name);
            packet.extend_from_slice(&self.frame_counter.to_le_bytes());
            packet.extend_from_slice(&data[pos * frame_bytes..(pos + count) * frame_bytes]);

            self.frame_counter = self.frame_counter.wrapping_add(1);
            send(&packet);
            pos += count;
        }
    }
}

/// User-selected VBAN stream parameters
#[derive(Debug, Clone, PartialEq)]
pub struct VbanConfig {
    pub port: u16,
    pub stream_name: String,
    pub format: SampleFormat,
    /// 0 means "use the host rate"
    pub sample_rate: u32,
}

/// UDP session sending VBAN datagrams to `device_id:port`
#[derive(Debug)]
pub struct VbanSession {
    config: VbanConfig,
    socket: Option<UdpSocket>,
    target: Option<SocketAddr>,
    packetizer: Option<VbanPacketizer>,
}

impl VbanSession {
    pub fn new(config: VbanConfig) -> Self {
        Self {
            config,
            socket: None,
            target: None,
            packetizer: None,
        }
    }

    fn resolve(&self, host: &str) -> Result<SocketAddr, SessionError> {
        let mut addrs = (host, self.config.port).to_socket_addrs()?;
        addrs
            .find(SocketAddr::is_ipv4)
            .ok_or_else(|| SessionError::DeviceNotFound(host.to_string()))
    }
}

impl DeviceSession for VbanSession {
    fn name(&self) -> &'static str {
        "vban"
    }

    fn start(&mut self, device_id: &str, host: &HostAudioSpec) -> Result<DeviceFormat, SessionError> {
        let sample_rate = match self.config.sample_rate {
            0 => host.sample_rate,
            rate => rate,
        };
        let format = DeviceFormat::new(sample_rate, host.channels(), self.config.format);
        let packetizer = VbanPacketizer::new(format, &self.config.stream_name)?;

        let target = self.resolve(device_id)?;
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        socket.set_nonblocking(true)?;

        info!(
            "📡 {}: streaming '{}' to {} as {}",
            "VBAN".cyan(),
            self.config.stream_name,
            target,
            format
        );

        self.socket = Some(socket);
        self.target = Some(target);
        self.packetizer = Some(packetizer);
        Ok(format)
    }

    fn stop(&mut self) {
        if self.socket.take().is_some() {
            info!("📡 {}: stream stopped", "VBAN".cyan());
        }
        self.target = None;
        self.packetizer = None;
    }

    fn write(&mut self, data: &[u8], frames: usize) -> Result<(), SessionError> {
        let (Some(socket), Some(target), Some(packetizer)) =
            (self.socket.as_ref(), self.target, self.packetizer.as_mut())
        else {
            return Err(SessionError::Inactive);
        };

        let mut dropped = 0usize;
        packetizer.packetize(data, frames, |packet| {
            if socket.send_to(packet, target).is_err() {
                dropped += 1;
            }
        });
        if dropped > 0 {
            crate::monitor_debug!("VBAN: {} datagrams dropped", dropped);
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.socket.is_some()
    }

    fn supports_channel_mixing(&self) -> bool {
        false
    }

    fn configure(&mut self, format: Option<SampleFormat>, sample_rate: Option<u32>) -> bool {
        let mut changed = false;
        if let Some(format) = format {
            if format != self.config.format {
                self.config.format = format;
                changed = true;
            }
        }
        if let Some(rate) = sample_rate {
            if rate > 0 && rate != self.config.sample_rate {
                if vban_sample_rate_index(rate).is_none() {
                    warn!("{}: ignoring unsupported sample rate {}Hz", "VBAN".cyan(), rate);
                } else {
                    self.config.sample_rate = rate;
                    changed = true;
                }
            }
        }
        changed
    }
}
