// VBAN wire format and loopback delivery through the public monitor API

use audio_monitor::audio::devices::vban::{vban_sample_rate_index, VbanPacketizer};
use audio_monitor::audio::devices::{DeviceSession, VbanConfig, VbanSession};
use audio_monitor::{AudioMonitor, AudioPacket, DeviceFormat, FeedOutcome, HostAudioSpec, SampleFormat, SpeakerLayout};
use std::net::UdpSocket;
use std::time::Duration;

fn receiver() -> (UdpSocket, u16) {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let port = socket.local_addr().unwrap().port();
    (socket, port)
}

#[test]
fn test_packet_shape_for_stereo_float() {
    let format = DeviceFormat::new(48000, 2, SampleFormat::Float);
    let mut packetizer = VbanPacketizer::new(format, "Mic").unwrap();
    let data = vec![0u8; 64 * 8];

    let mut packets = Vec::new();
    packetizer.packetize(&data, 64, |p| packets.push(p.to_vec()));
    assert_eq!(packets.len(), 1);

    let packet = &packets[0];
    assert_eq!(packet.len(), 28 + 64 * 2 * 4);
    assert_eq!(&packet[0..4], b"VBAN");
    assert_eq!(packet[4], 3, "48kHz index");
    assert_eq!(packet[5], 63, "frames - 1");
    assert_eq!(packet[6], 1, "channels - 1");
    assert_eq!(packet[7], 4, "float32 code");
    assert_eq!(&packet[8..11], b"Mic");
    assert!(packet[11..24].iter().all(|&b| b == 0));
    assert_eq!(&packet[24..28], &0u32.to_le_bytes());
}

#[test]
fn test_frame_counter_runs_across_writes() {
    let format = DeviceFormat::new(44100, 1, SampleFormat::S16);
    let mut packetizer = VbanPacketizer::new(format, "Stream").unwrap();
    let data = vec![0u8; 10 * 2];

    let mut counters = Vec::new();
    for _ in 0..3 {
        packetizer.packetize(&data, 10, |p| {
            counters.push(u32::from_le_bytes([p[24], p[25], p[26], p[27]]));
        });
    }
    assert_eq!(counters, vec![0, 1, 2]);
    assert_eq!(vban_sample_rate_index(44100), Some(16));
}

#[test]
fn test_long_stream_names_are_truncated() {
    let format = DeviceFormat::new(48000, 2, SampleFormat::S32);
    let mut packetizer = VbanPacketizer::new(format, "A very long source name").unwrap();
    let mut header = Vec::new();
    packetizer.packetize(&[0u8; 8], 1, |p| header = p[..28].to_vec());
    assert_eq!(&header[8..24], b"A very long sour");
    assert_eq!(header[7], 3);
}

#[test]
fn test_session_sends_datagrams_to_target() {
    let (socket, port) = receiver();
    let mut session = VbanSession::new(VbanConfig {
        port,
        stream_name: "Mic".into(),
        format: SampleFormat::S16,
        sample_rate: 0,
    });
    let host = HostAudioSpec::new(48000, SpeakerLayout::Stereo);
    let format = session.start("127.0.0.1", &host).unwrap();
    assert_eq!(format, DeviceFormat::new(48000, 2, SampleFormat::S16));
    assert!(session.is_active());

    session.write(&[0u8; 16 * 4], 16).unwrap();
    let mut buf = [0u8; 2048];
    let len = socket.recv(&mut buf).unwrap();
    assert_eq!(len, 28 + 16 * 4);
    assert_eq!(buf[7], 1);

    session.stop();
    assert!(!session.is_active());
    assert!(session.write(&[0u8; 4], 1).is_err());
}

#[test]
fn test_monitor_streams_with_volume_applied() {
    let (socket, port) = receiver();
    let host = HostAudioSpec::new(48000, SpeakerLayout::Stereo);
    let monitor = AudioMonitor::create("127.0.0.1", "Mic", port, host);
    monitor.set_volume(0.5);
    // Channel settings do not apply to network streams
    monitor.set_mono(true);

    let packet = AudioPacket::new(vec![vec![0.5; 32], vec![-0.25; 32]], 0);
    assert_eq!(monitor.feed_audio(&packet), FeedOutcome::Delivered);
    assert!(monitor.is_active());
    assert_eq!(monitor.channels(), Some(2));

    let mut buf = [0u8; 2048];
    let len = socket.recv(&mut buf).unwrap();
    assert_eq!(len, 28 + 32 * 8);
    let first = f32::from_le_bytes([buf[28], buf[29], buf[30], buf[31]]);
    let second = f32::from_le_bytes([buf[32], buf[33], buf[34], buf[35]]);
    assert!((first - 0.25).abs() < 1e-6);
    assert!((second + 0.125).abs() < 1e-6);

    monitor.stop();
    assert!(!monitor.is_active());
}
