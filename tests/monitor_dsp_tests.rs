// DSP and fader-curve invariants over the public effects API

use audio_monitor::audio::effects::{
    apply_monitor_dsp, apply_volume_only, balance_gains, db_to_def, def_to_db, def_to_mul, mul_to_def,
    DspParams,
};
use audio_monitor::{DeviceFormat, SampleFormat};
use proptest::prelude::*;

fn float_bytes(samples: &[f32]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

fn floats(data: &[u8]) -> Vec<f32> {
    data.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn i16_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

fn i16s(data: &[u8]) -> Vec<i16> {
    data.chunks_exact(2).map(|b| i16::from_le_bytes([b[0], b[1]])).collect()
}

fn i32_bytes(samples: &[i32]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

fn i32s(data: &[u8]) -> Vec<i32> {
    data.chunks_exact(4)
        .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn mono() -> DspParams {
    DspParams {
        mono: true,
        ..Default::default()
    }
}

fn balance(balance: f32) -> DspParams {
    DspParams {
        balance,
        ..Default::default()
    }
}

#[test]
fn test_fader_round_trip_at_reference_points() {
    for def in [0.0f32, 0.25, 0.5, 0.75, 1.0] {
        let back = db_to_def(def_to_db(def));
        assert!((back - def).abs() < 1e-3, "def {} came back as {}", def, back);
    }
}

#[test]
fn test_fader_end_points() {
    assert_eq!(def_to_db(1.0), 0.0);
    assert_eq!(def_to_db(0.0), f32::NEG_INFINITY);
    assert_eq!(def_to_mul(1.0), 1.0);
    assert_eq!(def_to_mul(0.0), 0.0);
    assert_eq!(mul_to_def(0.0), 0.0);
    assert_eq!(db_to_def(-120.0), 0.0);
    assert_eq!(db_to_def(3.0), 1.0);
}

#[test]
fn test_balance_gain_extremes() {
    let (l, r) = balance_gains(0.0);
    assert!((l - r).abs() < 1e-6);
    assert!((l - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);

    let (l, r) = balance_gains(-1.0);
    assert!((l - 1.0).abs() < 1e-6);
    assert!(r.abs() < 1e-6);

    let (l, r) = balance_gains(1.0);
    assert!(l.abs() < 1e-6);
    assert!((r - 1.0).abs() < 1e-6);
}

#[test]
fn test_order_is_volume_then_mono_then_balance() {
    let format = DeviceFormat::new(48000, 2, SampleFormat::Float);
    let mut data = float_bytes(&[1.0, 0.0]);
    let params = DspParams {
        volume: 0.5,
        mono: true,
        balance: 1.0,
    };
    apply_monitor_dsp(&mut data, &format, &params);
    let out = floats(&data);
    // 0.5 gain, mean 0.25 on both channels, then hard right
    assert!(out[0].abs() < 1e-6);
    assert!((out[1] - 0.25).abs() < 1e-6);
}

#[test]
fn test_s16_mono_truncates_mean() {
    let format = DeviceFormat::new(48000, 2, SampleFormat::S16);
    let mut data = i16_bytes(&[3, 0, -3, 0]);
    let params = DspParams {
        mono: true,
        ..Default::default()
    };
    apply_monitor_dsp(&mut data, &format, &params);
    assert_eq!(i16s(&data), vec![1, 1, -1, -1]);
}

#[test]
fn test_volume_only_ignores_channel_settings() {
    let format = DeviceFormat::new(48000, 2, SampleFormat::Float);
    let mut data = float_bytes(&[1.0, 0.5]);
    apply_volume_only(&mut data, &format, 2.0);
    assert_eq!(floats(&data), vec![2.0, 1.0]);
}

#[test]
fn test_s32_mono_sums_without_overflow() {
    let format = DeviceFormat::new(48000, 2, SampleFormat::S32);
    let mut data = i32_bytes(&[i32::MAX, i32::MAX, i32::MIN, i32::MIN + 1]);
    apply_monitor_dsp(&mut data, &format, &mono());
    // Integer mean truncates toward zero
    assert_eq!(i32s(&data), vec![i32::MAX, i32::MAX, i32::MIN + 1, i32::MIN + 1]);
}

#[test]
fn test_u8_hard_left_zeroes_raw_right_channel() {
    let format = DeviceFormat::new(48000, 2, SampleFormat::U8);
    let mut data = vec![200, 200, 128, 128];
    apply_monitor_dsp(&mut data, &format, &balance(-1.0));
    assert_eq!(data, vec![200, 0, 128, 0]);
}

fn any_format() -> impl Strategy<Value = SampleFormat> {
    prop_oneof![
        Just(SampleFormat::U8),
        Just(SampleFormat::S16),
        Just(SampleFormat::S32),
        Just(SampleFormat::Float),
    ]
}

proptest! {
    #[test]
    fn prop_identity_params_leave_bytes_untouched(
        format in any_format(),
        channels in 1u16..=8,
        frames in 0usize..64,
        seed in any::<u64>(),
    ) {
        let device = DeviceFormat::new(48000, channels, format);
        let len = device.bytes_per_frame() * frames;
        let mut state = seed | 1;
        let original: Vec<u8> = (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                state as u8
            })
            .collect();
        let mut data = original.clone();
        apply_monitor_dsp(&mut data, &device, &DspParams::default());
        prop_assert_eq!(data, original);
    }

    #[test]
    fn prop_float_mono_writes_channel_mean(
        frames in proptest::collection::vec(proptest::collection::vec(-1.0f32..1.0, 3), 1..32),
    ) {
        let format = DeviceFormat::new(48000, 3, SampleFormat::Float);
        let interleaved: Vec<f32> = frames.iter().flatten().copied().collect();
        let mut data = float_bytes(&interleaved);
        let params = DspParams { mono: true, ..Default::default() };
        apply_monitor_dsp(&mut data, &format, &params);

        for (frame, out) in frames.iter().zip(floats(&data).chunks_exact(3)) {
            let mean = frame.iter().sum::<f32>() / 3.0;
            for sample in out {
                prop_assert!((sample - mean).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn prop_s32_mono_writes_truncated_mean(
        frames in proptest::collection::vec(proptest::collection::vec(any::<i32>(), 2), 1..32),
    ) {
        let format = DeviceFormat::new(48000, 2, SampleFormat::S32);
        let interleaved: Vec<i32> = frames.iter().flatten().copied().collect();
        let mut data = i32_bytes(&interleaved);
        apply_monitor_dsp(&mut data, &format, &mono());

        for (frame, out) in frames.iter().zip(i32s(&data).chunks_exact(2)) {
            let mean = ((frame[0] as i64 + frame[1] as i64) / 2) as i32;
            prop_assert_eq!(out, &[mean, mean][..]);
        }
    }

    #[test]
    fn prop_u8_mono_writes_floored_raw_mean(
        frames in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 3), 1..32),
    ) {
        let format = DeviceFormat::new(48000, 3, SampleFormat::U8);
        let mut data: Vec<u8> = frames.iter().flatten().copied().collect();
        apply_monitor_dsp(&mut data, &format, &mono());

        for (frame, out) in frames.iter().zip(data.chunks_exact(3)) {
            let mean = (frame.iter().map(|&s| s as u32).sum::<u32>() / 3) as u8;
            prop_assert!(out.iter().all(|&s| s == mean));
        }
    }

    #[test]
    fn prop_u8_volume_scales_raw_value(
        samples in proptest::collection::vec(any::<u8>(), 1..64),
        volume in 0.0f32..0.99,
    ) {
        let format = DeviceFormat::new(48000, 1, SampleFormat::U8);
        let mut data = samples.clone();
        apply_volume_only(&mut data, &format, volume);

        for (&before, &after) in samples.iter().zip(&data) {
            prop_assert_eq!(after, (before as f32 * volume) as u8);
            prop_assert!(after <= before);
        }
    }

    #[test]
    fn prop_s32_hard_pan_silences_one_channel(
        left in -(1i32 << 24)..=(1 << 24),
        right in -(1i32 << 24)..=(1 << 24),
        hard_right in any::<bool>(),
    ) {
        let format = DeviceFormat::new(48000, 2, SampleFormat::S32);
        let mut data = i32_bytes(&[left, right]);
        apply_monitor_dsp(&mut data, &format, &balance(if hard_right { 1.0 } else { -1.0 }));

        let expected = if hard_right { vec![0, right] } else { vec![left, 0] };
        prop_assert_eq!(i32s(&data), expected);
    }

    #[test]
    fn prop_u8_hard_pan_silences_one_channel(
        left in any::<u8>(),
        right in any::<u8>(),
        hard_right in any::<bool>(),
    ) {
        let format = DeviceFormat::new(48000, 2, SampleFormat::U8);
        let mut data = vec![left, right];
        apply_monitor_dsp(&mut data, &format, &balance(if hard_right { 1.0 } else { -1.0 }));

        let expected = if hard_right { vec![0, right] } else { vec![left, 0] };
        prop_assert_eq!(data, expected);
    }

    #[test]
    fn prop_balance_keeps_constant_power(balance in -1.0f32..=1.0) {
        let (l, r) = balance_gains(balance);
        prop_assert!((l * l + r * r - 1.0).abs() < 1e-5);
        prop_assert!((0.0..=1.0).contains(&l) && (0.0..=1.0).contains(&r));
    }

    #[test]
    fn prop_fader_round_trip(def in 0.0f32..=1.0) {
        let back = db_to_def(def_to_db(def));
        prop_assert!((back - def).abs() < 1e-3);
    }
}
