// Audio monitor: one host source rendered to one output session
//
// The host's real-time thread calls `feed_audio` for every block. The device is
// opened lazily from there, and every step that could block is a try-lock that
// drops the block on contention. Volume, mono and balance are plain atomics so the
// settings path never waits on the audio path.

use super::devices::{create_session, DeviceSession, VbanConfig};
use super::effects::{apply_monitor_dsp, apply_volume_only, DspParams};
use super::resampling::{AudioResampler, ResamplerFactory, RubatoResamplerFactory};
use super::types::{AudioPacket, DeviceFormat, HostAudioSpec, SampleFormat};
use crossbeam::atomic::AtomicCell;
use colored::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use tracing::{info, warn};

/// What happened to one block handed to [`AudioMonitor::feed_audio`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    /// Written to the session
    Delivered,
    /// No device negotiated (empty id, paused, or negotiation failed)
    Inactive,
    /// Another thread held the monitor lock; block dropped
    Contended,
    /// Empty block, nothing to do
    Empty,
    /// Resampler rejected the block; block dropped
    ResampleFailed,
    /// The session reported a transient failure; block dropped
    WriteFailed,
    /// The device went away; the session was stopped and will be retried lazily
    DeviceLost,
}

struct MonitorInner {
    session: Box<dyn DeviceSession>,
    resampler: Option<Box<dyn AudioResampler>>,
    format: Option<DeviceFormat>,
    channel_mixing: bool,
    failed_starts: u32,
}

/// Per-source output monitor
pub struct AudioMonitor {
    device_id: String,
    host: HostAudioSpec,
    volume: AtomicCell<f32>,
    balance: AtomicCell<f32>,
    mono: AtomicBool,
    active: AtomicBool,
    paused: AtomicBool,
    inner: Mutex<MonitorInner>,
    resamplers: Arc<dyn ResamplerFactory>,
}

impl std::fmt::Debug for AudioMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioMonitor")
            .field("device_id", &self.device_id)
            .field("host", &self.host)
            .field("volume", &self.volume.load())
            .field("balance", &self.balance.load())
            .field("mono", &self.mono.load(Ordering::Relaxed))
            .field("active", &self.is_active())
            .finish()
    }
}

impl AudioMonitor {
    /// Creates a monitor without opening the device. A non-zero `port` selects a
    /// VBAN stream to `device_id:port` named after the source.
    pub fn create(device_id: &str, source_name: &str, port: u16, host: HostAudioSpec) -> Self {
        let vban = (port != 0).then(|| VbanConfig {
            port,
            stream_name: source_name.to_string(),
            format: SampleFormat::Float,
            sample_rate: 0,
        });
        Self::with_session(
            device_id,
            host,
            create_session(source_name, vban),
            Arc::new(RubatoResamplerFactory),
        )
    }

    pub fn with_session(
        device_id: &str,
        host: HostAudioSpec,
        session: Box<dyn DeviceSession>,
        resamplers: Arc<dyn ResamplerFactory>,
    ) -> Self {
        Self {
            device_id: device_id.to_string(),
            host,
            volume: AtomicCell::new(1.0),
            balance: AtomicCell::new(0.0),
            mono: AtomicBool::new(false),
            active: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            inner: Mutex::new(MonitorInner {
                session,
                resampler: None,
                format: None,
                channel_mixing: true,
                failed_starts: 0,
            }),
            resamplers,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MonitorInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn try_lock(&self) -> Option<MutexGuard<'_, MonitorInner>> {
        match self.inner.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    /// Negotiates the device. Returns true when the monitor is (already) active.
    pub fn start(&self) -> bool {
        if self.device_id.is_empty() || self.paused.load(Ordering::Acquire) {
            return false;
        }
        let mut inner = self.lock();
        self.start_locked(&mut inner)
    }

    fn start_locked(&self, inner: &mut MonitorInner) -> bool {
        if inner.resampler.is_some() {
            return true;
        }
        let tag = inner.session.name();
        let format = match inner.session.start(&self.device_id, &self.host) {
            Ok(format) => format,
            Err(e) => {
                if inner.failed_starts == 0 {
                    warn!(
                        "🎧 {}: {} session for '{}' failed to start: {}",
                        "MONITOR".blue(),
                        tag,
                        self.device_id,
                        e
                    );
                } else {
                    crate::monitor_debug!("{} session for '{}' still failing: {}", tag, self.device_id, e);
                }
                inner.failed_starts = inner.failed_starts.saturating_add(1);
                return false;
            }
        };

        let Some(resampler) = self.resamplers.create(&self.host, &format) else {
            warn!(
                "🎧 {}: no conversion from {}Hz/{}ch to {}",
                "MONITOR".blue(),
                self.host.sample_rate,
                self.host.channels(),
                format
            );
            inner.session.stop();
            inner.failed_starts = inner.failed_starts.saturating_add(1);
            return false;
        };

        inner.channel_mixing = inner.session.supports_channel_mixing();
        inner.resampler = Some(resampler);
        inner.format = Some(format);
        inner.failed_starts = 0;
        self.active.store(true, Ordering::Release);
        info!(
            "🎧 {}: monitoring to '{}' via {} ({})",
            "MONITOR".blue(),
            self.device_id,
            tag,
            format
        );
        true
    }

    /// Releases the device. The next `feed_audio` or `start` reopens it.
    pub fn stop(&self) {
        let mut inner = self.lock();
        self.stop_locked(&mut inner);
    }

    fn stop_locked(&self, inner: &mut MonitorInner) {
        self.active.store(false, Ordering::Release);
        if inner.resampler.take().is_some() {
            inner.session.stop();
            inner.format = None;
            info!("🎧 {}: stopped monitoring '{}'", "MONITOR".blue(), self.device_id);
        }
    }

    /// Stops the device and keeps it closed until [`AudioMonitor::resume`]
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
        self.stop();
    }

    pub fn resume(&self) -> bool {
        self.paused.store(false, Ordering::Release);
        self.start()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Real-time path: resample, apply DSP and hand the block to the session.
    /// Never blocks and never reports errors to the caller beyond the outcome.
    pub fn feed_audio(&self, packet: &AudioPacket) -> FeedOutcome {
        if !self.active.load(Ordering::Acquire) {
            if self.device_id.is_empty() || self.paused.load(Ordering::Acquire) {
                return FeedOutcome::Inactive;
            }
            let Some(mut inner) = self.try_lock() else {
                return FeedOutcome::Contended;
            };
            if !self.start_locked(&mut inner) {
                return FeedOutcome::Inactive;
            }
        }
        if packet.is_empty() {
            return FeedOutcome::Empty;
        }

        let Some(mut inner) = self.try_lock() else {
            return FeedOutcome::Contended;
        };
        let inner = &mut *inner;
        let (Some(resampler), Some(format)) = (inner.resampler.as_mut(), inner.format) else {
            return FeedOutcome::Inactive;
        };

        let mut audio = match resampler.resample(&packet.planes, packet.frames) {
            Ok(audio) => audio,
            Err(e) => {
                crate::monitor_debug!("resample failed for '{}': {}", self.device_id, e);
                return FeedOutcome::ResampleFailed;
            }
        };
        if audio.frames == 0 {
            return FeedOutcome::Delivered;
        }

        let params = self.dsp_params();
        if inner.channel_mixing {
            apply_monitor_dsp(&mut audio.data, &format, &params);
        } else {
            apply_volume_only(&mut audio.data, &format, params.volume);
        }

        match inner.session.write(&audio.data, audio.frames) {
            Ok(()) => FeedOutcome::Delivered,
            Err(e) if e.is_fatal() => {
                warn!("🎧 {}: lost '{}': {}", "MONITOR".blue(), self.device_id, e);
                self.stop_locked(inner);
                FeedOutcome::DeviceLost
            }
            Err(e) => {
                crate::monitor_debug!("write to '{}' failed: {}", self.device_id, e);
                FeedOutcome::WriteFailed
            }
        }
    }

    /// Snapshot of the DSP settings for one block
    pub fn dsp_params(&self) -> DspParams {
        DspParams {
            volume: self.volume.load(),
            mono: self.mono.load(Ordering::Relaxed),
            balance: self.balance.load(),
        }
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume.store(if volume.is_finite() { volume.max(0.0) } else { 0.0 });
    }

    pub fn volume(&self) -> f32 {
        self.volume.load()
    }

    pub fn set_mono(&self, mono: bool) {
        self.mono.store(mono, Ordering::Relaxed);
    }

    pub fn set_balance(&self, balance: f32) {
        self.balance.store(if balance.is_finite() { balance.clamp(-1.0, 1.0) } else { 0.0 });
    }

    /// Changes the stream sample format (VBAN). A running session restarts.
    pub fn set_format(&self, format: SampleFormat) {
        self.reconfigure(Some(format), None);
    }

    /// Changes the stream sample rate (VBAN); 0 and unchanged values are ignored
    pub fn set_samples_per_sec(&self, sample_rate: u32) {
        if sample_rate == 0 {
            return;
        }
        self.reconfigure(None, Some(sample_rate));
    }

    fn reconfigure(&self, format: Option<SampleFormat>, sample_rate: Option<u32>) {
        let mut inner = self.lock();
        if !inner.session.configure(format, sample_rate) {
            return;
        }
        if inner.resampler.is_some() {
            self.stop_locked(&mut inner);
            if !self.paused.load(Ordering::Acquire) {
                self.start_locked(&mut inner);
            }
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Negotiated channel count; `None` while inactive
    pub fn channels(&self) -> Option<u16> {
        self.device_format().map(|f| f.channels)
    }

    pub fn device_format(&self) -> Option<DeviceFormat> {
        self.lock().format
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl Drop for AudioMonitor {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.active.store(false, Ordering::Release);
        if inner.resampler.take().is_some() {
            inner.session.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::devices::MockDeviceSession;
    use crate::audio::error::SessionError;
    use crate::audio::types::SpeakerLayout;

    fn host() -> HostAudioSpec {
        HostAudioSpec::new(48000, SpeakerLayout::Stereo)
    }

    fn stereo_float() -> DeviceFormat {
        DeviceFormat::new(48000, 2, SampleFormat::Float)
    }

    fn monitor(device_id: &str, session: MockDeviceSession) -> AudioMonitor {
        AudioMonitor::with_session(device_id, host(), Box::new(session), Arc::new(RubatoResamplerFactory))
    }

    fn working_session() -> MockDeviceSession {
        let mut session = MockDeviceSession::new();
        session.expect_name().return_const("mock");
        session.expect_start().returning(|_, _| Ok(stereo_float()));
        session.expect_supports_channel_mixing().return_const(true);
        session.expect_stop().return_const(());
        session
    }

    fn floats(data: &[u8]) -> Vec<f32> {
        data.chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    #[test]
    fn test_idle_monitor_never_starts() {
        let mut session = MockDeviceSession::new();
        session.expect_start().times(0);
        session.expect_write().times(0);
        let monitor = monitor("", session);

        assert_eq!(monitor.feed_audio(&AudioPacket::silent(2, 64, 0)), FeedOutcome::Inactive);
        assert!(!monitor.start());
        assert!(!monitor.is_active());
        assert_eq!(monitor.channels(), None);
    }

    #[test]
    fn test_lazy_start_then_write() {
        let mut session = working_session();
        session.expect_write().times(2).returning(|data, frames| {
            assert_eq!(frames, 32);
            assert_eq!(data.len(), 32 * 8);
            Ok(())
        });
        let monitor = monitor("default", session);
        assert!(!monitor.is_active());

        let packet = AudioPacket::silent(2, 32, 0);
        assert_eq!(monitor.feed_audio(&packet), FeedOutcome::Delivered);
        assert!(monitor.is_active());
        assert_eq!(monitor.channels(), Some(2));
        assert_eq!(monitor.feed_audio(&packet), FeedOutcome::Delivered);
    }

    #[test]
    fn test_failed_start_stays_inactive_and_retries() {
        let mut session = MockDeviceSession::new();
        session.expect_name().return_const("mock");
        session
            .expect_start()
            .times(3)
            .returning(|id, _| Err(SessionError::DeviceNotFound(id.to_string())));
        session.expect_write().times(0);
        let monitor = monitor("usb-3", session);

        for _ in 0..3 {
            assert_eq!(monitor.feed_audio(&AudioPacket::silent(2, 16, 0)), FeedOutcome::Inactive);
        }
        assert!(!monitor.is_active());
    }

    #[test]
    fn test_volume_and_balance_reach_the_device() {
        let mut session = working_session();
        session.expect_write().times(1).returning(|data, _| {
            let samples = floats(data);
            // volume 0.5, balance hard left
            assert!((samples[0] - 0.5).abs() < 1e-6);
            assert!(samples[1].abs() < 1e-6);
            Ok(())
        });
        let monitor = monitor("default", session);
        monitor.set_volume(0.5);
        monitor.set_balance(-1.0);

        let packet = AudioPacket::new(vec![vec![1.0; 8], vec![1.0; 8]], 0);
        assert_eq!(monitor.feed_audio(&packet), FeedOutcome::Delivered);
    }

    #[test]
    fn test_channel_mixing_skipped_for_network_sessions() {
        let mut session = MockDeviceSession::new();
        session.expect_name().return_const("mock");
        session.expect_start().returning(|_, _| Ok(stereo_float()));
        session.expect_supports_channel_mixing().return_const(false);
        session.expect_stop().return_const(());
        session.expect_write().times(1).returning(|data, _| {
            let samples = floats(data);
            assert!((samples[0] - 0.5).abs() < 1e-6);
            assert!((samples[1] - 0.25).abs() < 1e-6);
            Ok(())
        });
        let monitor = monitor("10.0.0.2", session);
        monitor.set_volume(0.5);
        monitor.set_mono(true);
        monitor.set_balance(1.0);

        let packet = AudioPacket::new(vec![vec![1.0; 4], vec![0.5; 4]], 0);
        assert_eq!(monitor.feed_audio(&packet), FeedOutcome::Delivered);
    }

    /// Runs `body` while another thread holds the monitor lock
    fn while_locked_elsewhere(monitor: &AudioMonitor, body: impl FnOnce()) {
        let (held_tx, held_rx) = crossbeam::channel::bounded::<()>(0);
        let (release_tx, release_rx) = crossbeam::channel::bounded::<()>(0);
        std::thread::scope(|scope| {
            scope.spawn(|| {
                let _guard = monitor.lock();
                held_tx.send(()).unwrap();
                release_rx.recv().unwrap();
            });
            held_rx.recv().unwrap();
            // A blocking feed would wait on the holder forever
            body();
            release_tx.send(()).unwrap();
        });
    }

    #[test]
    fn test_contended_block_is_dropped_without_blocking() {
        let mut session = working_session();
        session.expect_write().times(2).returning(|_, _| Ok(()));
        let monitor = monitor("default", session);
        let packet = AudioPacket::silent(2, 16, 0);
        assert_eq!(monitor.feed_audio(&packet), FeedOutcome::Delivered);

        while_locked_elsewhere(&monitor, || {
            assert_eq!(monitor.feed_audio(&packet), FeedOutcome::Contended);
        });
        assert_eq!(monitor.feed_audio(&packet), FeedOutcome::Delivered);
    }

    #[test]
    fn test_contended_lazy_start_is_skipped() {
        let mut session = working_session();
        session.expect_write().times(1).returning(|_, _| Ok(()));
        let monitor = monitor("default", session);
        let packet = AudioPacket::silent(2, 16, 0);

        while_locked_elsewhere(&monitor, || {
            assert_eq!(monitor.feed_audio(&packet), FeedOutcome::Contended);
        });
        assert!(!monitor.is_active());
        assert_eq!(monitor.feed_audio(&packet), FeedOutcome::Delivered);
    }

    #[test]
    fn test_device_lost_stops_session() {
        let mut session = working_session();
        session
            .expect_write()
            .times(1)
            .returning(|_, _| Err(SessionError::DeviceLost("unplugged".into())));
        let monitor = monitor("default", session);

        assert_eq!(monitor.feed_audio(&AudioPacket::silent(2, 16, 0)), FeedOutcome::DeviceLost);
        assert!(!monitor.is_active());
    }

    #[test]
    fn test_stop_is_idempotent_and_releases_once() {
        let mut session = MockDeviceSession::new();
        session.expect_name().return_const("mock");
        session.expect_start().times(1).returning(|_, _| Ok(stereo_float()));
        session.expect_supports_channel_mixing().return_const(true);
        session.expect_stop().times(1).return_const(());
        let monitor = monitor("default", session);

        assert!(monitor.start());
        assert!(monitor.start());
        monitor.stop();
        monitor.stop();
        drop(monitor);
    }

    #[test]
    fn test_pause_blocks_lazy_start() {
        let mut session = working_session();
        session.expect_write().times(0);
        let monitor = monitor("default", session);
        monitor.pause();
        assert_eq!(monitor.feed_audio(&AudioPacket::silent(2, 16, 0)), FeedOutcome::Inactive);
        assert!(monitor.resume());
        assert!(monitor.is_active());
    }

    #[test]
    fn test_format_change_restarts_running_session() {
        let mut session = working_session();
        session.expect_configure().times(1).return_const(true);
        let monitor = monitor("10.0.0.2", session);
        assert!(monitor.start());
        monitor.set_format(SampleFormat::S16);
        assert!(monitor.is_active());
    }

    #[test]
    fn test_zero_sample_rate_is_ignored() {
        let mut session = MockDeviceSession::new();
        session.expect_configure().times(0);
        let monitor = monitor("10.0.0.2", session);
        monitor.set_samples_per_sec(0);
    }

    #[test]
    fn test_settings_are_clamped() {
        let monitor = monitor("", MockDeviceSession::new());
        monitor.set_volume(-2.0);
        assert_eq!(monitor.volume(), 0.0);
        monitor.set_balance(3.0);
        assert_eq!(monitor.dsp_params().balance, 1.0);
        monitor.set_balance(f32::NAN);
        assert_eq!(monitor.dsp_params().balance, 0.0);
    }
}
