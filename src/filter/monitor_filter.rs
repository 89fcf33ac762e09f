// Monitor filter: the per-source glue between host filter callbacks and an AudioMonitor
//
// create/update/destroy come from the settings thread, filter_audio from the host
// audio thread. The audio path only ever try-locks and passes audio through unchanged.

use super::delay_queue::DelayQueue;
use super::settings::{MonitorFilterSettings, MonitorTarget, MuteMode};
use crate::audio::devices::{resolve_device, DeviceEnumerator, DeviceResolution};
use crate::audio::monitor::AudioMonitor;
use crate::audio::types::{AudioDeviceInfo, AudioPacket, HostAudioSpec, SampleFormat};
use crate::types::{COMMON_SAMPLE_RATES_HZ, DEFAULT_DEVICE_ID, MAX_DELAY_MS, VBAN_DEVICE_ID};
use colored::*;
use crossbeam::channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use tracing::info;

/// Notifications for the host
#[derive(Debug, Clone, PartialEq)]
pub enum FilterEvent {
    /// Settings were applied (the host's `updated` signal)
    Updated,
    /// Linked filter volume changed; the host applies this linear gain to the parent
    LinkedVolumeChanged(f32),
}

/// Builds the monitor for `(device_id, source_name, port, host)`
pub type MonitorFactory = Arc<dyn Fn(&str, &str, u16, HostAudioSpec) -> AudioMonitor + Send + Sync>;

/// A numeric property and its slider range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumericRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

/// What the host shows on the filter's property sheet
#[derive(Debug, Clone, PartialEq)]
pub struct FilterProperties {
    /// Choices for `device`: Default, every output device, then VBAN
    pub devices: Vec<AudioDeviceInfo>,
    pub volume: NumericRange,
    pub balance: NumericRange,
    pub delay: NumericRange,
    pub mute_modes: Vec<MuteMode>,
    pub formats: Vec<SampleFormat>,
    pub sample_rates: Vec<u32>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn try_lock<T>(mutex: &Mutex<T>) -> Option<MutexGuard<'_, T>> {
    match mutex.try_lock() {
        Ok(guard) => Some(guard),
        Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
        Err(TryLockError::WouldBlock) => None,
    }
}

struct ActiveMonitor {
    target: MonitorTarget,
    monitor: Arc<AudioMonitor>,
}

pub struct MonitorFilter {
    source_name: String,
    host: HostAudioSpec,
    settings: Mutex<MonitorFilterSettings>,
    monitor: Mutex<Option<ActiveMonitor>>,
    delay: Mutex<DelayQueue>,
    source_muted: AtomicBool,
    source_active: AtomicBool,
    muted: AtomicBool,
    stop_feeding: AtomicBool,
    enumerator: Arc<dyn DeviceEnumerator>,
    monitors: MonitorFactory,
    subscribers: Mutex<Vec<Sender<FilterEvent>>>,
}

impl std::fmt::Debug for MonitorFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorFilter")
            .field("source_name", &self.source_name)
            .field("settings", &*lock(&self.settings))
            .field("muted", &self.muted.load(Ordering::Relaxed))
            .finish()
    }
}

impl MonitorFilter {
    /// Creates the filter and applies `settings` (opening the device eagerly)
    pub fn create(
        settings: MonitorFilterSettings,
        source_name: &str,
        host: HostAudioSpec,
        enumerator: Arc<dyn DeviceEnumerator>,
    ) -> Self {
        Self::with_monitor_factory(
            settings,
            source_name,
            host,
            enumerator,
            Arc::new(AudioMonitor::create),
        )
    }

    pub fn with_monitor_factory(
        settings: MonitorFilterSettings,
        source_name: &str,
        host: HostAudioSpec,
        enumerator: Arc<dyn DeviceEnumerator>,
        monitors: MonitorFactory,
    ) -> Self {
        let filter = Self {
            source_name: source_name.to_string(),
            host,
            settings: Mutex::new(MonitorFilterSettings::default()),
            monitor: Mutex::new(None),
            delay: Mutex::new(DelayQueue::default()),
            source_muted: AtomicBool::new(false),
            source_active: AtomicBool::new(true),
            muted: AtomicBool::new(false),
            stop_feeding: AtomicBool::new(false),
            enumerator,
            monitors,
            subscribers: Mutex::new(Vec::new()),
        };
        filter.update(settings);
        filter
    }

    /// Receives every [`FilterEvent`] emitted after this call
    pub fn subscribe(&self) -> Receiver<FilterEvent> {
        let (tx, rx) = unbounded();
        lock(&self.subscribers).push(tx);
        rx
    }

    fn emit(&self, event: FilterEvent) {
        lock(&self.subscribers).retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Applies a settings document (host `update` and `load`). Returns the
    /// settings as stored, after clamping and device-name reconciliation.
    pub fn update(&self, mut settings: MonitorFilterSettings) -> MonitorFilterSettings {
        settings.clamp();
        self.reconcile_device(&mut settings);

        let previous = std::mem::replace(&mut *lock(&self.settings), settings.clone());
        let target = settings.target();

        let monitor = {
            let mut active = lock(&self.monitor);
            let kept = active
                .as_ref()
                .filter(|a| a.target == target)
                .map(|a| Arc::clone(&a.monitor));
            match kept {
                Some(monitor) => {
                    if previous.format != settings.format {
                        monitor.set_format(settings.format);
                    }
                    if previous.samples_per_sec != settings.samples_per_sec {
                        monitor.set_samples_per_sec(settings.samples_per_sec);
                    }
                    monitor
                }
                None => {
                    if let Some(old) = active.take() {
                        old.monitor.stop();
                    }
                    let monitor = Arc::new((self.monitors)(
                        &target.device_id,
                        &self.source_name,
                        target.port,
                        self.host,
                    ));
                    monitor.set_format(settings.format);
                    monitor.set_samples_per_sec(settings.samples_per_sec);
                    info!(
                        "🎚️ {}: '{}' now monitors to '{}'",
                        "MONITOR_FILTER".blue(),
                        self.source_name,
                        if target.device_id.is_empty() { "<none>" } else { target.device_id.as_str() }
                    );
                    *active = Some(ActiveMonitor {
                        target,
                        monitor: Arc::clone(&monitor),
                    });
                    monitor
                }
            }
        };

        monitor.set_mono(settings.mono);
        monitor.set_balance(settings.balance as f32);
        lock(&self.delay).set_delay_ms(settings.delay_ms());

        if settings.linked && previous.volume != settings.volume {
            self.emit(FilterEvent::LinkedVolumeChanged(settings.gain()));
        }

        self.apply_mute(&monitor, &settings);
        if !self.stop_feeding.load(Ordering::Acquire) {
            monitor.start();
        }
        self.emit(FilterEvent::Updated);
        settings
    }

    fn reconcile_device(&self, settings: &mut MonitorFilterSettings) {
        if settings.is_vban() || settings.device == DEFAULT_DEVICE_ID || settings.device.is_empty() {
            return;
        }
        let devices = self.enumerator.devices();
        match resolve_device(&devices, &settings.device, &settings.device_name) {
            DeviceResolution::Found(device) => settings.device_name = device.name,
            DeviceResolution::Renamed(device) => {
                info!(
                    "🎚️ {}: device '{}' is now '{}'",
                    "MONITOR_FILTER".blue(),
                    settings.device,
                    device.id
                );
                settings.device = device.id;
                settings.device_name = device.name;
            }
            DeviceResolution::Missing => {}
        }
    }

    fn current_monitor(&self) -> Option<Arc<AudioMonitor>> {
        lock(&self.monitor).as_ref().map(|a| Arc::clone(&a.monitor))
    }

    /// Works out whether the host state silences the monitor and applies it
    fn apply_mute(&self, monitor: &AudioMonitor, settings: &MonitorFilterSettings) {
        let muted = match settings.mute {
            MuteMode::Never => false,
            MuteMode::NotActiveOutput => !self.source_active.load(Ordering::Acquire),
            MuteMode::SourceMuted => self.source_muted.load(Ordering::Acquire),
        };
        let was_muted = self.muted.swap(muted, Ordering::AcqRel);
        let stop_start = muted && settings.mute_stop_start;
        self.stop_feeding.store(stop_start, Ordering::Release);

        if stop_start {
            monitor.pause();
            lock(&self.delay).clear();
        } else {
            if monitor.is_paused() {
                monitor.resume();
            }
            monitor.set_volume(if muted { 0.0 } else { settings.gain() });
        }
        if was_muted != muted {
            info!(
                "🎚️ {}: '{}' {}",
                "MONITOR_FILTER".blue(),
                self.source_name,
                if muted { "muted" } else { "unmuted" }
            );
        }
    }

    fn refresh_mute(&self) {
        let settings = lock(&self.settings).clone();
        if let Some(monitor) = self.current_monitor() {
            self.apply_mute(&monitor, &settings);
        }
    }

    /// Host signal: the parent source was muted or unmuted
    pub fn set_source_muted(&self, muted: bool) {
        self.source_muted.store(muted, Ordering::Release);
        self.refresh_mute();
    }

    /// Host signal: the source entered or left an active output
    pub fn set_source_active(&self, active: bool) {
        self.source_active.store(active, Ordering::Release);
        self.refresh_mute();
    }

    /// Host signal: the parent's volume changed. Linked filters follow it.
    pub fn set_parent_volume(&self, gain: f32) {
        let settings = {
            let mut settings = lock(&self.settings);
            if !settings.linked {
                return;
            }
            settings.set_gain(gain);
            settings.clone()
        };
        if let Some(monitor) = self.current_monitor() {
            self.apply_mute(&monitor, &settings);
        }
        self.emit(FilterEvent::Updated);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }

    /// Audio thread: feeds the monitor (through the delay queue when enabled)
    /// and returns the block untouched
    pub fn filter_audio<'a>(&self, packet: &'a AudioPacket) -> &'a AudioPacket {
        if self.stop_feeding.load(Ordering::Acquire) {
            return packet;
        }
        let Some(monitor) = try_lock(&self.monitor).and_then(|a| a.as_ref().map(|a| Arc::clone(&a.monitor))) else {
            return packet;
        };
        let Some(mut delay) = try_lock(&self.delay) else {
            return packet;
        };
        if delay.is_enabled() {
            delay.push(packet, |entry| {
                monitor.feed_audio(entry);
            });
        } else {
            drop(delay);
            monitor.feed_audio(packet);
        }
        packet
    }

    pub fn settings(&self) -> MonitorFilterSettings {
        lock(&self.settings).clone()
    }

    pub fn device_id(&self) -> Option<String> {
        self.current_monitor().map(|m| m.device_id().to_string())
    }

    pub fn monitor(&self) -> Option<Arc<AudioMonitor>> {
        self.current_monitor()
    }

    pub fn delayed_blocks(&self) -> usize {
        lock(&self.delay).len()
    }

    /// Property sheet for the filter
    pub fn properties(enumerator: &dyn DeviceEnumerator) -> FilterProperties {
        let mut devices = vec![AudioDeviceInfo::new(DEFAULT_DEVICE_ID, "Default")];
        devices.extend(enumerator.devices());
        devices.push(AudioDeviceInfo::new(VBAN_DEVICE_ID, "VBAN"));
        FilterProperties {
            devices,
            volume: NumericRange {
                min: 0.0,
                max: 100.0,
                step: 1.0,
            },
            balance: NumericRange {
                min: -1.0,
                max: 1.0,
                step: 0.01,
            },
            delay: NumericRange {
                min: 0.0,
                max: MAX_DELAY_MS as f64,
                step: 1.0,
            },
            mute_modes: vec![MuteMode::Never, MuteMode::NotActiveOutput, MuteMode::SourceMuted],
            formats: vec![SampleFormat::U8, SampleFormat::S16, SampleFormat::S32, SampleFormat::Float],
            sample_rates: COMMON_SAMPLE_RATES_HZ.to_vec(),
        }
    }

    /// Stops the monitor and drops queued audio
    pub fn destroy(self) {
        drop(self);
    }
}

impl Drop for MonitorFilter {
    fn drop(&mut self) {
        lock(&self.delay).clear();
        if let Some(active) = lock(&self.monitor).take() {
            active.monitor.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::devices::{DeviceSession, MockDeviceSession, StaticDeviceList};
    use crate::audio::resampling::RubatoResamplerFactory;
    use crate::audio::types::{DeviceFormat, SpeakerLayout};
    use std::sync::atomic::AtomicUsize;

    fn host() -> HostAudioSpec {
        HostAudioSpec::new(48000, SpeakerLayout::Stereo)
    }

    fn enumerator() -> Arc<dyn DeviceEnumerator> {
        Arc::new(StaticDeviceList::new(vec![
            AudioDeviceInfo::new("hdmi-1", "HDMI Output"),
            AudioDeviceInfo::new("usb-7", "USB Headset"),
        ]))
    }

    struct Counters {
        starts: AtomicUsize,
        writes: AtomicUsize,
    }

    fn factory(counters: Arc<Counters>) -> MonitorFactory {
        Arc::new(move |device_id: &str, _source: &str, _port: u16, host: HostAudioSpec| {
            let starts = Arc::clone(&counters);
            let writes = Arc::clone(&counters);
            let mut session = MockDeviceSession::new();
            session.expect_name().return_const("mock");
            session.expect_start().returning(move |_, _| {
                starts.starts.fetch_add(1, Ordering::SeqCst);
                Ok(DeviceFormat::new(48000, 2, SampleFormat::Float))
            });
            session.expect_supports_channel_mixing().return_const(true);
            session.expect_stop().return_const(());
            session.expect_configure().return_const(false);
            session.expect_write().returning(move |_, _| {
                writes.writes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            AudioMonitor::with_session(
                device_id,
                host,
                Box::new(session) as Box<dyn DeviceSession>,
                Arc::new(RubatoResamplerFactory),
            )
        })
    }

    fn counters() -> Arc<Counters> {
        Arc::new(Counters {
            starts: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        })
    }

    fn filter(settings: MonitorFilterSettings, counters: &Arc<Counters>) -> MonitorFilter {
        MonitorFilter::with_monitor_factory(settings, "Mic", host(), enumerator(), factory(Arc::clone(counters)))
    }

    #[test]
    fn test_create_opens_device_eagerly() {
        let counters = counters();
        let filter = filter(MonitorFilterSettings::default(), &counters);
        assert_eq!(counters.starts.load(Ordering::SeqCst), 1);
        assert_eq!(filter.device_id().as_deref(), Some("default"));
        assert!(filter.monitor().is_some_and(|m| m.is_active()));
    }

    #[test]
    fn test_audio_passes_through_and_reaches_monitor() {
        let counters = counters();
        let filter = filter(MonitorFilterSettings::default(), &counters);
        let packet = AudioPacket::new(vec![vec![0.25; 16], vec![-0.25; 16]], 0);
        let out = filter.filter_audio(&packet);
        assert!(std::ptr::eq(out, &packet));
        assert_eq!(counters.writes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_device_name_reconciliation() {
        let counters = counters();
        let filter = filter(MonitorFilterSettings::default(), &counters);

        let renamed = filter.update(MonitorFilterSettings {
            device: "usb-3".into(),
            device_name: "USB Headset".into(),
            ..Default::default()
        });
        assert_eq!(renamed.device, "usb-7");

        let refreshed = filter.update(MonitorFilterSettings {
            device: "hdmi-1".into(),
            device_name: "Old name".into(),
            ..Default::default()
        });
        assert_eq!(refreshed.device_name, "HDMI Output");

        let kept = filter.update(MonitorFilterSettings {
            device: "bt-9".into(),
            device_name: "Gone".into(),
            ..Default::default()
        });
        assert_eq!(kept.device, "bt-9");
        assert_eq!(filter.device_id().as_deref(), Some("bt-9"));
    }

    #[test]
    fn test_volume_update_keeps_monitor() {
        let counters = counters();
        let filter = filter(MonitorFilterSettings::default(), &counters);
        let before = filter.monitor().map(|m| Arc::as_ptr(&m));
        filter.update(MonitorFilterSettings {
            volume: 40.0,
            ..Default::default()
        });
        assert_eq!(filter.monitor().map(|m| Arc::as_ptr(&m)), before);
        assert!(filter.monitor().is_some_and(|m| (m.volume() - 0.4).abs() < 1e-6));
    }

    #[test]
    fn test_updated_and_linked_events() {
        let counters = counters();
        let filter = filter(
            MonitorFilterSettings {
                linked: true,
                ..Default::default()
            },
            &counters,
        );
        let events = filter.subscribe();
        filter.update(MonitorFilterSettings {
            linked: true,
            volume: 50.0,
            ..Default::default()
        });
        let received: Vec<_> = events.try_iter().collect();
        assert_eq!(
            received,
            vec![FilterEvent::LinkedVolumeChanged(0.5), FilterEvent::Updated]
        );

        filter.set_parent_volume(0.2);
        assert!((filter.settings().volume - 20.0).abs() < 1e-3);
    }

    #[test]
    fn test_locked_linked_filter_still_follows_parent() {
        let counters = counters();
        let filter = filter(
            MonitorFilterSettings {
                linked: true,
                locked: true,
                ..Default::default()
            },
            &counters,
        );
        filter.set_parent_volume(0.5);
        assert!((filter.settings().volume - 50.0).abs() < 1e-3);
        assert!(filter.monitor().is_some_and(|m| (m.volume() - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_unlinked_filter_ignores_parent_volume() {
        let counters = counters();
        let filter = filter(MonitorFilterSettings::default(), &counters);
        filter.set_parent_volume(0.5);
        assert!((filter.settings().volume - 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_source_muted_forces_zero_gain() {
        let counters = counters();
        let filter = filter(
            MonitorFilterSettings {
                mute: MuteMode::SourceMuted,
                ..Default::default()
            },
            &counters,
        );
        filter.set_source_muted(true);
        assert!(filter.is_muted());
        assert!(filter.monitor().is_some_and(|m| m.volume() == 0.0 && m.is_active()));
        filter.set_source_muted(false);
        assert!(filter.monitor().is_some_and(|m| m.volume() == 1.0));
    }

    #[test]
    fn test_mute_stop_start_releases_device() {
        let counters = counters();
        let filter = filter(
            MonitorFilterSettings {
                mute: MuteMode::NotActiveOutput,
                mute_stop_start: true,
                ..Default::default()
            },
            &counters,
        );
        filter.set_source_active(false);
        assert!(filter.monitor().is_some_and(|m| !m.is_active()));
        filter.filter_audio(&AudioPacket::silent(2, 16, 0));
        assert_eq!(counters.writes.load(Ordering::SeqCst), 0);

        filter.set_source_active(true);
        assert!(filter.monitor().is_some_and(|m| m.is_active()));
        assert_eq!(counters.starts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_delay_holds_audio_until_due() {
        let counters = counters();
        let filter = filter(
            MonitorFilterSettings {
                delay: 20.0,
                ..Default::default()
            },
            &counters,
        );
        filter.filter_audio(&AudioPacket::silent(2, 16, 0));
        filter.filter_audio(&AudioPacket::silent(2, 16, 10_000_000));
        assert_eq!(counters.writes.load(Ordering::SeqCst), 0);
        assert_eq!(filter.delayed_blocks(), 2);

        filter.filter_audio(&AudioPacket::silent(2, 16, 20_000_000));
        assert_eq!(counters.writes.load(Ordering::SeqCst), 1);

        filter.update(MonitorFilterSettings::default());
        assert_eq!(filter.delayed_blocks(), 0);
        assert_eq!(counters.writes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_properties_list_default_devices_and_vban() {
        let props = MonitorFilter::properties(enumerator().as_ref());
        let ids: Vec<_> = props.devices.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["default", "hdmi-1", "usb-7", "VBAN"]);
        assert_eq!(props.delay.max, 10_000.0);
    }
}
