// PulseAudio playback session
//
// One threaded mainloop + context is shared by every monitor in the process
// (see `SharedService`). Each session owns one playback stream. The write-request
// callback only adds to an atomic grant. The underflow callback grows the target
// latency on the mainloop thread; if the feed path holds the stream at that
// moment the growth is applied on its next write instead.

use super::latency::{LatencyControl, LatencyTarget, PlaybackBacklog, UnderflowResponder};
use super::session::DeviceSession;
use super::shared::{SharedLease, SharedService};
use crate::audio::error::SessionError;
use crate::audio::types::{AudioDeviceInfo, DeviceFormat, HostAudioSpec, SampleFormat, SpeakerLayout};
use crate::types::DEFAULT_DEVICE_ID;
use colored::*;
use pulse::callbacks::ListResult;
use pulse::context::{Context, FlagSet as ContextFlagSet, State as ContextState};
use pulse::def::BufferAttr;
use pulse::mainloop::threaded::Mainloop;
use pulse::operation::{Operation, State as OperationState};
use pulse::sample::{Format, Spec};
use pulse::stream::{FlagSet as StreamFlagSet, SeekMode, State as StreamState, Stream};
use pulse::time::MicroSeconds;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Initial server-side target buffer
const TARGET_LATENCY_US: u64 = 25_000;
/// Period handed to the server per write
const PERIOD_US: u64 = 5_000;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Mainloop + context pair behind a mutex
struct PulseInner {
    // Field order is drop order: the context goes before its mainloop
    context: Context,
    mainloop: Mainloop,
}

// Only ever touched through `PulseRuntime::inner`, with the mainloop lock held
// around every context/stream call.
unsafe impl Send for PulseInner {}

pub struct PulseRuntime {
    inner: Mutex<PulseInner>,
}

impl std::fmt::Debug for PulseRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PulseRuntime").finish_non_exhaustive()
    }
}

static PULSE: SharedService<PulseRuntime> = SharedService::new();

/// Mainloop-locked access to the shared context
struct Locked<'a> {
    guard: MutexGuard<'a, PulseInner>,
}

impl<'a> Locked<'a> {
    fn context(&mut self) -> &mut Context {
        &mut self.guard.context
    }

    /// Polls `op` with the mainloop lock released between checks
    fn wait_operation<T: ?Sized>(&mut self, op: &Operation<T>, what: &'static str) -> Result<(), SessionError> {
        let deadline = Instant::now() + CONNECT_TIMEOUT;
        loop {
            match op.get_state() {
                OperationState::Done => return Ok(()),
                OperationState::Cancelled => return Err(SessionError::system(what, -1)),
                OperationState::Running => {}
            }
            if Instant::now() > deadline {
                return Err(SessionError::system(what, -2));
            }
            self.guard.mainloop.unlock();
            std::thread::sleep(POLL_INTERVAL);
            self.guard.mainloop.lock();
        }
    }

    fn wait_stream_ready(&mut self, stream: &Stream) -> Result<(), SessionError> {
        let deadline = Instant::now() + CONNECT_TIMEOUT;
        loop {
            match stream.get_state() {
                StreamState::Ready => return Ok(()),
                StreamState::Failed | StreamState::Terminated => {
                    return Err(SessionError::system("pa_stream_connect_playback", -1))
                }
                _ => {}
            }
            if Instant::now() > deadline {
                return Err(SessionError::system("pa_stream_connect_playback", -2));
            }
            self.guard.mainloop.unlock();
            std::thread::sleep(POLL_INTERVAL);
            self.guard.mainloop.lock();
        }
    }
}

impl Drop for Locked<'_> {
    fn drop(&mut self) {
        self.guard.mainloop.unlock();
    }
}

impl PulseRuntime {
    fn connect() -> Result<Self, SessionError> {
        let mut mainloop = Mainloop::new()
            .ok_or(SessionError::NotSupported("pa_threaded_mainloop_new"))?;
        let mut context = Context::new(&mainloop, "audio-monitor")
            .ok_or(SessionError::NotSupported("pa_context_new"))?;
        context
            .connect(None, ContextFlagSet::NOFLAGS, None)
            .map_err(|e| SessionError::system("pa_context_connect", e.0))?;
        mainloop
            .start()
            .map_err(|e| SessionError::system("pa_threaded_mainloop_start", e.0))?;

        let deadline = Instant::now() + CONNECT_TIMEOUT;
        loop {
            mainloop.lock();
            let state = context.get_state();
            mainloop.unlock();
            match state {
                ContextState::Ready => break,
                ContextState::Failed | ContextState::Terminated => {
                    mainloop.stop();
                    return Err(SessionError::system("pa_context_connect", -1));
                }
                _ if Instant::now() > deadline => {
                    mainloop.stop();
                    return Err(SessionError::system("pa_context_connect", -2));
                }
                _ => std::thread::sleep(POLL_INTERVAL),
            }
        }

        info!("🔊 {}: connected to server", "PULSE".magenta());
        Ok(Self {
            inner: Mutex::new(PulseInner { mainloop, context }),
        })
    }

    /// Takes a lease on the process-wide runtime
    pub fn acquire() -> Result<SharedLease<PulseRuntime>, SessionError> {
        PULSE.acquire(Self::connect)
    }

    fn lock(&self) -> Locked<'_> {
        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        guard.mainloop.lock();
        Locked { guard }
    }

    fn default_sink_name(&self) -> Result<String, SessionError> {
        let name = Arc::new(Mutex::new(None::<String>));
        let mut locked = self.lock();
        let op = {
            let name = Arc::clone(&name);
            locked.context().introspect().get_server_info(move |info| {
                if let Ok(mut slot) = name.lock() {
                    *slot = info.default_sink_name.as_ref().map(|n| n.to_string());
                }
            })
        };
        locked.wait_operation(&op, "pa_context_get_server_info")?;
        drop(locked);
        let resolved = name.lock().ok().and_then(|n| n.clone());
        resolved.ok_or_else(|| SessionError::DeviceNotFound(DEFAULT_DEVICE_ID.to_string()))
    }

    fn sink_spec(&self, sink: &str) -> Result<Spec, SessionError> {
        let spec = Arc::new(Mutex::new(None::<Spec>));
        let mut locked = self.lock();
        let op = {
            let spec = Arc::clone(&spec);
            locked
                .context()
                .introspect()
                .get_sink_info_by_name(sink, move |result| {
                    if let ListResult::Item(info) = result {
                        if let Ok(mut slot) = spec.lock() {
                            *slot = Some(info.sample_spec);
                        }
                    }
                })
        };
        locked.wait_operation(&op, "pa_context_get_sink_info_by_name")?;
        drop(locked);
        let found = spec.lock().ok().and_then(|s| *s);
        found.ok_or_else(|| SessionError::DeviceNotFound(sink.to_string()))
    }

    /// Lists playback sinks as (name, description)
    pub fn sinks(&self) -> Result<Vec<AudioDeviceInfo>, SessionError> {
        let sinks = Arc::new(Mutex::new(Vec::new()));
        let mut locked = self.lock();
        let op = {
            let sinks = Arc::clone(&sinks);
            locked.context().introspect().get_sink_info_list(move |result| {
                if let ListResult::Item(info) = result {
                    if let (Some(name), Ok(mut list)) = (info.name.as_ref(), sinks.lock()) {
                        let description = info
                            .description
                            .as_ref()
                            .map(|d| d.to_string())
                            .unwrap_or_else(|| name.to_string());
                        list.push(AudioDeviceInfo::new(name.to_string(), description));
                    }
                }
            })
        };
        locked.wait_operation(&op, "pa_context_get_sink_info_list")?;
        drop(locked);
        let list = sinks.lock().map(|l| l.clone()).unwrap_or_default();
        Ok(list)
    }
}

impl Drop for PulseRuntime {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(|p| p.into_inner());
        inner.mainloop.lock();
        inner.context.disconnect();
        inner.mainloop.unlock();
        inner.mainloop.stop();
        info!("🔊 {}: disconnected from server", "PULSE".magenta());
    }
}

/// Maps a sink's native format onto what the monitor can render; anything
/// else falls back to float
fn negotiate_format(format: Format) -> (Format, SampleFormat) {
    match format {
        Format::S16le => (Format::S16le, SampleFormat::S16),
        Format::S32le => (Format::S32le, SampleFormat::S32),
        Format::U8 => (Format::U8, SampleFormat::U8),
        _ => (Format::F32le, SampleFormat::Float),
    }
}

/// Channel counts without a host speaker layout fall back to stereo
fn negotiate_channels(channels: u8) -> u8 {
    match SpeakerLayout::from_channels(channels as u16) {
        SpeakerLayout::Unknown => 2,
        _ => channels,
    }
}

/// Stream plus its target latency, shared with the underflow callback
struct PlaybackStream {
    stream: Stream,
    spec: Spec,
    latency: LatencyTarget,
}

// Same locking discipline as `PulseInner`
unsafe impl Send for PlaybackStream {}

impl LatencyControl for PlaybackStream {
    fn latency_mut(&mut self) -> &mut LatencyTarget {
        &mut self.latency
    }

    fn apply_target_length(&mut self, tlength: u32) {
        let _op = self.stream.set_buffer_attr(
            &buffer_attr(tlength),
            move |success: bool| {
                if !success {
                    warn!("🔊 {}: server rejected target latency of {} bytes", "PULSE".magenta(), tlength);
                }
            },
        );
        warn!(
            "🔊 {}: underflow, target latency now {} bytes ({}us)",
            "PULSE".magenta(),
            tlength,
            self.spec.bytes_to_usec(tlength as u64).0
        );
    }
}

fn lock_playback(playback: &Mutex<PlaybackStream>) -> MutexGuard<'_, PlaybackStream> {
    playback.lock().unwrap_or_else(|p| p.into_inner())
}

struct ActiveStream {
    playback: Arc<Mutex<PlaybackStream>>,
    granted: Arc<AtomicUsize>,
    underflow: Arc<UnderflowResponder>,
    backlog: PlaybackBacklog,
    // Declared last: the stream must go before the runtime it lives on
    runtime: SharedLease<PulseRuntime>,
}

/// PulseAudio playback stream
pub struct PulseSession {
    stream_name: String,
    active: Option<ActiveStream>,
}

impl std::fmt::Debug for PulseSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PulseSession")
            .field("stream_name", &self.stream_name)
            .field("active", &self.active.is_some())
            .finish()
    }
}

impl PulseSession {
    pub fn new(stream_name: impl Into<String>) -> Self {
        Self {
            stream_name: stream_name.into(),
            active: None,
        }
    }

    fn open(&self, device_id: &str) -> Result<(ActiveStream, DeviceFormat), SessionError> {
        let runtime = PulseRuntime::acquire()?;

        let sink = if device_id == DEFAULT_DEVICE_ID {
            runtime.default_sink_name()?
        } else {
            device_id.to_string()
        };
        let sink_spec = runtime.sink_spec(&sink)?;

        let (pa_format, format) = negotiate_format(sink_spec.format);
        let spec = Spec {
            format: pa_format,
            rate: sink_spec.rate,
            channels: negotiate_channels(sink_spec.channels),
        };
        if !spec.is_valid() {
            return Err(SessionError::FormatNegotiation(format!("invalid sink spec for {}", sink)));
        }
        let device_format = DeviceFormat::new(spec.rate, spec.channels as u16, format);

        let latency = LatencyTarget::new(spec.usec_to_bytes(MicroSeconds(TARGET_LATENCY_US)) as u32);
        let period = spec.usec_to_bytes(MicroSeconds(PERIOD_US));
        let granted = Arc::new(AtomicUsize::new(0));
        let underflow = Arc::new(UnderflowResponder::new());

        let mut locked = runtime.lock();
        let stream = Stream::new(locked.context(), &self.stream_name, &spec, None)
            .ok_or_else(|| SessionError::FormatNegotiation("pa_stream_new failed".to_string()))?;
        let playback = Arc::new(Mutex::new(PlaybackStream { stream, spec, latency }));
        let mut guard = lock_playback(&playback);
        {
            let granted = Arc::clone(&granted);
            guard.stream.set_write_callback(Some(Box::new(move |nbytes: usize| {
                granted.fetch_add(nbytes, Ordering::AcqRel);
            })));
        }
        {
            // Weak: the stream owns this callback
            let weak = Arc::downgrade(&playback);
            let underflow = Arc::clone(&underflow);
            guard.stream.set_underflow_callback(Some(Box::new(move || {
                if let Some(playback) = weak.upgrade() {
                    underflow.on_underflow(&*playback);
                }
            })));
        }

        let attr = buffer_attr(latency.tlength());
        let stream = &mut guard.stream;
        let connected = stream
            .connect_playback(
                Some(sink.as_str()),
                Some(&attr),
                StreamFlagSet::INTERPOLATE_TIMING | StreamFlagSet::AUTO_TIMING_UPDATE,
                None,
                None,
            )
            .map_err(|e| SessionError::system("pa_stream_connect_playback", e.0))
            .and_then(|_| locked.wait_stream_ready(&stream));
        if let Err(e) = connected {
            stream.set_write_callback(None);
            stream.set_underflow_callback(None);
            let _ = stream.disconnect();
            return Err(e);
        }
        drop(guard);
        drop(locked);

        info!(
            "🔊 {}: playing '{}' on {} as {}",
            "PULSE".magenta(),
            self.stream_name,
            sink,
            device_format
        );

        Ok((
            ActiveStream {
                playback,
                granted,
                underflow,
                backlog: PlaybackBacklog::new(period, device_format.bytes_per_frame()),
                runtime,
            },
            device_format,
        ))
    }
}

fn buffer_attr(tlength: u32) -> BufferAttr {
    BufferAttr {
        maxlength: u32::MAX,
        tlength,
        prebuf: u32::MAX,
        minreq: u32::MAX,
        fragsize: u32::MAX,
    }
}

impl DeviceSession for PulseSession {
    fn name(&self) -> &'static str {
        "pulseaudio"
    }

    fn start(&mut self, device_id: &str, _host: &HostAudioSpec) -> Result<DeviceFormat, SessionError> {
        self.stop();
        let (active, format) = self.open(device_id)?;
        self.active = Some(active);
        Ok(format)
    }

    fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        let ActiveStream {
            playback, runtime, ..
        } = active;
        {
            let _locked = runtime.lock();
            {
                let mut guard = lock_playback(&playback);
                guard.stream.set_write_callback(None);
                guard.stream.set_underflow_callback(None);
                if let Err(e) = guard.stream.disconnect() {
                    warn!("🔊 {}: disconnect failed: {}", "PULSE".magenta(), e);
                }
            }
            drop(playback);
        }
        drop(runtime);
        info!("🔊 {}: stream '{}' stopped", "PULSE".magenta(), self.stream_name);
    }

    fn write(&mut self, data: &[u8], _frames: usize) -> Result<(), SessionError> {
        let active = self.active.as_mut().ok_or(SessionError::Inactive)?;
        active.backlog.push(data);
        active.backlog.grant(active.granted.swap(0, Ordering::AcqRel));

        let _locked = active.runtime.lock();
        let mut playback = lock_playback(&active.playback);
        active.underflow.apply_deferred(&mut *playback);

        while let Some(chunk) = active.backlog.next_chunk() {
            playback
                .stream
                .write(&chunk, None, 0, SeekMode::Relative)
                .map_err(|e| SessionError::system("pa_stream_write", e.0))?;
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active.is_some()
    }

    fn supports_channel_mixing(&self) -> bool {
        true
    }

    fn configure(&mut self, _format: Option<SampleFormat>, _sample_rate: Option<u32>) -> bool {
        false
    }
}

impl Drop for PulseSession {
    fn drop(&mut self) {
        self.stop();
    }
}
