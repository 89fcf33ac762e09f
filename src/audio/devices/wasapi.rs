// WASAPI shared-mode render session
//
// Renders in the endpoint's mix format. The render buffer is filled straight
// from the feed path: whatever fits after the current padding is written, the
// rest of the block is dropped.

use super::session::DeviceSession;
use crate::audio::error::SessionError;
use crate::audio::types::{DeviceFormat, HostAudioSpec, SampleFormat};
use crate::types::DEFAULT_DEVICE_ID;
use colored::*;
use tracing::{info, warn};
use windows::core::{GUID, PCWSTR};
use windows::Win32::Foundation::RPC_E_CHANGED_MODE;
use windows::Win32::Media::Audio::{
    eConsole, eRender, IAudioClient, IAudioRenderClient, IMMDevice, IMMDeviceEnumerator,
    MMDeviceEnumerator, AUDCLNT_SHAREMODE_SHARED, WAVEFORMATEX, WAVEFORMATEXTENSIBLE,
};
use windows::Win32::System::Com::{
    CoCreateInstance, CoInitializeEx, CoTaskMemFree, CoUninitialize, CLSCTX_ALL,
    COINIT_MULTITHREADED,
};
use std::thread::{self, ThreadId};

const WAVE_FORMAT_PCM: u16 = 1;
const WAVE_FORMAT_IEEE_FLOAT: u16 = 3;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;
/// KSDATAFORMAT_SUBTYPE_IEEE_FLOAT
const SUBTYPE_IEEE_FLOAT: GUID = GUID::from_u128(0x00000003_0000_0010_8000_00aa00389b71);
/// Requested shared-mode buffer duration (100ns units)
const BUFFER_DURATION_100NS: i64 = 1_000_000;

/// One successful `CoInitializeEx`, undone on drop
///
/// COM initialization is per thread: the matching `CoUninitialize` only runs
/// when the guard is dropped on the thread that created it.
struct ComInit {
    thread: ThreadId,
}

impl ComInit {
    /// `None` when the thread already runs a different apartment; COM is usable
    /// then but the initialization is not ours to undo.
    unsafe fn new() -> Result<Option<Self>, SessionError> {
        match CoInitializeEx(None, COINIT_MULTITHREADED) {
            Ok(()) => Ok(Some(Self {
                thread: thread::current().id(),
            })),
            Err(e) if e.code() == RPC_E_CHANGED_MODE => Ok(None),
            Err(e) => Err(SessionError::system("CoInitializeEx", e.code().0)),
        }
    }
}

impl Drop for ComInit {
    fn drop(&mut self) {
        if thread::current().id() == self.thread {
            unsafe { CoUninitialize() };
        } else {
            crate::monitor_debug!("WASAPI: released off the COM init thread, leaving it initialized");
        }
    }
}

struct RenderStream {
    client: IAudioClient,
    render: IAudioRenderClient,
    buffer_frames: u32,
    format: DeviceFormat,
    // Declared last: every interface above is released before COM is torn down
    _com: Option<ComInit>,
}

/// WASAPI render session
pub struct WasapiSession {
    stream: Option<RenderStream>,
}

// COM objects are created in the multithreaded apartment and only used behind
// the monitor mutex.
unsafe impl Send for WasapiSession {}

impl std::fmt::Debug for WasapiSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasapiSession")
            .field("active", &self.stream.is_some())
            .field("format", &self.stream.as_ref().map(|s| s.format))
            .finish()
    }
}

impl Default for WasapiSession {
    fn default() -> Self {
        Self::new()
    }
}

impl WasapiSession {
    pub fn new() -> Self {
        Self { stream: None }
    }
}

fn hr_error(call: &'static str) -> impl Fn(windows::core::Error) -> SessionError {
    move |e| SessionError::system(call, e.code().0)
}

/// Reads the sample encoding out of a mix format
///
/// # Safety
/// `format` must point at a valid WAVEFORMATEX (or WAVEFORMATEXTENSIBLE when the
/// tag says so).
unsafe fn sample_format_of(format: *const WAVEFORMATEX) -> Result<SampleFormat, SessionError> {
    let fmt = &*format;
    let is_float = fmt.wFormatTag == WAVE_FORMAT_IEEE_FLOAT
        || (fmt.wFormatTag == WAVE_FORMAT_EXTENSIBLE && {
            let ext = format as *const WAVEFORMATEXTENSIBLE;
            std::ptr::read_unaligned(std::ptr::addr_of!((*ext).SubFormat)) == SUBTYPE_IEEE_FLOAT
        });
    let is_pcm = fmt.wFormatTag == WAVE_FORMAT_PCM || fmt.wFormatTag == WAVE_FORMAT_EXTENSIBLE;

    match (is_float, fmt.wBitsPerSample) {
        (true, 32) => Ok(SampleFormat::Float),
        (false, 32) if is_pcm => Ok(SampleFormat::S32),
        (false, 16) if is_pcm => Ok(SampleFormat::S16),
        (false, 8) if is_pcm => Ok(SampleFormat::U8),
        (_, bits) => Err(SessionError::FormatNegotiation(format!(
            "mix format tag {:#x} with {} bits",
            fmt.wFormatTag, bits
        ))),
    }
}

unsafe fn open_device(enumerator: &IMMDeviceEnumerator, device_id: &str) -> Result<IMMDevice, SessionError> {
    if device_id == DEFAULT_DEVICE_ID {
        return enumerator
            .GetDefaultAudioEndpoint(eRender, eConsole)
            .map_err(|_| SessionError::DeviceNotFound(device_id.to_string()));
    }
    let wide: Vec<u16> = device_id.encode_utf16().chain(std::iter::once(0)).collect();
    enumerator
        .GetDevice(PCWSTR(wide.as_ptr()))
        .map_err(|_| SessionError::DeviceNotFound(device_id.to_string()))
}

unsafe fn open_stream(device_id: &str) -> Result<RenderStream, SessionError> {
    // Dropped after every interface below, on success or error
    let com = ComInit::new()?;

    let enumerator: IMMDeviceEnumerator = CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
        .map_err(hr_error("CoCreateInstance(MMDeviceEnumerator)"))?;
    let device = open_device(&enumerator, device_id)?;
    let client: IAudioClient = device
        .Activate(CLSCTX_ALL, None)
        .map_err(hr_error("IMMDevice::Activate"))?;

    let mix = client.GetMixFormat().map_err(hr_error("IAudioClient::GetMixFormat"))?;
    let negotiated = sample_format_of(mix).map(|format| {
        DeviceFormat::new((*mix).nSamplesPerSec, (*mix).nChannels, format)
    });
    let initialized = match negotiated {
        Ok(_) => client
            .Initialize(AUDCLNT_SHAREMODE_SHARED, 0, BUFFER_DURATION_100NS, 0, mix, None)
            .map_err(hr_error("IAudioClient::Initialize")),
        Err(_) => Ok(()),
    };
    CoTaskMemFree(Some(mix as *const std::ffi::c_void));
    let format = negotiated?;
    initialized?;

    let buffer_frames = client.GetBufferSize().map_err(hr_error("IAudioClient::GetBufferSize"))?;
    let render: IAudioRenderClient = client
        .GetService()
        .map_err(hr_error("IAudioClient::GetService"))?;
    client.Start().map_err(hr_error("IAudioClient::Start"))?;

    Ok(RenderStream {
        client,
        render,
        buffer_frames,
        format,
        _com: com,
    })
}

impl DeviceSession for WasapiSession {
    fn name(&self) -> &'static str {
        "wasapi"
    }

    fn start(&mut self, device_id: &str, _host: &HostAudioSpec) -> Result<DeviceFormat, SessionError> {
        self.stop();
        // Interfaces acquired so far are released by their Drop on any error
        let stream = unsafe { open_stream(device_id) }?;
        let format = stream.format;
        info!(
            "🔊 {}: rendering to '{}' as {} ({} frame buffer)",
            "WASAPI".green(),
            device_id,
            format,
            stream.buffer_frames
        );
        self.stream = Some(stream);
        Ok(format)
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = unsafe { stream.client.Stop() } {
                warn!("🔊 {}: IAudioClient::Stop failed: {}", "WASAPI".green(), e);
            }
            drop(stream);
            info!("🔊 {}: render stopped", "WASAPI".green());
        }
    }

    fn write(&mut self, data: &[u8], frames: usize) -> Result<(), SessionError> {
        let stream = self.stream.as_ref().ok_or(SessionError::Inactive)?;
        let frame_bytes = stream.format.bytes_per_frame();
        let frames = frames.min(data.len() / frame_bytes.max(1));

        let padding = unsafe { stream.client.GetCurrentPadding() }.map_err(|e| {
            warn!("{}: GetCurrentPadding failed: {}", "WASAPI".green(), e);
            SessionError::DeviceLost(e.to_string())
        })?;
        let writable = stream.buffer_frames.saturating_sub(padding).min(frames as u32);
        if writable == 0 {
            crate::monitor_debug!("WASAPI: render buffer full, dropping {} frames", frames);
            return Ok(());
        }

        let ptr = unsafe { stream.render.GetBuffer(writable) }.map_err(|e| {
            warn!("{}: GetBuffer failed: {}", "WASAPI".green(), e);
            SessionError::DeviceLost(e.to_string())
        })?;
        let bytes = writable as usize * frame_bytes;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr, bytes);
            stream
                .render
                .ReleaseBuffer(writable, 0)
                .map_err(|e| SessionError::DeviceLost(e.to_string()))?;
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.stream.is_some()
    }

    fn supports_channel_mixing(&self) -> bool {
        true
    }

    fn configure(&mut self, _format: Option<SampleFormat>, _sample_rate: Option<u32>) -> bool {
        false
    }
}

impl Drop for WasapiSession {
    fn drop(&mut self) {
        self.stop();
    }
}
