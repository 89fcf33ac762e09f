// CoreAudio AudioQueue output session
//
// Plays interleaved float at the host rate and channel count through an
// AudioQueue with three rotating buffers of 30ms each. Buffer rotation and
// the starve/pause/resume policy live in `QueuePump`; this file only binds it
// to the AudioToolbox calls.

use super::queue_pump::{NativeQueue, QueuePump};
use super::session::DeviceSession;
use crate::audio::error::SessionError;
use crate::audio::types::{DeviceFormat, HostAudioSpec, SampleFormat};
use crate::types::{DEFAULT_DEVICE_ID, NATIVE_BUFFER_COUNT};
use colored::*;
use core_foundation::base::TCFType;
use core_foundation::string::CFString;
use coreaudio_sys::{
    kAudioFormatFlagIsFloat, kAudioFormatFlagIsPacked, kAudioFormatLinearPCM,
    kAudioQueueParam_Volume, kAudioQueueProperty_CurrentDevice, AudioQueueAllocateBuffer,
    AudioQueueBufferRef, AudioQueueDispose, AudioQueueEnqueueBuffer, AudioQueueNewOutput,
    AudioQueuePause, AudioQueueRef, AudioQueueSetParameter, AudioQueueSetProperty,
    AudioQueueStart, AudioQueueStop, AudioStreamBasicDescription, CFStringRef, OSStatus,
};
use std::os::raw::c_void;
use std::ptr;
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

fn check(status: OSStatus, call: &'static str) -> Result<(), SessionError> {
    if status == 0 {
        Ok(())
    } else {
        Err(SessionError::system(call, status))
    }
}

#[derive(Debug, Clone, Copy)]
struct QueueBuffer(AudioQueueBufferRef);

// Buffers are owned by the queue; we only pass the handles around under the pump lock
unsafe impl Send for QueueBuffer {}

#[derive(Debug, Clone, Copy)]
struct QueueHandle(AudioQueueRef);

unsafe impl Send for QueueHandle {}
unsafe impl Sync for QueueHandle {}

impl NativeQueue for QueueHandle {
    type Buffer = QueueBuffer;

    fn enqueue(&mut self, buffer: QueueBuffer, data: &[u8]) -> Result<(), SessionError> {
        unsafe {
            let buf = &mut *buffer.0;
            let len = data.len().min(buf.mAudioDataBytesCapacity as usize);
            ptr::copy_nonoverlapping(data.as_ptr(), buf.mAudioData as *mut u8, len);
            buf.mAudioDataByteSize = len as u32;
            check(
                AudioQueueEnqueueBuffer(self.0, buffer.0, 0, ptr::null()),
                "AudioQueueEnqueueBuffer",
            )
        }
    }

    fn pause(&mut self) -> Result<(), SessionError> {
        check(unsafe { AudioQueuePause(self.0) }, "AudioQueuePause")
    }

    fn resume(&mut self) -> Result<(), SessionError> {
        check(unsafe { AudioQueueStart(self.0, ptr::null()) }, "AudioQueueStart")
    }

    fn halt(&mut self) {
        warn!("🍎 {}: failed to enqueue buffer, stopping queue", "AUDIO_QUEUE".yellow());
        unsafe {
            AudioQueueStop(self.0, 0);
        }
    }
}

/// State shared with the AudioQueue callback thread
struct QueueShared {
    queue: QueueHandle,
    pump: Mutex<QueuePump<QueueBuffer>>,
}

impl QueueShared {
    fn pump(&self) -> MutexGuard<'_, QueuePump<QueueBuffer>> {
        self.pump.lock().unwrap_or_else(|p| p.into_inner())
    }
}

unsafe extern "C" fn buffer_returned(user_data: *mut c_void, _queue: AudioQueueRef, buffer: AudioQueueBufferRef) {
    if user_data.is_null() {
        return;
    }
    let shared = &*(user_data as *const QueueShared);
    let mut queue = shared.queue;
    if let Err(e) = shared.pump().buffer_returned(QueueBuffer(buffer), &mut queue) {
        warn!("🍎 {}: {}", "AUDIO_QUEUE".yellow(), e);
    }
}

/// AudioQueue playback session
pub struct AudioQueueSession {
    shared: Option<Box<QueueShared>>,
    format: Option<DeviceFormat>,
}

impl std::fmt::Debug for AudioQueueSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioQueueSession")
            .field("active", &self.shared.is_some())
            .field("format", &self.format)
            .finish()
    }
}

impl Default for AudioQueueSession {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioQueueSession {
    pub fn new() -> Self {
        Self {
            shared: None,
            format: None,
        }
    }

    /// Creates the queue and its buffers. On error the caller disposes `shared.queue`.
    unsafe fn build(
        device_id: &str,
        format: &DeviceFormat,
        period_bytes: usize,
        shared: &mut Box<QueueShared>,
    ) -> Result<Vec<QueueBuffer>, SessionError> {
        let bytes_per_frame = format.bytes_per_frame() as u32;
        let desc = AudioStreamBasicDescription {
            mSampleRate: format.sample_rate as f64,
            mFormatID: kAudioFormatLinearPCM,
            mFormatFlags: kAudioFormatFlagIsFloat | kAudioFormatFlagIsPacked,
            mBytesPerPacket: bytes_per_frame,
            mFramesPerPacket: 1,
            mBytesPerFrame: bytes_per_frame,
            mChannelsPerFrame: format.channels as u32,
            mBitsPerChannel: 32,
            mReserved: 0,
        };

        let user_data = shared.as_mut() as *mut QueueShared as *mut c_void;
        let mut queue: AudioQueueRef = ptr::null_mut();
        check(
            AudioQueueNewOutput(
                &desc,
                Some(buffer_returned),
                user_data,
                ptr::null_mut(),
                ptr::null(),
                0,
                &mut queue,
            ),
            "AudioQueueNewOutput",
        )?;
        shared.queue = QueueHandle(queue);

        if device_id != DEFAULT_DEVICE_ID {
            let uid = CFString::new(device_id);
            let uid_ref = uid.as_concrete_TypeRef() as CFStringRef;
            check(
                AudioQueueSetProperty(
                    queue,
                    kAudioQueueProperty_CurrentDevice,
                    &uid_ref as *const CFStringRef as *const c_void,
                    std::mem::size_of::<CFStringRef>() as u32,
                ),
                "AudioQueueSetProperty(CurrentDevice)",
            )?;
        }

        check(
            AudioQueueSetParameter(queue, kAudioQueueParam_Volume, 1.0),
            "AudioQueueSetParameter(Volume)",
        )?;

        let mut buffers = Vec::with_capacity(NATIVE_BUFFER_COUNT);
        for _ in 0..NATIVE_BUFFER_COUNT {
            let mut buffer: AudioQueueBufferRef = ptr::null_mut();
            check(
                AudioQueueAllocateBuffer(queue, period_bytes as u32, &mut buffer),
                "AudioQueueAllocateBuffer",
            )
            .map_err(|e| SessionError::BufferAllocation(e.to_string()))?;
            buffers.push(QueueBuffer(buffer));
        }

        check(AudioQueueStart(queue, ptr::null()), "AudioQueueStart")?;
        Ok(buffers)
    }
}

impl DeviceSession for AudioQueueSession {
    fn name(&self) -> &'static str {
        "audio_queue"
    }

    fn start(&mut self, device_id: &str, host: &HostAudioSpec) -> Result<DeviceFormat, SessionError> {
        self.stop();
        let channels = host.channels();
        if channels == 0 {
            return Err(SessionError::UnsupportedChannels(channels));
        }
        let format = DeviceFormat::new(host.sample_rate, channels, SampleFormat::Float);
        // 3 x 10ms per buffer
        let period_bytes = format.bytes_per_frame() * (host.sample_rate as usize / 100) * 3;

        let mut shared = Box::new(QueueShared {
            queue: QueueHandle(ptr::null_mut()),
            pump: Mutex::new(QueuePump::new(period_bytes, Vec::new())),
        });

        match unsafe { Self::build(device_id, &format, period_bytes, &mut shared) } {
            Ok(buffers) => {
                *shared.pump() = QueuePump::new(period_bytes, buffers);
            }
            Err(e) => {
                if !shared.queue.0.is_null() {
                    // Disposing the queue frees its buffers too
                    unsafe {
                        AudioQueueDispose(shared.queue.0, 1);
                    }
                }
                return Err(e);
            }
        }

        info!(
            "🍎 {}: playing to '{}' as {} ({} byte buffers)",
            "AUDIO_QUEUE".yellow(),
            device_id,
            format,
            period_bytes
        );
        self.shared = Some(shared);
        self.format = Some(format);
        Ok(format)
    }

    fn stop(&mut self) {
        let Some(shared) = self.shared.take() else {
            return;
        };
        unsafe {
            AudioQueueStop(shared.queue.0, 1);
            // Synchronous: no callback runs after this returns
            AudioQueueDispose(shared.queue.0, 1);
        }
        drop(shared);
        self.format = None;
        info!("🍎 {}: queue stopped", "AUDIO_QUEUE".yellow());
    }

    fn write(&mut self, data: &[u8], _frames: usize) -> Result<(), SessionError> {
        let shared = self.shared.as_ref().ok_or(SessionError::Inactive)?;
        let mut queue = shared.queue;
        shared.pump().push(data, &mut queue)
    }

    fn is_active(&self) -> bool {
        self.shared.as_ref().is_some_and(|shared| !shared.pump().is_halted())
    }

    fn supports_channel_mixing(&self) -> bool {
        true
    }

    fn configure(&mut self, _format: Option<SampleFormat>, _sample_rate: Option<u32>) -> bool {
        false
    }
}

impl Drop for AudioQueueSession {
    fn drop(&mut self) {
        self.stop();
    }
}
