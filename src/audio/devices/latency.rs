// Playback latency bookkeeping for stream-based servers (PulseAudio)
//
// LatencyTarget: the server-side target buffer length. Each underflow grows it
// by half; it never shrinks while the stream lives.
// UnderflowResponder: applies that growth from the server's underflow callback,
// or from the feed path when the callback found the stream busy.
// PlaybackBacklog: bytes waiting for the server plus the write budget the
// server granted through its write-request callback.

use crate::audio::buffer::AudioByteQueue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, TryLockError};

/// Target buffer length (`tlength`) in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyTarget {
    tlength: u32,
}

impl LatencyTarget {
    pub fn new(initial: u32) -> Self {
        Self {
            tlength: initial.max(1),
        }
    }

    pub fn tlength(&self) -> u32 {
        self.tlength
    }

    /// Grows the target after an underflow and returns the new length.
    /// Always larger than before unless already at `u32::MAX`.
    pub fn grow_on_underflow(&mut self) -> u32 {
        let grown = (self.tlength as u64 * 3 / 2).max(self.tlength as u64 + 1);
        self.tlength = grown.min(u32::MAX as u64) as u32;
        self.tlength
    }
}

/// A playback stream whose server-side target length can be changed
pub trait LatencyControl {
    fn latency_mut(&mut self) -> &mut LatencyTarget;

    /// Hands the new target length to the server
    fn apply_target_length(&mut self, tlength: u32);
}

fn grow_and_apply<S: LatencyControl>(stream: &mut S) -> u32 {
    let tlength = stream.latency_mut().grow_on_underflow();
    stream.apply_target_length(tlength);
    tlength
}

#[derive(Debug, Default)]
pub struct UnderflowResponder {
    deferred: AtomicBool,
}

impl UnderflowResponder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Underflow callback. Grows the target immediately unless the feed path
    /// holds the stream, in which case the growth is left for `apply_deferred`.
    pub fn on_underflow<S: LatencyControl>(&self, stream: &Mutex<S>) -> Option<u32> {
        match stream.try_lock() {
            Ok(mut guard) => Some(grow_and_apply(&mut *guard)),
            Err(TryLockError::Poisoned(poisoned)) => Some(grow_and_apply(&mut *poisoned.into_inner())),
            Err(TryLockError::WouldBlock) => {
                self.deferred.store(true, Ordering::Release);
                None
            }
        }
    }

    /// Feed path, stream lock held: applies an underflow the callback skipped
    pub fn apply_deferred<S: LatencyControl>(&self, stream: &mut S) -> Option<u32> {
        self.deferred
            .swap(false, Ordering::AcqRel)
            .then(|| grow_and_apply(stream))
    }

    pub fn is_deferred(&self) -> bool {
        self.deferred.load(Ordering::Acquire)
    }
}

/// Pending storage in periods; the server's grant normally keeps it near one
const BACKLOG_PERIODS: usize = 32;

/// Audio waiting for a stream plus the bytes the server asked for
#[derive(Debug)]
pub struct PlaybackBacklog {
    pending: AudioByteQueue,
    period_bytes: usize,
    frame_bytes: usize,
    granted: usize,
}

impl PlaybackBacklog {
    /// `period_bytes` is rounded down to whole frames (at least one frame)
    pub fn new(period_bytes: usize, bytes_per_frame: usize) -> Self {
        let frame = bytes_per_frame.max(1);
        Self {
            pending: AudioByteQueue::with_capacity(period_bytes * BACKLOG_PERIODS),
            period_bytes: (period_bytes / frame).max(1) * frame,
            frame_bytes: frame,
            granted: 0,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        let accepted = self.pending.push_back(data);
        if accepted < data.len() {
            crate::monitor_debug!("playback backlog full, dropped {} bytes", data.len() - accepted);
        }
    }

    /// Write-request callback: the server can take `bytes` more
    pub fn grant(&mut self, bytes: usize) {
        self.granted = self.granted.saturating_add(bytes);
    }

    pub fn granted(&self) -> usize {
        self.granted
    }

    pub fn pending_bytes(&self) -> usize {
        self.pending.len()
    }

    pub fn period_bytes(&self) -> usize {
        self.period_bytes
    }

    /// Next chunk to write: one period, or fewer whole frames if the grant is
    /// smaller. `None` until a full period is buffered and the server wants a frame.
    pub fn next_chunk(&mut self) -> Option<Vec<u8>> {
        if self.pending.len() < self.period_bytes {
            return None;
        }
        let size = self.period_bytes.min(self.granted / self.frame_bytes * self.frame_bytes);
        if size == 0 {
            return None;
        }
        self.granted -= size;
        Some(self.pending.pop_front(size))
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.granted = 0;
    }
}
