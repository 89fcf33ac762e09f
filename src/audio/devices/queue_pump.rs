// Buffer rotation for queue-based playback APIs (AudioQueue)
//
// A fixed set of native buffers cycles between "empty" (owned by us) and
// "enqueued" (owned by the device). New audio accumulates in a byte queue and
// fills empty buffers one period at a time. When every buffer comes back empty
// the device is starved: playback pauses until every buffer's worth is queued again.
// A failed enqueue halts the queue for good; later pushes report the device as lost.

use crate::audio::buffer::AudioByteQueue;
use crate::audio::error::SessionError;
use std::collections::VecDeque;

/// Pending storage in multiples of the full buffer set
const PENDING_HEADROOM: usize = 4;

/// The native operations the pump drives
pub trait NativeQueue {
    type Buffer: Copy;

    /// Copies `data` into `buffer` and hands it to the device
    fn enqueue(&mut self, buffer: Self::Buffer, data: &[u8]) -> Result<(), SessionError>;

    fn pause(&mut self) -> Result<(), SessionError>;

    fn resume(&mut self) -> Result<(), SessionError>;

    /// Halts playback after an unrecoverable enqueue failure
    fn halt(&mut self);
}

/// Pump state: which buffers are ours, what is waiting, whether playback is paused
#[derive(Debug)]
pub struct QueuePump<B> {
    empty: VecDeque<B>,
    pending: AudioByteQueue,
    scratch: Vec<u8>,
    total_buffers: usize,
    period_bytes: usize,
    wait_bytes: usize,
    paused: bool,
    halted: bool,
}

impl<B: Copy> QueuePump<B> {
    /// All `buffers` start empty; playback waits for every buffer's worth of audio
    pub fn new(period_bytes: usize, buffers: Vec<B>) -> Self {
        let total_buffers = buffers.len();
        Self {
            empty: buffers.into(),
            pending: AudioByteQueue::with_capacity(period_bytes * total_buffers * PENDING_HEADROOM),
            scratch: vec![0; period_bytes],
            total_buffers,
            period_bytes,
            wait_bytes: period_bytes * total_buffers,
            paused: false,
            halted: false,
        }
    }

    pub fn period_bytes(&self) -> usize {
        self.period_bytes
    }

    pub fn pending_bytes(&self) -> usize {
        self.pending.len()
    }

    pub fn wait_bytes(&self) -> usize {
        self.wait_bytes
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn empty_buffers(&self) -> usize {
        self.empty.len()
    }

    /// True once an enqueue failed and the native queue was halted
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Feed path: buffer new audio, fill what we can once the wait threshold
    /// is reached, resume a paused queue
    pub fn push<Q>(&mut self, data: &[u8], queue: &mut Q) -> Result<(), SessionError>
    where
        Q: NativeQueue<Buffer = B>,
    {
        if self.halted {
            return Err(SessionError::DeviceLost("output queue halted".to_string()));
        }
        let accepted = self.pending.push_back(data);
        if accepted < data.len() {
            crate::monitor_debug!("queue pump full, dropped {} bytes", data.len() - accepted);
        }
        if self.pending.len() < self.wait_bytes {
            return Ok(());
        }
        self.wait_bytes = 0;
        self.fill_all(queue)?;
        if self.paused {
            queue.resume()?;
            self.paused = false;
        }
        Ok(())
    }

    /// Device callback path: a buffer finished playing
    pub fn buffer_returned<Q>(&mut self, buffer: B, queue: &mut Q) -> Result<(), SessionError>
    where
        Q: NativeQueue<Buffer = B>,
    {
        if self.halted {
            return Ok(());
        }
        self.empty.push_back(buffer);
        self.fill_all(queue)?;
        if self.empty.len() == self.total_buffers && !self.paused {
            self.paused = true;
            self.wait_bytes = self.period_bytes * self.total_buffers;
            queue.pause()?;
        }
        Ok(())
    }

    fn fill_all<Q>(&mut self, queue: &mut Q) -> Result<(), SessionError>
    where
        Q: NativeQueue<Buffer = B>,
    {
        while !self.empty.is_empty() {
            if !self.fill_one(queue)? {
                break;
            }
        }
        Ok(())
    }

    fn fill_one<Q>(&mut self, queue: &mut Q) -> Result<bool, SessionError>
    where
        Q: NativeQueue<Buffer = B>,
    {
        if self.pending.len() < self.period_bytes {
            return Ok(false);
        }
        let Some(buffer) = self.empty.pop_front() else {
            return Ok(false);
        };
        self.pending.pop_front_into(&mut self.scratch);
        if let Err(e) = queue.enqueue(buffer, &self.scratch) {
            queue.halt();
            self.halted = true;
            self.pending.clear();
            return Err(e);
        }
        Ok(true)
    }
}
