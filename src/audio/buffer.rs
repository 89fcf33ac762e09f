// Pending device bytes between the feed thread and the device callback
//
// Backed by an rtrb ring: capacity is fixed at session start, so a device that
// stops draining loses the newest audio instead of growing memory.

use rtrb::{Consumer, Producer, RingBuffer};
use std::fmt;

/// FIFO of device-format bytes waiting for the device to accept them
///
/// Sessions push whole resampled blocks and pop exactly one native period at
/// a time, so the queue never splits a frame as long as callers pop multiples
/// of the frame size.
pub struct AudioByteQueue {
    producer: Producer<u8>,
    consumer: Consumer<u8>,
    capacity: usize,
}

impl AudioByteQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (producer, consumer) = RingBuffer::<u8>::new(capacity);
        Self {
            producer,
            consumer,
            capacity,
        }
    }

    /// Appends as much of `data` as fits and returns the number of bytes taken
    pub fn push_back(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.producer.slots());
        if n == 0 {
            return 0;
        }
        match self.producer.write_chunk_uninit(n) {
            Ok(chunk) => chunk.fill_from_iter(data[..n].iter().copied()),
            Err(_) => 0,
        }
    }

    /// Pops exactly `out.len()` bytes. Returns false and leaves the queue
    /// untouched when fewer bytes are buffered.
    pub fn pop_front_into(&mut self, out: &mut [u8]) -> bool {
        let n = out.len();
        let Ok(chunk) = self.consumer.read_chunk(n) else {
            return false;
        };
        let (first, second) = chunk.as_slices();
        out[..first.len()].copy_from_slice(first);
        out[first.len()..].copy_from_slice(second);
        chunk.commit_all();
        true
    }

    /// Pops up to `max` bytes into a new vector
    pub fn pop_front(&mut self, max: usize) -> Vec<u8> {
        let n = max.min(self.consumer.slots());
        match self.consumer.read_chunk(n) {
            Ok(chunk) => chunk.into_iter().collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.consumer.slots()
    }

    pub fn is_empty(&self) -> bool {
        self.consumer.is_empty()
    }

    pub fn clear(&mut self) {
        let n = self.consumer.slots();
        if let Ok(chunk) = self.consumer.read_chunk(n) {
            chunk.commit_all();
        }
    }
}

impl fmt::Debug for AudioByteQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioByteQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
