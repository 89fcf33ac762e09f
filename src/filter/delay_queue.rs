use crate::audio::types::AudioPacket;
use std::collections::VecDeque;

const NS_PER_MS: u64 = 1_000_000;

/// FIFO of host audio held back by the filter delay
///
/// Age is measured on the host clock: an entry is due once the newest pushed
/// timestamp is at least `delay` past its own. A timestamp older than the newest
/// queued one means the host clock jumped back; queued audio is dropped then.
#[derive(Debug, Default)]
pub struct DelayQueue {
    entries: VecDeque<AudioPacket>,
    delay_ns: u64,
}

impl DelayQueue {
    pub fn new(delay_ms: u32) -> Self {
        Self {
            entries: VecDeque::new(),
            delay_ns: delay_ms as u64 * NS_PER_MS,
        }
    }

    pub fn delay_ms(&self) -> u32 {
        (self.delay_ns / NS_PER_MS) as u32
    }

    pub fn is_enabled(&self) -> bool {
        self.delay_ns > 0
    }

    /// Changes the delay. Turning it off drops everything queued.
    pub fn set_delay_ms(&mut self, delay_ms: u32) {
        self.delay_ns = delay_ms as u64 * NS_PER_MS;
        if self.delay_ns == 0 {
            self.entries.clear();
        }
    }

    /// Queues a copy of `packet` and hands every due entry to `forward`, oldest first
    pub fn push<F>(&mut self, packet: &AudioPacket, mut forward: F) -> usize
    where
        F: FnMut(&AudioPacket),
    {
        let now = packet.timestamp_ns;
        if self.entries.back().is_some_and(|newest| now < newest.timestamp_ns) {
            crate::monitor_debug!(
                "host clock went back, dropping {} delayed blocks",
                self.entries.len()
            );
            self.entries.clear();
        }
        self.entries.push_back(packet.clone());

        let mut forwarded = 0;
        while let Some(oldest) = self.entries.front() {
            if now.saturating_sub(oldest.timestamp_ns) < self.delay_ns {
                break;
            }
            if let Some(entry) = self.entries.pop_front() {
                forward(&entry);
                forwarded += 1;
            }
        }
        forwarded
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
