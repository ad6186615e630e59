use std::time::Duration;

use anyhow::Result;
use serde::Serialize;

use super::buffer_pool::{Buffer, BufferPool};
use super::queue::BlockingQueue;

/// Two-queue hand-off between one producer thread and one consumer thread.
///
/// Payloads start on the `source` queue (empty, recyclable). The producer
/// pops from source, fills, and pushes to `sink`; the consumer pops from sink,
/// drains, and pushes back to source. The payload set is closed: nothing is
/// created or destroyed after construction, so
/// `sink_depth + source_depth + in_flight == total` always holds.
pub struct Relay<T> {
    source: BlockingQueue<T>,
    sink: BlockingQueue<T>,
    total: usize,
}

/// Point-in-time depths of a relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    pub source: usize,
    pub sink: usize,
    pub in_flight: usize,
    pub total: usize,
}

impl<T> Relay<T> {
    /// Build a relay whose source queue holds `payloads`
    pub fn from_payloads(payloads: Vec<T>) -> Self {
        let total = payloads.len();
        let source = BlockingQueue::with_capacity(total);
        for payload in payloads {
            source.push(payload);
        }
        Self {
            source,
            sink: BlockingQueue::with_capacity(total),
            total,
        }
    }

    /// Producer: hand a filled payload to the consumer
    pub fn push_to_sink(&self, payload: T) {
        self.sink.push(payload);
    }

    /// Consumer: take the oldest filled payload, blocking indefinitely
    pub fn pop_from_sink(&self) -> T {
        self.sink.pop()
    }

    pub fn pop_from_sink_timeout(&self, timeout: Duration) -> Option<T> {
        self.sink.pop_timeout(timeout)
    }

    /// Consumer: return a drained payload to the producer
    pub fn push_to_source(&self, payload: T) {
        self.source.push(payload);
    }

    /// Producer: take an empty payload, blocking indefinitely
    pub fn pop_from_source(&self) -> T {
        self.source.pop()
    }

    pub fn pop_from_source_timeout(&self, timeout: Duration) -> Option<T> {
        self.source.pop_timeout(timeout)
    }

    pub fn sink_depth(&self) -> usize {
        self.sink.len()
    }

    pub fn source_depth(&self) -> usize {
        self.source.len()
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Payloads currently held by a thread between a pop and its push
    pub fn in_flight(&self) -> usize {
        self.total
            .saturating_sub(self.sink_depth() + self.source_depth())
    }

    pub fn stats(&self) -> RelayStats {
        let source = self.source_depth();
        let sink = self.sink_depth();
        RelayStats {
            source,
            sink,
            in_flight: self.total.saturating_sub(source + sink),
            total: self.total,
        }
    }

    /// Look at both queues, source first
    pub fn inspect<R>(&self, f: impl FnOnce(&[&T], &[&T]) -> R) -> R {
        self.source.inspect(|source| {
            self.sink.inspect(|sink| {
                let source: Vec<&T> = source.iter().collect();
                let sink: Vec<&T> = sink.iter().collect();
                f(&source, &sink)
            })
        })
    }

    /// Drain both queues and hand every queued payload back to the owner.
    /// Call after producer and consumer have joined; a second call returns nothing.
    pub fn release(&self) -> Vec<T> {
        let mut released = self.source.drain();
        released.extend(self.sink.drain());
        released
    }
}

/// Relay of raw byte buffers between a capture loop and a decoder
pub type PacketRelay = Relay<Buffer>;

impl Relay<Buffer> {
    /// Allocate `count` buffers of `byte_size` bytes, all on the source queue
    pub fn with_buffers(count: usize, byte_size: usize) -> Result<Self> {
        Ok(Self::from_payloads(BufferPool::allocate(count, byte_size)?))
    }
}
