//! Time-ordered send queue.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::net::SocketAddr;

use bytes::Bytes;
use tokio::time::Instant;

/// A datagram with a committed transmission time.
#[derive(Debug, Clone)]
pub struct PendingSend {
    /// When the datagram should leave the relay.
    pub scheduled_at: Instant,
    /// Delay drawn from the delay model, before floor clamping or swaps.
    pub natural_delay_ms: f64,
    pub payload: Bytes,
    pub source: SocketAddr,
    pub destination: SocketAddr,
}

/// Heap entry. Ordering only looks at `(scheduled_at, seq)`.
#[derive(Debug)]
struct QueueEntry {
    scheduled_at: Instant,
    seq: u64,
    send: PendingSend,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.scheduled_at == other.scheduled_at && self.seq == other.seq
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.scheduled_at
            .cmp(&other.scheduled_at)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Min-queue of pending sends keyed by scheduled time, ties broken by
/// enqueue order.
#[derive(Debug, Default)]
pub struct SendQueue {
    heap: BinaryHeap<Reverse<QueueEntry>>,
    next_seq: u64,
}

impl SendQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a send, returning its sequence number.
    pub fn push(&mut self, send: PendingSend) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(QueueEntry {
            scheduled_at: send.scheduled_at,
            seq,
            send,
        }));
        seq
    }

    /// Scheduled time of the earliest entry.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse(entry)| entry.scheduled_at)
    }

    /// Pop the earliest entry if it is due at `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<PendingSend> {
        if self.next_deadline()? <= now {
            self.pop()
        } else {
            None
        }
    }

    /// Pop the earliest entry regardless of its deadline.
    pub fn pop(&mut self) -> Option<PendingSend> {
        self.heap.pop().map(|Reverse(entry)| entry.send)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
