//! Inbound signal queue
//!
//! The transport pushes signals through a [`SignalSink`]; the consumer drains
//! the matching [`SignalQueue`]. The queue is a fixed-capacity crossbeam
//! channel and the producer never blocks on it: when the queue is full the
//! [`OverflowPolicy`] decides which signal is dropped.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::types::BusValue;

/// Default queue capacity
pub const DEFAULT_SIGNAL_CAPACITY: usize = 1024;

/// Eviction attempts before a drop-oldest push gives up and drops the new signal
const MAX_EVICTIONS_PER_PUSH: usize = 8;

/// A signal received from the bus
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    /// Unique name of the sending connection
    pub sender: String,
    /// Object path the signal was emitted from
    pub path: String,
    /// Fully qualified `interface.member`
    pub name: String,
    pub body: Vec<BusValue>,
}

impl Signal {
    /// Pipeline message form: `{sender, path, name, body}`
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "sender": self.sender,
            "path": self.path,
            "name": self.name,
            "body": self.body.iter().map(BusValue::to_json).collect::<Vec<_>>(),
        })
    }
}

/// What to drop when the queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued signal to make room for the new one
    #[default]
    DropOldest,
    /// Keep the queue as is and discard the new signal
    DropNewest,
}

/// Result of pushing a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queued after evicting this many older signals
    QueuedAfterEviction(usize),
    /// The new signal was discarded
    Dropped,
}

#[derive(Debug, Default)]
struct QueueCounters {
    received: AtomicU64,
    dropped: AtomicU64,
}

/// Consumer side of the signal queue
///
/// Created once and kept for the lifetime of its owner, so sinks handed to
/// successive transports all feed the same receiver.
#[derive(Debug)]
pub struct SignalQueue {
    sender: Sender<Signal>,
    receiver: Receiver<Signal>,
    policy: OverflowPolicy,
    capacity: usize,
    counters: Arc<QueueCounters>,
}

impl SignalQueue {
    /// Create a queue; a capacity of zero is raised to one
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = bounded(capacity);
        Self {
            sender,
            receiver,
            policy,
            capacity,
            counters: Arc::new(QueueCounters::default()),
        }
    }

    /// Producer handle for a transport
    pub fn sink(&self) -> SignalSink {
        SignalSink {
            sender: self.sender.clone(),
            evictor: self.receiver.clone(),
            policy: self.policy,
            counters: Arc::clone(&self.counters),
        }
    }

    pub fn receiver(&self) -> &Receiver<Signal> {
        &self.receiver
    }

    /// Receive without blocking
    pub fn try_recv(&self) -> Option<Signal> {
        self.receiver.try_recv().ok()
    }

    /// Take everything currently queued
    pub fn drain(&self) -> Vec<Signal> {
        self.receiver.try_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Signals offered by the transport
    pub fn received(&self) -> u64 {
        self.counters.received.load(Ordering::Relaxed)
    }

    /// Signals lost to overflow
    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }
}

impl Default for SignalQueue {
    fn default() -> Self {
        Self::new(DEFAULT_SIGNAL_CAPACITY, OverflowPolicy::default())
    }
}

/// Producer side of the signal queue; cheap to clone
#[derive(Debug, Clone)]
pub struct SignalSink {
    sender: Sender<Signal>,
    evictor: Receiver<Signal>,
    policy: OverflowPolicy,
    counters: Arc<QueueCounters>,
}

impl SignalSink {
    /// Offer a signal to the queue without blocking
    pub fn push(&self, signal: Signal) -> PushOutcome {
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        let mut pending = match self.sender.try_send(signal) {
            Ok(()) => return PushOutcome::Queued,
            Err(TrySendError::Full(signal)) => signal,
            // unreachable while the sink holds a receiver clone
            Err(TrySendError::Disconnected(_)) => return self.drop_one(),
        };

        if self.policy == OverflowPolicy::DropNewest {
            return self.drop_one();
        }

        let mut evicted = 0;
        while evicted < MAX_EVICTIONS_PER_PUSH {
            if self.evictor.try_recv().is_ok() {
                evicted += 1;
                self.note_drop();
            }
            match self.sender.try_send(pending) {
                Ok(()) => return PushOutcome::QueuedAfterEviction(evicted),
                Err(TrySendError::Full(signal)) => pending = signal,
                Err(TrySendError::Disconnected(_)) => return self.drop_one(),
            }
        }
        self.drop_one()
    }

    fn drop_one(&self) -> PushOutcome {
        self.note_drop();
        PushOutcome::Dropped
    }

    fn note_drop(&self) {
        let dropped = self.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        if dropped.is_power_of_two() {
            tracing::warn!(
                dropped,
                policy = ?self.policy,
                "Signal queue full, dropping signals"
            );
        }
    }
}
