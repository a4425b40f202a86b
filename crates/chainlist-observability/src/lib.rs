//! Observer hooks and diagnostics for the chainlist collection.
//!
//! Provides the collaborator-facing notification interface: membership
//! events emitted synchronously from inside the collection's exclusive
//! critical section, plus reusable sinks (ring buffer, atomic metrics).
//!
//! # Design principles
//!
//! - **Zero-cost when unused:** observation is opt-in via the
//!   [`ChainObserver`] trait; the default [`NoOpObserver`] is inlined away.
//! - **Non-blocking:** observers are invoked while the collection's
//!   exclusive lock is held. They MUST NOT call back into the collection's
//!   exclusive operations and MUST NOT block; expensive work belongs on the
//!   far side of a queue.
//! - **Failure-isolated:** a panicking observer is caught and logged at the
//!   dispatch boundary in the core crate; it never unwinds into mutation
//!   logic and never corrupts collection state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;

use chainlist_types::{InsertMode, NodeId, VersionSeq};

// ---------------------------------------------------------------------------
// ChainEvent — the core event type
// ---------------------------------------------------------------------------

/// A single membership event emitted by the collection.
///
/// Names are carried as owned strings so events can outlive the critical
/// section that produced them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ChainEvent {
    /// A node container was created for a newly inserted element.
    NodeCreated {
        node: NodeId,
        version: VersionSeq,
    },

    /// A node gained a live link in a chain.
    Linked {
        node: NodeId,
        chain: String,
        partition: String,
        mode: InsertMode,
        version: VersionSeq,
    },

    /// A node's live link in a chain was removed.
    Unlinked {
        node: NodeId,
        chain: String,
        partition: String,
        version: VersionSeq,
    },

    /// A node's membership count reached zero and it was disposed.
    NodeDisposed {
        node: NodeId,
        version: VersionSeq,
    },
}

impl ChainEvent {
    /// The node this event concerns.
    #[must_use]
    pub fn node(&self) -> NodeId {
        match self {
            Self::NodeCreated { node, .. }
            | Self::Linked { node, .. }
            | Self::Unlinked { node, .. }
            | Self::NodeDisposed { node, .. } => *node,
        }
    }

    /// The mutation version the event was emitted under.
    #[must_use]
    pub fn version(&self) -> VersionSeq {
        match self {
            Self::NodeCreated { version, .. }
            | Self::Linked { version, .. }
            | Self::Unlinked { version, .. }
            | Self::NodeDisposed { version, .. } => *version,
        }
    }
}

// ---------------------------------------------------------------------------
// ChainObserver — trait for zero-cost opt-in observation
// ---------------------------------------------------------------------------

/// Observer trait for membership events.
///
/// Called synchronously inside the mutation's critical section. Implementors
/// MUST NOT re-enter the collection's exclusive operations (that would
/// deadlock) and should return quickly.
pub trait ChainObserver: Send + Sync {
    /// Called for each membership event, in mutation order.
    fn on_event(&self, event: &ChainEvent);
}

/// No-op observer that compiles to nothing. Default when observability is
/// not configured.
#[derive(Debug, Clone, Copy)]
pub struct NoOpObserver;

impl ChainObserver for NoOpObserver {
    #[inline(always)]
    fn on_event(&self, _event: &ChainEvent) {}
}

// ---------------------------------------------------------------------------
// EventRingBuffer — bounded event storage
// ---------------------------------------------------------------------------

/// Fixed-capacity ring buffer of recent membership events.
///
/// When full, the oldest event is overwritten. Thread-safe via internal
/// `Mutex`; reads happen off the mutation path.
pub struct EventRingBuffer {
    events: Mutex<RingBuf>,
}

struct RingBuf {
    buf: Vec<ChainEvent>,
    capacity: usize,
    head: usize,
    len: usize,
}

impl RingBuf {
    fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
            head: 0,
            len: 0,
        }
    }

    fn push(&mut self, event: ChainEvent) {
        if self.capacity == 0 {
            return;
        }
        let idx = (self.head + self.len) % self.capacity;
        if self.buf.len() < self.capacity {
            self.buf.push(event);
        } else {
            self.buf[idx] = event;
        }
        if self.len == self.capacity {
            self.head = (self.head + 1) % self.capacity;
        } else {
            self.len += 1;
        }
    }

    fn drain_ordered(&self) -> Vec<ChainEvent> {
        let mut result = Vec::with_capacity(self.len);
        for i in 0..self.len {
            let idx = (self.head + i) % self.capacity;
            result.push(self.buf[idx].clone());
        }
        result
    }

    fn clear(&mut self) {
        self.buf.clear();
        self.head = 0;
        self.len = 0;
    }
}

impl EventRingBuffer {
    /// Create a new ring buffer with the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(RingBuf::new(capacity)),
        }
    }

    /// Push an event into the ring buffer.
    pub fn push(&self, event: ChainEvent) {
        self.events.lock().push(event);
    }

    /// Return all stored events in chronological order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ChainEvent> {
        self.events.lock().drain_ordered()
    }

    /// Clear all stored events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Current number of stored events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len
    }

    /// Whether the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.events.lock().capacity
    }
}

// ---------------------------------------------------------------------------
// ChainMetrics — aggregated statistics
// ---------------------------------------------------------------------------

/// Aggregated membership statistics.
///
/// All counters are atomic for lock-free updates from the mutation path.
pub struct ChainMetrics {
    /// Total events observed.
    pub events_total: AtomicU64,
    /// Node containers created.
    pub nodes_created: AtomicU64,
    /// Link installations.
    pub links_installed: AtomicU64,
    /// Link removals.
    pub links_removed: AtomicU64,
    /// Nodes whose membership count reached zero.
    pub nodes_disposed: AtomicU64,
    /// Per-chain link counts (behind mutex, read off the hot path).
    chain_activity: Mutex<HashMap<String, u64>>,
    /// Creation time for rate calculations.
    created_at: Instant,
}

impl ChainMetrics {
    /// Create a new metrics instance with all counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events_total: AtomicU64::new(0),
            nodes_created: AtomicU64::new(0),
            links_installed: AtomicU64::new(0),
            links_removed: AtomicU64::new(0),
            nodes_disposed: AtomicU64::new(0),
            chain_activity: Mutex::new(HashMap::new()),
            created_at: Instant::now(),
        }
    }

    /// Record an event, updating all relevant counters.
    pub fn record(&self, event: &ChainEvent) {
        self.events_total.fetch_add(1, Ordering::Relaxed);
        match event {
            ChainEvent::NodeCreated { .. } => {
                self.nodes_created.fetch_add(1, Ordering::Relaxed);
            }
            ChainEvent::Linked { chain, .. } => {
                self.links_installed.fetch_add(1, Ordering::Relaxed);
                *self.chain_activity.lock().entry(chain.clone()).or_insert(0) += 1;
            }
            ChainEvent::Unlinked { .. } => {
                self.links_removed.fetch_add(1, Ordering::Relaxed);
            }
            ChainEvent::NodeDisposed { .. } => {
                self.nodes_disposed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Links installed per chain name, busiest first.
    #[must_use]
    pub fn top_chains(&self, limit: usize) -> Vec<(String, u64)> {
        let map = self.chain_activity.lock();
        let mut entries: Vec<_> = map.iter().map(|(k, &v)| (k.clone(), v)).collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        entries.truncate(limit);
        entries
    }

    /// Serializable point-in-time view of the counters.
    #[must_use]
    pub fn snapshot(&self) -> ChainMetricsSnapshot {
        let elapsed_secs = self.created_at.elapsed().as_secs_f64();
        let events_total = self.events_total.load(Ordering::Relaxed);
        ChainMetricsSnapshot {
            events_total,
            nodes_created: self.nodes_created.load(Ordering::Relaxed),
            links_installed: self.links_installed.load(Ordering::Relaxed),
            links_removed: self.links_removed.load(Ordering::Relaxed),
            nodes_disposed: self.nodes_disposed.load(Ordering::Relaxed),
            events_per_second: if elapsed_secs > 0.0 {
                #[allow(clippy::cast_precision_loss)]
                {
                    events_total as f64 / elapsed_secs
                }
            } else {
                0.0
            },
            elapsed_secs,
            top_chains: self.top_chains(8),
        }
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        self.events_total.store(0, Ordering::Relaxed);
        self.nodes_created.store(0, Ordering::Relaxed);
        self.links_installed.store(0, Ordering::Relaxed);
        self.links_removed.store(0, Ordering::Relaxed);
        self.nodes_disposed.store(0, Ordering::Relaxed);
        self.chain_activity.lock().clear();
    }
}

impl Default for ChainMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable snapshot of chain metrics.
#[derive(Debug, Clone, Serialize)]
pub struct ChainMetricsSnapshot {
    pub events_total: u64,
    pub nodes_created: u64,
    pub links_installed: u64,
    pub links_removed: u64,
    pub nodes_disposed: u64,
    pub events_per_second: f64,
    pub elapsed_secs: f64,
    pub top_chains: Vec<(String, u64)>,
}

// ---------------------------------------------------------------------------
// MetricsObserver — observer recording to both metrics and ring buffer
// ---------------------------------------------------------------------------

/// Combined observer that records events to both a [`ChainMetrics`]
/// aggregator and an [`EventRingBuffer`] for detailed inspection.
pub struct MetricsObserver {
    metrics: ChainMetrics,
    log: EventRingBuffer,
}

impl MetricsObserver {
    /// Create a new metrics observer with the given ring buffer capacity.
    #[must_use]
    pub fn new(log_capacity: usize) -> Self {
        Self {
            metrics: ChainMetrics::new(),
            log: EventRingBuffer::new(log_capacity),
        }
    }

    /// Access the aggregated metrics.
    #[must_use]
    pub fn metrics(&self) -> &ChainMetrics {
        &self.metrics
    }

    /// Access the event log ring buffer.
    #[must_use]
    pub fn log(&self) -> &EventRingBuffer {
        &self.log
    }

    /// Reset both metrics and log.
    pub fn reset(&self) {
        self.metrics.reset();
        self.log.clear();
    }
}

impl ChainObserver for MetricsObserver {
    fn on_event(&self, event: &ChainEvent) {
        self.metrics.record(event);
        self.log.push(event.clone());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
