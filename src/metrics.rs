//! Counters for the dispatcher and consumer.
//!
//! Components receive an `Arc<dyn MetricsRecorder>` at construction; there is
//! no process-wide registry. Wire an exporter by implementing the trait.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Counter {
    /// Rows returned by `list_unsent`
    OutboxPolled,
    OutboxSent,
    /// Publish or mark-sent failures
    OutboxFailed,
    /// Records committed after handling, requeue or dead-letter (duplicates excluded)
    ConsumerProcessed,
    /// Records left uncommitted (guard, republish or commit failure)
    ConsumerFailed,
    ConsumerDuplicate,
    ConsumerRequeued,
    ConsumerDeadLettered,
}

impl Counter {
    pub const ALL: [Counter; 8] = [
        Counter::OutboxPolled,
        Counter::OutboxSent,
        Counter::OutboxFailed,
        Counter::ConsumerProcessed,
        Counter::ConsumerFailed,
        Counter::ConsumerDuplicate,
        Counter::ConsumerRequeued,
        Counter::ConsumerDeadLettered,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Counter::OutboxPolled => "outbox_polled_total",
            Counter::OutboxSent => "outbox_sent_total",
            Counter::OutboxFailed => "outbox_failed_total",
            Counter::ConsumerProcessed => "consumer_processed_total",
            Counter::ConsumerFailed => "consumer_failed_total",
            Counter::ConsumerDuplicate => "consumer_duplicate_total",
            Counter::ConsumerRequeued => "consumer_requeued_total",
            Counter::ConsumerDeadLettered => "consumer_dlq_total",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

pub trait MetricsRecorder: Send + Sync {
    fn increment(&self, counter: Counter, by: u64);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsRecorder for NoopMetrics {
    fn increment(&self, _counter: Counter, _by: u64) {}
}

/// Atomic in-process counters.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    values: [AtomicU64; 8],
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.values[counter.index()].load(Ordering::Relaxed)
    }

    /// Current values keyed by counter name.
    pub fn snapshot(&self) -> BTreeMap<&'static str, u64> {
        Counter::ALL
            .iter()
            .map(|counter| (counter.name(), self.get(*counter)))
            .collect()
    }
}

impl MetricsRecorder for InMemoryMetrics {
    fn increment(&self, counter: Counter, by: u64) {
        self.values[counter.index()].fetch_add(by, Ordering::Relaxed);
    }
}
