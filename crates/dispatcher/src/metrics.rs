//! Counters for observability
//!
//! `SinkMetrics` tracks one writer queue, `SubscriptionMetrics` one topic
//! rule. Both are lock-free and cheap to read from any task.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Metrics for a single sink
#[derive(Debug, Default)]
pub struct SinkMetrics {
    /// Current queue length
    queue_len: AtomicUsize,
    /// Batches written successfully
    write_count: AtomicU64,
    /// Batches the sink rejected
    failure_count: AtomicU64,
    /// Batches dropped due to full queue
    dropped_count: AtomicU64,
}

impl SinkMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_len(&self) -> usize {
        self.queue_len.load(Ordering::Relaxed)
    }

    pub fn set_queue_len(&self, len: usize) {
        self.queue_len.store(len, Ordering::Relaxed);
    }

    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::Relaxed)
    }

    pub fn inc_write_count(&self) {
        self.write_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }

    pub fn inc_failure_count(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }

    pub fn inc_dropped_count(&self) {
        self.dropped_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queue_len: self.queue_len(),
            write_count: self.write_count(),
            failure_count: self.failure_count(),
            dropped_count: self.dropped_count(),
        }
    }
}

/// Snapshot of sink metrics (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub queue_len: usize,
    pub write_count: u64,
    pub failure_count: u64,
    pub dropped_count: u64,
}

/// Outcome counters of one subscription
#[derive(Debug, Default)]
pub struct SubscriptionMetrics {
    received: AtomicU64,
    dropped_retained: AtomicU64,
    dropped_unmatched: AtomicU64,
    parse_failures: AtomicU64,
    write_failures: AtomicU64,
    records_written: AtomicU64,
}

impl SubscriptionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn inc_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_dropped_retained(&self) {
        self.dropped_retained.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_dropped_unmatched(&self) {
        self.dropped_unmatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_parse_failures(&self) {
        self.parse_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_write_failures(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_records_written(&self, n: usize) {
        self.records_written.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SubscriptionSnapshot {
        SubscriptionSnapshot {
            received: self.received.load(Ordering::Relaxed),
            dropped_retained: self.dropped_retained.load(Ordering::Relaxed),
            dropped_unmatched: self.dropped_unmatched.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of `SubscriptionMetrics`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionSnapshot {
    /// Messages routed to the subscription
    pub received: u64,
    pub dropped_retained: u64,
    pub dropped_unmatched: u64,
    pub parse_failures: u64,
    pub write_failures: u64,
    pub records_written: u64,
}

impl std::ops::AddAssign for SubscriptionSnapshot {
    fn add_assign(&mut self, other: Self) {
        self.received += other.received;
        self.dropped_retained += other.dropped_retained;
        self.dropped_unmatched += other.dropped_unmatched;
        self.parse_failures += other.parse_failures;
        self.write_failures += other.write_failures;
        self.records_written += other.records_written;
    }
}

impl std::fmt::Display for SubscriptionSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "received={} records={} retained_dropped={} unmatched={} parse_failures={} write_failures={}",
            self.received,
            self.records_written,
            self.dropped_retained,
            self.dropped_unmatched,
            self.parse_failures,
            self.write_failures
        )
    }
}
