//! Lock-free ingest metrics shared between the listener and the pipeline
//!
//! The TCP listener runs on tokio worker threads while the aggregator is
//! driven from the main thread, so counters are atomics behind an `Arc`.
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only and must not be used for coordination.

use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Exponential bucket boundaries for window close latency (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
pub const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Raw lines read from any source (monotonic)
    lines_received: AtomicU64,
    /// Lines that failed to parse as events (monotonic)
    lines_malformed: AtomicU64,
    /// Events dropped because the ingest channel was full (monotonic)
    events_dropped: AtomicU64,
    /// TCP producer connections accepted (monotonic)
    connections_accepted: AtomicU64,
    /// Producer connections ended by a read error (monotonic)
    read_failures: AtomicU64,
    /// Windows closed by the aggregator (monotonic)
    windows_closed: AtomicU64,
    /// Window close latency histogram buckets
    window_close_buckets: [AtomicU64; NUM_BUCKETS],
    /// Max window close latency in microseconds
    window_close_max_us: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            lines_received: AtomicU64::new(0),
            lines_malformed: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            connections_accepted: AtomicU64::new(0),
            read_failures: AtomicU64::new(0),
            windows_closed: AtomicU64::new(0),
            window_close_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            window_close_max_us: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_line_received(&self) {
        self.lines_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_line_malformed(&self) {
        self.lines_malformed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_connection(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_read_failed(&self) {
        self.read_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the time spent computing one window's averages
    #[inline]
    pub fn record_window_closed(&self, latency_us: u64) {
        self.windows_closed.fetch_add(1, Ordering::Relaxed);
        self.window_close_buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.window_close_max_us, latency_us);
    }

    pub fn lines_received(&self) -> u64 {
        self.lines_received.load(Ordering::Relaxed)
    }

    pub fn lines_malformed(&self) -> u64 {
        self.lines_malformed.load(Ordering::Relaxed)
    }

    pub fn events_dropped(&self) -> u64 {
        self.events_dropped.load(Ordering::Relaxed)
    }

    /// Take a snapshot of all counters
    pub fn summary(&self) -> MetricsSummary {
        let mut window_close_buckets = [0u64; NUM_BUCKETS];
        for (i, bucket) in self.window_close_buckets.iter().enumerate() {
            window_close_buckets[i] = bucket.load(Ordering::Relaxed);
        }

        MetricsSummary {
            lines_received: self.lines_received(),
            lines_malformed: self.lines_malformed(),
            events_dropped: self.events_dropped(),
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
            windows_closed: self.windows_closed.load(Ordering::Relaxed),
            window_close_buckets,
            window_close_max_us: self.window_close_max_us.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the metrics counters
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub lines_received: u64,
    pub lines_malformed: u64,
    pub events_dropped: u64,
    pub connections_accepted: u64,
    pub read_failures: u64,
    pub windows_closed: u64,
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub window_close_buckets: [u64; NUM_BUCKETS],
    pub window_close_max_us: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            lines_received = %self.lines_received,
            lines_malformed = %self.lines_malformed,
            events_dropped = %self.events_dropped,
            connections = %self.connections_accepted,
            read_failures = %self.read_failures,
            windows_closed = %self.windows_closed,
            window_close_max_us = %self.window_close_max_us,
            "metrics"
        );
    }
}
