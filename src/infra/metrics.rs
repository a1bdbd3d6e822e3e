//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics so the sensor loop never contends with the Prometheus
//! endpoint or the periodic reporter.
//!
//! NOTE: All atomics use Relaxed ordering intentionally—these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use crate::domain::types::UnknownReason;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤1000, ≤2000, ≤4000, ... ≤512000, >512000
const BUCKET_BOUNDS: [u64; 10] =
    [1_000, 2_000, 4_000, 8_000, 16_000, 32_000, 64_000, 128_000, 256_000, 512_000];
const NUM_BUCKETS: usize = 11;

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

/// Load all bucket values without resetting
#[inline]
fn load_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.load(Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = ((total as f64) * percentile).ceil().max(1.0) as u64;
    let mut cumulative = 0u64;

    // Last bucket uses 2x the previous bound
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] = [
        1_000, 2_000, 4_000, 8_000, 16_000, 32_000, 64_000, 128_000, 256_000, 512_000, 1_024_000,
    ];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Poll cycles completed (monotonic)
    cycles_total: AtomicU64,
    /// Sensor samples taken (monotonic)
    samples_total: AtomicU64,
    /// Samples with no echo edge inside the window
    sensor_timeouts_total: AtomicU64,
    /// Samples outside the sensor's valid range
    implausible_total: AtomicU64,
    /// Samples with a zero-length pulse
    non_positive_total: AtomicU64,
    /// Samples that failed on line I/O
    line_errors_total: AtomicU64,
    /// Reconciliations that wrote the shared record
    reconcile_committed_total: AtomicU64,
    /// Reconciliations that found the record already matching
    reconcile_skipped_total: AtomicU64,
    /// Reconciliations abandoned (conflicts exhausted or store error)
    reconcile_failed_total: AtomicU64,
    /// Individual compare-and-swap conflicts (each one triggers a retry)
    store_conflicts_total: AtomicU64,
    /// Reconciliation latency histogram (µs, cumulative)
    reconcile_latency_buckets: [AtomicU64; NUM_BUCKETS],
    reconcile_latency_sum_us: AtomicU64,
    reconcile_latency_max_us: AtomicU64,
    /// Slots committed available as of the last cycle
    available_slots: AtomicU64,
    /// Configured slot count
    total_slots: AtomicU64,
    /// Process start (for uptime)
    started_at: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            cycles_total: AtomicU64::new(0),
            samples_total: AtomicU64::new(0),
            sensor_timeouts_total: AtomicU64::new(0),
            implausible_total: AtomicU64::new(0),
            non_positive_total: AtomicU64::new(0),
            line_errors_total: AtomicU64::new(0),
            reconcile_committed_total: AtomicU64::new(0),
            reconcile_skipped_total: AtomicU64::new(0),
            reconcile_failed_total: AtomicU64::new(0),
            store_conflicts_total: AtomicU64::new(0),
            reconcile_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            reconcile_latency_sum_us: AtomicU64::new(0),
            reconcile_latency_max_us: AtomicU64::new(0),
            available_slots: AtomicU64::new(0),
            total_slots: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    #[inline]
    pub fn record_cycle(&self) {
        self.cycles_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_sample(&self) {
        self.samples_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an unknown reading by its cause
    #[inline]
    pub fn record_unknown(&self, reason: &UnknownReason) {
        let counter = match reason {
            UnknownReason::Timeout => &self.sensor_timeouts_total,
            UnknownReason::Implausible { .. } => &self.implausible_total,
            UnknownReason::NonPositive => &self.non_positive_total,
            UnknownReason::LineError(_) => &self.line_errors_total,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_committed(&self, latency_us: u64) {
        self.reconcile_committed_total.fetch_add(1, Ordering::Relaxed);
        self.record_reconcile_latency(latency_us);
    }

    #[inline]
    pub fn record_skipped(&self, latency_us: u64) {
        self.reconcile_skipped_total.fetch_add(1, Ordering::Relaxed);
        self.record_reconcile_latency(latency_us);
    }

    #[inline]
    pub fn record_failed(&self, latency_us: u64) {
        self.reconcile_failed_total.fetch_add(1, Ordering::Relaxed);
        self.record_reconcile_latency(latency_us);
    }

    #[inline]
    pub fn record_conflict(&self) {
        self.store_conflicts_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn record_reconcile_latency(&self, latency_us: u64) {
        self.reconcile_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        let bucket = bucket_index(latency_us);
        self.reconcile_latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.reconcile_latency_max_us, latency_us);
    }

    /// Set the displayed availability gauge
    #[inline]
    pub fn set_availability(&self, available: usize, total: usize) {
        self.available_slots.store(available as u64, Ordering::Relaxed);
        self.total_slots.store(total as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn samples_total(&self) -> u64 {
        self.samples_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn reconcile_committed_total(&self) -> u64 {
        self.reconcile_committed_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn reconcile_failed_total(&self) -> u64 {
        self.reconcile_failed_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn store_conflicts_total(&self) -> u64 {
        self.store_conflicts_total.load(Ordering::Relaxed)
    }

    /// Snapshot all counters; nothing is reset
    pub fn report(&self) -> MetricsSummary {
        let reconcile_latency_buckets = load_buckets(&self.reconcile_latency_buckets);
        let reconcile_count: u64 = reconcile_latency_buckets.iter().sum();
        let latency_sum = self.reconcile_latency_sum_us.load(Ordering::Relaxed);
        let reconcile_latency_avg_us =
            if reconcile_count > 0 { latency_sum / reconcile_count } else { 0 };

        MetricsSummary {
            uptime_secs: self.started_at.elapsed().as_secs(),
            cycles_total: self.cycles_total.load(Ordering::Relaxed),
            samples_total: self.samples_total.load(Ordering::Relaxed),
            sensor_timeouts_total: self.sensor_timeouts_total.load(Ordering::Relaxed),
            implausible_total: self.implausible_total.load(Ordering::Relaxed),
            non_positive_total: self.non_positive_total.load(Ordering::Relaxed),
            line_errors_total: self.line_errors_total.load(Ordering::Relaxed),
            reconcile_committed_total: self.reconcile_committed_total.load(Ordering::Relaxed),
            reconcile_skipped_total: self.reconcile_skipped_total.load(Ordering::Relaxed),
            reconcile_failed_total: self.reconcile_failed_total.load(Ordering::Relaxed),
            store_conflicts_total: self.store_conflicts_total.load(Ordering::Relaxed),
            reconcile_latency_p99_us: percentile_from_buckets(&reconcile_latency_buckets, 0.99),
            reconcile_latency_buckets,
            reconcile_latency_avg_us,
            reconcile_latency_sum_us: latency_sum,
            reconcile_latency_max_us: self.reconcile_latency_max_us.load(Ordering::Relaxed),
            available_slots: self.available_slots.load(Ordering::Relaxed),
            total_slots: self.total_slots.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for Prometheus formatting)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

#[derive(Debug)]
pub struct MetricsSummary {
    pub uptime_secs: u64,
    pub cycles_total: u64,
    pub samples_total: u64,
    pub sensor_timeouts_total: u64,
    pub implausible_total: u64,
    pub non_positive_total: u64,
    pub line_errors_total: u64,
    pub reconcile_committed_total: u64,
    pub reconcile_skipped_total: u64,
    pub reconcile_failed_total: u64,
    pub store_conflicts_total: u64,
    /// Reconciliation latency histogram buckets
    /// Bounds: ≤1ms, ≤2ms, ≤4ms, ... ≤512ms, >512ms
    pub reconcile_latency_buckets: [u64; NUM_BUCKETS],
    pub reconcile_latency_avg_us: u64,
    pub reconcile_latency_sum_us: u64,
    pub reconcile_latency_max_us: u64,
    pub reconcile_latency_p99_us: u64,
    pub available_slots: u64,
    pub total_slots: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            uptime_secs = %self.uptime_secs,
            cycles = %self.cycles_total,
            samples = %self.samples_total,
            timeouts = %self.sensor_timeouts_total,
            implausible = %self.implausible_total,
            committed = %self.reconcile_committed_total,
            skipped = %self.reconcile_skipped_total,
            failed = %self.reconcile_failed_total,
            conflicts = %self.store_conflicts_total,
            reconcile_p99_us = %self.reconcile_latency_p99_us,
            available = %self.available_slots,
            total = %self.total_slots,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.samples_total(), 0);
        assert_eq!(metrics.reconcile_committed_total(), 0);
    }

    #[test]
    fn test_unknown_reasons_counted_separately() {
        let metrics = Metrics::new();
        metrics.record_unknown(&UnknownReason::Timeout);
        metrics.record_unknown(&UnknownReason::Timeout);
        metrics.record_unknown(&UnknownReason::Implausible { distance_cm: 512.0 });
        metrics.record_unknown(&UnknownReason::NonPositive);
        metrics.record_unknown(&UnknownReason::LineError("EIO".to_string()));

        let summary = metrics.report();
        assert_eq!(summary.sensor_timeouts_total, 2);
        assert_eq!(summary.implausible_total, 1);
        assert_eq!(summary.non_positive_total, 1);
        assert_eq!(summary.line_errors_total, 1);
    }

    #[test]
    fn test_concurrent_samples() {
        let metrics = Arc::new(Metrics::new());
        let mut handles = vec![];

        for _ in 0..8 {
            let m = metrics.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    m.record_sample();
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(metrics.samples_total(), 8000);
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(1_000), 0);
        assert_eq!(bucket_index(1_001), 1);
        assert_eq!(bucket_index(512_000), 9);
        assert_eq!(bucket_index(512_001), 10);
    }

    #[test]
    fn test_reconcile_latency_tracking() {
        let metrics = Metrics::new();
        metrics.record_committed(1_500);
        metrics.record_skipped(500);
        metrics.record_failed(3_000);

        let summary = metrics.report();
        assert_eq!(summary.reconcile_committed_total, 1);
        assert_eq!(summary.reconcile_skipped_total, 1);
        assert_eq!(summary.reconcile_failed_total, 1);
        assert_eq!(summary.reconcile_latency_avg_us, 1_666);
        assert_eq!(summary.reconcile_latency_max_us, 3_000);
        assert_eq!(summary.reconcile_latency_buckets[0], 1);
        assert_eq!(summary.reconcile_latency_buckets[1], 1);
        assert_eq!(summary.reconcile_latency_buckets[2], 1);
        assert_eq!(summary.reconcile_latency_sum_us, 5_000);
        assert_eq!(summary.reconcile_latency_p99_us, 4_000);
    }

    #[test]
    fn test_p99_single_slow_sample() {
        let metrics = Metrics::new();
        metrics.record_committed(300_000);

        let summary = metrics.report();
        assert_eq!(summary.reconcile_latency_max_us, 300_000);
        assert_eq!(summary.reconcile_latency_p99_us, 512_000);
    }

    #[test]
    fn test_p99_tracks_slowest_of_few_samples() {
        let metrics = Metrics::new();
        for _ in 0..10 {
            metrics.record_committed(500);
        }
        metrics.record_failed(100_000);

        assert_eq!(metrics.report().reconcile_latency_p99_us, 128_000);
    }

    #[test]
    fn test_p99_empty_is_zero() {
        assert_eq!(Metrics::new().report().reconcile_latency_p99_us, 0);
    }

    #[test]
    fn test_availability_gauge() {
        let metrics = Metrics::new();
        metrics.set_availability(2, 3);
        let summary = metrics.report();
        assert_eq!(summary.available_slots, 2);
        assert_eq!(summary.total_slots, 3);
    }
}
