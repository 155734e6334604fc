//! Cache Metrics Module
//!
//! Lock-free counters and a sweep-duration histogram for one cache instance.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Upper bounds of the sweep duration histogram buckets, in milliseconds.
pub const SWEEP_BUCKETS_MS: [u64; 7] = [1, 5, 10, 50, 100, 500, 1000];

// == Duration Histogram ==
/// Fixed-bucket histogram with an overflow bucket past the last bound.
#[derive(Debug)]
pub struct DurationHistogram {
    buckets: [AtomicU64; SWEEP_BUCKETS_MS.len() + 1],
    count: AtomicU64,
    sum_micros: AtomicU64,
    max_micros: AtomicU64,
}

impl Default for DurationHistogram {
    fn default() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            count: AtomicU64::new(0),
            sum_micros: AtomicU64::new(0),
            max_micros: AtomicU64::new(0),
        }
    }
}

impl DurationHistogram {
    pub fn record(&self, duration: Duration) {
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        let bucket = SWEEP_BUCKETS_MS
            .iter()
            .position(|bound_ms| micros <= bound_ms * 1000)
            .unwrap_or(SWEEP_BUCKETS_MS.len());

        self.buckets[bucket].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_micros.fetch_add(micros, Ordering::Relaxed);
        self.max_micros.fetch_max(micros, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            bounds_ms: SWEEP_BUCKETS_MS.to_vec(),
            counts: self
                .buckets
                .iter()
                .map(|b| b.load(Ordering::Relaxed))
                .collect(),
            count: self.count.load(Ordering::Relaxed),
            sum_micros: self.sum_micros.load(Ordering::Relaxed),
            max_micros: self.max_micros.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of a [`DurationHistogram`].
///
/// `counts` has one more element than `bounds_ms`; the last one counts
/// observations above the largest bound.
#[derive(Debug, Clone, Serialize)]
pub struct HistogramSnapshot {
    pub bounds_ms: Vec<u64>,
    pub counts: Vec<u64>,
    pub count: u64,
    pub sum_micros: u64,
    pub max_micros: u64,
}

impl HistogramSnapshot {
    /// Mean observation, or zero when empty.
    pub fn mean(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(self.sum_micros / self.count)
        }
    }
}

// == Metrics Recorder ==
/// Process-wide counters for one cache instance.
///
/// Every field is atomic so recording never takes a lock. Counters are
/// monotonic; `clear()` on the cache does not reset them.
#[derive(Debug)]
pub struct MetricsRecorder {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    evictions: AtomicU64,
    expired_on_read: AtomicU64,
    expired_by_sweep: AtomicU64,
    lock_contentions: AtomicU64,
    loads: AtomicU64,
    load_failures: AtomicU64,
    coalesced_loads: AtomicU64,
    sweeps: AtomicU64,
    sweep_failures: AtomicU64,
    /// Unix milliseconds of the last finished sweep, 0 if none yet
    last_sweep_ms: AtomicI64,
    sweep_duration: DurationHistogram,
    created_at: Instant,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expired_on_read: AtomicU64::new(0),
            expired_by_sweep: AtomicU64::new(0),
            lock_contentions: AtomicU64::new(0),
            loads: AtomicU64::new(0),
            load_failures: AtomicU64::new(0),
            coalesced_loads: AtomicU64::new(0),
            sweeps: AtomicU64::new(0),
            sweep_failures: AtomicU64::new(0),
            last_sweep_ms: AtomicI64::new(0),
            sweep_duration: DurationHistogram::default(),
            created_at: Instant::now(),
        }
    }
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, count: usize) {
        self.evictions.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_expired_on_read(&self) {
        self.expired_on_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_contention(&self) {
        self.lock_contentions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_load(&self) {
        self.loads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_load_failure(&self) {
        self.load_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_coalesced_load(&self) {
        self.coalesced_loads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sweep_failure(&self) {
        self.sweep_failures.fetch_add(1, Ordering::Relaxed);
    }

    // == Record Sweep ==
    /// Records a finished sweep over all shards.
    pub fn record_sweep(&self, removed: usize, duration: Duration) {
        self.sweeps.fetch_add(1, Ordering::Relaxed);
        self.expired_by_sweep
            .fetch_add(removed as u64, Ordering::Relaxed);
        self.sweep_duration.record(duration);
        self.last_sweep_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    // == Snapshot ==
    /// Creates a point-in-time snapshot of all counters.
    ///
    /// # Arguments
    /// * `entries` - Current number of entries across all shards
    /// * `in_flight_loads` - Loads currently running
    pub fn snapshot(&self, entries: usize, in_flight_loads: usize) -> MetricsSnapshot {
        let last_sweep_ms = self.last_sweep_ms.load(Ordering::Relaxed);
        MetricsSnapshot {
            hits: self.hits(),
            misses: self.misses(),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expired_on_read: self.expired_on_read.load(Ordering::Relaxed),
            expired_by_sweep: self.expired_by_sweep.load(Ordering::Relaxed),
            lock_contentions: self.lock_contentions.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
            coalesced_loads: self.coalesced_loads.load(Ordering::Relaxed),
            sweeps: self.sweeps.load(Ordering::Relaxed),
            sweep_failures: self.sweep_failures.load(Ordering::Relaxed),
            sweep_duration: self.sweep_duration.snapshot(),
            entries,
            in_flight_loads,
            last_sweep_at: (last_sweep_ms != 0)
                .then(|| DateTime::from_timestamp_millis(last_sweep_ms))
                .flatten(),
            captured_at: Utc::now(),
            uptime_secs: self.created_at.elapsed().as_secs(),
        }
    }
}

// == Metrics Snapshot ==
/// A point-in-time, serializable view of the cache's metrics.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Lookups that returned a live value
    pub hits: u64,
    /// Lookups that found nothing or an expired entry
    pub misses: u64,
    pub sets: u64,
    /// Deletes that removed an entry
    pub deletes: u64,
    /// Entries removed by LRU bounds enforcement
    pub evictions: u64,
    /// Expired entries removed lazily by a read
    pub expired_on_read: u64,
    /// Expired entries removed by sweeps
    pub expired_by_sweep: u64,
    /// Per-key lock acquisitions that had to wait
    pub lock_contentions: u64,
    /// Loader invocations
    pub loads: u64,
    pub load_failures: u64,
    /// Callers that joined a load already in flight
    pub coalesced_loads: u64,
    pub sweeps: u64,
    /// Shard sweeps that failed and were skipped
    pub sweep_failures: u64,
    pub sweep_duration: HistogramSnapshot,
    /// Entries currently stored, including expired ones not yet removed
    pub entries: usize,
    pub in_flight_loads: usize,
    pub last_sweep_at: Option<DateTime<Utc>>,
    pub captured_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

impl MetricsSnapshot {
    // == Hit Rate ==
    /// Returns hits / (hits + misses), or 0.0 if no lookups have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
