//! Bounds Module
//!
//! Per-shard entry and estimated-memory limits.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Estimates the memory held by one entry, in bytes.
pub type Weigher<K, V> = Arc<dyn Fn(&K, &V) -> usize + Send + Sync>;

/// One write in this many is weighed to refresh the average entry size.
pub const MEMORY_SAMPLE_EVERY: u64 = 8;

/// Weigher used when the caller supplies none: the inline size of key and value.
pub fn inline_size_weigher<K: 'static, V: 'static>() -> Weigher<K, V> {
    Arc::new(|_: &K, _: &V| std::mem::size_of::<K>() + std::mem::size_of::<V>())
}

// == Bounds Enforcer ==
/// Tracks the limits of one shard and how far it is over them.
///
/// Memory is an estimate: writes are sampled and folded into a moving
/// average entry size, and the footprint is `len * average`. This keeps the
/// write path O(1) instead of re-measuring the shard.
#[derive(Debug)]
pub struct BoundsEnforcer {
    max_entries: usize,
    max_memory_bytes: Option<usize>,
    /// Moving average entry size in bytes, 0 until the first sample
    avg_entry_bytes: AtomicUsize,
    writes: AtomicU64,
}

impl BoundsEnforcer {
    // == Constructor ==
    /// Creates an enforcer for one shard.
    ///
    /// # Arguments
    /// * `max_entries` - Entry bound for the shard
    /// * `max_memory_bytes` - Optional estimated memory bound for the shard
    pub fn new(max_entries: usize, max_memory_bytes: Option<usize>) -> Self {
        Self {
            max_entries,
            max_memory_bytes,
            avg_entry_bytes: AtomicUsize::new(0),
            writes: AtomicU64::new(0),
        }
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn max_memory_bytes(&self) -> Option<usize> {
        self.max_memory_bytes
    }

    // == Observe Write ==
    /// Samples the weight of a written entry when it is this write's turn.
    pub fn observe_write<K, V>(&self, key: &K, value: &V, weigher: &Weigher<K, V>) {
        if self.max_memory_bytes.is_none() {
            return;
        }
        let seq = self.writes.fetch_add(1, Ordering::Relaxed);
        if seq % MEMORY_SAMPLE_EVERY != 0 {
            return;
        }

        let sample = weigher(key, value).max(1);
        // Races between samplers only lose a sample; the figure stays an estimate
        let _ = self
            .avg_entry_bytes
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |avg| {
                Some(if avg == 0 { sample } else { (avg * 7 + sample) / 8 })
            });
    }

    /// Current average entry size estimate in bytes.
    pub fn avg_entry_bytes(&self) -> usize {
        self.avg_entry_bytes.load(Ordering::Relaxed)
    }

    /// Estimated memory held by `len` entries.
    pub fn estimated_bytes(&self, len: usize) -> usize {
        len.saturating_mul(self.avg_entry_bytes())
    }

    // == Excess ==
    /// Number of entries to evict from a shard holding `len` entries.
    pub fn excess(&self, len: usize) -> usize {
        let over_entries = len.saturating_sub(self.max_entries);
        let over_memory = match (self.max_memory_bytes, self.avg_entry_bytes()) {
            (Some(limit), avg) if avg > 0 => len.saturating_sub(limit / avg),
            _ => 0,
        };
        over_entries.max(over_memory)
    }

    pub fn is_exceeded(&self, len: usize) -> bool {
        self.excess(len) > 0
    }

    /// Forgets sampled sizes; used when the shard is emptied.
    pub fn reset(&self) {
        self.avg_entry_bytes.store(0, Ordering::Relaxed);
        self.writes.store(0, Ordering::Relaxed);
    }
}
