//! LRU Module
//!
//! Counter-based recency tracking for least-recently-used eviction.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};

// == Access Clock ==
/// Per-shard logical clock stamped on every read and write.
///
/// Ticks are strictly increasing, so two entries never share a recency and
/// the insertion order settles ordering for entries never read since.
#[derive(Debug, Default)]
pub struct AccessClock {
    last: AtomicU64,
}

impl AccessClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances the clock and returns the new tick.
    pub fn tick(&self) -> u64 {
        self.last.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Most recently issued tick.
    pub fn current(&self) -> u64 {
        self.last.load(Ordering::Relaxed)
    }
}

// == Victim Selection ==
struct Candidate<'a, K> {
    tick: u64,
    key: &'a K,
}

impl<K> PartialEq for Candidate<'_, K> {
    fn eq(&self, other: &Self) -> bool {
        self.tick == other.tick
    }
}

impl<K> Eq for Candidate<'_, K> {}

impl<K> PartialOrd for Candidate<'_, K> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<K> Ord for Candidate<'_, K> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.tick.cmp(&other.tick)
    }
}

/// Returns up to `count` keys with the oldest access ticks, oldest first.
///
/// Keeps a bounded max-heap of the best candidates so a pass over the
/// shard costs O(n log count).
pub fn least_recent<'a, K, I>(candidates: I, count: usize) -> Vec<K>
where
    K: Clone + 'a,
    I: IntoIterator<Item = (&'a K, u64)>,
{
    if count == 0 {
        return Vec::new();
    }

    let mut heap: BinaryHeap<Candidate<'a, K>> = BinaryHeap::with_capacity(count + 1);
    for (key, tick) in candidates {
        if heap.len() < count {
            heap.push(Candidate { tick, key });
        } else if heap.peek().is_some_and(|newest| tick < newest.tick) {
            heap.pop();
            heap.push(Candidate { tick, key });
        }
    }

    heap.into_sorted_vec()
        .into_iter()
        .map(|candidate| candidate.key.clone())
        .collect()
}
