//! Hash Ring Module
//!
//! Consistent hashing with virtual nodes, mapping keys to shard indices.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::hash::{BuildHasher, Hash};

use ahash::RandomState;

// Fixed seeds keep ring positions identical across rebuilds and instances.
const RING_SEEDS: [u64; 4] = [
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
];

// == Hash Ring ==
/// Deterministic key to shard mapping.
///
/// Every shard owns exactly `replicas_per_shard` positions on a 64-bit ring.
/// A key belongs to the owner of the first position clockwise from its hash,
/// wrapping past the end. Virtual node positions depend only on the shard
/// index and replica number, so growing the shard count only adds positions
/// and keys move only onto the new shards.
#[derive(Debug, Clone)]
pub struct HashRing {
    /// Virtual node position -> owning shard
    nodes: BTreeMap<u64, usize>,
    replicas_per_shard: usize,
    shard_count: usize,
    hasher: RandomState,
}

impl HashRing {
    // == Constructor ==
    /// Builds a ring for `shard_count` shards.
    ///
    /// # Arguments
    /// * `shard_count` - Number of shards to place on the ring
    /// * `replicas_per_shard` - Virtual nodes per shard
    pub fn new(shard_count: usize, replicas_per_shard: usize) -> Self {
        let mut ring = Self {
            nodes: BTreeMap::new(),
            replicas_per_shard,
            shard_count: 0,
            hasher: RandomState::with_seeds(
                RING_SEEDS[0],
                RING_SEEDS[1],
                RING_SEEDS[2],
                RING_SEEDS[3],
            ),
        };
        ring.rebuild(shard_count);
        ring
    }

    // == Assign ==
    /// Returns the shard owning `key`.
    pub fn assign<K: Hash + ?Sized>(&self, key: &K) -> usize {
        let hash = self.hasher.hash_one(key);
        self.nodes
            .range(hash..)
            .next()
            .or_else(|| self.nodes.iter().next())
            .map(|(_, shard)| *shard)
            .unwrap_or(0)
    }

    // == Rebuild ==
    /// Regenerates the virtual nodes for a new shard count.
    ///
    /// Shards are placed in index order and every replica probes forward on
    /// a position collision, so positions of surviving shards never change.
    pub fn rebuild(&mut self, shard_count: usize) {
        self.nodes.clear();
        for shard in 0..shard_count {
            for replica in 0..self.replicas_per_shard {
                let mut attempt = 0u64;
                loop {
                    let position = self.node_position(shard, replica, attempt);
                    if let Entry::Vacant(slot) = self.nodes.entry(position) {
                        slot.insert(shard);
                        break;
                    }
                    attempt += 1;
                }
            }
        }
        self.shard_count = shard_count;
    }

    fn node_position(&self, shard: usize, replica: usize, attempt: u64) -> u64 {
        self.hasher.hash_one((shard as u64, replica as u64, attempt))
    }

    pub fn shard_count(&self) -> usize {
        self.shard_count
    }

    pub fn replicas_per_shard(&self) -> usize {
        self.replicas_per_shard
    }

    /// Total virtual nodes on the ring.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of virtual nodes owned by `shard`.
    pub fn replicas_of(&self, shard: usize) -> usize {
        self.nodes.values().filter(|owner| **owner == shard).count()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    fn sample_keys(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("user:{}:profile", i)).collect()
    }

    #[test]
    fn test_ring_places_every_replica() {
        let ring = HashRing::new(8, 100);

        assert_eq!(ring.len(), 800);
        for shard in 0..8 {
            assert_eq!(ring.replicas_of(shard), 100, "shard {} replica count", shard);
        }
    }

    #[test]
    fn test_assign_is_deterministic_across_instances() {
        let a = HashRing::new(5, 100);
        let b = HashRing::new(5, 100);

        for key in sample_keys(1000) {
            assert_eq!(a.assign(&key), b.assign(&key));
            assert!(a.assign(&key) < 5);
        }
    }

    #[test]
    fn test_single_shard_owns_everything() {
        let ring = HashRing::new(1, 10);
        for key in sample_keys(100) {
            assert_eq!(ring.assign(&key), 0);
        }
    }

    #[test]
    fn test_empty_ring_falls_back_to_zero() {
        let ring = HashRing::new(0, 100);
        assert!(ring.is_empty());
        assert_eq!(ring.assign("anything"), 0);
    }

    #[test]
    fn test_keys_spread_over_all_shards() {
        let ring = HashRing::new(4, 100);
        let mut counts = [0usize; 4];
        for key in sample_keys(10_000) {
            counts[ring.assign(&key)] += 1;
        }

        // Roughly 2500 each; virtual nodes keep every shard well away from empty
        for (shard, count) in counts.iter().enumerate() {
            assert!(*count > 1500, "shard {} only got {} keys", shard, count);
        }
    }

    #[test]
    fn test_rebuild_moves_keys_only_to_new_shard() {
        let before = HashRing::new(4, 100);
        let mut after = before.clone();
        after.rebuild(5);

        let keys = sample_keys(10_000);
        let mut moved = 0;
        for key in &keys {
            let old = before.assign(key);
            let new = after.assign(key);
            if old != new {
                assert_eq!(new, 4, "key {} moved between surviving shards", key);
                moved += 1;
            }
        }

        // Strictly less than 1/N of keys move when going from N to N+1 shards
        assert!(moved > 0);
        assert!(moved * 4 < keys.len(), "{} of {} keys moved", moved, keys.len());
    }

    #[test]
    fn test_rebuild_back_restores_assignment() {
        let original = HashRing::new(6, 50);
        let mut ring = original.clone();
        ring.rebuild(9);
        ring.rebuild(6);

        assert_eq!(ring.shard_count(), 6);
        for key in sample_keys(500) {
            assert_eq!(ring.assign(&key), original.assign(&key));
        }
    }
}
