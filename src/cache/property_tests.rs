//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check the cache against a model and its structural
//! invariants over generated operation sequences.

use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::cache::{HashRing, TtlCache};
use crate::config::CacheConfig;

// == Test Configuration ==
const TEST_DEFAULT_TTL: Duration = Duration::from_secs(300);

fn test_config(num_shards: usize, max_entries_total: usize) -> CacheConfig {
    CacheConfig {
        num_shards,
        max_entries_total,
        default_ttl: TEST_DEFAULT_TTL,
        cleanup_interval: Duration::from_secs(3600),
        ..CacheConfig::default()
    }
}

// == Strategies ==
/// Generates cache keys from a small alphabet so operations collide
fn key_strategy() -> impl Strategy<Value = String> {
    "[a-f0-9]{1,3}"
}

fn value_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 ]{1,64}"
}

#[derive(Debug, Clone)]
enum CacheOp {
    Set { key: String, value: String },
    Get { key: String },
    Delete { key: String },
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        (key_strategy(), value_strategy()).prop_map(|(key, value)| CacheOp::Set { key, value }),
        key_strategy().prop_map(|key| CacheOp::Get { key }),
        key_strategy().prop_map(|key| CacheOp::Delete { key }),
    ]
}

fn unique(keys: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    keys.into_iter().filter(|key| seen.insert(key.clone())).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // Unbounded by capacity, the cache behaves like a map and its counters
    // match the reads that hit and missed.
    #[test]
    fn prop_matches_model(ops in prop::collection::vec(cache_op_strategy(), 1..60)) {
        tokio_test::block_on(async {
            let cache = TtlCache::new(test_config(4, 10_000)).unwrap();
            let mut model: HashMap<String, String> = HashMap::new();
            let mut expected_hits: u64 = 0;
            let mut expected_misses: u64 = 0;

            for op in ops {
                match op {
                    CacheOp::Set { key, value } => {
                        cache.set(key.clone(), value.clone(), None).await;
                        model.insert(key, value);
                    }
                    CacheOp::Get { key } => {
                        let expected = model.get(&key).cloned();
                        if expected.is_some() {
                            expected_hits += 1;
                        } else {
                            expected_misses += 1;
                        }
                        prop_assert_eq!(cache.get(&key).await, expected);
                    }
                    CacheOp::Delete { key } => {
                        prop_assert_eq!(cache.delete(&key).await, model.remove(&key).is_some());
                    }
                }
            }

            let metrics = cache.metrics();
            prop_assert_eq!(metrics.hits, expected_hits, "Hits mismatch");
            prop_assert_eq!(metrics.misses, expected_misses, "Misses mismatch");
            prop_assert_eq!(cache.size(), model.len(), "Entry count mismatch");
            prop_assert_eq!(cache.live_key_locks(), 0);
            cache.stop().await;
            Ok::<(), TestCaseError>(())
        })?;
    }

    // No shard ever holds more than its share of the entry bound.
    #[test]
    fn prop_capacity_enforcement(
        entries in prop::collection::vec((key_strategy(), value_strategy()), 1..200)
    ) {
        tokio_test::block_on(async {
            let cache = TtlCache::new(test_config(4, 20)).unwrap();
            let per_shard = cache.max_entries_per_shard();

            for (key, value) in entries {
                cache.set(key.clone(), value, None).await;
                prop_assert!(
                    cache.shard_sizes().iter().all(|&len| len <= per_shard),
                    "Shard sizes {:?} exceed {}",
                    cache.shard_sizes(),
                    per_shard
                );
                prop_assert!(cache.contains_key(&key), "Just-written key '{}' was evicted", key);
                prop_assert!(cache.size() <= 20, "Size {} exceeds total bound", cache.size());
            }
            cache.stop().await;
            Ok::<(), TestCaseError>(())
        })?;
    }

    // Filling a single shard to capacity and adding one more key evicts
    // exactly the least recently used key.
    #[test]
    fn prop_lru_eviction_order(
        initial_keys in prop::collection::vec(key_strategy(), 2..10),
        new_key in key_strategy(),
    ) {
        let keys = unique(initial_keys);
        prop_assume!(keys.len() >= 2);
        prop_assume!(!keys.contains(&new_key));

        tokio_test::block_on(async {
            let capacity = keys.len();
            let cache = TtlCache::new(test_config(1, capacity)).unwrap();

            for key in &keys {
                cache.set(key.clone(), format!("value_{}", key), None).await;
            }
            cache.set(new_key.clone(), "new".to_string(), None).await;

            prop_assert_eq!(cache.size(), capacity);
            prop_assert!(!cache.contains_key(&keys[0]), "Oldest key '{}' should be evicted", keys[0]);
            prop_assert!(cache.contains_key(&new_key));
            for key in keys.iter().skip(1) {
                prop_assert!(cache.contains_key(key), "Key '{}' should still exist", key);
            }
            cache.stop().await;
            Ok::<(), TestCaseError>(())
        })?;
    }

    // A read makes its key the most recently used.
    #[test]
    fn prop_lru_access_tracking(
        initial_keys in prop::collection::vec(key_strategy(), 3..8),
        new_key in key_strategy(),
    ) {
        let keys = unique(initial_keys);
        prop_assume!(keys.len() >= 3);
        prop_assume!(!keys.contains(&new_key));

        tokio_test::block_on(async {
            let cache = TtlCache::new(test_config(1, keys.len())).unwrap();
            for key in &keys {
                cache.set(key.clone(), format!("value_{}", key), None).await;
            }

            prop_assert!(cache.get(&keys[0]).await.is_some());
            cache.set(new_key.clone(), "new".to_string(), None).await;

            prop_assert!(cache.contains_key(&keys[0]), "Read key should survive eviction");
            prop_assert!(!cache.contains_key(&keys[1]), "Key '{}' should be evicted", keys[1]);
            prop_assert!(cache.contains_key(&new_key));
            cache.stop().await;
            Ok::<(), TestCaseError>(())
        })?;
    }

    // Growing the ring by one shard only moves keys onto the new shard.
    #[test]
    fn prop_ring_growth_moves_keys_to_new_shard(
        shards in 1usize..12,
        keys in prop::collection::vec(any::<u64>(), 1..200),
    ) {
        let before = HashRing::new(shards, 50);
        let after = HashRing::new(shards + 1, 50);

        for key in keys {
            let old = before.assign(&key);
            let new = after.assign(&key);
            prop_assert!(old < shards);
            prop_assert!(new == old || new == shards, "key {} moved {} -> {}", key, old, new);
        }
    }
}
