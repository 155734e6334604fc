//! Shard Module
//!
//! One partition of the key space: its entries, recency clock, bounds,
//! per-key locks and the structural lock used by bulk operations.

use std::hash::Hash;
use std::time::Duration;

use ahash::AHashMap;
use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;

use crate::cache::bounds::{BoundsEnforcer, Weigher};
use crate::cache::entry::CacheEntry;
use crate::cache::locks::KeyLockManager;
use crate::cache::lru::{self, AccessClock};

/// Outcome of a lookup made while holding the key's lock.
#[derive(Debug, PartialEq, Eq)]
pub enum Lookup<V> {
    Hit(V),
    /// The entry had expired and has been removed
    Expired,
    Missing,
}

// == Shard ==
/// A partition of the cache with its own locks.
///
/// `entries` sits behind a synchronous lock that is held only for the
/// duration of a map operation, never across an await. Logical exclusion
/// comes from the two async locks: `key_locks` for single-key operations
/// and `structure_lock` for bulk operations (sweep, eviction, clear).
pub struct Shard<K, V> {
    index: usize,
    entries: RwLock<AHashMap<K, CacheEntry<V>>>,
    clock: AccessClock,
    bounds: BoundsEnforcer,
    pub(crate) key_locks: KeyLockManager<K>,
    pub(crate) structure_lock: AsyncMutex<()>,
}

impl<K, V> Shard<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    // == Constructor ==
    pub fn new(index: usize, bounds: BoundsEnforcer) -> Self {
        Self {
            index,
            entries: RwLock::new(AHashMap::new()),
            clock: AccessClock::new(),
            bounds,
            key_locks: KeyLockManager::new(),
            structure_lock: AsyncMutex::new(()),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn bounds(&self) -> &BoundsEnforcer {
        &self.bounds
    }

    // == Optimistic Read ==
    /// Reads a live entry without any cache lock and bumps its recency.
    ///
    /// Returns `None` for absent and expired entries alike; the caller
    /// settles those under the key's lock.
    pub fn read_optimistic(&self, key: &K) -> Option<V> {
        let entries = self.entries.read();
        let entry = entries.get(key)?;
        if entry.is_expired_at(Instant::now()) {
            return None;
        }
        entry.touch(self.clock.tick());
        Some(entry.value().clone())
    }

    // == Locked Read ==
    /// Re-checks `key`; the caller must hold the key's lock.
    ///
    /// An expired entry is removed here, so expiry is enforced even when no
    /// sweep has run.
    pub fn read_locked(&self, key: &K) -> Lookup<V> {
        let entries = self.entries.upgradable_read();
        match entries.get(key) {
            None => return Lookup::Missing,
            Some(entry) if !entry.is_expired_at(Instant::now()) => {
                entry.touch(self.clock.tick());
                return Lookup::Hit(entry.value().clone());
            }
            Some(_) => {}
        }
        let mut entries = RwLockUpgradableReadGuard::upgrade(entries);
        entries.remove(key);
        Lookup::Expired
    }

    /// Expiry-aware presence check that leaves recency untouched.
    pub fn contains_live(&self, key: &K) -> bool {
        self.entries
            .read()
            .get(key)
            .is_some_and(|entry| !entry.is_expired_at(Instant::now()))
    }

    /// Remaining lifetime of a live entry.
    pub fn ttl_remaining(&self, key: &K) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .read()
            .get(key)
            .filter(|entry| !entry.is_expired_at(now))
            .map(|entry| entry.ttl_remaining_at(now))
    }

    // == Insert ==
    /// Writes or replaces `key`; the caller must hold the key's lock.
    ///
    /// Returns true if an existing entry was replaced.
    pub fn insert(&self, key: K, value: V, ttl: Duration, weigher: &Weigher<K, V>) -> bool {
        self.bounds.observe_write(&key, &value, weigher);
        let entry = CacheEntry::new(value, ttl, self.clock.tick());
        self.entries.write().insert(key, entry).is_some()
    }

    // == Remove ==
    /// Removes `key`; the caller must hold the key's lock.
    pub fn remove(&self, key: &K) -> bool {
        self.entries.write().remove(key).is_some()
    }

    // == Bounds ==
    /// True if the shard currently holds more than its bounds allow.
    pub fn over_bounds(&self) -> bool {
        self.bounds.is_exceeded(self.len())
    }

    // == Evict LRU ==
    /// Evicts least recently used entries until the shard is within bounds,
    /// never touching `protect`. The caller must hold the structure lock.
    ///
    /// Returns the number of entries evicted.
    pub fn evict_lru(&self, protect: &K) -> usize {
        let mut entries = self.entries.write();
        let excess = self.bounds.excess(entries.len());
        if excess == 0 {
            return 0;
        }

        let victims = lru::least_recent(
            entries
                .iter()
                .filter(|(key, _)| *key != protect)
                .map(|(key, entry)| (key, entry.last_accessed())),
            excess,
        );
        for key in &victims {
            entries.remove(key);
        }
        victims.len()
    }

    // == Remove Expired ==
    /// Drops every entry expired at `now`. The caller must hold the
    /// structure lock.
    ///
    /// Returns the number of entries removed.
    pub fn remove_expired(&self, now: Instant) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired_at(now));
        before - entries.len()
    }

    // == Clear ==
    /// Empties the shard and its bounds bookkeeping. The caller must hold
    /// the structure lock.
    pub fn clear(&self) {
        self.entries.write().clear();
        self.bounds.reset();
    }

    // == Length ==
    /// Number of stored entries, including expired ones not yet removed.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
