//! Key Lock Module
//!
//! Hands out per-key async mutexes on demand and reclaims them once unused.

use std::hash::Hash;
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

struct LockSlot {
    mutex: Arc<AsyncMutex<()>>,
    /// Guards holding or waiting on this mutex
    refs: usize,
}

// == Key Lock Manager ==
/// Per-shard registry of per-key locks.
///
/// A slot exists only while some guard holds or awaits it, so the registry
/// never grows with cold keys.
pub struct KeyLockManager<K> {
    slots: Mutex<AHashMap<K, LockSlot>>,
}

impl<K: Hash + Eq + Clone> KeyLockManager<K> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(AHashMap::new()),
        }
    }

    // == Acquire ==
    /// Locks `key`, waiting for any current holder.
    ///
    /// Cancelling the returned future before it resolves releases the
    /// reservation, so an abandoned waiter never leaks a slot.
    pub async fn acquire(&self, key: &K) -> KeyLockGuard<'_, K> {
        let mutex = {
            let mut slots = self.slots.lock();
            let slot = slots.entry(key.clone()).or_insert_with(|| LockSlot {
                mutex: Arc::new(AsyncMutex::new(())),
                refs: 0,
            });
            slot.refs += 1;
            Arc::clone(&slot.mutex)
        };

        let mut guard = KeyLockGuard {
            manager: self,
            key: key.clone(),
            held: None,
            contended: false,
        };
        match Arc::clone(&mutex).try_lock_owned() {
            Ok(held) => guard.held = Some(held),
            Err(_) => {
                guard.contended = true;
                guard.held = Some(mutex.lock_owned().await);
            }
        }
        guard
    }

    /// Number of keys with a live lock slot.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    fn release(&self, key: &K) {
        let mut slots = self.slots.lock();
        let unused = match slots.get_mut(key) {
            Some(slot) => {
                slot.refs -= 1;
                slot.refs == 0
            }
            None => false,
        };
        if unused {
            slots.remove(key);
        }
    }
}

impl<K: Hash + Eq + Clone> Default for KeyLockManager<K> {
    fn default() -> Self {
        Self::new()
    }
}

// == Key Lock Guard ==
/// Exclusive hold on one key of a shard. Dropping it unlocks the key.
pub struct KeyLockGuard<'a, K: Hash + Eq + Clone> {
    manager: &'a KeyLockManager<K>,
    key: K,
    held: Option<OwnedMutexGuard<()>>,
    contended: bool,
}

impl<K: Hash + Eq + Clone> KeyLockGuard<'_, K> {
    /// True if the key was already locked when this guard asked for it.
    pub fn was_contended(&self) -> bool {
        self.contended
    }
}

impl<K: Hash + Eq + Clone> Drop for KeyLockGuard<'_, K> {
    fn drop(&mut self) {
        // Unlock before releasing the slot so the next waiter runs
        self.held.take();
        self.manager.release(&self.key);
    }
}
