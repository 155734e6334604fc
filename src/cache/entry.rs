//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with TTL and recency metadata.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;

// == Cache Entry ==
/// Represents a single cache entry with value and metadata.
///
/// The value, creation time and TTL are fixed once written; an overwrite
/// replaces the whole entry. Only the access tick moves, and it moves
/// through an atomic so readers can bump it under a shared guard.
#[derive(Debug)]
pub struct CacheEntry<V> {
    /// The stored value
    value: V,
    /// Time the entry was written
    created_at: Instant,
    /// Lifetime measured from `created_at`
    ttl: Duration,
    /// Tick of the owning shard's access clock at the last read or write
    last_accessed: AtomicU64,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Creates a new cache entry written now.
    ///
    /// # Arguments
    /// * `value` - The value to store
    /// * `ttl` - Lifetime of the entry
    /// * `tick` - Current tick of the shard's access clock
    pub fn new(value: V, ttl: Duration, tick: u64) -> Self {
        Self::written_at(value, Instant::now(), ttl, tick)
    }

    /// Creates an entry with an explicit creation time.
    pub fn written_at(value: V, created_at: Instant, ttl: Duration, tick: u64) -> Self {
        Self {
            value,
            created_at,
            ttl,
            last_accessed: AtomicU64::new(tick),
        }
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    // == Is Expired ==
    /// Checks if the entry has expired at `now`.
    ///
    /// An entry is expired once strictly more than `ttl` has elapsed since it
    /// was written.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > self.ttl
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    // == Time To Live ==
    /// Returns the remaining lifetime at `now`, zero once expired.
    pub fn ttl_remaining_at(&self, now: Instant) -> Duration {
        self.ttl
            .saturating_sub(now.saturating_duration_since(self.created_at))
    }

    // == Recency ==
    /// Access tick of the most recent read or write.
    pub fn last_accessed(&self) -> u64 {
        self.last_accessed.load(Ordering::Relaxed)
    }

    /// Records an access. Ticks never move backwards, even when concurrent
    /// readers store out of order.
    pub fn touch(&self, tick: u64) {
        self.last_accessed.fetch_max(tick, Ordering::Relaxed);
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entry_creation() {
        let entry = CacheEntry::new("test_value".to_string(), Duration::from_secs(60), 1);

        assert_eq!(entry.value(), "test_value");
        assert_eq!(entry.ttl(), Duration::from_secs(60));
        assert_eq!(entry.last_accessed(), 1);
        assert!(!entry.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expiration() {
        let entry = CacheEntry::new("test_value", Duration::from_secs(1), 1);

        tokio::time::advance(Duration::from_millis(900)).await;
        assert!(!entry.is_expired());

        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(entry.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiration_boundary_condition() {
        let entry = CacheEntry::new("test", Duration::from_secs(1), 1);
        let boundary = entry.created_at() + Duration::from_secs(1);

        // Exactly `ttl` elapsed is still live; strictly more is expired
        assert!(!entry.is_expired_at(boundary));
        assert!(entry.is_expired_at(boundary + Duration::from_nanos(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_remaining() {
        let entry = CacheEntry::new("test", Duration::from_secs(10), 1);

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(entry.ttl_remaining_at(Instant::now()), Duration::from_secs(6));

        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(entry.ttl_remaining_at(Instant::now()), Duration::ZERO);
    }

    #[test]
    fn test_touch_never_moves_backwards() {
        let entry = CacheEntry::written_at((), Instant::now(), Duration::from_secs(1), 5);

        entry.touch(9);
        entry.touch(7);

        assert_eq!(entry.last_accessed(), 9);
    }
}
