//! Cache Module
//!
//! Sharded in-memory caching with TTL expiration, LRU bounds, per-key
//! locking and single-flight loading.

mod bounds;
mod entry;
mod locks;
mod lru;
mod metrics;
mod ring;
mod shard;
mod stampede;
mod store;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use bounds::{inline_size_weigher, BoundsEnforcer, Weigher, MEMORY_SAMPLE_EVERY};
pub use entry::CacheEntry;
pub use locks::{KeyLockGuard, KeyLockManager};
pub use lru::AccessClock;
pub use metrics::{
    DurationHistogram, HistogramSnapshot, MetricsRecorder, MetricsSnapshot, SWEEP_BUCKETS_MS,
};
pub use ring::HashRing;
pub use shard::{Lookup, Shard};
pub use stampede::{Flight, LoadFuture, StampedeGuard};
pub use store::TtlCache;

pub(crate) use store::CacheInner;
