//! Sharded TTL Cache - A concurrent in-process cache engine
//!
//! Partitions keys over shards with consistent hashing and provides TTL
//! expiration, LRU bounds, per-key locking and single-flight loading.

pub mod cache;
pub mod config;
pub mod error;
pub mod tasks;

pub use cache::{MetricsSnapshot, TtlCache};
pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use tasks::{SchedulerState, SweepReport};
