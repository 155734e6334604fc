//! Background Tasks Module
//!
//! Contains background tasks that run for the lifetime of a cache.
//!
//! # Tasks
//! - TTL Cleanup: Sweeps expired entries from every shard at a fixed interval

mod cleanup;

pub use cleanup::{CleanupScheduler, SchedulerState, SweepReport};

pub(crate) use cleanup::sweep_all;
