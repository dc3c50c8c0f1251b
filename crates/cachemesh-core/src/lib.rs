//! Core types and utilities for the cachemesh cache engine.
//!
//! This crate carries everything the tier, codec and facade crates share:
//! - the cache entry / TTL / per-operation configuration model
//! - the `CacheError` taxonomy and `CacheResult` alias
//! - monotonic operation counters (`CacheStats`)
//! - latency sampling, percentile computation and health aggregation

pub mod entry;
pub mod error;
pub mod monitoring;
pub mod stats;

pub use entry::{CacheConfig, CacheEntry, Ttl};
pub use error::{CacheError, ErrorCategory};
pub use monitoring::{
    CacheHealth, CacheOp, HealthInputs, HealthStatus, LatencyMonitor, LatencySummary,
};
pub use stats::{CacheStats, StatsSnapshot};

/// Result type for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;
