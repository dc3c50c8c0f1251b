//! Multi-tier cache coordination engine.
//!
//! `cachemesh` fronts two cache tiers behind one facade: a bounded
//! in-process memory tier and a Redis-backed distributed tier. Writes
//! land in both; reads prefer memory and fall back to the distributed
//! tier, promoting hits. Every distributed call runs through a circuit
//! breaker, so a Redis outage degrades the cache to memory-only instead
//! of failing callers.
//!
//! Values are stored as self-describing tagged strings produced by
//! [`cachemesh_codec::ValueCodec`], with optional compression and
//! authenticated encryption per operation. Bulk invalidation works by
//! tag, by glob pattern and across instances via a pub/sub channel.
//!
//! ```no_run
//! use cachemesh::{CacheConfig, CacheOrchestrator, CacheSettings, Ttl};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn demo() -> cachemesh::CacheResult<()> {
//! let settings = CacheSettings::from_env()?;
//! let cache = Arc::new(CacheOrchestrator::connect(&settings)?);
//! cache.clone().start_maintenance();
//!
//! let config = CacheConfig::new(Ttl::seconds(300)?).with_tags(["user"]);
//! cache.set("user:42", json!({"name": "Ada"}), &config).await?;
//! let hit = cache.get("user:42", None).await?;
//! assert!(hit.is_some());
//!
//! cache.invalidate_by_tags(&["user".to_string()]).await?;
//! # Ok(())
//! # }
//! ```

pub mod invalidation;
pub mod maintenance;
pub mod orchestrator;
pub mod pubsub;
pub mod settings;

pub use invalidation::{InvalidationIndex, compile_glob};
pub use maintenance::OptimizeReport;
pub use orchestrator::{CacheOrchestrator, WarmUpEntry};
pub use pubsub::{INVALIDATION_CHANNEL, InvalidationEvent};
pub use settings::CacheSettings;

pub use cachemesh_codec::{EncryptionKey, ValueCodec};
pub use cachemesh_core::{
    CacheConfig, CacheEntry, CacheError, CacheHealth, CacheResult, CacheStats, HealthStatus,
    StatsSnapshot, Ttl,
};
pub use cachemesh_store::{
    BreakerState, CircuitBreaker, DistributedStore, DynDistributedStore, MemoryTier, RedisStore,
};
