//! The public cache facade.
//!
//! Composes the memory tier, the breaker-guarded distributed tier, the
//! value codec and the invalidation index. This is the error-absorption
//! boundary: tier failures are logged and degraded around, because a
//! cache outage must never break a read path that has a valid fallback.
//! Only factory errors, codec integrity errors and fail-closed
//! configuration errors propagate to callers.

use cachemesh_codec::ValueCodec;
use cachemesh_core::{
    CacheConfig, CacheEntry, CacheError, CacheHealth, CacheOp, CacheResult, CacheStats,
    HealthInputs, LatencyMonitor, StatsSnapshot,
};
use cachemesh_store::{BreakerState, CircuitBreaker, DynDistributedStore, MemoryTier, RedisStore};
use serde_json::{Value, json};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;

use crate::invalidation::{InvalidationIndex, compile_glob};
use crate::pubsub::{INVALIDATION_CHANNEL, InvalidationEvent};
use crate::settings::CacheSettings;

/// Key prefix under which dependency sets live in the distributed tier.
const DEPS_KEY_PREFIX: &str = "cache:deps:";

/// One entry of a warm-up batch.
#[derive(Debug, Clone)]
pub struct WarmUpEntry {
    pub key: String,
    pub value: Value,
    pub config: CacheConfig,
}

/// The multi-tier cache coordination engine.
///
/// Shared across callers behind an `Arc`; every method is safe under
/// concurrent use. There is no ordering guarantee between concurrent
/// `set` calls to the same key: last write by completion time wins in
/// each tier independently.
pub struct CacheOrchestrator {
    pub(crate) memory: MemoryTier,
    pub(crate) distributed: DynDistributedStore,
    pub(crate) breaker: CircuitBreaker,
    pub(crate) codec: ValueCodec,
    pub(crate) index: InvalidationIndex,
    pub(crate) stats: CacheStats,
    pub(crate) monitor: LatencyMonitor,
    default_config: CacheConfig,
}

impl CacheOrchestrator {
    /// Creates an orchestrator over an already-constructed distributed
    /// store.
    #[must_use]
    pub fn new(distributed: DynDistributedStore, settings: &CacheSettings) -> Self {
        Self {
            memory: MemoryTier::new(settings.memory_max_entries, settings.memory_max_bytes),
            distributed,
            breaker: CircuitBreaker::new(),
            codec: settings.codec(),
            index: InvalidationIndex::new(),
            stats: CacheStats::new(),
            monitor: LatencyMonitor::new(),
            default_config: CacheConfig::new(settings.default_ttl),
        }
    }

    /// Creates an orchestrator connected to the Redis distributed tier
    /// named by the settings.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Configuration` if the pool cannot be built
    /// from the configured URL. Reachability is not checked here; the
    /// breaker handles an unreachable backend at call time.
    pub fn connect(settings: &CacheSettings) -> CacheResult<Self> {
        let pool = deadpool_redis::Config::from_url(&settings.redis_url)
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .map_err(|e| CacheError::configuration(format!("failed to create redis pool: {e}")))?;
        let store =
            RedisStore::new(pool, &settings.redis_url).with_op_timeout(settings.op_timeout);
        Ok(Self::new(Arc::new(store), settings))
    }

    /// Replaces the breaker, mainly to shorten timings in tests.
    #[must_use]
    pub fn with_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = breaker;
        self
    }

    /// Runs one distributed tier call through the circuit breaker.
    pub(crate) async fn guarded<T, Fut>(&self, fut: Fut) -> CacheResult<T>
    where
        Fut: Future<Output = CacheResult<T>>,
    {
        if self.breaker.is_open() {
            return Err(CacheError::CircuitOpen);
        }
        match fut.await {
            Ok(value) => {
                self.breaker.record_success();
                Ok(value)
            }
            Err(e) => {
                if e.is_connection() {
                    self.breaker.record_failure();
                }
                Err(e)
            }
        }
    }

    /// Looks up a key: memory tier first, then the distributed tier if
    /// the breaker permits, populating the memory tier on an L2 hit.
    ///
    /// Ordinary misses and tier unavailability return `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Integrity violations in the stored value (tampered ciphertext,
    /// corrupted compressed data) are surfaced, not masked as misses.
    pub async fn get(
        &self,
        key: &str,
        config: Option<&CacheConfig>,
    ) -> CacheResult<Option<Arc<Value>>> {
        let started = Instant::now();
        let result = self.get_inner(key, config).await;
        self.monitor.record(CacheOp::Get, started.elapsed());

        match result {
            Ok(Some(value)) => {
                self.stats.record_hit();
                Ok(Some(value))
            }
            Ok(None) => {
                self.stats.record_miss();
                Ok(None)
            }
            Err(e) if e.is_absorbable() => {
                self.stats.record_error();
                self.stats.record_miss();
                tracing::error!(key = %key, error = %e, "get failed, treating as miss");
                Ok(None)
            }
            Err(e) => {
                self.stats.record_error();
                Err(e)
            }
        }
    }

    async fn get_inner(
        &self,
        key: &str,
        config: Option<&CacheConfig>,
    ) -> CacheResult<Option<Arc<Value>>> {
        if let Some(entry) = self.memory.get(key) {
            tracing::debug!(key = %key, "cache hit (L1)");
            return Ok(Some(entry.value));
        }

        let raw = match self.guarded(self.distributed.get(key)).await {
            Ok(raw) => raw,
            Err(CacheError::CircuitOpen) => {
                tracing::debug!(key = %key, "distributed tier skipped (circuit open)");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let Some(raw) = raw else {
            tracing::debug!(key = %key, "cache miss");
            return Ok(None);
        };

        tracing::debug!(key = %key, "cache hit (L2)");
        let value = Arc::new(self.codec.decode(&raw)?);

        // Promote to L1 under the caller's config, or the default TTL.
        let populate = config.unwrap_or(&self.default_config);
        self.memory
            .insert(CacheEntry::new(key, Arc::clone(&value), populate, raw.len()));

        Ok(Some(value))
    }

    /// Stores a value in both tiers and records its invalidation
    /// metadata.
    ///
    /// The memory tier write always lands; a distributed tier failure is
    /// logged and left as accepted degraded state, never rolled back.
    ///
    /// # Errors
    ///
    /// Propagates codec configuration errors (encryption requested
    /// without a key) and serialization failures.
    pub async fn set(&self, key: &str, value: Value, config: &CacheConfig) -> CacheResult<()> {
        let started = Instant::now();
        let result = self.set_inner(key, value, config).await;
        self.monitor.record(CacheOp::Set, started.elapsed());

        match &result {
            Ok(()) => self.stats.record_set(),
            Err(_) => self.stats.record_error(),
        }
        result
    }

    async fn set_inner(&self, key: &str, value: Value, config: &CacheConfig) -> CacheResult<()> {
        let encoded = self.codec.encode(&value, config)?;

        let entry = CacheEntry::new(key, Arc::new(value), config, encoded.len());
        let tags = entry.tags.clone();
        let deps = entry.dependencies.clone();
        self.memory.insert(entry);

        match self
            .guarded(self.distributed.set_with_ttl(key, &encoded, config.ttl))
            .await
        {
            Ok(()) => {}
            Err(CacheError::CircuitOpen) => {
                tracing::debug!(key = %key, "distributed write skipped (circuit open)");
            }
            Err(e) => {
                self.stats.record_error();
                tracing::warn!(key = %key, error = %e, "distributed write failed, memory-only entry");
            }
        }

        self.index.add_tag_membership(key, &tags);
        if !deps.is_empty() {
            self.index.add_dependencies(key, &deps);
            self.record_remote_dependencies(key, &deps).await;
        }

        Ok(())
    }

    /// Mirrors a dependency set into the distributed tier so other
    /// instances can see it.
    async fn record_remote_dependencies(&self, key: &str, deps: &HashSet<String>) {
        let members: Vec<String> = deps.iter().cloned().collect();
        let deps_key = format!("{DEPS_KEY_PREFIX}{key}");
        match self.guarded(self.distributed.sadd(&deps_key, &members)).await {
            Ok(()) | Err(CacheError::CircuitOpen) => {}
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "failed to record dependencies in distributed tier");
            }
        }
    }

    /// Removes a key from both tiers and the invalidation index.
    /// Idempotent: deleting an absent key is not an error.
    pub async fn delete(&self, key: &str) -> CacheResult<()> {
        self.memory.delete(key);

        let keys = [key.to_string()];
        match self.guarded(self.distributed.delete(&keys)).await {
            Ok(()) | Err(CacheError::CircuitOpen) => {}
            Err(e) => {
                self.stats.record_error();
                tracing::warn!(key = %key, error = %e, "distributed delete failed");
            }
        }

        self.index.cleanup(key);
        self.publish_event(InvalidationEvent::Key {
            key: key.to_string(),
        })
        .await;

        self.stats.record_delete();
        Ok(())
    }

    /// Cache-aside read: on miss, invoke `factory`, store its result and
    /// return it.
    ///
    /// No single-flight de-duplication is provided: concurrent misses for
    /// the same key may invoke the factory more than once.
    ///
    /// # Errors
    ///
    /// Factory errors propagate untouched, as do the `set` errors
    /// described on [`CacheOrchestrator::set`].
    pub async fn get_or_set<F, Fut>(
        &self,
        key: &str,
        factory: F,
        config: &CacheConfig,
    ) -> CacheResult<Arc<Value>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<Value>>,
    {
        if let Some(value) = self.get(key, Some(config)).await? {
            return Ok(value);
        }

        let value = factory().await?;
        self.set(key, value.clone(), config).await?;
        Ok(Arc::new(value))
    }

    /// Deletes every key recorded under each tag, from both tiers.
    /// Returns the number of keys invalidated.
    pub async fn invalidate_by_tags(&self, tags: &[String]) -> CacheResult<u64> {
        let mut count = 0u64;
        for tag in tags {
            let keys = self.index.take_tag(tag);
            for key in &keys {
                self.memory.delete(key);
                self.index.cleanup(key);
            }
            if !keys.is_empty() {
                match self.guarded(self.distributed.delete(&keys)).await {
                    Ok(()) | Err(CacheError::CircuitOpen) => {}
                    Err(e) => {
                        self.stats.record_error();
                        tracing::warn!(tag = %tag, error = %e, "distributed tag invalidation failed");
                    }
                }
            }
            count += keys.len() as u64;
            self.publish_event(InvalidationEvent::Tag { tag: tag.clone() })
                .await;
            tracing::debug!(tag = %tag, invalidated = keys.len(), "tag invalidated");
        }
        self.stats.record_invalidations(count);
        Ok(count)
    }

    /// Deletes every key matching a glob (`*`, `?`) from both tiers,
    /// unioning memory tier keys with the distributed tier's own pattern
    /// query. Returns the number of keys invalidated.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Configuration` for an uncompilable pattern.
    pub async fn invalidate_by_pattern(&self, pattern: &str) -> CacheResult<u64> {
        let regex = compile_glob(pattern)?;

        let mut keys: HashSet<String> = self
            .memory
            .keys()
            .into_iter()
            .filter(|key| regex.is_match(key))
            .collect();

        match self.guarded(self.distributed.keys_matching(pattern)).await {
            Ok(remote) => keys.extend(remote),
            Err(CacheError::CircuitOpen) => {
                tracing::debug!(pattern = %pattern, "distributed pattern scan skipped (circuit open)");
            }
            Err(e) => {
                self.stats.record_error();
                tracing::warn!(pattern = %pattern, error = %e, "distributed pattern scan failed");
            }
        }

        let keys: Vec<String> = keys.into_iter().collect();
        for key in &keys {
            self.memory.delete(key);
            self.index.cleanup(key);
        }
        if !keys.is_empty() {
            match self.guarded(self.distributed.delete(&keys)).await {
                Ok(()) | Err(CacheError::CircuitOpen) => {}
                Err(e) => {
                    self.stats.record_error();
                    tracing::warn!(pattern = %pattern, error = %e, "distributed pattern invalidation failed");
                }
            }
        }

        self.publish_event(InvalidationEvent::Pattern {
            pattern: pattern.to_string(),
        })
        .await;

        let count = keys.len() as u64;
        self.stats.record_invalidations(count);
        tracing::debug!(pattern = %pattern, invalidated = count, "pattern invalidated");
        Ok(count)
    }

    /// Bulk pre-population. Partial failures are logged per entry, never
    /// aggregated into a batch failure. Returns how many entries loaded.
    pub async fn warm_up(&self, entries: Vec<WarmUpEntry>) -> u64 {
        let total = entries.len();
        let mut loaded = 0u64;
        for entry in entries {
            match self.set(&entry.key, entry.value, &entry.config).await {
                Ok(()) => loaded += 1,
                Err(e) => {
                    tracing::warn!(key = %entry.key, error = %e, "warm-up entry failed");
                }
            }
        }
        tracing::info!(loaded, total, "cache warm-up complete");
        loaded
    }

    /// Empties both tiers and resets statistics and the invalidation
    /// index. Full reset only: tests, emergency flush.
    pub async fn clear(&self) {
        self.memory.clear();
        self.index.clear();

        let flush = self.guarded(async {
            let keys = self.distributed.keys_matching("*").await?;
            self.distributed.delete(&keys).await
        });
        match flush.await {
            Ok(()) | Err(CacheError::CircuitOpen) => {}
            Err(e) => tracing::warn!(error = %e, "distributed tier flush failed"),
        }

        self.stats.reset();
        tracing::info!("cache cleared");
    }

    /// Read-only health snapshot. Always succeeds.
    pub async fn cache_health(&self) -> CacheHealth {
        // An open breaker already means the tier is not usable; probing
        // would only consume the half-open budget.
        let distributed_reachable = match self.breaker.state() {
            BreakerState::Open => false,
            _ => self.distributed.ping().await.is_ok(),
        };

        let inputs = HealthInputs {
            distributed_reachable,
            error_rate: self.stats.error_rate(),
            memory_usage_ratio: self.memory.usage_ratio(),
        };

        self.monitor
            .evaluate(inputs)
            .with_detail(
                "breaker",
                serde_json::to_value(self.breaker.snapshot()).unwrap_or(Value::Null),
            )
            .with_detail("memoryEntries", json!(self.memory.len()))
            .with_detail("memoryBytes", json!(self.memory.total_bytes()))
            .with_detail("backend", json!(self.distributed.backend_name()))
    }

    /// Read-only statistics snapshot. Always succeeds.
    #[must_use]
    pub fn cache_stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Subscribes to the invalidation channel and applies remote
    /// invalidations to the local tier for as long as the task runs.
    ///
    /// # Errors
    ///
    /// Returns a connection error if the initial subscription cannot be
    /// established.
    pub async fn start_invalidation_listener(self: Arc<Self>) -> CacheResult<JoinHandle<()>> {
        let mut rx = self.distributed.subscribe(INVALIDATION_CHANNEL).await?;
        let cache = self;
        Ok(tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                match InvalidationEvent::from_payload(&payload) {
                    Ok(event) => {
                        tracing::debug!(?event, "received remote invalidation");
                        cache.apply_remote_invalidation(event);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "malformed invalidation envelope");
                    }
                }
            }
            tracing::info!("invalidation listener stopped");
        }))
    }

    /// Applies an invalidation received from another instance to local
    /// state only. Never re-publishes, so events cannot loop.
    pub(crate) fn apply_remote_invalidation(&self, event: InvalidationEvent) {
        match event {
            InvalidationEvent::Key { key } => {
                self.memory.delete(&key);
                self.index.cleanup(&key);
            }
            InvalidationEvent::Tag { tag } => {
                for key in self.index.take_tag(&tag) {
                    self.memory.delete(&key);
                    self.index.cleanup(&key);
                }
            }
            InvalidationEvent::Pattern { pattern } => match compile_glob(&pattern) {
                Ok(regex) => {
                    for key in self
                        .memory
                        .keys()
                        .into_iter()
                        .filter(|key| regex.is_match(key))
                    {
                        self.memory.delete(&key);
                        self.index.cleanup(&key);
                    }
                }
                Err(e) => {
                    tracing::warn!(pattern = %pattern, error = %e, "unusable remote pattern");
                }
            },
        }
    }

    async fn publish_event(&self, event: InvalidationEvent) {
        let payload = match event.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize invalidation event");
                return;
            }
        };
        match self
            .guarded(self.distributed.publish(INVALIDATION_CHANNEL, &payload))
            .await
        {
            Ok(()) | Err(CacheError::CircuitOpen) => {}
            Err(e) => tracing::warn!(error = %e, "failed to publish invalidation"),
        }
    }
}
