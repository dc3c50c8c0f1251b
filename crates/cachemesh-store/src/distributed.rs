//! The distributed (L2) tier: an async trait boundary plus the Redis
//! implementation.
//!
//! Every call is a network operation that may fail or time out. This tier
//! never guards itself; the circuit breaker owns failure isolation and
//! sits in front of every call the orchestrator makes.

use async_trait::async_trait;
use cachemesh_core::{CacheError, CacheResult, Ttl};
use deadpool_redis::Pool;
use redis::AsyncCommands;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Default bound on any single distributed tier call.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(2);

/// Buffer size of the subscription channel handed to consumers.
const SUBSCRIBE_BUFFER: usize = 64;

/// Contract of the shared backing store.
///
/// Implementations must be thread-safe (`Send + Sync`). Errors are
/// surfaced raw; callers decide what a failure means.
#[async_trait]
pub trait DistributedStore: Send + Sync {
    /// Fetches the raw encoded value for a key.
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Writes a raw encoded value with the entry's TTL.
    async fn set_with_ttl(&self, key: &str, raw: &str, ttl: Ttl) -> CacheResult<()>;

    /// Deletes one or more keys. Deleting absent keys is not an error.
    async fn delete(&self, keys: &[String]) -> CacheResult<()>;

    /// Returns all keys matching a store-native glob pattern.
    async fn keys_matching(&self, pattern: &str) -> CacheResult<Vec<String>>;

    /// Adds members to the set stored at `key`.
    async fn sadd(&self, key: &str, members: &[String]) -> CacheResult<()>;

    /// Publishes a message on a pub/sub channel.
    async fn publish(&self, channel: &str, payload: &str) -> CacheResult<()>;

    /// Subscribes to a pub/sub channel.
    ///
    /// Messages arrive on the returned channel. The subscription lives
    /// until the receiver is dropped; implementations reconnect on their
    /// own after transient failures.
    async fn subscribe(&self, channel: &str) -> CacheResult<mpsc::Receiver<String>>;

    /// Cheap reachability probe for health checks.
    async fn ping(&self) -> CacheResult<()>;

    /// Name of this backend for logging/debugging.
    fn backend_name(&self) -> &'static str;
}

/// Shared handle to a distributed store implementation.
pub type DynDistributedStore = Arc<dyn DistributedStore>;

/// Redis-backed distributed tier over a deadpool connection pool.
///
/// Every command is wrapped in a per-call timeout so a stalled backend
/// cannot hang the calling task; a timeout surfaces as a connection error
/// and feeds the circuit breaker like any other failure.
pub struct RedisStore {
    pool: Pool,
    /// Used to open dedicated pub/sub connections outside the pool.
    redis_url: String,
    op_timeout: Duration,
}

impl RedisStore {
    #[must_use]
    pub fn new(pool: Pool, redis_url: impl Into<String>) -> Self {
        Self {
            pool,
            redis_url: redis_url.into(),
            op_timeout: DEFAULT_OP_TIMEOUT,
        }
    }

    /// Overrides the per-call timeout.
    #[must_use]
    pub fn with_op_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> CacheResult<T>
    where
        F: Future<Output = Result<T, redis::RedisError>> + Send,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(CacheError::connection(format!("redis {op} error: {e}"))),
            Err(_) => Err(CacheError::connection(format!(
                "redis {op} timed out after {:?}",
                self.op_timeout
            ))),
        }
    }

    async fn connection(&self) -> CacheResult<deadpool_redis::Connection> {
        match tokio::time::timeout(self.op_timeout, self.pool.get()).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(CacheError::connection(format!(
                "redis connection error: {e}"
            ))),
            Err(_) => Err(CacheError::connection("redis connection acquire timed out")),
        }
    }
}

#[async_trait]
impl DistributedStore for RedisStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.connection().await?;
        self.bounded("GET", conn.get::<_, Option<String>>(key)).await
    }

    async fn set_with_ttl(&self, key: &str, raw: &str, ttl: Ttl) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        match ttl.as_secs() {
            Some(secs) => {
                self.bounded("SETEX", conn.set_ex::<_, _, ()>(key, raw, secs))
                    .await
            }
            None => self.bounded("SET", conn.set::<_, _, ()>(key, raw)).await,
        }
    }

    async fn delete(&self, keys: &[String]) -> CacheResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection().await?;
        self.bounded("DEL", conn.del::<_, ()>(keys)).await
    }

    async fn keys_matching(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let mut conn = self.connection().await?;
        self.bounded("KEYS", conn.keys::<_, Vec<String>>(pattern))
            .await
    }

    async fn sadd(&self, key: &str, members: &[String]) -> CacheResult<()> {
        if members.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection().await?;
        self.bounded("SADD", conn.sadd::<_, _, ()>(key, members))
            .await
    }

    async fn publish(&self, channel: &str, payload: &str) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        self.bounded("PUBLISH", conn.publish::<_, _, ()>(channel, payload))
            .await
    }

    async fn subscribe(&self, channel: &str) -> CacheResult<mpsc::Receiver<String>> {
        let (tx, rx) = mpsc::channel(SUBSCRIBE_BUFFER);
        let redis_url = self.redis_url.clone();
        let channel = channel.to_string();

        tokio::spawn(async move {
            let mut backoff = Duration::from_secs(1);
            const MAX_BACKOFF: Duration = Duration::from_secs(300);

            loop {
                match run_subscription(&redis_url, &channel, &tx).await {
                    Ok(()) => {
                        // Receiver dropped, subscription is over.
                        return;
                    }
                    Err(e) => {
                        if tx.is_closed() {
                            return;
                        }
                        tracing::error!(
                            channel = %channel,
                            error = %e,
                            backoff_secs = backoff.as_secs(),
                            "subscription lost, reconnecting"
                        );
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        self.bounded(
            "PING",
            redis::cmd("PING").query_async::<()>(&mut *conn),
        )
        .await
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

/// One subscription session over a dedicated pub/sub client.
///
/// Returns `Ok(())` when the receiver side was dropped, `Err` on any
/// connection problem so the caller can reconnect.
async fn run_subscription(
    redis_url: &str,
    channel: &str,
    tx: &mpsc::Sender<String>,
) -> Result<(), String> {
    use futures_util::StreamExt;

    let client = redis::Client::open(redis_url)
        .map_err(|e| format!("failed to create Redis client: {e}"))?;

    let mut pubsub = client
        .get_async_pubsub()
        .await
        .map_err(|e| format!("failed to get pub/sub connection: {e}"))?;

    pubsub
        .subscribe(channel)
        .await
        .map_err(|e| format!("failed to subscribe: {e}"))?;

    tracing::info!(channel = %channel, "subscribed");

    let mut stream = pubsub.on_message();
    loop {
        match stream.next().await {
            Some(msg) => match msg.get_payload::<String>() {
                Ok(payload) => {
                    if tx.send(payload).await.is_err() {
                        return Ok(());
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to parse pub/sub payload");
                }
            },
            None => return Err("pub/sub connection closed".to_string()),
        }
    }
}
