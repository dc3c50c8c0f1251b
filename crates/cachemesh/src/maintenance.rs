//! Background maintenance: expiry sweeps, latency refresh and the
//! periodic optimization pass.

use cachemesh_core::{CacheConfig, CacheError};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use crate::orchestrator::CacheOrchestrator;

/// Entries at or above this stored size are candidates for the
/// compression pass. Matches the codec's gzip threshold.
const COMPRESS_CANDIDATE_BYTES: usize = 10_000;

/// How often expired memory tier entries are actively reclaimed.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// How often latency summaries are recomputed even without traffic.
const MONITOR_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// How often the full optimization pass runs.
const OPTIMIZE_INTERVAL: Duration = Duration::from_secs(3600);

/// Outcome of one optimization pass.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeReport {
    pub expired_removed: usize,
    pub entries_compressed: usize,
    pub bytes_reclaimed: usize,
    pub memory_usage_ratio: f64,
    pub duration_ms: u64,
}

impl CacheOrchestrator {
    /// Runs one optimization pass: reclaims expired entries and
    /// retrofits compression onto large entries stored uncompressed.
    ///
    /// Best effort by contract. Entries that fail to re-encode are
    /// skipped and the pass always returns a report.
    pub async fn optimize_cache(&self) -> OptimizeReport {
        let started = Instant::now();
        let expired_removed = self.memory.sweep_expired();

        let mut entries_compressed = 0usize;
        let mut bytes_reclaimed = 0usize;

        for entry in self.memory.entries() {
            if entry.compressed || entry.encrypted || entry.size_bytes < COMPRESS_CANDIDATE_BYTES {
                continue;
            }

            let config = CacheConfig {
                ttl: entry.ttl,
                tags: entry.tags.iter().cloned().collect(),
                dependencies: entry.dependencies.iter().cloned().collect(),
                compression: true,
                encryption: false,
            };
            let encoded = match self.codec.encode(&entry.value, &config) {
                Ok(encoded) => encoded,
                Err(e) => {
                    tracing::debug!(key = %entry.key, error = %e, "re-encode failed, entry skipped");
                    continue;
                }
            };
            if encoded.len() >= entry.size_bytes {
                continue;
            }

            bytes_reclaimed += entry.size_bytes - encoded.len();
            entries_compressed += 1;

            // Keep the original creation time so the TTL clock does not
            // restart locally.
            let mut compacted = entry.clone();
            compacted.compressed = true;
            compacted.size_bytes = encoded.len();
            let key = compacted.key.clone();
            let ttl = compacted.ttl;
            self.memory.insert(compacted);

            match self
                .guarded(self.distributed.set_with_ttl(&key, &encoded, ttl))
                .await
            {
                Ok(()) | Err(CacheError::CircuitOpen) => {}
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "compacted entry not written to distributed tier");
                }
            }
        }

        let report = OptimizeReport {
            expired_removed,
            entries_compressed,
            bytes_reclaimed,
            memory_usage_ratio: self.memory.usage_ratio(),
            duration_ms: started.elapsed().as_millis() as u64,
        };
        tracing::info!(
            expired_removed = report.expired_removed,
            entries_compressed = report.entries_compressed,
            bytes_reclaimed = report.bytes_reclaimed,
            "cache optimization pass complete"
        );
        report
    }

    /// Spawns the periodic maintenance tasks: expiry sweep, latency
    /// summary refresh and the hourly optimization pass.
    ///
    /// The tasks run until their handles are aborted or the runtime
    /// shuts down.
    pub fn start_maintenance(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        let sweeper = {
            let cache = Arc::clone(&self);
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(SWEEP_INTERVAL).await;
                    let removed = cache.memory.sweep_expired();
                    if removed > 0 {
                        tracing::debug!(removed, "expired entries swept");
                    }
                }
            })
        };

        let refresher = {
            let cache = Arc::clone(&self);
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(MONITOR_REFRESH_INTERVAL).await;
                    cache.monitor.refresh();
                }
            })
        };

        let optimizer = {
            let cache = self;
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(OPTIMIZE_INTERVAL).await;
                    cache.optimize_cache().await;
                }
            })
        };

        vec![sweeper, refresher, optimizer]
    }
}
