//! Latency sampling, percentile computation and health aggregation.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use time::OffsetDateTime;

/// Maximum number of latency samples retained per operation.
const SAMPLE_CAPACITY: usize = 1000;

/// Number of samples between recomputations of mean/p95.
const RECOMPUTE_INTERVAL: usize = 100;

/// Error rate above which the cache is considered critical.
const ERROR_RATE_CRITICAL: f64 = 0.05;

/// Memory usage ratio above which the cache is considered degraded.
const MEMORY_USAGE_DEGRADED: f64 = 0.90;

/// Average get latency (ms) above which the cache is considered degraded.
const AVG_GET_LATENCY_DEGRADED_MS: f64 = 100.0;

/// 95th-percentile get latency (ms) above which the cache is degraded.
const P95_GET_LATENCY_DEGRADED_MS: f64 = 500.0;

/// Which operation a latency sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOp {
    Get,
    Set,
}

/// Aggregate health status of the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
}

/// Mean/p95 summary for one operation's latency samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LatencySummary {
    pub mean_ms: f64,
    pub p95_ms: f64,
    pub samples: usize,
}

/// Inputs the orchestrator feeds into health aggregation.
#[derive(Debug, Clone, Copy)]
pub struct HealthInputs {
    /// Whether the distributed tier answered its last reachability probe.
    pub distributed_reachable: bool,
    /// Fraction of operations that errored.
    pub error_rate: f64,
    /// Memory tier bytes used over the byte ceiling.
    pub memory_usage_ratio: f64,
}

/// A serializable health snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheHealth {
    pub status: HealthStatus,
    #[serde(rename = "degradedSince", skip_serializing_if = "Option::is_none")]
    pub degraded_since: Option<OffsetDateTime>,
    pub distributed_reachable: bool,
    pub error_rate: f64,
    pub memory_usage_ratio: f64,
    pub get_latency: LatencySummary,
    pub set_latency: LatencySummary,
    pub details: HashMap<String, serde_json::Value>,
}

impl CacheHealth {
    /// Attaches an extra detail (breaker state, tier entry counts, ...).
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthStatus::Healthy)
    }

    #[must_use]
    pub fn is_critical(&self) -> bool {
        matches!(self.status, HealthStatus::Critical)
    }
}

#[derive(Debug, Default)]
struct SampleBuffer {
    samples: VecDeque<f64>,
    since_recompute: usize,
    mean_ms: f64,
    p95_ms: f64,
}

impl SampleBuffer {
    fn record(&mut self, latency_ms: f64) {
        if self.samples.len() == SAMPLE_CAPACITY {
            self.samples.pop_front();
        }
        self.samples.push_back(latency_ms);
        self.since_recompute += 1;
        if self.since_recompute >= RECOMPUTE_INTERVAL {
            self.recompute();
            self.since_recompute = 0;
        }
    }

    /// Sort-then-index percentile: p95 is `sorted[floor(n * 0.95)]`.
    fn recompute(&mut self) {
        if self.samples.is_empty() {
            self.mean_ms = 0.0;
            self.p95_ms = 0.0;
            return;
        }
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        self.mean_ms = sorted.iter().sum::<f64>() / sorted.len() as f64;
        let idx = ((sorted.len() as f64) * 0.95).floor() as usize;
        self.p95_ms = sorted[idx.min(sorted.len() - 1)];
    }

    fn summary(&self) -> LatencySummary {
        LatencySummary {
            mean_ms: self.mean_ms,
            p95_ms: self.p95_ms,
            samples: self.samples.len(),
        }
    }
}

/// Latency monitor with bounded FIFO sample buffers for get and set.
///
/// Mean and 95th percentile are recomputed every `RECOMPUTE_INTERVAL`
/// samples rather than on every read, keeping the record path cheap enough
/// for the hot get/set paths.
#[derive(Debug, Default)]
pub struct LatencyMonitor {
    get: Mutex<SampleBuffer>,
    set: Mutex<SampleBuffer>,
    degraded_since: Mutex<Option<OffsetDateTime>>,
}

impl LatencyMonitor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one operation latency.
    pub fn record(&self, op: CacheOp, latency: Duration) {
        let latency_ms = latency.as_secs_f64() * 1000.0;
        let buffer = match op {
            CacheOp::Get => &self.get,
            CacheOp::Set => &self.set,
        };
        if let Ok(mut buffer) = buffer.lock() {
            buffer.record(latency_ms);
        }
    }

    /// Returns the last computed summary for one operation.
    #[must_use]
    pub fn summary(&self, op: CacheOp) -> LatencySummary {
        let buffer = match op {
            CacheOp::Get => &self.get,
            CacheOp::Set => &self.set,
        };
        buffer
            .lock()
            .map(|buffer| buffer.summary())
            .unwrap_or_default()
    }

    /// Forces a recomputation of both summaries, used by the periodic
    /// statistics refresh so summaries do not go stale on quiet caches.
    pub fn refresh(&self) {
        for buffer in [&self.get, &self.set] {
            if let Ok(mut buffer) = buffer.lock() {
                buffer.recompute();
                buffer.since_recompute = 0;
            }
        }
    }

    /// Aggregates a health snapshot from the current summaries and inputs.
    ///
    /// `degraded_since` is set on the first transition away from healthy
    /// and cleared when the cache returns to healthy.
    #[must_use]
    pub fn evaluate(&self, inputs: HealthInputs) -> CacheHealth {
        let get_latency = self.summary(CacheOp::Get);
        let set_latency = self.summary(CacheOp::Set);

        let status = if !inputs.distributed_reachable || inputs.error_rate > ERROR_RATE_CRITICAL {
            HealthStatus::Critical
        } else if inputs.memory_usage_ratio > MEMORY_USAGE_DEGRADED
            || get_latency.mean_ms > AVG_GET_LATENCY_DEGRADED_MS
            || get_latency.p95_ms > P95_GET_LATENCY_DEGRADED_MS
        {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        let degraded_since = match self.degraded_since.lock() {
            Ok(mut since) => {
                if status == HealthStatus::Healthy {
                    *since = None;
                } else if since.is_none() {
                    *since = Some(OffsetDateTime::now_utc());
                }
                *since
            }
            Err(_) => None,
        };

        CacheHealth {
            status,
            degraded_since,
            distributed_reachable: inputs.distributed_reachable,
            error_rate: inputs.error_rate,
            memory_usage_ratio: inputs.memory_usage_ratio,
            get_latency,
            set_latency,
            details: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn healthy_inputs() -> HealthInputs {
        HealthInputs {
            distributed_reachable: true,
            error_rate: 0.0,
            memory_usage_ratio: 0.1,
        }
    }

    #[test]
    fn test_p95_matches_sort_then_index() {
        let monitor = LatencyMonitor::new();
        // 100 samples: 10, 20, ..., 1000 ms.
        for i in 1..=100u64 {
            monitor.record(CacheOp::Get, Duration::from_millis(i * 10));
        }

        let summary = monitor.summary(CacheOp::Get);
        assert_eq!(summary.samples, 100);
        // sorted[floor(100 * 0.95)] = sorted[95] = 960
        assert_eq!(summary.p95_ms, 960.0);
        assert_eq!(summary.mean_ms, 505.0);
    }

    #[test]
    fn test_buffer_is_bounded() {
        let monitor = LatencyMonitor::new();
        for _ in 0..(SAMPLE_CAPACITY + 500) {
            monitor.record(CacheOp::Set, Duration::from_millis(5));
        }
        assert_eq!(monitor.summary(CacheOp::Set).samples, SAMPLE_CAPACITY);
    }

    #[test]
    fn test_summaries_recompute_on_interval() {
        let monitor = LatencyMonitor::new();
        for _ in 0..99 {
            monitor.record(CacheOp::Get, Duration::from_millis(10));
        }
        // Not yet recomputed.
        assert_eq!(monitor.summary(CacheOp::Get).mean_ms, 0.0);

        monitor.record(CacheOp::Get, Duration::from_millis(10));
        assert_eq!(monitor.summary(CacheOp::Get).mean_ms, 10.0);
    }

    #[test]
    fn test_refresh_recomputes_immediately() {
        let monitor = LatencyMonitor::new();
        monitor.record(CacheOp::Get, Duration::from_millis(40));
        monitor.refresh();
        assert_eq!(monitor.summary(CacheOp::Get).mean_ms, 40.0);
    }

    #[test]
    fn test_health_critical_when_unreachable() {
        let monitor = LatencyMonitor::new();
        let health = monitor.evaluate(HealthInputs {
            distributed_reachable: false,
            ..healthy_inputs()
        });
        assert_eq!(health.status, HealthStatus::Critical);
        assert!(health.degraded_since.is_some());
    }

    #[test]
    fn test_health_critical_on_error_rate() {
        let monitor = LatencyMonitor::new();
        let health = monitor.evaluate(HealthInputs {
            error_rate: 0.06,
            ..healthy_inputs()
        });
        assert!(health.is_critical());
    }

    #[test]
    fn test_health_degraded_on_memory_pressure() {
        let monitor = LatencyMonitor::new();
        let health = monitor.evaluate(HealthInputs {
            memory_usage_ratio: 0.95,
            ..healthy_inputs()
        });
        assert_eq!(health.status, HealthStatus::Degraded);
    }

    #[test]
    fn test_health_degraded_on_slow_gets() {
        let monitor = LatencyMonitor::new();
        for _ in 0..100 {
            monitor.record(CacheOp::Get, Duration::from_millis(200));
        }
        let health = monitor.evaluate(healthy_inputs());
        assert_eq!(health.status, HealthStatus::Degraded);
    }

    #[test]
    fn test_degraded_since_lifecycle() {
        let monitor = LatencyMonitor::new();

        let health = monitor.evaluate(healthy_inputs());
        assert!(health.is_healthy());
        assert!(health.degraded_since.is_none());

        let degraded = monitor.evaluate(HealthInputs {
            memory_usage_ratio: 0.99,
            ..healthy_inputs()
        });
        let first_seen = degraded.degraded_since;
        assert!(first_seen.is_some());

        // Still degraded: timestamp is sticky.
        let degraded = monitor.evaluate(HealthInputs {
            memory_usage_ratio: 0.99,
            ..healthy_inputs()
        });
        assert_eq!(degraded.degraded_since, first_seen);

        // Recovered: timestamp clears.
        let recovered = monitor.evaluate(healthy_inputs());
        assert!(recovered.degraded_since.is_none());
    }

    #[test]
    fn test_health_serialization() {
        let monitor = LatencyMonitor::new();
        let health = monitor
            .evaluate(healthy_inputs())
            .with_detail("breakerState", serde_json::json!("closed"));
        let json = serde_json::to_value(&health).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["details"]["breakerState"], "closed");
        assert!(json["getLatency"].is_object());
    }
}
