//! Cache entry and per-operation configuration types.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::num::NonZeroU64;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::CacheError;

/// Time-to-live for a cache entry.
///
/// A TTL is either a positive number of seconds or the explicit `Forever`
/// sentinel. Zero and negative TTLs are unrepresentable; every entry either
/// expires at a definite point or is declared immortal up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ttl {
    /// The entry never expires.
    Forever,
    /// The entry expires after this many seconds.
    Seconds(NonZeroU64),
}

impl Ttl {
    /// Creates a TTL of `secs` seconds.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Configuration` if `secs` is zero. Use
    /// `Ttl::Forever` for entries that must never expire.
    pub fn seconds(secs: u64) -> Result<Self, CacheError> {
        NonZeroU64::new(secs).map(Self::Seconds).ok_or_else(|| {
            CacheError::configuration("TTL must be positive; use Ttl::Forever for no expiry")
        })
    }

    /// Returns the TTL as a `Duration`, or `None` for `Forever`.
    #[must_use]
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Self::Forever => None,
            Self::Seconds(secs) => Some(Duration::from_secs(secs.get())),
        }
    }

    /// Returns the TTL in whole seconds, or `None` for `Forever`.
    #[must_use]
    pub fn as_secs(&self) -> Option<u64> {
        match self {
            Self::Forever => None,
            Self::Seconds(secs) => Some(secs.get()),
        }
    }
}

/// Per-operation cache configuration.
///
/// Immutable once passed to an operation. The TTL is required; tags,
/// dependencies and codec flags are opt-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    /// Time-to-live for the entry.
    pub ttl: Ttl,
    /// Tags for bulk invalidation.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Keys this entry depends on.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Whether the stored value should be compressed.
    #[serde(default)]
    pub compression: bool,
    /// Whether the stored value should be encrypted.
    #[serde(default)]
    pub encryption: bool,
}

impl CacheConfig {
    /// Creates a configuration with the given TTL and no tags, dependencies
    /// or codec transforms.
    #[must_use]
    pub fn new(ttl: Ttl) -> Self {
        Self {
            ttl,
            tags: Vec::new(),
            dependencies: Vec::new(),
            compression: false,
            encryption: false,
        }
    }

    /// Attaches invalidation tags.
    #[must_use]
    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Attaches dependency keys.
    #[must_use]
    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Enables compression of the stored value.
    #[must_use]
    pub fn compressed(mut self) -> Self {
        self.compression = true;
        self
    }

    /// Enables encryption of the stored value.
    #[must_use]
    pub fn encrypted(mut self) -> Self {
        self.encryption = true;
        self
    }
}

/// One cached item held by the memory tier.
///
/// The value is wrapped in `Arc` so cache hits clone a pointer, not the
/// payload. `size_bytes` is always the size of the *stored* (possibly
/// compressed/encrypted) representation and is what capacity accounting
/// uses, not the in-memory decoded size.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: Arc<serde_json::Value>,
    pub ttl: Ttl,
    pub created_at: Instant,
    pub last_accessed_at: Instant,
    pub access_count: u64,
    pub tags: HashSet<String>,
    pub dependencies: HashSet<String>,
    pub size_bytes: usize,
    pub compressed: bool,
    pub encrypted: bool,
}

impl CacheEntry {
    /// Creates a new entry from a decoded value and the operation config.
    ///
    /// `stored_size` is the byte length of the encoded representation that
    /// was (or would be) written to the distributed tier.
    #[must_use]
    pub fn new(
        key: impl Into<String>,
        value: Arc<serde_json::Value>,
        config: &CacheConfig,
        stored_size: usize,
    ) -> Self {
        let now = Instant::now();
        Self {
            key: key.into(),
            value,
            ttl: config.ttl,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            tags: config.tags.iter().cloned().collect(),
            dependencies: config.dependencies.iter().cloned().collect(),
            size_bytes: stored_size,
            compressed: config.compression,
            encrypted: config.encryption,
        }
    }

    /// Checks whether this entry's TTL has elapsed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        match self.ttl.as_duration() {
            None => false,
            Some(ttl) => self.created_at.elapsed() > ttl,
        }
    }

    /// Records a successful read.
    pub fn touch(&mut self) {
        self.access_count += 1;
        self.last_accessed_at = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ttl_zero_rejected() {
        assert!(Ttl::seconds(0).is_err());
        assert!(Ttl::seconds(1).is_ok());
    }

    #[test]
    fn test_ttl_durations() {
        assert_eq!(Ttl::Forever.as_duration(), None);
        assert_eq!(
            Ttl::seconds(60).unwrap().as_duration(),
            Some(Duration::from_secs(60))
        );
        assert_eq!(Ttl::seconds(60).unwrap().as_secs(), Some(60));
    }

    #[test]
    fn test_config_builder() {
        let config = CacheConfig::new(Ttl::seconds(30).unwrap())
            .with_tags(["user", "profile"])
            .with_dependencies(["user:1"])
            .compressed()
            .encrypted();

        assert_eq!(config.tags, vec!["user", "profile"]);
        assert_eq!(config.dependencies, vec!["user:1"]);
        assert!(config.compression);
        assert!(config.encryption);
    }

    #[test]
    fn test_entry_expiry() {
        let config = CacheConfig::new(Ttl::seconds(3600).unwrap());
        let entry = CacheEntry::new("k", Arc::new(json!(1)), &config, 8);
        assert!(!entry.is_expired());

        let forever = CacheConfig::new(Ttl::Forever);
        let entry = CacheEntry::new("k", Arc::new(json!(1)), &forever, 8);
        assert!(!entry.is_expired());
    }

    #[test]
    fn test_entry_touch() {
        let config = CacheConfig::new(Ttl::seconds(60).unwrap());
        let mut entry = CacheEntry::new("k", Arc::new(json!("v")), &config, 16);
        let before = entry.last_accessed_at;

        std::thread::sleep(Duration::from_millis(1));
        entry.touch();
        assert_eq!(entry.access_count, 1);
        assert!(entry.last_accessed_at > before);
    }

    #[test]
    fn test_size_is_caller_supplied_stored_size() {
        // Capacity accounting always uses the encoded representation's
        // length, never the in-memory decoded size.
        let config = CacheConfig::new(Ttl::seconds(60).unwrap());
        let entry = CacheEntry::new("k", Arc::new(json!({"a": 1})), &config, 999);
        assert_eq!(entry.size_bytes, 999);
    }
}
