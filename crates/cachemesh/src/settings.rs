//! Environment-driven cache settings.

use cachemesh_codec::EncryptionKey;
use cachemesh_core::{CacheError, CacheResult, Ttl};
use cachemesh_store::{DEFAULT_MAX_BYTES, DEFAULT_MAX_ENTRIES};
use std::time::Duration;

/// Default TTL applied when callers do not pass a config.
const DEFAULT_TTL_SECS: u64 = 3600;

/// Tunable cache settings, read once at startup.
///
/// Environment variables consumed:
/// - `CACHE_REDIS_URL` — distributed tier address (default local Redis)
/// - `CACHE_ENCRYPTION_KEY` — 64-char hex or 32-byte base64; when absent
///   the cache runs without encryption and any operation requesting it
///   fails closed
/// - `CACHE_MEMORY_MAX_ENTRIES` / `CACHE_MEMORY_MAX_BYTES` — L1 ceilings
/// - `CACHE_DEFAULT_TTL_SECS` — TTL for operations without a config
/// - `CACHE_OP_TIMEOUT_MS` — per-call bound on distributed tier commands
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub redis_url: String,
    pub encryption_key: Option<EncryptionKey>,
    pub memory_max_entries: usize,
    pub memory_max_bytes: usize,
    pub default_ttl: Ttl,
    pub op_timeout: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            encryption_key: None,
            memory_max_entries: DEFAULT_MAX_ENTRIES,
            memory_max_bytes: DEFAULT_MAX_BYTES,
            default_ttl: Ttl::Seconds(
                std::num::NonZeroU64::new(DEFAULT_TTL_SECS)
                    .unwrap_or(std::num::NonZeroU64::MIN),
            ),
            op_timeout: cachemesh_store::DEFAULT_OP_TIMEOUT,
        }
    }
}

impl CacheSettings {
    /// Loads settings from the environment, with `.env` support.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Configuration` for unparseable numeric values
    /// or a malformed encryption key. An absent key is not an error; it
    /// just leaves encryption unavailable.
    pub fn from_env() -> CacheResult<Self> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        let redis_url =
            std::env::var("CACHE_REDIS_URL").unwrap_or(defaults.redis_url);

        let encryption_key = match std::env::var("CACHE_ENCRYPTION_KEY") {
            Ok(key_str) => Some(EncryptionKey::parse(&key_str)?),
            Err(_) => None,
        };

        let memory_max_entries =
            parse_var("CACHE_MEMORY_MAX_ENTRIES", defaults.memory_max_entries)?;
        let memory_max_bytes = parse_var("CACHE_MEMORY_MAX_BYTES", defaults.memory_max_bytes)?;

        let default_ttl = match std::env::var("CACHE_DEFAULT_TTL_SECS") {
            Ok(raw) => {
                let secs: u64 = raw.parse().map_err(|e| {
                    CacheError::configuration(format!("invalid CACHE_DEFAULT_TTL_SECS: {e}"))
                })?;
                Ttl::seconds(secs)?
            }
            Err(_) => defaults.default_ttl,
        };

        let op_timeout = match std::env::var("CACHE_OP_TIMEOUT_MS") {
            Ok(raw) => {
                let ms: u64 = raw.parse().map_err(|e| {
                    CacheError::configuration(format!("invalid CACHE_OP_TIMEOUT_MS: {e}"))
                })?;
                Duration::from_millis(ms)
            }
            Err(_) => defaults.op_timeout,
        };

        Ok(Self {
            redis_url,
            encryption_key,
            memory_max_entries,
            memory_max_bytes,
            default_ttl,
            op_timeout,
        })
    }

    /// Builds the value codec this configuration allows.
    #[must_use]
    pub fn codec(&self) -> cachemesh_codec::ValueCodec {
        match &self.encryption_key {
            Some(key) => cachemesh_codec::ValueCodec::with_key(key.clone()),
            None => cachemesh_codec::ValueCodec::without_encryption(),
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> CacheResult<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| CacheError::configuration(format!("invalid {name}: {e}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = CacheSettings::default();
        assert_eq!(settings.memory_max_entries, DEFAULT_MAX_ENTRIES);
        assert!(settings.encryption_key.is_none());
        assert_eq!(settings.default_ttl.as_secs(), Some(DEFAULT_TTL_SECS));
    }

    #[test]
    fn test_codec_without_key_cannot_encrypt() {
        let settings = CacheSettings::default();
        assert!(!settings.codec().can_encrypt());
    }

    #[test]
    fn test_codec_with_key() {
        let settings = CacheSettings {
            encryption_key: Some(EncryptionKey::generate()),
            ..Default::default()
        };
        assert!(settings.codec().can_encrypt());
    }
}
