//! The reversible value pipeline: `compress? → encrypt?` on write,
//! `decrypt? → decompress?` on read.

use cachemesh_core::{CacheConfig, CacheError, CacheResult};
use serde_json::Value;

use crate::compress::{self, PREFIX_UNCOMPRESSED};
use crate::encrypt::{self, EncryptionKey, PREFIX_ENCRYPTED, PREFIX_UNENCRYPTED};

/// Applies and reverses value transforms for both tiers.
///
/// Whether a codec can encrypt is an explicit construction-time choice:
/// a codec built with [`ValueCodec::without_encryption`] rejects any
/// operation that requests encryption instead of silently writing
/// plaintext. The decoder still understands the `unencrypted:` prefix for
/// values written by instances running without a key.
#[derive(Debug)]
pub struct ValueCodec {
    key: Option<EncryptionKey>,
}

impl ValueCodec {
    /// Creates a codec that can encrypt and decrypt with `key`.
    #[must_use]
    pub fn with_key(key: EncryptionKey) -> Self {
        Self { key: Some(key) }
    }

    /// Creates a codec that refuses encryption requests.
    #[must_use]
    pub fn without_encryption() -> Self {
        Self { key: None }
    }

    /// Returns whether this codec holds an encryption key.
    #[must_use]
    pub fn can_encrypt(&self) -> bool {
        self.key.is_some()
    }

    /// Encodes a value into a self-describing tagged string.
    ///
    /// The output always carries a prefix identifying how to reverse it,
    /// even when no transform was applied.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Configuration` when `config.encryption` is set
    /// on a codec built without a key (fail-closed), and
    /// `CacheError::Serialization` if the value cannot be serialized.
    pub fn encode(&self, value: &Value, config: &CacheConfig) -> CacheResult<String> {
        let raw = serde_json::to_string(value)?;

        let staged = if config.compression {
            compress::compress(&raw)
        } else {
            format!("{PREFIX_UNCOMPRESSED}{raw}")
        };

        if config.encryption {
            let key = self.key.as_ref().ok_or_else(|| {
                CacheError::configuration(
                    "encryption requested but no encryption key is configured",
                )
            })?;
            encrypt::encrypt(&staged, key)
        } else {
            Ok(staged)
        }
    }

    /// Decodes a tagged string back into the original value.
    ///
    /// Dispatches on the literal prefix. An unrecognized prefix is treated
    /// as a best-effort raw JSON parse and logged as a warning, so values
    /// written by foreign producers are still readable.
    ///
    /// # Errors
    ///
    /// Integrity failures (auth-tag mismatch, corrupted compressed data)
    /// are hard errors. An encrypted value read by a key-less codec is a
    /// configuration error.
    pub fn decode(&self, tagged: &str) -> CacheResult<Value> {
        let after_crypto: String;
        let compressed: &str = if tagged.starts_with(PREFIX_ENCRYPTED) {
            let key = self.key.as_ref().ok_or_else(|| {
                CacheError::configuration(
                    "encrypted value found but no encryption key is configured",
                )
            })?;
            after_crypto = encrypt::decrypt(tagged, key)?;
            &after_crypto
        } else if let Some(rest) = tagged.strip_prefix(PREFIX_UNENCRYPTED) {
            rest
        } else {
            tagged
        };

        match compress::decompress(compressed)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => {
                tracing::warn!(
                    prefix = %prefix_of(compressed),
                    "unrecognized codec prefix, attempting raw JSON parse"
                );
                serde_json::from_str(compressed).map_err(|e| {
                    CacheError::codec(format!("value has no codec prefix and is not JSON: {e}"))
                })
            }
        }
    }
}

/// First token of a tagged string, for log context only.
fn prefix_of(tagged: &str) -> &str {
    match tagged.split_once(':') {
        Some((prefix, _)) if prefix.len() <= 16 => prefix,
        _ => "<none>",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachemesh_core::Ttl;
    use serde_json::json;

    fn config(compression: bool, encryption: bool) -> CacheConfig {
        let mut config = CacheConfig::new(Ttl::seconds(60).unwrap());
        config.compression = compression;
        config.encryption = encryption;
        config
    }

    #[test]
    fn test_round_trip_all_flag_combinations() {
        let codec = ValueCodec::with_key(EncryptionKey::generate());
        let value = json!({"name": "Ali", "items": [1, 2, 3], "nested": {"deep": true}});

        for (compression, encryption) in
            [(false, false), (true, false), (false, true), (true, true)]
        {
            let tagged = codec.encode(&value, &config(compression, encryption)).unwrap();
            let decoded = codec.decode(&tagged).unwrap();
            assert_eq!(decoded, value, "compression={compression} encryption={encryption}");
        }
    }

    #[test]
    fn test_plain_encode_is_self_describing() {
        let codec = ValueCodec::without_encryption();
        let tagged = codec.encode(&json!(42), &config(false, false)).unwrap();
        assert_eq!(tagged, "uncompressed:42");
    }

    #[test]
    fn test_large_payload_round_trip() {
        let codec = ValueCodec::with_key(EncryptionKey::generate());
        let value = json!({"blob": "a".repeat(50_000)});

        let tagged = codec.encode(&value, &config(true, true)).unwrap();
        assert!(tagged.starts_with(PREFIX_ENCRYPTED));
        assert_eq!(codec.decode(&tagged).unwrap(), value);
    }

    #[test]
    fn test_encryption_without_key_fails_closed() {
        let codec = ValueCodec::without_encryption();
        let err = codec.encode(&json!(1), &config(false, true)).unwrap_err();
        assert!(matches!(err, CacheError::Configuration { .. }));
    }

    #[test]
    fn test_legacy_unencrypted_prefix_readable() {
        let codec = ValueCodec::without_encryption();
        let decoded = codec.decode("unencrypted:uncompressed:{\"a\":1}").unwrap();
        assert_eq!(decoded, json!({"a": 1}));
    }

    #[test]
    fn test_unknown_prefix_best_effort_parse() {
        let codec = ValueCodec::without_encryption();
        // Foreign producer wrote bare JSON with no prefix.
        assert_eq!(codec.decode("{\"raw\": true}").unwrap(), json!({"raw": true}));

        // Not JSON either: codec error.
        assert!(codec.decode("???definitely not json").is_err());
    }

    #[test]
    fn test_encrypted_value_without_key_is_config_error() {
        let codec = ValueCodec::with_key(EncryptionKey::generate());
        let tagged = codec.encode(&json!("s"), &config(false, true)).unwrap();

        let keyless = ValueCodec::without_encryption();
        let err = keyless.decode(&tagged).unwrap_err();
        assert!(matches!(err, CacheError::Configuration { .. }));
    }

    #[test]
    fn test_tampered_value_is_integrity_error() {
        let codec = ValueCodec::with_key(EncryptionKey::generate());
        let tagged = codec.encode(&json!("payload"), &config(false, true)).unwrap();

        let mut tampered = tagged.clone();
        let last = tampered.pop().unwrap();
        tampered.push(if last == '0' { '1' } else { '0' });

        assert!(codec.decode(&tampered).unwrap_err().is_integrity());
    }
}
