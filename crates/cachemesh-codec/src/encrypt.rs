//! Value encryption using AES-256-GCM.
//!
//! The wire format carries everything a reader needs:
//! `encrypted:<ivHex>:<authTagHex>:<cipherHex>`. The auth tag is verified
//! on decrypt; a mismatch is an integrity violation, never a silent
//! fallback.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Nonce};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use cachemesh_core::{CacheError, CacheResult};
use rand::RngCore;

/// Prefix for encrypted values.
pub const PREFIX_ENCRYPTED: &str = "encrypted:";
/// Prefix written by instances running with encryption disabled.
pub const PREFIX_UNENCRYPTED: &str = "unencrypted:";

/// Key size for AES-256 (256 bits).
const KEY_SIZE: usize = 32;

/// IV size mandated by the wire format (128 bits).
const IV_SIZE: usize = 16;

/// GCM authentication tag size (128 bits).
const TAG_SIZE: usize = 16;

/// AES-256-GCM with the 16-byte nonce the wire format mandates.
type ValueCipher = AesGcm<Aes256, U16>;

/// A 256-bit encryption key.
#[derive(Clone)]
pub struct EncryptionKey([u8; KEY_SIZE]);

impl EncryptionKey {
    /// Parses a key from a 64-character hex string or 32-byte base64.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Configuration` if the string decodes to the
    /// wrong length or is neither valid hex nor valid base64.
    pub fn parse(key_str: &str) -> CacheResult<Self> {
        // Try hex first
        if key_str.len() == KEY_SIZE * 2 {
            if let Ok(bytes) = hex::decode(key_str) {
                if bytes.len() == KEY_SIZE {
                    let mut key = [0u8; KEY_SIZE];
                    key.copy_from_slice(&bytes);
                    return Ok(Self(key));
                }
            }
        }

        // Try base64
        let bytes = BASE64
            .decode(key_str.trim())
            .map_err(|e| CacheError::configuration(format!("invalid encryption key: {e}")))?;

        if bytes.len() != KEY_SIZE {
            return Err(CacheError::configuration(format!(
                "encryption key must be {} bytes, got {}",
                KEY_SIZE,
                bytes.len()
            )));
        }

        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&bytes);
        Ok(Self(key))
    }

    /// Generates a new random key.
    #[must_use]
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut key);
        Self(key)
    }

    fn cipher(&self) -> CacheResult<ValueCipher> {
        ValueCipher::new_from_slice(&self.0)
            .map_err(|e| CacheError::internal(format!("failed to create cipher: {e}")))
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("EncryptionKey").field(&"<redacted>").finish()
    }
}

/// Encrypts a tagged string with a fresh random IV.
///
/// # Errors
///
/// Returns `CacheError::Internal` if the cipher rejects the input, which
/// does not happen for well-formed keys.
pub fn encrypt(plaintext: &str, key: &EncryptionKey) -> CacheResult<String> {
    let cipher = key.cipher()?;

    let mut iv = [0u8; IV_SIZE];
    rand::thread_rng().fill_bytes(&mut iv);
    let nonce = Nonce::<U16>::from_slice(&iv);

    // aes-gcm appends the tag to the ciphertext; the wire format carries
    // it as a separate field.
    let mut ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| CacheError::internal(format!("encryption failed: {e}")))?;
    let tag = ciphertext.split_off(ciphertext.len() - TAG_SIZE);

    Ok(format!(
        "{PREFIX_ENCRYPTED}{}:{}:{}",
        hex::encode(iv),
        hex::encode(tag),
        hex::encode(ciphertext)
    ))
}

/// Decrypts an `encrypted:` tagged string, verifying the GCM auth tag.
///
/// # Errors
///
/// Malformed framing, undecodable hex, or a tag mismatch are all surfaced
/// as `CacheError::Integrity`: returning wrong data is worse than a miss.
pub fn decrypt(tagged: &str, key: &EncryptionKey) -> CacheResult<String> {
    let payload = tagged
        .strip_prefix(PREFIX_ENCRYPTED)
        .ok_or_else(|| CacheError::integrity("missing encrypted: prefix"))?;

    let mut parts = payload.splitn(3, ':');
    let (iv_hex, tag_hex, cipher_hex) = match (parts.next(), parts.next(), parts.next()) {
        (Some(iv), Some(tag), Some(cipher)) => (iv, tag, cipher),
        _ => {
            return Err(CacheError::integrity(
                "malformed encrypted value: expected iv:tag:ciphertext",
            ));
        }
    };

    let iv = hex::decode(iv_hex)
        .map_err(|e| CacheError::integrity(format!("invalid IV hex: {e}")))?;
    if iv.len() != IV_SIZE {
        return Err(CacheError::integrity(format!(
            "invalid IV size: expected {IV_SIZE}, got {}",
            iv.len()
        )));
    }
    let tag = hex::decode(tag_hex)
        .map_err(|e| CacheError::integrity(format!("invalid auth tag hex: {e}")))?;
    let mut ciphertext = hex::decode(cipher_hex)
        .map_err(|e| CacheError::integrity(format!("invalid ciphertext hex: {e}")))?;
    ciphertext.extend_from_slice(&tag);

    let cipher = key.cipher()?;
    let nonce = Nonce::<U16>::from_slice(&iv);
    let plaintext = cipher
        .decrypt(nonce, ciphertext.as_ref())
        .map_err(|_| CacheError::integrity("authentication tag mismatch or corrupted ciphertext"))?;

    String::from_utf8(plaintext)
        .map_err(|e| CacheError::integrity(format!("invalid UTF-8 in decrypted value: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let key = EncryptionKey::generate();
        let tagged = encrypt("uncompressed:{\"a\":1}", &key).unwrap();
        assert!(tagged.starts_with(PREFIX_ENCRYPTED));

        let plaintext = decrypt(&tagged, &key).unwrap();
        assert_eq!(plaintext, "uncompressed:{\"a\":1}");
    }

    #[test]
    fn test_wire_format_fields() {
        let key = EncryptionKey::generate();
        let tagged = encrypt("payload", &key).unwrap();
        let fields: Vec<&str> = tagged
            .strip_prefix(PREFIX_ENCRYPTED)
            .unwrap()
            .split(':')
            .collect();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[0].len(), IV_SIZE * 2); // hex-encoded 16-byte IV
        assert_eq!(fields[1].len(), TAG_SIZE * 2);
    }

    #[test]
    fn test_wrong_key_fails() {
        let tagged = encrypt("secret", &EncryptionKey::generate()).unwrap();
        let err = decrypt(&tagged, &EncryptionKey::generate()).unwrap_err();
        assert!(err.is_integrity());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = EncryptionKey::generate();
        let tagged = encrypt("secret", &key).unwrap();

        // Flip the last ciphertext nibble.
        let mut tampered = tagged.clone();
        let last = tampered.pop().unwrap();
        tampered.push(if last == '0' { '1' } else { '0' });

        let err = decrypt(&tampered, &key).unwrap_err();
        assert!(err.is_integrity());
    }

    #[test]
    fn test_tampered_tag_fails() {
        let key = EncryptionKey::generate();
        let tagged = encrypt("secret", &key).unwrap();

        let payload = tagged.strip_prefix(PREFIX_ENCRYPTED).unwrap();
        let mut fields: Vec<String> = payload.split(':').map(String::from).collect();
        fields[1] = fields[1].replace(
            fields[1].chars().next().unwrap(),
            if fields[1].starts_with('0') { "1" } else { "0" },
        );
        let tampered = format!("{PREFIX_ENCRYPTED}{}", fields.join(":"));

        let err = decrypt(&tampered, &key).unwrap_err();
        assert!(err.is_integrity());
    }

    #[test]
    fn test_malformed_framing() {
        let key = EncryptionKey::generate();
        assert!(decrypt("encrypted:only-one-field", &key).is_err());
        assert!(decrypt("encrypted:aa:bb", &key).is_err());
        assert!(decrypt("not-encrypted-at-all", &key).is_err());
    }

    #[test]
    fn test_key_parsing() {
        let key = EncryptionKey::generate();
        let hex_str = hex::encode(key.0);
        assert!(EncryptionKey::parse(&hex_str).is_ok());

        let b64_str = BASE64.encode(key.0);
        assert!(EncryptionKey::parse(&b64_str).is_ok());

        assert!(EncryptionKey::parse("too-short").is_err());
        assert!(EncryptionKey::parse(&BASE64.encode([0u8; 16])).is_err());
    }

    #[test]
    fn test_unique_ivs() {
        let key = EncryptionKey::generate();
        let a = encrypt("same", &key).unwrap();
        let b = encrypt("same", &key).unwrap();
        assert_ne!(a, b);
    }
}
