//! Size-tiered compression producing self-describing tagged strings.
//!
//! Small values are stored raw under the `uncompressed:` prefix, mid-size
//! values use deflate (lower latency), large values use gzip (better
//! ratio). The prefix tells the reader exactly how to reverse the
//! transform.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use cachemesh_core::{CacheError, CacheResult};
use flate2::Compression;
use flate2::read::{DeflateDecoder, GzDecoder};
use flate2::write::{DeflateEncoder, GzEncoder};
use std::io::{Read, Write};

/// Prefix for values stored without compression.
pub const PREFIX_UNCOMPRESSED: &str = "uncompressed:";
/// Prefix for deflate-compressed, base64-encoded values.
pub const PREFIX_DEFLATE: &str = "deflate:";
/// Prefix for gzip-compressed, base64-encoded values.
pub const PREFIX_GZIP: &str = "gzip:";

/// Values under this byte length are not worth compressing.
const MIN_COMPRESS_BYTES: usize = 100;

/// Values at or above this byte length use gzip instead of deflate.
const GZIP_THRESHOLD_BYTES: usize = 10_000;

/// Compresses a serialized value into a tagged string.
///
/// Never fails: any compression error falls back to `uncompressed:<raw>`
/// so the write can proceed.
#[must_use]
pub fn compress(raw: &str) -> String {
    if raw.len() < MIN_COMPRESS_BYTES {
        return format!("{PREFIX_UNCOMPRESSED}{raw}");
    }

    let result = if raw.len() >= GZIP_THRESHOLD_BYTES {
        gzip_compress(raw.as_bytes()).map(|bytes| format!("{PREFIX_GZIP}{}", BASE64.encode(bytes)))
    } else {
        deflate_compress(raw.as_bytes())
            .map(|bytes| format!("{PREFIX_DEFLATE}{}", BASE64.encode(bytes)))
    };

    match result {
        Ok(tagged) => tagged,
        Err(e) => {
            tracing::warn!(error = %e, len = raw.len(), "compression failed, storing uncompressed");
            format!("{PREFIX_UNCOMPRESSED}{raw}")
        }
    }
}

/// Reverses a tagged compressed string back to the raw serialized value.
///
/// Returns `None` if the string carries none of the compression prefixes,
/// so the caller can fall through to its own handling.
///
/// # Errors
///
/// A recognized prefix with undecodable content is corruption, surfaced as
/// `CacheError::Integrity`.
pub fn decompress(tagged: &str) -> CacheResult<Option<String>> {
    if let Some(raw) = tagged.strip_prefix(PREFIX_UNCOMPRESSED) {
        return Ok(Some(raw.to_string()));
    }

    let (payload, inflate): (&str, fn(&[u8]) -> std::io::Result<Vec<u8>>) =
        if let Some(payload) = tagged.strip_prefix(PREFIX_GZIP) {
            (payload, gzip_decompress)
        } else if let Some(payload) = tagged.strip_prefix(PREFIX_DEFLATE) {
            (payload, deflate_decompress)
        } else {
            return Ok(None);
        };

    let compressed = BASE64
        .decode(payload)
        .map_err(|e| CacheError::integrity(format!("invalid base64 in compressed value: {e}")))?;
    let bytes = inflate(&compressed)
        .map_err(|e| CacheError::integrity(format!("corrupted compressed value: {e}")))?;
    String::from_utf8(bytes)
        .map(Some)
        .map_err(|e| CacheError::integrity(format!("invalid UTF-8 in decompressed value: {e}")))
}

fn gzip_compress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

fn gzip_decompress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}

fn deflate_compress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

fn deflate_decompress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    DeflateDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_values_stay_raw() {
        let tagged = compress("short");
        assert_eq!(tagged, "uncompressed:short");
        assert_eq!(decompress(&tagged).unwrap(), Some("short".to_string()));
    }

    #[test]
    fn test_midsize_uses_deflate() {
        let raw = "x".repeat(500);
        let tagged = compress(&raw);
        assert!(tagged.starts_with(PREFIX_DEFLATE));
        assert_eq!(decompress(&tagged).unwrap(), Some(raw));
    }

    #[test]
    fn test_large_uses_gzip() {
        let raw = "y".repeat(20_000);
        let tagged = compress(&raw);
        assert!(tagged.starts_with(PREFIX_GZIP));
        assert_eq!(decompress(&tagged).unwrap(), Some(raw));
    }

    #[test]
    fn test_threshold_boundaries() {
        assert!(compress(&"a".repeat(99)).starts_with(PREFIX_UNCOMPRESSED));
        assert!(compress(&"a".repeat(100)).starts_with(PREFIX_DEFLATE));
        assert!(compress(&"a".repeat(9_999)).starts_with(PREFIX_DEFLATE));
        assert!(compress(&"a".repeat(10_000)).starts_with(PREFIX_GZIP));
    }

    #[test]
    fn test_round_trip_lengths() {
        for len in [0usize, 1, 99, 100, 101, 9_999, 10_000, 100_000, 1_000_000] {
            let raw = "z".repeat(len);
            let tagged = compress(&raw);
            assert_eq!(decompress(&tagged).unwrap(), Some(raw), "len {len}");
        }
    }

    #[test]
    fn test_unknown_prefix_falls_through() {
        assert_eq!(decompress("plain json").unwrap(), None);
        assert_eq!(decompress("{\"a\":1}").unwrap(), None);
    }

    #[test]
    fn test_corrupted_payload_is_integrity_error() {
        let err = decompress("gzip:!!!not-base64!!!").unwrap_err();
        assert!(err.is_integrity());

        // Valid base64 but not a gzip stream.
        let err = decompress("gzip:aGVsbG8=").unwrap_err();
        assert!(err.is_integrity());
    }
}
