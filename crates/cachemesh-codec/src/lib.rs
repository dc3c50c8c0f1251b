//! Reversible value transformation pipeline for cachemesh.
//!
//! Values are transformed in write order `compress? → encrypt?` and read
//! order `decrypt? → decompress?`. Every output is a self-describing
//! tagged string: a short literal prefix (`uncompressed:`, `deflate:`,
//! `gzip:`, `encrypted:`, `unencrypted:`) identifies exactly how to
//! reverse it, so a reader never needs side-channel metadata.

pub mod codec;
pub mod compress;
pub mod encrypt;

pub use codec::ValueCodec;
pub use compress::{PREFIX_DEFLATE, PREFIX_GZIP, PREFIX_UNCOMPRESSED};
pub use encrypt::{EncryptionKey, PREFIX_ENCRYPTED, PREFIX_UNENCRYPTED};
