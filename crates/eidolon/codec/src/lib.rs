//! # eidolon-codec
//!
//! Canonical serialization and hashing for the Eidolon kernel.
//!
//! - [`canonical_bytes`]: sort-keyed, compact, UTF-8 JSON
//! - [`sha256_canonical`]: hex SHA-256 over canonical bytes
//! - [`compute_ucr_hash`]: self-referencing record hash with blanked fields

#![deny(unsafe_code)]

pub mod canonical;
pub mod error;
pub mod hash;

pub use canonical::{
    canonical_bytes, canonical_bytes_of, canonical_roundtrip, canonical_string, from_bytes,
    normalize_number, to_value,
};
pub use error::{CodecError, CodecResult};
pub use hash::{
    compute_ucr_hash, is_sha256_hex, sha256_canonical, sha256_canonical_of, sha256_hex, ZERO_HASH,
};
