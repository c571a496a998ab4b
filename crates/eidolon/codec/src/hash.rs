//! SHA-256 content hashing over canonical bytes.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::canonical::{canonical_bytes, to_value};
use crate::error::{CodecError, CodecResult};

/// The all-zero hash used as `prev_hash` of the first ledger event.
pub const ZERO_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Lowercase hex SHA-256 of raw bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Lowercase hex SHA-256 of the canonical bytes of `value`.
pub fn sha256_canonical(value: &Value) -> CodecResult<String> {
    Ok(sha256_hex(&canonical_bytes(value)?))
}

/// [`sha256_canonical`] for any serializable value.
pub fn sha256_canonical_of<T: Serialize + ?Sized>(value: &T) -> CodecResult<String> {
    sha256_canonical(&to_value(value)?)
}

/// Hash of a UCR record with its self-referencing hash fields blanked.
///
/// Both the top-level `ucr_hash` (when present) and `hashes.ucr_hash` are
/// overwritten with `""` on a copy before hashing, so the result is stable
/// whether or not the record already carries its hash.
pub fn compute_ucr_hash(record: &Value) -> CodecResult<String> {
    let mut copy = record.clone();
    let obj = copy
        .as_object_mut()
        .ok_or_else(|| CodecError::Encode("UCR record must be a JSON object".into()))?;
    if obj.contains_key("ucr_hash") {
        obj.insert("ucr_hash".into(), Value::String(String::new()));
    }
    if let Some(Value::Object(hashes)) = obj.get_mut("hashes") {
        hashes.insert("ucr_hash".into(), Value::String(String::new()));
    }
    sha256_canonical(&copy)
}

/// Returns true for a 64-character lowercase hex string.
pub fn is_sha256_hex(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
