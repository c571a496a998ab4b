use serde::{Deserialize, Serialize};
use serde_json::Value;

use eidolon_codec::{sha256_canonical_of, CodecResult};

/// UTC timestamp in the ledger's fixed microsecond format.
pub fn now_ts_utc() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%S%.6fZ")
        .to_string()
}

/// One line of `ledger.chain.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainEvent {
    pub ts_utc: String,
    pub kind: String,
    pub payload: Value,
    pub prev_hash: String,
    pub event_hash: String,
}

impl ChainEvent {
    /// Hash of the canonical event with `event_hash` blanked.
    pub fn compute_hash(&self) -> CodecResult<String> {
        let mut blank = self.clone();
        blank.event_hash = String::new();
        sha256_canonical_of(&blank)
    }
}

/// Outcome of verifying a ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerification {
    pub valid: bool,
    /// First failure, `None` when valid.
    pub message: Option<String>,
    /// Events checked before the first failure.
    pub verified_events: usize,
}

impl ChainVerification {
    pub(crate) fn ok(verified_events: usize) -> Self {
        Self {
            valid: true,
            message: None,
            verified_events,
        }
    }

    pub(crate) fn fail(verified_events: usize, message: String) -> Self {
        Self {
            valid: false,
            message: Some(message),
            verified_events,
        }
    }

    /// `(valid, message)` pair.
    pub fn as_pair(&self) -> (bool, Option<&str>) {
        (self.valid, self.message.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hash_ignores_stored_event_hash() {
        let mut event = ChainEvent {
            ts_utc: "2024-01-01T00:00:00.000000Z".into(),
            kind: "ucr".into(),
            payload: json!({"episode_id": "ep-1"}),
            prev_hash: eidolon_codec::ZERO_HASH.into(),
            event_hash: String::new(),
        };
        let h = event.compute_hash().unwrap();
        event.event_hash = h.clone();
        assert_eq!(event.compute_hash().unwrap(), h);
    }

    #[test]
    fn timestamp_shape() {
        let ts = now_ts_utc();
        assert!(ts.ends_with('Z'));
        assert_eq!(ts.len(), "2024-01-01T00:00:00.000000Z".len());
    }
}
