//! Append-only JSONL hash chain.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use eidolon_codec::{canonical_bytes_of, ZERO_HASH};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{LedgerError, LedgerResult};
use crate::event::{now_ts_utc, ChainEvent, ChainVerification};

/// Default file name of the chain inside a ledger root.
pub const CHAIN_FILE: &str = "ledger.chain.jsonl";

/// JSONL ledger where every line commits to its predecessor.
#[derive(Debug, Clone)]
pub struct ChainLedger {
    path: PathBuf,
}

impl ChainLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Chain at `<root>/ledger.chain.jsonl`.
    pub fn in_root(root: &Path) -> Self {
        Self::new(root.join(CHAIN_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `event_hash` of the last line, or the zero hash for an empty chain.
    pub fn last_hash(&self) -> LedgerResult<String> {
        if !self.path.exists() {
            return Ok(ZERO_HASH.to_string());
        }
        let file = fs::File::open(&self.path)?;
        let mut last: Option<(usize, String)> = None;
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if !line.trim().is_empty() {
                last = Some((idx + 1, line));
            }
        }
        match last {
            None => Ok(ZERO_HASH.to_string()),
            Some((line_no, text)) => {
                let event: ChainEvent = serde_json::from_str(&text).map_err(|e| {
                    LedgerError::IntegrityViolation {
                        position: line_no as u64,
                        reason: format!("unreadable tail: {e}"),
                    }
                })?;
                Ok(event.event_hash)
            }
        }
    }

    /// Append an event and return it with its hash filled in.
    pub fn append_event(&self, kind: &str, payload: Value) -> LedgerResult<ChainEvent> {
        let prev_hash = self.last_hash()?;
        let mut event = ChainEvent {
            ts_utc: now_ts_utc(),
            kind: kind.to_string(),
            payload,
            prev_hash,
            event_hash: String::new(),
        };
        event.event_hash = event.compute_hash()?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut line = canonical_bytes_of(&event)?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&line)?;
        file.sync_data()?;

        info!(kind, event_hash = %event.event_hash, "Appended chain event");
        Ok(event)
    }

    /// All events in file order.
    pub fn events(&self) -> LedgerResult<Vec<ChainEvent>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(&self.path)?;
        let mut out = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let event = serde_json::from_str(&line).map_err(|e| LedgerError::IntegrityViolation {
                position: (idx + 1) as u64,
                reason: e.to_string(),
            })?;
            out.push(event);
        }
        Ok(out)
    }

    /// Walk the chain and check every link and hash.
    ///
    /// Checks per line, in order: parse, `prev_hash` link, recomputed hash.
    /// Line numbers are 1-based.
    pub fn verify_chain(&self) -> LedgerResult<ChainVerification> {
        if !self.path.exists() {
            return Ok(ChainVerification::ok(0));
        }
        let file = fs::File::open(&self.path)?;
        let mut expected_prev = ZERO_HASH.to_string();
        let mut verified = 0usize;

        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line_no = idx + 1;
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let event: ChainEvent = match serde_json::from_str(&line) {
                Ok(event) => event,
                Err(_) => {
                    return Ok(ChainVerification::fail(
                        verified,
                        format!("invalid json at line {line_no}"),
                    ))
                }
            };
            if event.prev_hash != expected_prev {
                return Ok(ChainVerification::fail(
                    verified,
                    format!("prev_hash mismatch at line {line_no}"),
                ));
            }
            if event.compute_hash()? != event.event_hash {
                return Ok(ChainVerification::fail(
                    verified,
                    format!("hash mismatch at line {line_no}"),
                ));
            }
            expected_prev = event.event_hash;
            verified += 1;
        }

        debug!(path = %self.path.display(), events = verified, "Chain verified");
        Ok(ChainVerification::ok(verified))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_chain_is_valid() {
        let dir = tempfile::TempDir::new().unwrap();
        let ledger = ChainLedger::in_root(dir.path());
        assert_eq!(ledger.verify_chain().unwrap().as_pair(), (true, None));
        assert_eq!(ledger.last_hash().unwrap(), ZERO_HASH);
    }

    #[test]
    fn events_link_to_predecessor() {
        let dir = tempfile::TempDir::new().unwrap();
        let ledger = ChainLedger::in_root(dir.path());
        let first = ledger.append_event("ucr", json!({"n": 1})).unwrap();
        let second = ledger.append_event("ucr", json!({"n": 2})).unwrap();
        assert_eq!(first.prev_hash, ZERO_HASH);
        assert_eq!(second.prev_hash, first.event_hash);
        assert_eq!(ledger.events().unwrap().len(), 2);
    }
}
