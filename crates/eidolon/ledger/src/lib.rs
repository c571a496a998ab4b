//! # eidolon-ledger
//!
//! Two independently verifiable ledgers:
//!
//! - [`ChainLedger`]: `ledger.chain.jsonl`, one canonical event per line,
//!   each committing to the previous `event_hash`. This is the
//!   authoritative record.
//! - [`SqlLedger`]: a SQLite mirror with its own row-hash definition.

#![deny(unsafe_code)]

pub mod chain;
pub mod error;
pub mod event;
pub mod sql;

pub use chain::{ChainLedger, CHAIN_FILE};
pub use error::{LedgerError, LedgerResult};
pub use event::{now_ts_utc, ChainEvent, ChainVerification};
pub use sql::{SqlEvent, SqlLedger, DB_FILE};
