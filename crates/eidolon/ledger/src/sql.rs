//! SQLite mirror of the ledger.
//!
//! Rows are `events(seq, ts, event_type, payload_json, prev_hash,
//! event_hash)`. The row hash is `sha256(prev_hash ‖ payload_json ‖
//! event_type ‖ decimal(seq))`, independent of the JSONL chain hash.

use std::path::Path;
use std::str::FromStr;

use eidolon_codec::{canonical_string, sha256_hex, ZERO_HASH};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::LedgerResult;
use crate::event::{now_ts_utc, ChainVerification};

/// Default database file name inside a ledger root.
pub const DB_FILE: &str = "ledger.db";

/// One row of the `events` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlEvent {
    pub seq: i64,
    pub ts: String,
    pub event_type: String,
    pub payload_json: String,
    pub prev_hash: String,
    pub event_hash: String,
}

impl SqlEvent {
    pub fn compute_hash(&self) -> String {
        row_hash(&self.prev_hash, &self.payload_json, &self.event_type, self.seq)
    }
}

fn row_hash(prev_hash: &str, payload_json: &str, event_type: &str, seq: i64) -> String {
    let mut buf = Vec::with_capacity(prev_hash.len() + payload_json.len() + event_type.len() + 20);
    buf.extend_from_slice(prev_hash.as_bytes());
    buf.extend_from_slice(payload_json.as_bytes());
    buf.extend_from_slice(event_type.as_bytes());
    buf.extend_from_slice(seq.to_string().as_bytes());
    sha256_hex(&buf)
}

type EventRow = (i64, String, String, String, String, String);

/// SQLite-backed ledger.
#[derive(Debug, Clone)]
pub struct SqlLedger {
    pool: SqlitePool,
}

impl SqlLedger {
    /// Connect to a SQLite URL (`sqlite://path`, `sqlite::memory:`) and create the schema.
    pub async fn connect(url: &str) -> LedgerResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        Self::with_options(options).await
    }

    /// Open (creating if needed) the database file at `path`.
    pub async fn open(path: &Path) -> LedgerResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        Self::with_options(options).await
    }

    async fn with_options(options: SqliteConnectOptions) -> LedgerResult<Self> {
        // one connection keeps in-memory databases alive and serializes appends
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let ledger = Self { pool };
        ledger.initialize_schema().await?;
        Ok(ledger)
    }

    async fn initialize_schema(&self) -> LedgerResult<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS events (
                seq INTEGER PRIMARY KEY,
                ts TEXT NOT NULL,
                event_type TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                prev_hash TEXT NOT NULL,
                event_hash TEXT NOT NULL
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS events_event_type ON events(event_type);"#,
        ];
        for stmt in statements {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Append a row; the payload is stored as canonical JSON.
    pub async fn append(&self, event_type: &str, payload: &Value) -> LedgerResult<SqlEvent> {
        let payload_json = canonical_string(payload)?;
        let mut tx = self.pool.begin().await?;

        let last: Option<(i64, String)> =
            sqlx::query_as("SELECT seq, event_hash FROM events ORDER BY seq DESC LIMIT 1")
                .fetch_optional(&mut *tx)
                .await?;
        let (seq, prev_hash) = match last {
            Some((seq, hash)) => (seq + 1, hash),
            None => (1, ZERO_HASH.to_string()),
        };

        let event = SqlEvent {
            seq,
            ts: now_ts_utc(),
            event_type: event_type.to_string(),
            event_hash: row_hash(&prev_hash, &payload_json, event_type, seq),
            payload_json,
            prev_hash,
        };

        sqlx::query(
            "INSERT INTO events (seq, ts, event_type, payload_json, prev_hash, event_hash) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(event.seq)
        .bind(&event.ts)
        .bind(&event.event_type)
        .bind(&event.payload_json)
        .bind(&event.prev_hash)
        .bind(&event.event_hash)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        info!(seq, event_type, event_hash = %event.event_hash, "Appended SQL ledger event");
        Ok(event)
    }

    /// All rows ordered by `seq`.
    pub async fn events(&self) -> LedgerResult<Vec<SqlEvent>> {
        let rows: Vec<EventRow> = sqlx::query_as(
            "SELECT seq, ts, event_type, payload_json, prev_hash, event_hash \
             FROM events ORDER BY seq ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(seq, ts, event_type, payload_json, prev_hash, event_hash)| SqlEvent {
                seq,
                ts,
                event_type,
                payload_json,
                prev_hash,
                event_hash,
            })
            .collect())
    }

    pub async fn count(&self) -> LedgerResult<i64> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM events")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    /// Check seq continuity from 1, prev links and row hashes.
    pub async fn verify(&self) -> LedgerResult<ChainVerification> {
        let events = self.events().await?;
        let mut expected_prev = ZERO_HASH.to_string();
        for (index, event) in events.iter().enumerate() {
            let expected_seq = index as i64 + 1;
            if event.seq != expected_seq {
                return Ok(ChainVerification::fail(
                    index,
                    format!("seq gap at seq {expected_seq}"),
                ));
            }
            if event.prev_hash != expected_prev {
                return Ok(ChainVerification::fail(
                    index,
                    format!("prev_hash mismatch at seq {}", event.seq),
                ));
            }
            if event.compute_hash() != event.event_hash {
                return Ok(ChainVerification::fail(
                    index,
                    format!("hash mismatch at seq {}", event.seq),
                ));
            }
            expected_prev = event.event_hash.clone();
        }
        debug!(events = events.len(), "SQL ledger verified");
        Ok(ChainVerification::ok(events.len()))
    }

    /// Underlying pool, for callers that need ad-hoc queries.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
