use eidolon_ledger::{ChainLedger, SqlLedger};
use serde_json::{json, Value};
use tempfile::TempDir;

fn rewrite_line(ledger: &ChainLedger, line_no: usize, edit: impl FnOnce(&mut Value)) {
    let text = std::fs::read_to_string(ledger.path()).unwrap();
    let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
    let mut value: Value = serde_json::from_str(&lines[line_no - 1]).unwrap();
    edit(&mut value);
    lines[line_no - 1] = serde_json::to_string(&value).unwrap();
    std::fs::write(ledger.path(), lines.join("\n") + "\n").unwrap();
}

#[test]
fn chain_verifies_after_appends() {
    let dir = TempDir::new().unwrap();
    let ledger = ChainLedger::in_root(dir.path());
    for n in 0..5 {
        ledger.append_event("ucr", json!({"n": n})).unwrap();
    }
    let result = ledger.verify_chain().unwrap();
    assert!(result.valid);
    assert_eq!(result.verified_events, 5);
}

#[test]
fn tampered_payload_reports_hash_mismatch() {
    let dir = TempDir::new().unwrap();
    let ledger = ChainLedger::in_root(dir.path());
    ledger.append_event("ucr", json!({"episode_id": "ep-a"})).unwrap();
    ledger.append_event("ucr", json!({"episode_id": "ep-b"})).unwrap();

    rewrite_line(&ledger, 2, |v| v["payload"]["episode_id"] = json!("ep-x"));

    let result = ledger.verify_chain().unwrap();
    assert_eq!(result.as_pair(), (false, Some("hash mismatch at line 2")));
}

#[test]
fn tampered_event_hash_breaks_next_link() {
    let dir = TempDir::new().unwrap();
    let ledger = ChainLedger::in_root(dir.path());
    ledger.append_event("ucr", json!({"n": 1})).unwrap();
    ledger.append_event("ucr", json!({"n": 2})).unwrap();

    rewrite_line(&ledger, 1, |v| v["event_hash"] = json!("0".repeat(64)));

    let result = ledger.verify_chain().unwrap();
    assert_eq!(result.as_pair(), (false, Some("hash mismatch at line 1")));
}

#[test]
fn garbage_line_is_invalid_json() {
    let dir = TempDir::new().unwrap();
    let ledger = ChainLedger::in_root(dir.path());
    ledger.append_event("ucr", json!({})).unwrap();
    let mut text = std::fs::read_to_string(ledger.path()).unwrap();
    text.push_str("{not json\n");
    std::fs::write(ledger.path(), text).unwrap();

    let result = ledger.verify_chain().unwrap();
    assert_eq!(result.as_pair(), (false, Some("invalid json at line 2")));
}

#[tokio::test]
async fn sql_ledger_appends_and_verifies() {
    let ledger = SqlLedger::connect("sqlite::memory:").await.unwrap();
    let first = ledger.append("ucr", &json!({"b": 2, "a": 1})).await.unwrap();
    let second = ledger.append("ucr", &json!({"n": 2})).await.unwrap();

    assert_eq!(first.seq, 1);
    assert_eq!(first.payload_json, r#"{"a":1,"b":2}"#);
    assert_eq!(second.prev_hash, first.event_hash);
    assert_eq!(ledger.count().await.unwrap(), 2);
    assert!(ledger.verify().await.unwrap().valid);
}

#[tokio::test]
async fn sql_ledger_detects_seq_gap() {
    let ledger = SqlLedger::connect("sqlite::memory:").await.unwrap();
    for n in 0..3 {
        ledger.append("ucr", &json!({"n": n})).await.unwrap();
    }
    sqlx::query("DELETE FROM events WHERE seq = 2")
        .execute(ledger.pool())
        .await
        .unwrap();

    let result = ledger.verify().await.unwrap();
    assert_eq!(result.as_pair(), (false, Some("seq gap at seq 2")));
}

#[tokio::test]
async fn sql_ledger_detects_payload_edit() {
    let ledger = SqlLedger::connect("sqlite::memory:").await.unwrap();
    ledger.append("ucr", &json!({"n": 1})).await.unwrap();
    sqlx::query("UPDATE events SET payload_json = '{\"n\":9}' WHERE seq = 1")
        .execute(ledger.pool())
        .await
        .unwrap();
    let result = ledger.verify().await.unwrap();
    assert_eq!(result.as_pair(), (false, Some("hash mismatch at seq 1")));
}

#[tokio::test]
async fn sql_ledger_persists_to_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ledger.db");
    {
        let ledger = SqlLedger::open(&path).await.unwrap();
        ledger.append("ucr", &json!({"n": 1})).await.unwrap();
        ledger.pool().close().await;
    }
    let reopened = SqlLedger::open(&path).await.unwrap();
    let next = reopened.append("ucr", &json!({"n": 2})).await.unwrap();
    assert_eq!(next.seq, 2);
    assert!(reopened.verify().await.unwrap().valid);
}
