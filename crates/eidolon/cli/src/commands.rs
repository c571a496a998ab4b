//! Subcommand implementations. Each returns the process exit code.

use std::path::Path;

use anyhow::Context;
use eidolon_codec::from_bytes;
use eidolon_episode::{
    verify_ucr_hash, EidolonConfig, EpisodeController, EpisodeError, Ucr, UCR_FILE,
};
use eidolon_verify::TaskInput;
use serde_json::{json, Value};
use tracing::info;

use crate::EXIT_REFUSED;

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn summary(ucr: &Ucr) -> Value {
    json!({
        "episode_id": ucr.episode_id,
        "action": ucr.decision.action,
        "final_result": ucr.final_result,
        "lane_verdicts": ucr.lane_verdicts,
        "run_dir": ucr.run_dir,
        "ucr_hash": ucr.hashes.ucr_hash,
    })
}

/// One suite line: a JSON task object or plain task text. Blank lines and
/// `#` comments yield `None`.
pub fn parse_task_line(line: &str) -> Result<Option<TaskInput>, EpisodeError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    if line.starts_with('{') {
        return serde_json::from_str(line)
            .map(Some)
            .map_err(|e| EpisodeError::Schema(format!("suite line: {e}")));
    }
    Ok(Some(TaskInput::new(line)))
}

pub async fn run(
    config: EidolonConfig,
    task: &str,
    data: Option<&str>,
    seed: u64,
) -> anyhow::Result<u8> {
    let mut input = TaskInput::new(task);
    if let Some(data) = data {
        let value: Value = serde_json::from_str(data)
            .map_err(|e| EpisodeError::Schema(format!("--data: {e}")))?;
        input = input.with_data(value);
    }

    let mut controller = EpisodeController::open(config).await?;
    let outcome = controller.run_episode(&input, seed).await?;
    print_json(&summary(&outcome.ucr))?;
    Ok(if outcome.answered() { 0 } else { EXIT_REFUSED })
}

pub async fn suite(config: EidolonConfig, file: &Path, seed: u64) -> anyhow::Result<u8> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("reading suite {}", file.display()))?;
    let mut tasks = Vec::new();
    for line in text.lines() {
        tasks.extend(parse_task_line(line)?);
    }

    let mut controller = EpisodeController::open(config).await?;
    let preloaded = controller.begin_suite();
    info!(tasks = tasks.len(), preloaded, "Suite started");

    let mut refused = 0usize;
    let mut episodes = Vec::with_capacity(tasks.len());
    for task in &tasks {
        let outcome = controller.run_episode(task, seed).await?;
        if !outcome.answered() {
            refused += 1;
        }
        episodes.push(summary(&outcome.ucr));
    }
    let stats = controller.end_suite()?;

    print_json(&json!({
        "episodes": episodes,
        "refused": refused,
        "stats": stats,
    }))?;
    Ok(if refused == 0 { 0 } else { EXIT_REFUSED })
}

pub async fn verify_ledger(config: EidolonConfig) -> anyhow::Result<u8> {
    let controller = EpisodeController::open(config).await?;
    let (chain, sql) = controller.verify_ledgers().await?;
    let ok = chain.valid && sql.valid;
    print_json(&json!({"chain": chain, "sql": sql, "valid": ok}))?;
    Ok(if ok { 0 } else { EXIT_REFUSED })
}

pub fn show(run_dir: &Path) -> anyhow::Result<u8> {
    let path = run_dir.join(UCR_FILE);
    let bytes =
        std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
    let record = from_bytes(&bytes)?;
    let valid = verify_ucr_hash(&record)?;
    let field = |key: &str| record.get(key).cloned().unwrap_or(Value::Null);
    print_json(&json!({
        "episode_id": field("episode_id"),
        "action": record.get("decision").and_then(|d| d.get("action")).cloned(),
        "final_result": field("final_result"),
        "lane_verdicts": field("lane_verdicts"),
        "ucr_hash_valid": valid,
    }))?;
    Ok(if valid { 0 } else { EXIT_REFUSED })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn suite_lines_accept_text_and_json() {
        assert_eq!(parse_task_line("  # comment").unwrap(), None);
        assert_eq!(parse_task_line("").unwrap(), None);
        assert_eq!(
            parse_task_line("ARITH: 1 + 2").unwrap(),
            Some(TaskInput::new("ARITH: 1 + 2"))
        );
        let line = r#"{"task": "LIST: sort [2, 1]", "data": {"k": 1}}"#;
        assert_eq!(
            parse_task_line(line).unwrap(),
            Some(TaskInput::new("LIST: sort [2, 1]").with_data(json!({"k": 1})))
        );
        assert!(matches!(parse_task_line("{oops"), Err(EpisodeError::Schema(_))));
    }

    #[tokio::test]
    async fn run_then_show_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = EidolonConfig::with_root(dir.path());
        config.bvps.persist = false;

        assert_eq!(run(config.clone(), "ARITH: 6 * 7", None, 0).await.unwrap(), 0);
        let runs: Vec<_> = std::fs::read_dir(config.paths.runs_dir())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(runs.len(), 1);
        assert_eq!(show(&runs[0]).unwrap(), 0);

        assert_eq!(verify_ledger(config).await.unwrap(), 0);
    }
}
