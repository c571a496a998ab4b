use std::fs;

use eidolon_bvps::{canned_spec, BvpsCache, Example, Spec, Value as BvpsValue};
use eidolon_codec::from_bytes;
use eidolon_episode::{
    verify_ucr_hash, Action, EidolonConfig, EpisodeController, EpisodeOutcome, UCR_FILE,
    WITNESS_FILE,
};
use eidolon_ledger::CHAIN_FILE;
use eidolon_store::FlushMode;
use eidolon_verify::{LaneStatus, ProgramSource, Solution, TaskInput};
use serde_json::{json, Value};
use tempfile::TempDir;

fn config(dir: &TempDir) -> EidolonConfig {
    let mut config = EidolonConfig::with_root(dir.path());
    config.bvps.persist = false;
    config.store.flush_mode = FlushMode::PerEpisode;
    config
}

async fn controller(config: EidolonConfig) -> EpisodeController {
    let cache = BvpsCache::memory_only(&config.paths.store_dir());
    EpisodeController::open_with_cache(config, cache)
        .await
        .unwrap()
}

fn status(outcome: &EpisodeOutcome, lane: &str) -> LaneStatus {
    outcome.ucr.lane_verdicts[lane]
}

fn example(x: i64, out: i64) -> Example {
    Example::new([("x".to_string(), BvpsValue::Int(x))], Some(BvpsValue::Int(out)))
}

fn spec_task(spec: &Spec) -> TaskInput {
    TaskInput::new(format!("BVPS_SPEC: {}", serde_json::to_string(spec).unwrap()))
}

fn assert_refusal_committed(ctl: &EpisodeController, outcome: &EpisodeOutcome) {
    assert_eq!(outcome.ucr.decision.action, Action::Refuse);
    assert!(outcome.ucr.final_result.starts_with("refused: failed lanes ["));
    let written = fs::read(outcome.run_dir.join(UCR_FILE)).unwrap();
    assert!(verify_ucr_hash(&from_bytes(&written).unwrap()).unwrap());
    assert!(outcome.run_dir.join(WITNESS_FILE).exists());
    assert_eq!(ctl.store().entries_of_type("capsule_failure").len(), 1);
    assert_eq!(ctl.chain().events().unwrap().len(), 1);
}

#[tokio::test]
async fn arith_episode_answers_and_commits() {
    let dir = TempDir::new().unwrap();
    let mut ctl = controller(config(&dir)).await;

    let outcome = ctl
        .run_episode(&TaskInput::new("ARITH: 2 + 3 * 4"), 0)
        .await
        .unwrap();

    assert_eq!(outcome.ucr.decision.action, Action::Answer);
    assert_eq!(outcome.ucr.final_result, "result=14");
    for lane in ["recompute", "translation", "consequence", "anchors"] {
        assert_eq!(status(&outcome, lane), LaneStatus::Pass, "{lane}");
    }

    let written = fs::read(outcome.run_dir.join(UCR_FILE)).unwrap();
    let record = from_bytes(&written).unwrap();
    assert!(verify_ucr_hash(&record).unwrap());
    assert_eq!(record["hashes"]["ucr_hash"], json!(outcome.ucr.hashes.ucr_hash));
    assert_eq!(record["schema_version"], json!("ucr/v1"));
    assert!(outcome.run_dir.join(WITNESS_FILE).exists());
    assert!(outcome
        .mirrored
        .contains(&"verify/recompute_arith.json".to_string()));

    let entries = ctl.store().entries_of_type("capsule_success");
    assert_eq!(entries.len(), 1);
    assert_eq!(ctl.chain().events().unwrap().len(), 1);
}

#[tokio::test]
async fn unevaluable_expression_refuses_with_a_record() {
    let dir = TempDir::new().unwrap();
    let mut ctl = controller(config(&dir)).await;

    let outcome = ctl.run_episode(&TaskInput::new("ARITH: 1 / 0"), 0).await.unwrap();

    assert_eq!(outcome.ucr.decision.action, Action::Refuse);
    assert!(outcome.ucr.final_result.starts_with("refused: failed lanes ["));
    assert!(outcome.ucr.decision.failed_lanes.contains(&"recompute".to_string()));
    assert!(outcome.run_dir.join(UCR_FILE).exists());
    assert_eq!(ctl.store().entries_of_type("capsule_failure").len(), 1);
}

#[tokio::test]
async fn bvps_signature_task_synthesizes_and_answers() {
    let dir = TempDir::new().unwrap();
    let mut ctl = controller(config(&dir)).await;

    let outcome = ctl
        .run_episode(&TaskInput::new("BVPS: abs(int)->int"), 0)
        .await
        .unwrap();

    assert_eq!(outcome.ucr.solution.kind(), "bvps_program");
    assert_eq!(status(&outcome, "translation"), LaneStatus::Pass);
    assert_eq!(status(&outcome, "consequence"), LaneStatus::Pass);
    assert!(outcome.answered());
    assert_eq!(outcome.ucr.chosen_interpretation_id, "bvps:abs");
    assert_eq!(
        outcome.ucr.budgets.steps,
        canned_spec("abs").unwrap().bounds.step_budget
    );
    assert!(outcome.mirrored.contains(&"bvps/report.json".to_string()));
}

#[tokio::test]
async fn counterexample_triggers_one_repair_cycle() {
    let dir = TempDir::new().unwrap();
    let mut ctl = controller(config(&dir)).await;

    let mut spec = canned_spec("x_plus_one").unwrap();
    spec.examples = vec![example(0, 0), example(1, 1)];
    let task = spec_task(&spec);

    let outcome = ctl.run_episode(&task, 0).await.unwrap();

    assert!(outcome.answered(), "{}", outcome.ucr.decision.rationale);
    assert_eq!(status(&outcome, "translation"), LaneStatus::Pass);
    assert_eq!(status(&outcome, "consequence"), LaneStatus::Pass);
    let bvps = outcome.ucr.solution.as_bvps().unwrap();
    assert_eq!(bvps.attempt, 2);
    assert!(bvps.spec.examples.contains(&example(0, 1)));
    assert_eq!(ctl.cegis_calls(), 2);

    let consequence = outcome
        .ucr
        .verification
        .iter()
        .find(|v| v.lane == "consequence")
        .unwrap();
    assert_eq!(consequence.evidence.len(), 2);
    let attempts: Vec<Value> = consequence
        .evidence
        .iter()
        .map(|e| ctl.store().read_json(&e.hash).unwrap()["attempt"].clone())
        .collect();
    assert_eq!(attempts, vec![json!(1), json!(2)]);
    assert_eq!(outcome.ucr.solution_artifacts.len(), 2);
    assert!(outcome
        .mirrored
        .contains(&"bvps/report_attempt2.json".to_string()));
}

#[tokio::test]
async fn repeated_bvps_task_hits_the_memory_cache() {
    let dir = TempDir::new().unwrap();
    let mut ctl = controller(config(&dir)).await;
    let task = TaskInput::new("BVPS: abs(int)->int");

    let first = ctl.run_episode(&task, 0).await.unwrap();
    let second = ctl.run_episode(&task, 0).await.unwrap();

    assert_eq!(first.ucr.bvps_cache.as_ref().unwrap()["status"], json!("miss"));
    assert_eq!(second.ucr.bvps_cache.as_ref().unwrap()["status"], json!("hit:mem"));
    assert_eq!(ctl.cegis_calls(), 1);
    assert_eq!(
        second.ucr.solution.as_bvps().unwrap().source,
        ProgramSource::CacheMem
    );
    assert_eq!(first.ucr.episode_id, second.ucr.episode_id);
    assert_eq!(
        second.run_dir.file_name().unwrap().to_string_lossy(),
        format!("{}-r01", second.ucr.episode_id)
    );
}

#[tokio::test]
async fn tampered_chain_is_reported_by_line() {
    let dir = TempDir::new().unwrap();
    let mut ctl = controller(config(&dir)).await;
    ctl.run_episode(&TaskInput::new("ARITH: 1 + 1"), 0).await.unwrap();
    ctl.run_episode(&TaskInput::new("ARITH: 2 + 2"), 0).await.unwrap();

    let (chain, sql) = ctl.verify_ledgers().await.unwrap();
    assert!(chain.valid);
    assert!(sql.valid);

    let path = dir.path().join(CHAIN_FILE);
    let text = fs::read_to_string(&path).unwrap();
    let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
    let mut event: Value = serde_json::from_str(&lines[1]).unwrap();
    event["payload"]["action"] = json!("refuse");
    lines[1] = serde_json::to_string(&event).unwrap();
    fs::write(&path, lines.join("\n") + "\n").unwrap();

    let (chain, sql) = ctl.verify_ledgers().await.unwrap();
    assert_eq!(chain.as_pair(), (false, Some("hash mismatch at line 2")));
    assert!(sql.valid);
}

#[tokio::test]
async fn admitted_skill_is_replayed_next_time() {
    let dir = TempDir::new().unwrap();
    let mut cfg = config(&dir);
    cfg.admission.auto_skills = true;
    let mut ctl = controller(cfg).await;
    let task = TaskInput::new("BVPS: abs(int)->int");

    let first = ctl.run_episode(&task, 0).await.unwrap();
    let admitted = first.ucr.admitted_skill.clone().unwrap();
    assert!(admitted.admitted, "{:?}", admitted.reasons);
    assert!(dir.path().join("skills").join("abs").join("bundle.json").exists());
    assert!(first
        .mirrored
        .contains(&"skills/abs/admission_verdict.json".to_string()));

    let second = ctl.run_episode(&task, 0).await.unwrap();
    let bvps = second.ucr.solution.as_bvps().unwrap();
    assert_eq!(bvps.source, ProgramSource::Skill);
    assert_eq!(bvps.program_hash, first.ucr.solution.as_bvps().unwrap().program_hash);
    assert_eq!(second.ucr.used_skill.as_ref().unwrap().name, "abs");
    assert!(second.ucr.admitted_skill.is_none());
    assert!(second.answered());
    assert_eq!(ctl.cegis_calls(), 1);
}

#[tokio::test]
async fn kernel_tasks_answer_through_the_rule_kernel() {
    let dir = TempDir::new().unwrap();
    let mut ctl = controller(config(&dir)).await;

    let list = ctl
        .run_episode(&TaskInput::new("LIST: sort [3, 1, 2]"), 0)
        .await
        .unwrap();
    assert!(list.answered(), "{}", list.ucr.decision.rationale);
    assert!(matches!(list.ucr.solution, Solution::List { .. }));
    assert_eq!(list.ucr.interpretations.len(), 2);

    let world = ctl
        .run_episode(&TaskInput::new("WORLD: 5x5 start=0,0 goal=3,2"), 0)
        .await
        .unwrap();
    assert!(world.answered(), "{}", world.ucr.decision.rationale);
    assert_eq!(world.ucr.solution.kind(), "world");
}

#[tokio::test]
async fn batched_manifest_flushes_at_suite_end() {
    let dir = TempDir::new().unwrap();
    let mut cfg = config(&dir);
    cfg.store.flush_mode = FlushMode::PerSuite;
    let mut ctl = controller(cfg).await;

    ctl.begin_suite();
    ctl.run_episode(&TaskInput::new("ARITH: 6 * 7"), 0).await.unwrap();
    let stats = ctl.end_suite().unwrap();

    assert_eq!(stats.episodes, 1);
    assert!(stats.manifest_flushed);
    assert!(ctl.store().manifest_path().exists());
}

#[tokio::test]
async fn unreadable_task_is_a_usage_error() {
    let dir = TempDir::new().unwrap();
    let mut ctl = controller(config(&dir)).await;

    let err = ctl
        .run_episode(&TaskInput::new("please do something"), 0)
        .await
        .unwrap_err();
    assert!(err.is_usage(), "{err}");
    assert!(ctl.chain().events().unwrap().is_empty());
}

#[tokio::test]
async fn exhausted_synthesis_still_commits_a_refusal() {
    let dir = TempDir::new().unwrap();
    let mut ctl = controller(config(&dir)).await;

    let mut spec = canned_spec("x_plus_one").unwrap();
    spec.oracle = None;
    spec.examples = vec![example(0, 7), example(1, -50), example(2, 999)];
    spec.bounds.max_programs = 10;

    let outcome = ctl.run_episode(&spec_task(&spec), 0).await.unwrap();

    assert_refusal_committed(&ctl, &outcome);
    assert_eq!(outcome.ucr.solution.kind(), "bvps_unsolved");
    for lane in ["recompute", "translation", "consequence"] {
        assert_eq!(status(&outcome, lane), LaneStatus::Fail, "{lane}");
        assert!(outcome.ucr.decision.failed_lanes.contains(&lane.to_string()));
    }
    let recompute = outcome
        .ucr
        .verification
        .iter()
        .find(|v| v.lane == "recompute")
        .unwrap();
    let evidence = ctl.store().read_json(&recompute.evidence[0].hash).unwrap();
    assert_eq!(evidence["evidence"]["tried"], json!(10));
    assert_eq!(evidence["evidence"]["max_programs"], json!(10));
    assert!(outcome.mirrored.contains(&"bvps/report.json".to_string()));
    assert_eq!(ctl.cegis_calls(), 1);
}

#[tokio::test]
async fn failed_repair_still_commits_a_refusal() {
    let dir = TempDir::new().unwrap();
    let mut ctl = controller(config(&dir)).await;

    // room for `x` but not for the repaired `x - -1`
    let mut spec = canned_spec("x_plus_one").unwrap();
    spec.examples = vec![example(0, 0), example(1, 1)];
    spec.bounds.max_programs = 5;

    let outcome = ctl.run_episode(&spec_task(&spec), 0).await.unwrap();

    assert_refusal_committed(&ctl, &outcome);
    match &outcome.ucr.solution {
        Solution::BvpsUnsolved(failure) => {
            assert_eq!(failure.attempt, 2);
            assert_eq!(failure.tried, 5);
        }
        other => panic!("expected an unsolved repair, got {other:?}"),
    }
    assert_eq!(status(&outcome, "consequence"), LaneStatus::Fail);
    assert_eq!(ctl.cegis_calls(), 2);
    assert_eq!(outcome.ucr.solution_artifacts.len(), 2);
    assert!(outcome
        .mirrored
        .contains(&"bvps/report_attempt2.json".to_string()));
}

#[tokio::test]
async fn memory_cache_is_shared_by_controllers_on_one_root() {
    let dir = TempDir::new().unwrap();
    let task = TaskInput::new("BVPS: abs(int)->int");

    let mut first = EpisodeController::open(config(&dir)).await.unwrap();
    let miss = first.run_episode(&task, 0).await.unwrap();
    assert_eq!(miss.ucr.bvps_cache.as_ref().unwrap()["status"], json!("miss"));
    drop(first);

    let mut second = EpisodeController::open(config(&dir)).await.unwrap();
    let hit = second.run_episode(&task, 0).await.unwrap();
    assert_eq!(hit.ucr.bvps_cache.as_ref().unwrap()["status"], json!("hit:mem"));
    assert_eq!(second.cegis_calls(), 0);
}
