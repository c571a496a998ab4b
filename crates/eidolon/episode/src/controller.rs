//! The episode controller.
//!
//! One episode runs interpret, solve, verify (with one BVPS auto-repair
//! cycle), decide, maybe-admit, capsule, run-dir materialization and the
//! ledger append, in that order. Everything but the SQL ledger append is
//! synchronous.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

use eidolon_bvps::{cache_stats, oracle_output, BvpsCache, Example, Spec};
use eidolon_codec::{sha256_canonical_of, to_value};
use eidolon_ledger::{now_ts_utc, ChainLedger, ChainVerification, SqlLedger};
use eidolon_skills::{admit, compile_bundle, CompileRequest};
use eidolon_store::{
    manifest_root_hash_of, ArtifactRef, ArtifactStore, ManifestEntry, StoreCosts, MEDIA_TAR,
    UCR_TYPE,
};
use eidolon_verify::{
    evaluate, kernel_from_name, primary_lanes, verify_all, AnchorsLane, Interpretation, Kernel,
    LaneContext, LaneRunner, LaneStatus, LaneVerdict, Number, ProgramSource, Solution, TaskInput,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::capsule::{build_capsule, repro_text, CapsuleContents, CAPSULE_FAILURE, CAPSULE_SUCCESS};
use crate::config::EidolonConfig;
use crate::decision::{decide, final_result, Decision};
use crate::error::{EpisodeError, EpisodeResult};
use crate::interpret::{interpret, Reading};
use crate::rundir::{MirrorItem, RunDir, UCR_FILE, WITNESS_FILE};
use crate::solver::{BvpsSolver, CacheOutcome, SolveOutcome, Solved, Unsolved, UsedSkill};
use crate::ucr::{episode_id, AdmittedSkill, Budgets, Ucr, UcrHashes, UCR_SCHEMA_VERSION};

pub const TASK_ARTIFACT_TYPE: &str = "task_input";
pub const SOLUTION_ARTIFACT_TYPE: &str = "solution";
pub const WITNESS_ARTIFACT_TYPE: &str = "witness_packet";

/// What one episode left behind.
#[derive(Debug, Clone)]
pub struct EpisodeOutcome {
    pub ucr: Ucr,
    pub ucr_ref: ArtifactRef,
    pub run_dir: PathBuf,
    /// Files mirrored under `<run_dir>/artifacts/`.
    pub mirrored: Vec<String>,
}

impl EpisodeOutcome {
    pub fn answered(&self) -> bool {
        self.ucr.decision.answered()
    }
}

/// Totals reported at a suite boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteStats {
    pub episodes: u64,
    pub cegis_calls: u64,
    pub manifest_flushed: bool,
    pub bvps_cache: Value,
    pub store: StoreCosts,
}

/// Artifacts collected while an episode runs.
#[derive(Default)]
struct Collected {
    artifacts: Vec<ArtifactRef>,
    mirror: Vec<MirrorItem>,
}

impl Collected {
    fn add(&mut self, artifact: &ArtifactRef, alias: Option<String>) {
        self.artifacts.push(artifact.clone());
        self.mirror.push(match alias {
            Some(alias) => MirrorItem::aliased(artifact, alias),
            None => MirrorItem::new(artifact),
        });
    }
}

/// BVPS bookkeeping that ends up in the UCR.
#[derive(Default)]
struct BvpsTrail {
    cache: Option<Value>,
    used_skill: Option<UsedSkill>,
    patch_ids: Vec<String>,
    repair_counterexample: Option<Example>,
}

impl BvpsTrail {
    fn record(&mut self, solved: &Solved) {
        if solved.used_skill.is_some() {
            self.used_skill = solved.used_skill.clone();
        }
        self.note(solved.cache.as_ref(), &solved.patch_ids);
    }

    fn record_unsolved(&mut self, unsolved: &Unsolved) {
        self.note(Some(&unsolved.cache), &unsolved.patch_ids);
    }

    fn note(&mut self, cache: Option<&CacheOutcome>, patch_ids: &[String]) {
        if let Some(cache) = cache {
            self.cache = Some(cache.to_json());
        }
        for id in patch_ids {
            if !self.patch_ids.contains(id) {
                self.patch_ids.push(id.clone());
            }
        }
    }

    /// Turn a solve outcome into the solution it stands for, collecting its
    /// report under `alias`.
    fn resolve(
        &mut self,
        outcome: SolveOutcome,
        collected: &mut Collected,
        alias: &str,
    ) -> Solution {
        match outcome {
            SolveOutcome::Solved(solved) => {
                self.record(&solved);
                collected.add(&solved.report, Some(alias.to_string()));
                Solution::BvpsProgram(solved.solution)
            }
            SolveOutcome::Unsolved(unsolved) => {
                self.record_unsolved(&unsolved);
                collected.add(&unsolved.report, Some(alias.to_string()));
                Solution::BvpsUnsolved(unsolved.failure)
            }
        }
    }
}

fn ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}

pub struct EpisodeController {
    config: EidolonConfig,
    store: ArtifactStore,
    chain: ChainLedger,
    sql: SqlLedger,
    kernel: Box<dyn Kernel>,
    solver: BvpsSolver,
    episodes: u64,
}

impl std::fmt::Debug for EpisodeController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpisodeController")
            .field("root", &self.config.paths.root)
            .field("kernel", &self.kernel.name())
            .field("episodes", &self.episodes)
            .finish()
    }
}

impl EpisodeController {
    pub async fn open(config: EidolonConfig) -> EpisodeResult<Self> {
        let cache = BvpsCache::open(&config.bvps.cache_settings(), &config.paths.store_dir());
        Self::open_with_cache(config, cache).await
    }

    /// Open with an explicit program cache, e.g. [`BvpsCache::memory_only`].
    pub async fn open_with_cache(config: EidolonConfig, cache: BvpsCache) -> EpisodeResult<Self> {
        config.validate()?;
        let kernel = kernel_from_name(&config.kernel.name)?;
        std::fs::create_dir_all(&config.paths.root)?;
        let store = ArtifactStore::open(config.paths.store_dir(), config.store.flush_mode)?;
        let chain = ChainLedger::new(config.paths.ledger_chain());
        let sql = SqlLedger::open(&config.paths.ledger_db()).await?;
        let solver = BvpsSolver::with_cache(&config.paths.root, cache, &config);
        info!(
            root = %config.paths.root.display(),
            kernel = %kernel.name(),
            flush_mode = %config.store.flush_mode,
            "Episode controller ready"
        );
        Ok(Self {
            config,
            store,
            chain,
            sql,
            kernel,
            solver,
            episodes: 0,
        })
    }

    pub fn config(&self) -> &EidolonConfig {
        &self.config
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn chain(&self) -> &ChainLedger {
        &self.chain
    }

    pub fn sql(&self) -> &SqlLedger {
        &self.sql
    }

    pub fn cegis_calls(&self) -> u64 {
        self.solver.cegis_calls()
    }

    /// Suite start: load the persisted program cache once.
    pub fn begin_suite(&mut self) -> usize {
        self.solver.cache_mut().preload()
    }

    /// Suite end: flush a batched manifest and report totals.
    pub fn end_suite(&mut self) -> EpisodeResult<SuiteStats> {
        let manifest_flushed = self.store.end_suite()?;
        let stats = SuiteStats {
            episodes: self.episodes,
            cegis_calls: self.solver.cegis_calls(),
            manifest_flushed,
            bvps_cache: cache_stats().to_json(),
            store: self.store.costs(),
        };
        info!(
            episodes = stats.episodes,
            cegis_calls = stats.cegis_calls,
            manifest_flushed,
            "Suite finished"
        );
        Ok(stats)
    }

    /// Verify the JSONL chain and the SQL mirror.
    pub async fn verify_ledgers(&self) -> EpisodeResult<(ChainVerification, ChainVerification)> {
        let chain = self.chain.verify_chain()?;
        let sql = self.sql.verify().await?;
        Ok((chain, sql))
    }

    pub async fn run_episode(
        &mut self,
        task: &TaskInput,
        seed: u64,
    ) -> EpisodeResult<EpisodeOutcome> {
        let started = Instant::now();
        let episode_id = episode_id(task, seed)?;
        let threads = self.config.threads();
        info!(episode_id = %episode_id, seed, threads, "Episode started");

        let mut collected = Collected::default();
        let mut costs: BTreeMap<String, f64> = BTreeMap::new();
        let mut trail = BvpsTrail::default();

        let task_ref = self
            .store
            .put_serialized(task, TASK_ARTIFACT_TYPE, "episode:task", &[])?;
        collected.add(&task_ref, None);
        let task_parents = vec![task_ref.hash.clone()];

        // interpret
        let phase = Instant::now();
        let interpreted = interpret(task, self.kernel.as_ref(), seed)?;
        let chosen = interpreted.chosen()?.clone();
        costs.insert("interpret_ms".into(), ms(phase));
        debug!(episode_id = %episode_id, interpretation = %chosen.id, "Interpreted task");

        // solve
        let phase = Instant::now();
        let mut solution = match &interpreted.reading {
            Reading::Bvps(spec) => {
                let outcome = self.solver.solve(spec, 1, &self.store, &task_parents)?;
                trail.resolve(outcome, &mut collected, "bvps/report.json")
            }
            Reading::Arith { expression } => Solution::Arith {
                expression: expression.clone(),
                output: match evaluate(expression) {
                    Ok(value) => value,
                    Err(err) => {
                        // lanes re-evaluate and turn this into FAIL evidence
                        warn!(
                            episode_id = %episode_id,
                            error = %err,
                            "Expression does not evaluate"
                        );
                        Number::Int(0)
                    }
                },
            },
            Reading::Kernel => {
                let proposal = self.kernel.propose_solution(task, &chosen, seed)?;
                Solution::from_proposal(&chosen, &proposal)?
            }
        };
        let mut solution_refs = vec![self.store_solution(&solution, &task_parents)?];
        costs.insert("solve_ms".into(), ms(phase));

        // verify
        let phase = Instant::now();
        let mut verdicts = {
            let ctx = LaneContext::new(task, &solution, &self.store, self.kernel.as_ref())
                .with_interpretation(&chosen)
                .with_seed(seed);
            verify_all(&ctx)?
        };

        if self.config.bvps.autorepair {
            if let Some(repaired) = self.auto_repair(
                task,
                &chosen,
                &solution,
                &mut verdicts,
                seed,
                &task_parents,
                &mut trail,
                &mut collected,
            )? {
                solution_refs.push(self.store_solution(&repaired, &task_parents)?);
                solution = repaired;
            }
        }
        costs.insert("verify_ms".into(), ms(phase));
        for verdict in &verdicts {
            costs.insert(format!("lane_{}_ms", verdict.lane), verdict.cost_ms);
            for (index, evidence) in verdict.evidence.iter().enumerate() {
                let alias = if index == 0 {
                    format!("verify/{}_{}.json", verdict.lane, solution.kind())
                } else {
                    format!("verify/{}_{}_attempt{}.json", verdict.lane, solution.kind(), index + 1)
                };
                collected.add(evidence, Some(alias));
            }
        }

        // decide
        let critique = self.kernel.critique(task, &solution, &verdicts);
        let decision = decide(&self.config.admission.required_lanes, &verdicts, critique);
        let final_result = final_result(&decision, &solution)?;
        info!(
            episode_id = %episode_id,
            action = %decision.action,
            failed = ?decision.failed_lanes,
            "Episode decided"
        );

        // admission
        let phase = Instant::now();
        let admitted_skill = self.maybe_admit(&solution, &verdicts, &trail, seed, &mut collected)?;
        costs.insert("admission_ms".into(), ms(phase));

        for solution_ref in &solution_refs {
            collected.add(solution_ref, None);
        }

        // capsule
        let phase = Instant::now();
        let capsule = self.store_capsule(
            &episode_id,
            task,
            &chosen,
            &solution,
            &verdicts,
            &decision,
            seed,
        )?;
        collected.add(&capsule, None);
        costs.insert("capsule_ms".into(), ms(phase));

        let lane_verdicts: BTreeMap<String, LaneStatus> = verdicts
            .iter()
            .map(|v| (v.lane.clone(), v.status))
            .collect();
        let witness = json!({
            "episode_id": episode_id,
            "schema_version": UCR_SCHEMA_VERSION,
            "task": task_ref.hash,
            "solutions": solution_refs.iter().map(|r| r.hash.clone()).collect::<Vec<_>>(),
            "capsule": capsule,
            "lane_verdicts": lane_verdicts,
            "evidence": verdicts
                .iter()
                .flat_map(|v| v.evidence.iter().map(|e| e.hash.clone()))
                .collect::<Vec<_>>(),
            "decision": decision.action,
            "final_result": final_result,
        });
        let witness_ref = self.store.put_json(
            &witness,
            WITNESS_ARTIFACT_TYPE,
            "episode:witness",
            &[capsule.hash.clone()],
        )?;
        collected.add(&witness_ref, None);

        // hashes over the episode's own manifest
        let artifact_manifest = self.episode_manifest(&collected.artifacts);
        let manifest_hash = manifest_root_hash_of(&artifact_manifest, true)?;

        // run dir + UCR
        let run_dir = RunDir::create(&self.config.paths.runs_dir(), &episode_id)?;
        costs.insert("total_ms".into(), ms(started));
        let budgets = Budgets {
            steps: solution.bvps_spec().map(|s| s.bounds.step_budget).unwrap_or(0),
            cpu_ms: ms(started),
        };
        let mut ucr = Ucr {
            episode_id: episode_id.clone(),
            schema_version: UCR_SCHEMA_VERSION.to_string(),
            run_dir: run_dir.path().display().to_string(),
            ts_utc: now_ts_utc(),
            task_text: task.normalized().to_string(),
            task_input: task.clone(),
            interpretations: interpreted.interpretations.clone(),
            chosen_interpretation_id: chosen.id.clone(),
            budgets,
            kernel: json!({
                "name": self.kernel.name(),
                "runtime": {
                    "threads": threads,
                    "flush_mode": self.config.store.flush_mode,
                },
            }),
            solution: solution.clone(),
            lane_verdicts,
            costs,
            artifact_manifest,
            decision,
            solution_artifacts: solution_refs,
            verification: verdicts,
            final_result,
            hashes: UcrHashes {
                ucr_hash: String::new(),
                artifact_manifest_hash: manifest_hash.clone(),
            },
            witness_packet: witness_ref.clone(),
            used_skill: trail.used_skill,
            admitted_skill,
            active_language_patches: trail.patch_ids,
            bvps_cache: trail.cache,
        };
        let ucr_hash = ucr.seal()?;
        let ucr_json = ucr.to_json()?;
        run_dir.write_canonical(UCR_FILE, &ucr_json)?;
        run_dir.write_canonical(WITNESS_FILE, &witness)?;
        let mirrored = run_dir.mirror(&self.store, &collected.mirror)?;
        let ucr_ref = self
            .store
            .put_json(&ucr_json, UCR_TYPE, "episode:ucr", &[witness_ref.hash.clone()])?;

        // ledger
        let payload = json!({
            "episode_id": episode_id,
            "ucr_hash": ucr_hash,
            "manifest_hash": manifest_hash,
            "action": ucr.decision.action,
            "run_dir": ucr.run_dir,
        });
        self.chain.append_event("ucr", payload.clone())?;
        self.sql.append("ucr", &payload).await?;
        self.episodes += 1;

        info!(
            episode_id = %episode_id,
            ucr_hash = %ucr_hash,
            run_dir = %run_dir.path().display(),
            final_result = %ucr.final_result,
            "Episode committed"
        );
        Ok(EpisodeOutcome {
            ucr,
            ucr_ref,
            run_dir: run_dir.path().to_path_buf(),
            mirrored,
        })
    }

    fn store_solution(
        &self,
        solution: &Solution,
        parents: &[String],
    ) -> EpisodeResult<ArtifactRef> {
        Ok(self
            .store
            .put_serialized(solution, SOLUTION_ARTIFACT_TYPE, "episode:solve", parents)?)
    }

    /// Counter-example captured by a failed consequence lane, if any.
    fn captured_counterexample(&self, verdicts: &[LaneVerdict]) -> EpisodeResult<Option<Example>> {
        let Some(consequence) = verdicts
            .iter()
            .find(|v| v.lane == "consequence" && v.status == LaneStatus::Fail)
        else {
            return Ok(None);
        };
        let Some(evidence) = consequence.evidence.last() else {
            return Ok(None);
        };
        let body = self.store.read_json(&evidence.hash)?;
        match body.get("evidence").and_then(|e| e.get("counterexample")) {
            None | Some(Value::Null) => Ok(None),
            Some(cex) => serde_json::from_value(cex.clone())
                .map(Some)
                .map_err(|e| EpisodeError::Schema(format!("consequence counter-example: {e}"))),
        }
    }

    /// One repair cycle for a BVPS solution whose consequence lane found a
    /// counter-example. Returns the repaired solution when a cycle ran; it
    /// is unsolved when the second synthesis runs out of candidates.
    #[allow(clippy::too_many_arguments)]
    fn auto_repair(
        &mut self,
        task: &TaskInput,
        chosen: &Interpretation,
        solution: &Solution,
        verdicts: &mut Vec<LaneVerdict>,
        seed: u64,
        parents: &[String],
        trail: &mut BvpsTrail,
        collected: &mut Collected,
    ) -> EpisodeResult<Option<Solution>> {
        let Some(bvps) = solution.as_bvps() else {
            return Ok(None);
        };
        let Some(counterexample) = self.captured_counterexample(verdicts)? else {
            return Ok(None);
        };
        info!(spec = %bvps.spec.name, "Auto-repair: re-synthesizing with counter-example");

        let spec = repaired_spec(&bvps.spec, &counterexample)?;
        let outcome = self.solver.solve(&spec, 2, &self.store, parents)?;
        let repaired = trail.resolve(outcome, collected, "bvps/report_attempt2.json");
        trail.repair_counterexample = Some(counterexample);

        let ctx = LaneContext::new(task, &repaired, &self.store, self.kernel.as_ref())
            .with_interpretation(chosen)
            .with_seed(seed)
            .with_attempt(2);
        for runner in primary_lanes() {
            let rerun = runner.run(&ctx)?;
            match verdicts.iter_mut().find(|v| v.lane == rerun.lane) {
                Some(existing) => existing.absorb(rerun),
                None => verdicts.push(rerun),
            }
        }

        let primary: Vec<LaneVerdict> = verdicts
            .iter()
            .filter(|v| v.lane != "anchors")
            .cloned()
            .collect();
        let anchors_ctx = LaneContext::new(task, &repaired, &self.store, self.kernel.as_ref())
            .with_interpretation(chosen)
            .with_seed(seed)
            .with_attempt(2)
            .with_prior(&primary);
        let anchors = AnchorsLane.run(&anchors_ctx)?;
        match verdicts.iter_mut().find(|v| v.lane == "anchors") {
            Some(existing) => existing.absorb(anchors),
            None => verdicts.push(anchors),
        }
        Ok(Some(repaired))
    }

    fn maybe_admit(
        &self,
        solution: &Solution,
        verdicts: &[LaneVerdict],
        trail: &BvpsTrail,
        seed: u64,
        collected: &mut Collected,
    ) -> EpisodeResult<Option<AdmittedSkill>> {
        if !self.config.admission.auto_skills {
            return Ok(None);
        }
        let Some(bvps) = solution.as_bvps() else {
            return Ok(None);
        };
        if bvps.source == ProgramSource::Skill {
            return Ok(None);
        }
        let passed = |lane: &str| verdicts.iter().any(|v| v.lane == lane && v.passed());
        if !(passed("translation") && passed("consequence")) {
            return Ok(None);
        }

        let mut counterexamples = bvps.stats.counterexamples.clone();
        counterexamples.extend(trail.repair_counterexample.clone());
        let bundle = compile_bundle(&CompileRequest {
            spec: &bvps.spec,
            program: &bvps.program,
            counterexamples: &counterexamples,
            required_lanes: self.config.admission.required_lanes.clone(),
            seed,
        })?;
        let admission = admit(&bundle, &self.store)?;
        let prefix = format!("skills/{}", bundle.name);
        collected.add(&admission.bundle_ref, Some(format!("{prefix}/bundle.json")));
        collected.add(
            &admission.verdict_ref,
            Some(format!("{prefix}/admission_verdict.json")),
        );
        for gate in &admission.verdict.gates {
            let alias = format!("{prefix}/gate_{}.json", gate.gate.as_str());
            collected.add(&gate.artifact, Some(alias));
        }

        if admission.verdict.admitted {
            let dir = self.solver.registry().persist(&bundle, &admission.verdict)?;
            debug!(skill = %bundle.name, dir = %dir.display(), "Skill registered");
        }
        Ok(Some(AdmittedSkill {
            name: bundle.name.clone(),
            spec_hash: admission.verdict.identity.spec_hash.clone(),
            bundle_hash: admission.verdict.identity.bundle_hash.clone(),
            admitted: admission.verdict.admitted,
            reasons: admission.verdict.reasons.clone(),
            verdict: admission.verdict_ref.clone(),
        }))
    }

    #[allow(clippy::too_many_arguments)]
    fn store_capsule(
        &self,
        episode_id: &str,
        task: &TaskInput,
        chosen: &Interpretation,
        solution: &Solution,
        verdicts: &[LaneVerdict],
        decision: &Decision,
        seed: u64,
    ) -> EpisodeResult<ArtifactRef> {
        let contents = CapsuleContents {
            task: to_value(task)?,
            interpretation: to_value(chosen)?,
            solution: solution.to_json()?,
            lanes: to_value(verdicts)?,
            decision: to_value(decision)?,
            repro: repro_text(episode_id, task.normalized(), seed, self.kernel.name()),
        };
        let bytes = build_capsule(&contents)?;
        let artifact_type = if decision.answered() {
            CAPSULE_SUCCESS
        } else {
            CAPSULE_FAILURE
        };
        let solution_hash = sha256_canonical_of(solution)?;
        Ok(self.store.put_bytes(
            &bytes,
            artifact_type,
            MEDIA_TAR,
            "episode:capsule",
            &[solution_hash],
        )?)
    }

    /// Manifest entries of the artifacts this episode referenced, one per
    /// hash, in manifest order.
    fn episode_manifest(&self, artifacts: &[ArtifactRef]) -> Vec<ManifestEntry> {
        let mut entries: Vec<ManifestEntry> = artifacts
            .iter()
            .filter_map(|a| self.store.entry(&a.hash))
            .collect();
        entries.sort_by(|a, b| {
            (a.hash.as_str(), a.artifact_type.as_str())
                .cmp(&(b.hash.as_str(), b.artifact_type.as_str()))
        });
        entries.dedup_by(|a, b| a.hash == b.hash);
        entries
    }
}

/// The spec re-synthesized after a counter-example: declared outputs are
/// relabelled by the oracle and the counter-example is appended unless an
/// example with the same inputs already exists.
pub fn repaired_spec(spec: &Spec, counterexample: &Example) -> EpisodeResult<Spec> {
    let mut repaired = spec.clone();
    if repaired.oracle.is_some() {
        for example in &mut repaired.examples {
            if let Some(output) = oracle_output(spec, &example.inputs)? {
                example.output = Some(output);
            }
        }
    }
    if !repaired
        .examples
        .iter()
        .any(|e| e.inputs == counterexample.inputs)
    {
        repaired.examples.push(counterexample.clone());
    }
    Ok(repaired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use eidolon_bvps::{canned_spec, Value as BvpsValue};

    fn example(x: i64, out: i64) -> Example {
        Example::new([("x".to_string(), BvpsValue::Int(x))], Some(BvpsValue::Int(out)))
    }

    #[test]
    fn repair_relabels_declared_outputs_and_appends_counterexample() {
        let mut spec = canned_spec("x_plus_one").unwrap();
        spec.examples = vec![example(0, 0), example(1, 1)];
        let repaired = repaired_spec(&spec, &example(3, 4)).unwrap();
        assert_eq!(
            repaired.examples,
            vec![example(0, 1), example(1, 2), example(3, 4)]
        );
    }

    #[test]
    fn repair_does_not_duplicate_inputs() {
        let mut spec = canned_spec("x_plus_one").unwrap();
        spec.examples = vec![example(0, 0)];
        let repaired = repaired_spec(&spec, &example(0, 1)).unwrap();
        assert_eq!(repaired.examples, vec![example(0, 1)]);
    }
}
