//! The four verification lanes.
//!
//! Every lane implements [`LaneRunner::check`]; the provided
//! [`LaneRunner::run`] times the check, writes its evidence artifact
//! (type `lane_<lane>`) and turns non-fatal verification errors into `FAIL`
//! verdicts that still carry evidence. Store and codec failures propagate.

mod anchors;
mod consequence;
mod recompute;
mod translation;

use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

use eidolon_codec::sha256_canonical_of;
use eidolon_store::{ArtifactRef, ArtifactStore};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

pub use anchors::AnchorsLane;
pub use consequence::{ConsequenceLane, MIN_BVPS_TRIALS};
pub use recompute::RecomputeLane;
pub use translation::{TranslationLane, ALT_SEED_OFFSET};

use crate::error::VerifyResult;
use crate::kernel::Kernel;
use crate::solution::Solution;
use crate::task::{Interpretation, TaskInput};

/// Lane names in execution order.
pub const LANE_NAMES: [&str; 4] = ["recompute", "translation", "consequence", "anchors"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LaneStatus {
    Pass,
    Fail,
    Borderline,
}

impl LaneStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LaneStatus::Pass => "PASS",
            LaneStatus::Fail => "FAIL",
            LaneStatus::Borderline => "BORDERLINE",
        }
    }

    fn from_bool(ok: bool) -> Self {
        if ok {
            LaneStatus::Pass
        } else {
            LaneStatus::Fail
        }
    }
}

impl fmt::Display for LaneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaneVerdict {
    pub lane: String,
    pub status: LaneStatus,
    pub cost_ms: f64,
    pub evidence: Vec<ArtifactRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub costs: BTreeMap<String, f64>,
}

impl LaneVerdict {
    pub fn passed(&self) -> bool {
        self.status == LaneStatus::Pass
    }

    /// Fold a re-run of the same lane into this verdict. The newer status
    /// and notes win; evidence accumulates.
    pub fn absorb(&mut self, rerun: LaneVerdict) {
        self.status = rerun.status;
        self.notes = rerun.notes;
        self.cost_ms += rerun.cost_ms;
        for (key, value) in rerun.costs {
            *self.costs.entry(key).or_insert(0.0) += value;
        }
        for evidence in rerun.evidence {
            if !self.evidence.iter().any(|e| e.hash == evidence.hash) {
                self.evidence.push(evidence);
            }
        }
    }
}

/// Outcome of a lane's check before its evidence is persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct LaneCheck {
    pub status: LaneStatus,
    pub evidence: Value,
    pub notes: Option<String>,
}

impl LaneCheck {
    pub fn new(status: LaneStatus, evidence: Value) -> Self {
        Self {
            status,
            evidence,
            notes: None,
        }
    }

    pub fn from_bool(ok: bool, evidence: Value) -> Self {
        Self::new(LaneStatus::from_bool(ok), evidence)
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Everything a lane may consult.
pub struct LaneContext<'a> {
    pub task: &'a TaskInput,
    pub interpretation: Option<&'a Interpretation>,
    pub solution: &'a Solution,
    pub store: &'a ArtifactStore,
    pub seed: u64,
    pub kernel: &'a dyn Kernel,
    /// Verification attempt, starting at 1.
    pub attempt: u32,
    /// Verdicts of lanes that already ran in this episode.
    pub prior: &'a [LaneVerdict],
}

impl<'a> LaneContext<'a> {
    pub fn new(
        task: &'a TaskInput,
        solution: &'a Solution,
        store: &'a ArtifactStore,
        kernel: &'a dyn Kernel,
    ) -> Self {
        Self {
            task,
            interpretation: None,
            solution,
            store,
            seed: 0,
            kernel,
            attempt: 1,
            prior: &[],
        }
    }

    pub fn with_interpretation(mut self, interpretation: &'a Interpretation) -> Self {
        self.interpretation = Some(interpretation);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt.max(1);
        self
    }

    pub fn with_prior(mut self, prior: &'a [LaneVerdict]) -> Self {
        self.prior = prior;
        self
    }

    pub fn chosen_id(&self) -> Option<&str> {
        self.interpretation.map(|i| i.id.as_str())
    }
}

pub trait LaneRunner: Send + Sync {
    fn lane(&self) -> &'static str;

    fn check(&self, ctx: &LaneContext<'_>) -> VerifyResult<LaneCheck>;

    fn run(&self, ctx: &LaneContext<'_>) -> VerifyResult<LaneVerdict> {
        let lane = self.lane();
        let started = Instant::now();
        let check = match self.check(ctx) {
            Ok(check) => check,
            Err(err) if !err.is_fatal() => {
                warn!(lane, error = %err, "Lane check failed");
                LaneCheck::new(LaneStatus::Fail, json!({"error": err.to_string()}))
                    .with_notes(err.to_string())
            }
            Err(err) => return Err(err),
        };
        let check_ms = started.elapsed().as_secs_f64() * 1000.0;

        let written = Instant::now();
        let body = json!({
            "lane": lane,
            "attempt": ctx.attempt,
            "status": check.status,
            "solution_kind": ctx.solution.kind(),
            "evidence": check.evidence,
        });
        let artifact_type = format!("lane_{lane}");
        let solution_hash = sha256_canonical_of(ctx.solution)?;
        let evidence = ctx.store.put_json(
            &body,
            &artifact_type,
            &format!("lane:{lane}"),
            std::slice::from_ref(&solution_hash),
        )?;
        let evidence_ms = written.elapsed().as_secs_f64() * 1000.0;

        debug!(lane, status = %check.status, attempt = ctx.attempt, "Lane finished");
        Ok(LaneVerdict {
            lane: lane.to_string(),
            status: check.status,
            cost_ms: check_ms + evidence_ms,
            evidence: vec![evidence],
            notes: check.notes,
            costs: BTreeMap::from([
                ("check_ms".to_string(), check_ms),
                ("evidence_ms".to_string(), evidence_ms),
            ]),
        })
    }
}

/// Recompute, translation and consequence, in that order.
pub fn primary_lanes() -> Vec<Box<dyn LaneRunner>> {
    vec![
        Box::new(RecomputeLane),
        Box::new(TranslationLane),
        Box::new(ConsequenceLane),
    ]
}

pub fn lane_by_name(name: &str) -> Option<Box<dyn LaneRunner>> {
    match name {
        "recompute" => Some(Box::new(RecomputeLane)),
        "translation" => Some(Box::new(TranslationLane)),
        "consequence" => Some(Box::new(ConsequenceLane)),
        "anchors" => Some(Box::new(AnchorsLane)),
        _ => None,
    }
}

/// Run the primary lanes and then anchors over their verdicts.
pub fn verify_all(ctx: &LaneContext<'_>) -> VerifyResult<Vec<LaneVerdict>> {
    let mut verdicts = Vec::with_capacity(LANE_NAMES.len());
    for runner in primary_lanes() {
        verdicts.push(runner.run(ctx)?);
    }
    let anchors_ctx = LaneContext {
        task: ctx.task,
        interpretation: ctx.interpretation,
        solution: ctx.solution,
        store: ctx.store,
        seed: ctx.seed,
        kernel: ctx.kernel,
        attempt: ctx.attempt,
        prior: &verdicts,
    };
    let anchors = AnchorsLane.run(&anchors_ctx)?;
    verdicts.push(anchors);
    Ok(verdicts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_uppercase() {
        assert_eq!(serde_json::to_value(LaneStatus::Borderline).unwrap(), json!("BORDERLINE"));
        assert_eq!(LaneStatus::Pass.to_string(), "PASS");
    }

    #[test]
    fn absorb_appends_new_evidence() {
        let evidence = |hash: &str| ArtifactRef {
            hash: hash.to_string(),
            artifact_type: "lane_consequence".into(),
            media_type: "application/json".into(),
            size: 1,
        };
        let mut first = LaneVerdict {
            lane: "consequence".into(),
            status: LaneStatus::Fail,
            cost_ms: 1.0,
            evidence: vec![evidence("a")],
            notes: Some("counter-example".into()),
            costs: BTreeMap::from([("check_ms".to_string(), 1.0)]),
        };
        let second = LaneVerdict {
            lane: "consequence".into(),
            status: LaneStatus::Pass,
            cost_ms: 2.0,
            evidence: vec![evidence("a"), evidence("b")],
            notes: None,
            costs: BTreeMap::from([("check_ms".to_string(), 2.0)]),
        };
        first.absorb(second);
        assert_eq!(first.status, LaneStatus::Pass);
        assert_eq!(first.notes, None);
        assert_eq!(first.cost_ms, 3.0);
        assert_eq!(first.costs["check_ms"], 3.0);
        let hashes: Vec<&str> = first.evidence.iter().map(|e| e.hash.as_str()).collect();
        assert_eq!(hashes, vec!["a", "b"]);
    }

    #[test]
    fn every_lane_resolves_by_name() {
        for name in LANE_NAMES {
            assert_eq!(lane_by_name(name).unwrap().lane(), name);
        }
        assert!(lane_by_name("vibes").is_none());
    }
}
