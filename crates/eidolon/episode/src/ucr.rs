//! The Unified Commitment Record.

use std::collections::BTreeMap;

use eidolon_codec::{compute_ucr_hash, sha256_canonical, to_value};
use eidolon_store::{ArtifactRef, ManifestEntry};
use eidolon_verify::{Interpretation, LaneStatus, LaneVerdict, Solution, TaskInput};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::decision::Decision;
use crate::error::{EpisodeError, EpisodeResult};
use crate::solver::UsedSkill;

/// Tagged `Number{Int, Float}` outputs and the lane set below define v1.
pub const UCR_SCHEMA_VERSION: &str = "ucr/v1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Budgets {
    /// Interpreter step budget of BVPS specs, 0 for other kinds.
    pub steps: u64,
    pub cpu_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UcrHashes {
    pub ucr_hash: String,
    pub artifact_manifest_hash: String,
}

/// Skill admitted during this episode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmittedSkill {
    pub name: String,
    pub spec_hash: String,
    pub bundle_hash: String,
    pub admitted: bool,
    #[serde(default)]
    pub reasons: Vec<String>,
    pub verdict: ArtifactRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ucr {
    pub episode_id: String,
    pub schema_version: String,
    pub run_dir: String,
    pub ts_utc: String,
    pub task_text: String,
    pub task_input: TaskInput,
    pub interpretations: Vec<Interpretation>,
    pub chosen_interpretation_id: String,
    pub budgets: Budgets,
    pub kernel: Value,
    pub solution: Solution,
    pub lane_verdicts: BTreeMap<String, LaneStatus>,
    pub costs: BTreeMap<String, f64>,
    pub artifact_manifest: Vec<ManifestEntry>,
    pub decision: Decision,
    pub solution_artifacts: Vec<ArtifactRef>,
    pub verification: Vec<LaneVerdict>,
    pub final_result: String,
    pub hashes: UcrHashes,
    pub witness_packet: ArtifactRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_skill: Option<UsedSkill>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admitted_skill: Option<AdmittedSkill>,
    #[serde(default)]
    pub active_language_patches: Vec<String>,
    /// Cache outcome of the BVPS solve, when one ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bvps_cache: Option<Value>,
}

impl Ucr {
    pub fn to_json(&self) -> EpisodeResult<Value> {
        Ok(to_value(self)?)
    }

    /// Compute `ucr_hash` over the record with the field blanked and write
    /// it back. Returns the hash.
    pub fn seal(&mut self) -> EpisodeResult<String> {
        self.hashes.ucr_hash = String::new();
        let hash = compute_ucr_hash(&self.to_json()?)?;
        self.hashes.ucr_hash = hash.clone();
        Ok(hash)
    }
}

/// `"ep-"` plus the first 12 hex chars of the hash of the normalized task
/// and seed.
pub fn episode_id(task: &TaskInput, seed: u64) -> EpisodeResult<String> {
    let normalized = TaskInput {
        task: task.normalized().to_string(),
        data: task.data.clone(),
    };
    let digest = sha256_canonical(&json!({"payload": {"task": normalized, "seed": seed}}))?;
    let short = digest
        .get(..12)
        .ok_or_else(|| EpisodeError::Schema("short task digest".into()))?;
    Ok(format!("ep-{short}"))
}

/// True when a serialized UCR carries the hash of its own content.
pub fn verify_ucr_hash(record: &Value) -> EpisodeResult<bool> {
    let stored = record
        .get("hashes")
        .and_then(|h| h.get("ucr_hash"))
        .and_then(Value::as_str)
        .ok_or_else(|| EpisodeError::Schema("record has no hashes.ucr_hash".into()))?;
    Ok(compute_ucr_hash(record)? == stored)
}
