use eidolon_store::{ArtifactRef, ArtifactStore};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::bundle::SkillBundle;
use crate::error::SkillResult;
use crate::gates::{canary_gate, regression_gate, sealed_lite_gate, Gate, GateReport};

pub const BUNDLE_ARTIFACT_TYPE: &str = "skill_bundle";
pub const VERDICT_ARTIFACT_TYPE: &str = "skill_admission_verdict";

/// What an admission verdict vouches for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleIdentity {
    pub spec_hash: String,
    pub bundle_hash: String,
    pub name: String,
    pub version: String,
}

impl BundleIdentity {
    pub fn of(bundle: &SkillBundle) -> SkillResult<Self> {
        Ok(Self {
            spec_hash: bundle.spec_hash()?,
            bundle_hash: bundle.bundle_hash()?,
            name: bundle.name.clone(),
            version: bundle.version.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateOutcome {
    pub gate: Gate,
    pub passed: bool,
    pub artifact: ArtifactRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionVerdict {
    #[serde(flatten)]
    pub identity: BundleIdentity,
    pub admitted: bool,
    pub gates: Vec<GateOutcome>,
    #[serde(default)]
    pub reasons: Vec<String>,
}

impl AdmissionVerdict {
    /// True when this verdict was issued for exactly `bundle`.
    pub fn matches(&self, bundle: &SkillBundle) -> SkillResult<bool> {
        Ok(self.identity == BundleIdentity::of(bundle)?)
    }
}

/// Artifacts written by one admission run.
#[derive(Debug, Clone)]
pub struct Admission {
    pub verdict: AdmissionVerdict,
    pub bundle_ref: ArtifactRef,
    pub verdict_ref: ArtifactRef,
    pub gate_refs: Vec<ArtifactRef>,
}

/// Run every gate against `bundle`, persisting the bundle, each gate
/// report and the verdict to the store. Admitted iff all gates pass.
pub fn admit(bundle: &SkillBundle, store: &ArtifactStore) -> SkillResult<Admission> {
    let identity = BundleIdentity::of(bundle)?;
    let bundle_ref = store.put_serialized(bundle, BUNDLE_ARTIFACT_TYPE, "skills:compile", &[])?;
    let parents = vec![bundle_ref.hash.clone()];

    let reports: Vec<GateReport> = vec![
        regression_gate(bundle)?,
        sealed_lite_gate(bundle)?,
        canary_gate(bundle)?,
    ];

    let mut gates = Vec::with_capacity(reports.len());
    let mut gate_refs = Vec::with_capacity(reports.len());
    let mut reasons = Vec::new();
    for report in &reports {
        let artifact = store.put_serialized(
            report,
            &format!("skill_gate_{}", report.gate.as_str()),
            "skills:admission",
            &parents,
        )?;
        if !report.passed {
            reasons.push(format!("{} gate failed", report.gate.as_str()));
        }
        gates.push(GateOutcome {
            gate: report.gate,
            passed: report.passed,
            artifact: artifact.clone(),
        });
        gate_refs.push(artifact);
    }

    let verdict = AdmissionVerdict {
        identity,
        admitted: reasons.is_empty(),
        gates,
        reasons,
    };
    let verdict_ref =
        store.put_serialized(&verdict, VERDICT_ARTIFACT_TYPE, "skills:admission", &parents)?;

    if verdict.admitted {
        info!(skill = %bundle.name, bundle_hash = %verdict.identity.bundle_hash, "Skill admitted");
    } else {
        warn!(skill = %bundle.name, reasons = ?verdict.reasons, "Skill rejected");
    }
    Ok(Admission {
        verdict,
        bundle_ref,
        verdict_ref,
        gate_refs,
    })
}
