//! Skill compilation and admission.
//!
//! A BVPS program that survived verification is compiled into a
//! [`SkillBundle`], run through the regression, sealed-lite and canary
//! gates, and, when admitted, persisted by the [`SkillRegistry`] so later
//! episodes can replay it without synthesis.

pub mod admission;
pub mod bundle;
pub mod error;
pub mod gates;
pub mod registry;

pub use admission::{
    admit, Admission, AdmissionVerdict, BundleIdentity, GateOutcome, BUNDLE_ARTIFACT_TYPE,
    VERDICT_ARTIFACT_TYPE,
};
pub use bundle::{
    compile_bundle, CaseOrigin, CompileRequest, SkillBundle, SkillTests, TestCase, Trigger,
    VerifyProfile, BUNDLE_VERSION,
};
pub use error::{SkillError, SkillResult};
pub use gates::{
    canary_gate, canary_token, regression_gate, sealed_lite_gate, Gate, GateReport, FAMILIES,
    GATE_FUZZ_TRIALS,
};
pub use registry::{SkillRegistry, TrustedSkill, BUNDLE_FILE, VERDICT_FILE};
