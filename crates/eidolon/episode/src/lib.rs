//! # eidolon-episode
//!
//! The episode controller and everything it commits.
//!
//! - [`config`]: layered configuration (defaults, TOML file, environment)
//! - [`interpret`]: task readings and candidate interpretations
//! - [`solver`]: BVPS solving through skills, the program cache and CEGIS
//! - [`decision`]: answer/refuse from the required lane set
//! - [`capsule`]: deterministic tar capsules
//! - [`rundir`]: run directories and artifact mirrors
//! - [`ucr`]: the Unified Commitment Record
//! - [`controller`]: one episode end to end

#![deny(unsafe_code)]

pub mod capsule;
pub mod config;
pub mod controller;
pub mod decision;
pub mod error;
pub mod interpret;
pub mod rundir;
pub mod solver;
pub mod ucr;

pub use capsule::{
    build_capsule, read_capsule, repro_text, CapsuleContents, CAPSULE_FAILURE, CAPSULE_MEMBERS,
    CAPSULE_SUCCESS,
};
pub use config::{
    AdmissionConfig, BvpsConfig, EidolonConfig, KernelConfig, PathsConfig, StoreConfig,
};
pub use controller::{
    repaired_spec, EpisodeController, EpisodeOutcome, SuiteStats, SOLUTION_ARTIFACT_TYPE,
    TASK_ARTIFACT_TYPE, WITNESS_ARTIFACT_TYPE,
};
pub use decision::{decide, final_result, Action, Decision};
pub use error::{EpisodeError, EpisodeResult};
pub use interpret::{
    arith_expression, bvps_spec_from_task, interpret, Interpreted, Reading,
    ARITH_INTERPRETATION_ID, BVPS_SIGNATURE_PREFIX, BVPS_SPEC_PREFIX,
};
pub use rundir::{MirrorItem, RunDir, ARTIFACTS_DIR, UCR_FILE, WITNESS_FILE};
pub use solver::{
    BvpsSolver, CacheOutcome, SolveOutcome, Solved, Unsolved, UsedSkill, REPORT_ARTIFACT_TYPE,
};
pub use ucr::{
    episode_id, verify_ucr_hash, AdmittedSkill, Budgets, Ucr, UcrHashes, UCR_SCHEMA_VERSION,
};
