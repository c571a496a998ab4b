//! Verification for EIDOLON episodes.
//!
//! Four lanes judge a solution: `recompute` re-executes it, `translation`
//! compares it against an alternative interpretation, `consequence` fuzzes
//! it against an oracle and `anchors` checks that every passing lane left
//! evidence in the artifact store. The crate also carries the collaborators
//! the lanes need: the safe arithmetic evaluator, the list DSL, the grid
//! world and the [`Kernel`] interface with its rule-based implementation.

pub mod error;
pub mod gridworld;
pub mod kernel;
pub mod lanes;
pub mod list_dsl;
pub mod safe_arith;
pub mod solution;
pub mod task;

pub use error::{ArithError, VerifyError, VerifyResult};
pub use gridworld::{plan, replay, Action, GridWorld, Replay, StepOutcome, WorldSpec};
pub use kernel::{kernel_from_name, Critique, Kernel, Proposal, RuleKernel};
pub use lanes::{
    lane_by_name, primary_lanes, verify_all, AnchorsLane, ConsequenceLane, LaneCheck,
    LaneContext, LaneRunner, LaneStatus, LaneVerdict, RecomputeLane, TranslationLane,
    ALT_SEED_OFFSET, LANE_NAMES, MIN_BVPS_TRIALS,
};
pub use list_dsl::{reference_fn, run_list_program, ListOp, LIST_FUNCTIONS};
pub use safe_arith::{evaluate, looks_like_arith, strip_arith_prefix, Number};
pub use solution::{validate_fields, BvpsFailure, BvpsSolution, ProgramSource, Solution};
pub use task::{Interpretation, TaskInput, TaskKind};
