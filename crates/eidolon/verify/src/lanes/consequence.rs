use eidolon_bvps::fuzz_counterexample;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;

use super::{LaneCheck, LaneContext, LaneRunner, LaneStatus};
use crate::error::{VerifyError, VerifyResult};
use crate::gridworld::replay;
use crate::list_dsl::{reference_fn, run_list_program};
use crate::safe_arith::{evaluate, Number};
use crate::solution::Solution;

/// Lower bound on fuzz trials for BVPS programs.
pub const MIN_BVPS_TRIALS: u32 = 20;

const ARITH_SHIFTS: usize = 5;
const LIST_TRIALS: usize = 10;

/// Seeded search for a counter-example against an oracle.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsequenceLane;

impl ConsequenceLane {
    /// Seed for one attempt: attempts never reuse each other's samples.
    pub fn attempt_seed(seed: u64, attempt: u32) -> u64 {
        seed.wrapping_add(u64::from(attempt.saturating_sub(1)).wrapping_mul(7919))
    }
}

impl LaneRunner for ConsequenceLane {
    fn lane(&self) -> &'static str {
        "consequence"
    }

    fn check(&self, ctx: &LaneContext<'_>) -> VerifyResult<LaneCheck> {
        let seed = Self::attempt_seed(ctx.seed, ctx.attempt);
        let mut rng = StdRng::seed_from_u64(seed);
        match ctx.solution {
            Solution::Arith { expression, output } => {
                let mut failures = Vec::new();
                for _ in 0..ARITH_SHIFTS {
                    let shift: i64 = rng.gen_range(-100..=100);
                    let shifted = evaluate(&format!("({expression}) + {shift}"))?;
                    let expected = output.checked_add(Number::Int(shift))?;
                    if !shifted.same_value(expected) {
                        failures.push(json!({
                            "shift": shift,
                            "expected": expected.to_json(),
                            "actual": shifted.to_json(),
                        }));
                    }
                }
                let ok = failures.is_empty();
                let check = LaneCheck::from_bool(
                    ok,
                    json!({"seed": seed, "trials": ARITH_SHIFTS, "failures": failures}),
                );
                Ok(if ok { check } else { check.with_notes("shifted expression disagrees") })
            }
            Solution::List {
                function, program, ..
            } => {
                let mut counterexample = None;
                for _ in 0..LIST_TRIALS {
                    let len = rng.gen_range(0..=8);
                    let input: Vec<i64> = (0..len).map(|_| rng.gen_range(-9..=9)).collect();
                    let expected = reference_fn(function, &input).ok_or_else(|| {
                        VerifyError::List(format!("no reference function named '{function}'"))
                    })?;
                    let actual = run_list_program(program, &input)?;
                    if actual != expected {
                        counterexample = Some(json!({
                            "input": input,
                            "expected": expected,
                            "actual": actual,
                        }));
                        break;
                    }
                }
                let ok = counterexample.is_none();
                let check = LaneCheck::from_bool(
                    ok,
                    json!({
                        "seed": seed,
                        "trials": LIST_TRIALS,
                        "function": function,
                        "counterexample": counterexample,
                    }),
                );
                Ok(if ok { check } else { check.with_notes("program disagrees with reference") })
            }
            Solution::World { world, actions, .. } => {
                let outcome = replay(world, actions, seed)?;
                let ok = outcome.done && outcome.bumps == 0;
                let check = LaneCheck::from_bool(ok, json!({"seed": seed, "replay": outcome}));
                Ok(if ok {
                    check
                } else {
                    check.with_notes("plan leaves the grid or misses the goal")
                })
            }
            Solution::BvpsProgram(bvps) => {
                let trials = bvps.spec.bounds.fuzz_trials.max(MIN_BVPS_TRIALS);
                let evidence = |cex: Option<&eidolon_bvps::Example>| {
                    json!({
                        "attempt": ctx.attempt,
                        "seed": seed,
                        "trials": trials,
                        "program_hash": bvps.program_hash,
                        "oracle": bvps.spec.oracle.is_some(),
                        "counterexample": cex,
                    })
                };
                if bvps.spec.oracle.is_none() {
                    return Ok(LaneCheck::new(LaneStatus::Borderline, evidence(None))
                        .with_notes("spec has no oracle to fuzz against"));
                }
                match fuzz_counterexample(&bvps.program, &bvps.spec, seed, trials)? {
                    None => Ok(LaneCheck::new(LaneStatus::Pass, evidence(None))),
                    Some(cex) => Ok(LaneCheck::new(LaneStatus::Fail, evidence(Some(&cex)))
                        .with_notes("counter-example found")),
                }
            }
            Solution::BvpsUnsolved(failure) => Ok(LaneCheck::new(
                LaneStatus::Fail,
                json!({
                    "attempt": ctx.attempt,
                    "seed": seed,
                    "tried": failure.tried,
                    "max_programs": failure.max_programs,
                    "oracle": failure.spec.oracle.is_some(),
                    "counterexample": null,
                }),
            )
            .with_notes("no program was synthesized")),
        }
    }
}
