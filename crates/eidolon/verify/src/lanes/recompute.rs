use eidolon_bvps::{fill_examples, run_program};
use serde_json::json;

use super::{LaneCheck, LaneContext, LaneRunner};
use crate::error::VerifyResult;
use crate::gridworld::replay;
use crate::list_dsl::run_list_program;
use crate::safe_arith::evaluate;
use crate::solution::Solution;

/// Ground-truth re-execution of the solution.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecomputeLane;

impl LaneRunner for RecomputeLane {
    fn lane(&self) -> &'static str {
        "recompute"
    }

    fn check(&self, ctx: &LaneContext<'_>) -> VerifyResult<LaneCheck> {
        match ctx.solution {
            Solution::Arith { expression, output } => {
                let recomputed = evaluate(expression)?;
                Ok(LaneCheck::from_bool(
                    recomputed.same_value(*output),
                    json!({
                        "expression": expression,
                        "claimed": output.to_json(),
                        "recomputed": recomputed.to_json(),
                    }),
                ))
            }
            Solution::List {
                program,
                input,
                output,
                ..
            } => {
                let recomputed = run_list_program(program, input)?;
                Ok(LaneCheck::from_bool(
                    &recomputed == output,
                    json!({"input": input, "claimed": output, "recomputed": recomputed}),
                ))
            }
            Solution::World { world, actions, .. } => {
                let outcome = replay(world, actions, ctx.seed)?;
                let check = LaneCheck::from_bool(outcome.done, json!({"replay": outcome}));
                Ok(if outcome.done {
                    check
                } else {
                    check.with_notes("plan does not reach the goal")
                })
            }
            Solution::BvpsProgram(bvps) => {
                let examples = fill_examples(&bvps.spec)?;
                let budget = bvps.spec.bounds.step_budget;
                let mut mismatches = Vec::new();
                for (index, example) in examples.iter().enumerate() {
                    let actual = run_program(&bvps.program, &example.inputs, budget);
                    if matches!((&actual, example.output), (Ok(v), Some(e)) if *v == e) {
                        continue;
                    }
                    let actual = match actual {
                        Ok(v) => v.to_json(),
                        Err(e) => json!(e.to_string()),
                    };
                    mismatches.push(json!({
                        "index": index,
                        "inputs": example.inputs,
                        "expected": example.output,
                        "actual": actual,
                    }));
                }
                let ok = mismatches.is_empty();
                let check = LaneCheck::from_bool(
                    ok,
                    json!({
                        "program_hash": bvps.program_hash,
                        "examples": examples.len(),
                        "mismatches": mismatches,
                    }),
                );
                Ok(if ok {
                    check
                } else {
                    check.with_notes("program disagrees with declared examples")
                })
            }
            Solution::BvpsUnsolved(failure) => Ok(LaneCheck::from_bool(
                false,
                json!({
                    "attempt": failure.attempt,
                    "tried": failure.tried,
                    "max_programs": failure.max_programs,
                    "error": failure.error,
                }),
            )
            .with_notes(format!("synthesis failed: {}", failure.error))),
        }
    }
}
