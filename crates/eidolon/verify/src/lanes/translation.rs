use std::collections::BTreeMap;

use eidolon_bvps::{fill_examples, run_program, Example, Program, Value as BvpsValue};
use serde_json::{json, Value};

use super::{LaneCheck, LaneContext, LaneRunner, LaneStatus};
use crate::error::{VerifyError, VerifyResult};
use crate::safe_arith::{evaluate, strip_arith_prefix};
use crate::solution::{validate_fields, BvpsSolution, Solution};

/// Seed offset used when asking for an alternative interpretation.
pub const ALT_SEED_OFFSET: u64 = 1000;

/// Output invariance under an alternative interpretation.
#[derive(Debug, Clone, Copy, Default)]
pub struct TranslationLane;

struct Alternative {
    id: String,
    output: Value,
    field_errors: Vec<String>,
}

impl LaneRunner for TranslationLane {
    fn lane(&self) -> &'static str {
        "translation"
    }

    fn check(&self, ctx: &LaneContext<'_>) -> VerifyResult<LaneCheck> {
        let chosen_doc = ctx.solution.to_json()?;
        let field_errors = validate_fields(&chosen_doc);
        if !field_errors.is_empty() {
            return Ok(LaneCheck::new(
                LaneStatus::Fail,
                json!({"field_errors": field_errors}),
            )
            .with_notes("solution is missing required fields"));
        }

        let chosen_id = ctx
            .chosen_id()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}:chosen", ctx.solution.kind()));
        let alt_seed = ctx.seed.wrapping_add(ALT_SEED_OFFSET);
        let alt = match ctx.solution {
            Solution::Arith { .. } => arith_alternative(ctx)?,
            Solution::BvpsProgram(bvps) => bvps_alternative(bvps)?,
            Solution::List { .. } | Solution::World { .. } => {
                kernel_alternative(ctx, &chosen_id, alt_seed)?
            }
            Solution::BvpsUnsolved(failure) => {
                return Ok(LaneCheck::new(
                    LaneStatus::Fail,
                    json!({"chosen_id": chosen_id, "error": failure.error}),
                )
                .with_notes("no program to translate"));
            }
        };

        let (chosen_output, expected_output) = match ctx.solution {
            Solution::BvpsProgram(bvps) => (
                example_outputs(&bvps.program, bvps, None)?,
                Some(declared_outputs(bvps)?),
            ),
            other => (other.output(), None),
        };
        let evidence = json!({
            "chosen_id": chosen_id,
            "alt_id": alt.id,
            "alt_seed": alt_seed,
            "chosen_output": chosen_output,
            "alt_output": alt.output,
            "expected_output": expected_output,
            "alt_field_errors": alt.field_errors,
        });

        if !alt.field_errors.is_empty() {
            return Ok(LaneCheck::new(LaneStatus::Fail, evidence)
                .with_notes("alternative solution is missing required fields"));
        }
        if let Some(expected) = &expected_output {
            if !outputs_agree(&chosen_output, expected) || !outputs_agree(&alt.output, expected) {
                return Ok(LaneCheck::new(LaneStatus::Fail, evidence)
                    .with_notes("program outputs differ from the declared examples"));
            }
        }
        if outputs_agree(&chosen_output, &alt.output) {
            return Ok(LaneCheck::new(LaneStatus::Pass, evidence));
        }
        let status = if alt.id != chosen_id {
            LaneStatus::Borderline
        } else {
            LaneStatus::Fail
        };
        Ok(LaneCheck::new(status, evidence).with_notes("outputs disagree across interpretations"))
    }
}

fn outputs_agree(a: &Value, b: &Value) -> bool {
    eidolon_codec::normalize_number(a) == eidolon_codec::normalize_number(b)
}

/// Re-evaluate the raw task text instead of the extracted expression.
fn arith_alternative(ctx: &LaneContext<'_>) -> VerifyResult<Alternative> {
    let raw = ctx.task.normalized();
    let text = strip_arith_prefix(raw).unwrap_or(raw);
    let output = evaluate(text)?;
    let alt = Solution::Arith {
        expression: text.to_string(),
        output,
    };
    Ok(Alternative {
        id: "arith:raw".into(),
        field_errors: validate_fields(&alt.to_json()?),
        output: output.to_json(),
    })
}

/// Alpha-rename the parameters and run the renamed program on renamed
/// examples.
fn bvps_alternative(bvps: &BvpsSolution) -> VerifyResult<Alternative> {
    let mapping: BTreeMap<String, String> = bvps
        .program
        .params
        .iter()
        .enumerate()
        .map(|(i, (name, _))| (name.clone(), format!("alpha_{i}")))
        .collect();
    let renamed = Program::new(
        bvps.program
            .params
            .iter()
            .map(|(name, ty)| {
                let renamed = mapping.get(name).cloned().unwrap_or_else(|| name.clone());
                (renamed, *ty)
            })
            .collect(),
        bvps.program.body.rename_vars(&mapping),
        bvps.program.return_type,
    );
    let doc = json!({
        "kind": "bvps_program",
        "spec": eidolon_codec::to_value(&bvps.spec)?,
        "program": eidolon_codec::to_value(&renamed)?,
    });
    Ok(Alternative {
        id: "bvps:alpha".into(),
        field_errors: validate_fields(&doc),
        output: example_outputs(&renamed, bvps, Some(&mapping))?,
    })
}

/// Outputs of `program` on the spec's declared examples, with inputs
/// renamed through `mapping` when given. Failures become `{error}` objects.
fn example_outputs(
    program: &Program,
    bvps: &BvpsSolution,
    mapping: Option<&BTreeMap<String, String>>,
) -> VerifyResult<Value> {
    let examples: Vec<Example> = fill_examples(&bvps.spec)?;
    let budget = bvps.spec.bounds.step_budget;
    let outputs = examples
        .iter()
        .map(|example| {
            let inputs: BTreeMap<String, BvpsValue> = match mapping {
                Some(mapping) => example
                    .inputs
                    .iter()
                    .map(|(k, v)| (mapping.get(k).cloned().unwrap_or_else(|| k.clone()), *v))
                    .collect(),
                None => example.inputs.clone(),
            };
            match run_program(program, &inputs, budget) {
                Ok(v) => v.to_json(),
                Err(e) => json!({"error": e.to_string()}),
            }
        })
        .collect();
    Ok(Value::Array(outputs))
}

/// Declared outputs of the spec's examples, oracle-filled where missing.
fn declared_outputs(bvps: &BvpsSolution) -> VerifyResult<Value> {
    let outputs = fill_examples(&bvps.spec)?
        .iter()
        .map(|example| example.output.map(|v| v.to_json()).unwrap_or(Value::Null))
        .collect();
    Ok(Value::Array(outputs))
}

/// Ask the kernel for a second reading of a list or world task.
fn kernel_alternative(
    ctx: &LaneContext<'_>,
    chosen_id: &str,
    alt_seed: u64,
) -> VerifyResult<Alternative> {
    let interpretations = ctx.kernel.propose_interpretations(ctx.task, alt_seed)?;
    let alt = interpretations
        .iter()
        .find(|i| i.id != chosen_id)
        .or_else(|| interpretations.first())
        .ok_or_else(|| VerifyError::Kernel("kernel proposed no interpretations".into()))?;
    let proposal = ctx.kernel.propose_solution(ctx.task, alt, alt_seed)?;
    let solution = Solution::from_proposal(alt, &proposal)?;
    Ok(Alternative {
        id: alt.id.clone(),
        field_errors: validate_fields(&solution.to_json()?),
        output: solution.output(),
    })
}
