//! Admission gates: regression, sealed-lite and canary.

use std::collections::BTreeMap;

use eidolon_bvps::{fuzz_counterexample, oracle_output, run_program, Example, Program, Spec, Value};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};

use crate::bundle::SkillBundle;
use crate::error::SkillResult;

/// Generator families used by sealed-lite and the canary gate.
pub const FAMILIES: [&str; 3] = ["absmax", "lists", "ruleshift"];

/// Trials for the fuzz rounds run by the gates.
pub const GATE_FUZZ_TRIALS: u32 = 20;

/// Distinguished token of a generator family. Bundles must never carry one.
pub fn canary_token(family: &str) -> String {
    format!("EIDOLON-CANARY-{family}-7c1e")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gate {
    Regression,
    SealedLite,
    Canary,
}

impl Gate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gate::Regression => "regression",
            Gate::SealedLite => "sealed_lite",
            Gate::Canary => "canary",
        }
    }
}

/// Result of one gate before it is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateReport {
    pub gate: Gate,
    pub passed: bool,
    pub details: Json,
}

fn program_matches(program: &Program, example: &Example, budget: u64) -> bool {
    match example.output {
        Some(expected) => {
            matches!(run_program(program, &example.inputs, budget), Ok(v) if v == expected)
        }
        None => true,
    }
}

/// Every bundled case passes and an oracle fuzz round finds nothing.
pub fn regression_gate(bundle: &SkillBundle) -> SkillResult<GateReport> {
    let budget = bundle.spec.bounds.step_budget;
    let failing: Vec<usize> = bundle
        .tests
        .cases
        .iter()
        .enumerate()
        .filter(|(_, case)| {
            let example = Example {
                inputs: case.inputs.clone(),
                output: Some(case.output),
            };
            !program_matches(&bundle.program, &example, budget)
        })
        .map(|(i, _)| i)
        .collect();
    let fuzz_seed = bundle.verify_profile.seed.wrapping_add(1);
    let counterexample =
        fuzz_counterexample(&bundle.program, &bundle.spec, fuzz_seed, GATE_FUZZ_TRIALS)?;

    Ok(GateReport {
        gate: Gate::Regression,
        passed: failing.is_empty() && counterexample.is_none(),
        details: json!({
            "cases": bundle.tests.cases.len(),
            "failing_cases": failing,
            "fuzz_seed": fuzz_seed,
            "fuzz_trials": GATE_FUZZ_TRIALS,
            "counterexample": counterexample,
        }),
    })
}

/// A spec/program pair derived from the bundle.
#[derive(Debug, Clone)]
struct Variant {
    label: String,
    spec: Spec,
    program: Program,
    examples: Vec<Example>,
}

fn relabel(
    spec: &Spec,
    program: &Program,
    prefix: &str,
) -> (Spec, Program, BTreeMap<String, String>) {
    let mapping: BTreeMap<String, String> = spec
        .inputs
        .iter()
        .enumerate()
        .map(|(i, (name, _))| (name.clone(), format!("{prefix}{i}")))
        .collect();
    let rename = |name: &String| mapping.get(name).cloned().unwrap_or_else(|| name.clone());
    let rename_example = |example: &Example| Example {
        inputs: example.inputs.iter().map(|(k, v)| (rename(k), *v)).collect(),
        output: example.output,
    };
    let spec = Spec {
        name: format!("{}__{prefix}", spec.name),
        inputs: spec.inputs.iter().map(|(n, t)| (rename(n), *t)).collect(),
        output: spec.output,
        examples: spec.examples.iter().map(rename_example).collect(),
        bounds: spec.bounds.clone(),
        oracle: spec.oracle.as_ref().map(|o| o.rename_vars(&mapping)),
    };
    let program = Program::new(
        program.params.iter().map(|(n, t)| (rename(n), *t)).collect(),
        program.body.rename_vars(&mapping),
        program.return_type,
    );
    (spec, program, mapping)
}

/// Label inputs with the variant oracle, dropping inputs it rejects.
fn labelled(spec: &Spec, inputs: Vec<BTreeMap<String, Value>>) -> Vec<Example> {
    inputs
        .into_iter()
        .filter_map(|input| match oracle_output(spec, &input) {
            Ok(Some(output)) => Some(Example::new(input, Some(output))),
            _ => None,
        })
        .collect()
}

fn boundary_values(spec: &Spec) -> Vec<i64> {
    let b = &spec.bounds;
    let mut values = vec![b.int_min, -1, 0, 1, b.int_max];
    values.retain(|v| (b.int_min..=b.int_max).contains(v));
    values.dedup();
    values
}

/// Family-specific inputs for the mutation variant.
fn mutation_inputs(family: &str, spec: &Spec) -> Vec<BTreeMap<String, Value>> {
    let value_of = |ty: &eidolon_bvps::Type, n: i64| match ty {
        eidolon_bvps::Type::Int => Value::Int(n),
        eidolon_bvps::Type::Bool => Value::Bool(n % 2 != 0),
    };
    match family {
        // every combination of boundary values, capped
        "absmax" => {
            let values = boundary_values(spec);
            let mut rows: Vec<BTreeMap<String, Value>> = vec![BTreeMap::new()];
            for (name, ty) in &spec.inputs {
                rows = rows
                    .into_iter()
                    .flat_map(|row| {
                        values.iter().map(move |v| {
                            let mut row = row.clone();
                            row.insert(name.clone(), value_of(ty, *v));
                            row
                        })
                    })
                    .take(64)
                    .collect();
            }
            rows
        }
        // ascending runs: parameter i takes start + i
        "lists" => (spec.bounds.int_min..=spec.bounds.int_max)
            .map(|start| {
                spec.inputs
                    .iter()
                    .enumerate()
                    .map(|(i, (name, ty))| {
                        let n = (start + i as i64).min(spec.bounds.int_max);
                        (name.clone(), value_of(ty, n))
                    })
                    .collect()
            })
            .collect(),
        // odd parameters run the range backwards
        _ => {
            let (lo, hi) = (spec.bounds.int_min, spec.bounds.int_max);
            (lo..=hi)
                .map(|n| {
                    spec.inputs
                        .iter()
                        .enumerate()
                        .map(|(i, (name, ty))| {
                            let v = if i % 2 == 0 { n } else { hi - (n - lo) };
                            (name.clone(), value_of(ty, v))
                        })
                        .collect()
                })
                .collect()
        }
    }
}

fn family_variants(family: &str, bundle: &SkillBundle) -> Vec<Variant> {
    let mut variants = Vec::with_capacity(3);
    for (k, suffix) in ["a", "b"].into_iter().enumerate() {
        let prefix = format!("{family}_{suffix}");
        let (spec, program, mapping) = relabel(&bundle.spec, &bundle.program, &prefix);
        let mut examples: Vec<Example> = bundle
            .tests
            .cases
            .iter()
            .map(|case| Example {
                inputs: case
                    .inputs
                    .iter()
                    .map(|(name, v)| {
                        let renamed = mapping.get(name).cloned().unwrap_or_else(|| name.clone());
                        (renamed, *v)
                    })
                    .collect(),
                output: Some(case.output),
            })
            .collect();
        if k == 1 {
            examples.reverse();
        }
        variants.push(Variant {
            label: format!("{family}/relabel-{suffix}"),
            spec,
            program,
            examples,
        });
    }

    let mut spec = bundle.spec.clone();
    spec.name = format!("{}__{family}_mut", bundle.spec.name);
    let examples = if spec.oracle.is_some() {
        labelled(&spec, mutation_inputs(family, &spec))
    } else {
        bundle
            .tests
            .cases
            .iter()
            .map(|case| Example::new(case.inputs.clone(), Some(case.output)))
            .collect()
    };
    variants.push(Variant {
        label: format!("{family}/mutation"),
        spec,
        program: bundle.program.clone(),
        examples,
    });
    variants
}

/// Run the program under two relabelings and one mutation per family.
pub fn sealed_lite_gate(bundle: &SkillBundle) -> SkillResult<GateReport> {
    let mut results = Vec::new();
    let mut all_pass = true;
    for (f, family) in FAMILIES.iter().enumerate() {
        for (v, variant) in family_variants(family, bundle).into_iter().enumerate() {
            let budget = variant.spec.bounds.step_budget;
            let failing = variant
                .examples
                .iter()
                .filter(|e| !program_matches(&variant.program, e, budget))
                .count();
            let seed = bundle
                .verify_profile
                .seed
                .wrapping_add(100 * (f as u64 + 1) + v as u64);
            let cex = fuzz_counterexample(&variant.program, &variant.spec, seed, GATE_FUZZ_TRIALS)?;
            let passed = failing == 0 && cex.is_none();
            all_pass &= passed;
            results.push(json!({
                "variant": variant.label,
                "examples": variant.examples.len(),
                "failing": failing,
                "counterexample": cex,
                "passed": passed,
            }));
        }
    }
    Ok(GateReport {
        gate: Gate::SealedLite,
        passed: all_pass,
        details: json!({"families": FAMILIES, "variants": results}),
    })
}

/// No family token may appear in the canonical bundle bytes.
pub fn canary_gate(bundle: &SkillBundle) -> SkillResult<GateReport> {
    let bytes = bundle.canonical_bytes()?;
    let text = String::from_utf8_lossy(&bytes);
    let tripped: Vec<String> = FAMILIES
        .iter()
        .map(|family| canary_token(family))
        .filter(|token| text.contains(token.as_str()))
        .collect();
    Ok(GateReport {
        gate: Gate::Canary,
        passed: tripped.is_empty(),
        details: json!({"checked": FAMILIES.len(), "tripped": tripped}),
    })
}
