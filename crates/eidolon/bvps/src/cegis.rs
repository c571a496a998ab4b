//! Counter-example guided inductive synthesis.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::enumerate::enumerate_programs;
use crate::error::{BvpsError, BvpsResult};
use crate::interp::run_program;
use crate::macros::{expand_program, MacroSet};
use crate::types::{Example, Program, Spec, Type, Value};

/// Counters reported with every synthesized program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesisStats {
    pub candidates_tried: usize,
    pub depth: u32,
    pub counterexamples: Vec<Example>,
    pub seed: u64,
    pub fuzz_trials: u32,
}

/// Seed used for fuzzing: the spec's own seed, else the caller's, else 0.
pub fn effective_seed(spec: &Spec, given: Option<u64>) -> u64 {
    spec.bounds.seed.or(given).unwrap_or(0)
}

/// Evaluate the spec oracle on one input assignment.
pub fn oracle_output(spec: &Spec, inputs: &BTreeMap<String, Value>) -> BvpsResult<Option<Value>> {
    match spec.oracle_program() {
        Some(oracle) => Ok(Some(run_program(&oracle, inputs, spec.bounds.step_budget)?)),
        None => Ok(None),
    }
}

/// Examples with missing outputs filled in by the oracle.
pub fn fill_examples(spec: &Spec) -> BvpsResult<Vec<Example>> {
    spec.examples
        .iter()
        .enumerate()
        .map(|(i, example)| {
            if example.output.is_some() {
                return Ok(example.clone());
            }
            match oracle_output(spec, &example.inputs)? {
                Some(output) => Ok(Example {
                    inputs: example.inputs.clone(),
                    output: Some(output),
                }),
                None => Err(BvpsError::Schema(format!(
                    "example {i} has no output and the spec has no oracle"
                ))),
            }
        })
        .collect()
}

/// True when the program reproduces every labelled example. Evaluation
/// failures count as mismatches.
pub fn passes_examples(program: &Program, examples: &[Example], budget: u64) -> bool {
    examples.iter().all(|example| match example.output {
        Some(expected) => {
            matches!(run_program(program, &example.inputs, budget), Ok(v) if v == expected)
        }
        None => true,
    })
}

/// True when the oracle reproduces every labelled example, or there is no
/// oracle. Oracle failures count as disagreement.
pub fn oracle_agrees(spec: &Spec, examples: &[Example]) -> bool {
    let Some(oracle) = spec.oracle_program() else {
        return true;
    };
    passes_examples(&oracle, examples, spec.bounds.step_budget)
}

/// Draw one input assignment from the per-type fuzz ranges.
pub fn sample_inputs(spec: &Spec, rng: &mut StdRng) -> BTreeMap<String, Value> {
    spec.inputs
        .iter()
        .map(|(name, ty)| {
            let value = match ty {
                Type::Int => Value::Int(rng.gen_range(spec.bounds.int_min..=spec.bounds.int_max)),
                Type::Bool => Value::Bool(rng.gen_range(0..=1) == 1),
            };
            (name.clone(), value)
        })
        .collect()
}

/// Search `trials` random inputs for a disagreement with the oracle.
///
/// Returns the first oracle-labelled input on which the program differs or
/// fails. Without an oracle there is nothing to compare against.
pub fn fuzz_counterexample(
    program: &Program,
    spec: &Spec,
    seed: u64,
    trials: u32,
) -> BvpsResult<Option<Example>> {
    let Some(oracle) = spec.oracle_program() else {
        return Ok(None);
    };
    let budget = spec.bounds.step_budget;
    let mut rng = StdRng::seed_from_u64(seed);
    for _ in 0..trials {
        let inputs = sample_inputs(spec, &mut rng);
        let Ok(expected) = run_program(&oracle, &inputs, budget) else {
            continue;
        };
        match run_program(program, &inputs, budget) {
            Ok(actual) if actual == expected => {}
            _ => {
                return Ok(Some(Example {
                    inputs,
                    output: Some(expected),
                }))
            }
        }
    }
    Ok(None)
}

/// Run CEGIS over the enumeration order.
///
/// Returns the first candidate that matches every example and survives a
/// fuzz round; each counter-example found on the way is appended to the
/// working examples. When the declared examples contradict the oracle no
/// program can satisfy both, so the fuzz round is skipped and the declared
/// examples decide; `stats.fuzz_trials` is then 0. Fails with
/// [`BvpsError::EnumerationExhausted`] once `max_programs` candidates were
/// tried or the enumeration ran dry.
pub fn synthesize(
    spec: &Spec,
    macros: &MacroSet,
    given_seed: Option<u64>,
) -> BvpsResult<(Program, SynthesisStats)> {
    spec.validate()?;
    let mut examples = fill_examples(spec)?;
    let seed = effective_seed(spec, given_seed);
    let fuzz_trials = if oracle_agrees(spec, &examples) {
        spec.bounds.fuzz_trials
    } else {
        warn!(spec = %spec.name, "Declared examples contradict the oracle; fuzzing disabled");
        0
    };
    let max_programs = spec.bounds.max_programs;
    let budget = spec.bounds.step_budget;
    let mut counterexamples = Vec::new();
    let mut tried = 0usize;

    let mut stream = enumerate_programs(spec, macros);
    while let Some(candidate) = stream.next() {
        if tried >= max_programs {
            break;
        }
        tried += 1;
        let expanded = expand_program(&candidate, macros)?;
        if !passes_examples(&expanded, &examples, budget) {
            continue;
        }
        match fuzz_counterexample(&expanded, spec, seed, fuzz_trials)? {
            None => {
                let stats = SynthesisStats {
                    candidates_tried: tried,
                    depth: stream.current_depth(),
                    counterexamples,
                    seed,
                    fuzz_trials,
                };
                info!(
                    spec = %spec.name,
                    candidates = tried,
                    depth = stats.depth,
                    program = %expanded.pretty(),
                    "Synthesized program"
                );
                return Ok((expanded, stats));
            }
            Some(cex) => {
                debug!(spec = %spec.name, candidate = %expanded.pretty(), "Counter-example found");
                examples.push(cex.clone());
                counterexamples.push(cex);
            }
        }
    }

    Err(BvpsError::EnumerationExhausted {
        tried,
        max_programs,
    })
}
