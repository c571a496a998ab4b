//! Skill bundles: a verified BVPS program packaged with its test cases.

use std::collections::{BTreeMap, HashSet};

use eidolon_bvps::{fill_examples, oracle_output, sample_inputs, Example, Program, Spec, Value};
use eidolon_codec::{canonical_bytes_of, sha256_canonical_of, CodecResult};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::{SkillError, SkillResult};

/// Version stamped on freshly compiled bundles.
pub const BUNDLE_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseOrigin {
    Declared,
    Fuzz,
    Counterexample,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub inputs: BTreeMap<String, Value>,
    pub output: Value,
    pub origin: CaseOrigin,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillTests {
    pub cases: Vec<TestCase>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyProfile {
    pub required_lanes: Vec<String>,
    pub fuzz_trials: u32,
    pub seed: u64,
}

/// When a bundle applies: the spec it was compiled for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub spec_name: String,
    pub spec_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillBundle {
    pub name: String,
    pub version: String,
    pub spec: Spec,
    pub program: Program,
    pub tests: SkillTests,
    pub verify_profile: VerifyProfile,
    pub trigger: Trigger,
}

impl SkillBundle {
    pub fn bundle_hash(&self) -> CodecResult<String> {
        sha256_canonical_of(self)
    }

    pub fn canonical_bytes(&self) -> CodecResult<Vec<u8>> {
        canonical_bytes_of(self)
    }

    pub fn spec_hash(&self) -> CodecResult<String> {
        self.spec.spec_hash()
    }
}

/// Inputs for [`compile_bundle`].
#[derive(Debug, Clone)]
pub struct CompileRequest<'a> {
    pub spec: &'a Spec,
    pub program: &'a Program,
    pub counterexamples: &'a [Example],
    pub required_lanes: Vec<String>,
    pub seed: u64,
}

/// Compile a verified program into a bundle.
///
/// Cases are the declared examples, then oracle-labelled fuzz samples, then
/// counter-examples; the first case seen for a given input assignment wins.
pub fn compile_bundle(request: &CompileRequest<'_>) -> SkillResult<SkillBundle> {
    let spec = request.spec;
    spec.validate()?;
    if request.program.params != spec.inputs || request.program.return_type != spec.output {
        return Err(SkillError::Schema(format!(
            "program signature does not match spec {}",
            spec.name
        )));
    }

    let mut cases = Vec::new();
    let mut seen = HashSet::new();
    let mut push = |example: &Example, origin: CaseOrigin| {
        if let Some(output) = example.output {
            if seen.insert(example.inputs.clone()) {
                cases.push(TestCase {
                    inputs: example.inputs.clone(),
                    output,
                    origin,
                });
            }
        }
    };

    for example in fill_examples(spec)? {
        push(&example, CaseOrigin::Declared);
    }
    if spec.oracle.is_some() {
        let mut rng = StdRng::seed_from_u64(request.seed);
        for _ in 0..spec.bounds.fuzz_trials {
            let inputs = sample_inputs(spec, &mut rng);
            // inputs the oracle itself rejects carry no label
            if let Ok(Some(output)) = oracle_output(spec, &inputs) {
                push(&Example::new(inputs, Some(output)), CaseOrigin::Fuzz);
            }
        }
    }
    for example in request.counterexamples {
        push(example, CaseOrigin::Counterexample);
    }

    Ok(SkillBundle {
        name: spec.name.clone(),
        version: BUNDLE_VERSION.to_string(),
        spec: spec.clone(),
        program: request.program.clone(),
        tests: SkillTests { cases },
        verify_profile: VerifyProfile {
            required_lanes: request.required_lanes.clone(),
            fuzz_trials: spec.bounds.fuzz_trials,
            seed: request.seed,
        },
        trigger: Trigger {
            spec_name: spec.name.clone(),
            spec_hash: spec.spec_hash()?,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use eidolon_bvps::{canned_spec, Expr, Op, Type};

    fn abs_program() -> Program {
        let x = || Expr::var("x");
        Program::new(
            vec![("x".into(), Type::Int)],
            Expr::ite(
                Expr::bin(Op::Lt, x(), Expr::int(0)),
                Expr::bin(Op::Sub, Expr::int(0), x()),
                x(),
            ),
            Type::Int,
        )
    }

    #[test]
    fn cases_are_deduplicated_by_inputs() {
        let spec = canned_spec("abs").unwrap();
        let program = abs_program();
        let repeat = Example::new([("x".to_string(), Value::Int(-3))], Some(Value::Int(3)));
        let bundle = compile_bundle(&CompileRequest {
            spec: &spec,
            program: &program,
            counterexamples: std::slice::from_ref(&repeat),
            required_lanes: vec!["recompute".into()],
            seed: 0,
        })
        .unwrap();

        let inputs: HashSet<_> = bundle.tests.cases.iter().map(|c| c.inputs.clone()).collect();
        assert_eq!(inputs.len(), bundle.tests.cases.len());
        assert_eq!(bundle.tests.cases[0].origin, CaseOrigin::Declared);
        assert!(bundle
            .tests
            .cases
            .iter()
            .all(|c| c.origin != CaseOrigin::Counterexample));
        // 11 possible inputs in [-5, 5]
        assert!(bundle.tests.cases.len() <= 11);
        assert_eq!(bundle.trigger.spec_hash, spec.spec_hash().unwrap());
    }

    #[test]
    fn compilation_is_deterministic() {
        let spec = canned_spec("abs").unwrap();
        let program = abs_program();
        let request = CompileRequest {
            spec: &spec,
            program: &program,
            counterexamples: &[],
            required_lanes: vec![],
            seed: 9,
        };
        let a = compile_bundle(&request).unwrap();
        let b = compile_bundle(&request).unwrap();
        assert_eq!(a.bundle_hash().unwrap(), b.bundle_hash().unwrap());
    }

    #[test]
    fn signature_mismatch_is_rejected() {
        let spec = canned_spec("max").unwrap();
        let program = abs_program();
        let request = CompileRequest {
            spec: &spec,
            program: &program,
            counterexamples: &[],
            required_lanes: vec![],
            seed: 0,
        };
        assert!(matches!(compile_bundle(&request), Err(SkillError::Schema(_))));
    }
}
