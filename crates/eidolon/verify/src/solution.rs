//! Solution payloads, one shape per task kind.

use eidolon_bvps::{Program, Spec, SynthesisStats};
use eidolon_codec::canonical_string;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{VerifyError, VerifyResult};
use crate::gridworld::{Action, WorldSpec};
use crate::kernel::Proposal;
use crate::list_dsl::ListOp;
use crate::safe_arith::Number;
use crate::task::{Interpretation, TaskKind};

/// Where a BVPS program came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgramSource {
    Cegis,
    CacheMem,
    CachePersist,
    Skill,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BvpsSolution {
    pub spec: Spec,
    pub program: Program,
    pub program_pretty: String,
    pub program_hash: String,
    pub stats: SynthesisStats,
    pub attempt: u32,
    pub source: ProgramSource,
}

/// A BVPS spec synthesis gave up on within its bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BvpsFailure {
    pub spec: Spec,
    pub attempt: u32,
    pub tried: usize,
    pub max_programs: usize,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Solution {
    Arith {
        expression: String,
        output: Number,
    },
    List {
        function: String,
        program: Vec<ListOp>,
        input: Vec<i64>,
        output: Vec<i64>,
    },
    World {
        world: WorldSpec,
        actions: Vec<Action>,
        output: Value,
    },
    BvpsProgram(BvpsSolution),
    BvpsUnsolved(BvpsFailure),
}

impl Solution {
    pub fn kind(&self) -> &'static str {
        match self {
            Solution::Arith { .. } => "arith",
            Solution::List { .. } => "list",
            Solution::World { .. } => "world",
            Solution::BvpsProgram(_) => "bvps_program",
            Solution::BvpsUnsolved(_) => "bvps_unsolved",
        }
    }

    pub fn output(&self) -> Value {
        match self {
            Solution::Arith { output, .. } => output.to_json(),
            Solution::List { output, .. } => Value::from(output.clone()),
            Solution::World { output, .. } => output.clone(),
            Solution::BvpsProgram(bvps) => Value::String(bvps.program_pretty.clone()),
            Solution::BvpsUnsolved(_) => Value::Null,
        }
    }

    /// Output as it appears after `result=`.
    pub fn render_output(&self) -> VerifyResult<String> {
        Ok(match self.output() {
            Value::String(s) => s,
            other => canonical_string(&other)?,
        })
    }

    pub fn as_bvps(&self) -> Option<&BvpsSolution> {
        match self {
            Solution::BvpsProgram(bvps) => Some(bvps),
            _ => None,
        }
    }

    /// The BVPS spec behind a solved or unsolved BVPS task.
    pub fn bvps_spec(&self) -> Option<&Spec> {
        match self {
            Solution::BvpsProgram(bvps) => Some(&bvps.spec),
            Solution::BvpsUnsolved(failure) => Some(&failure.spec),
            _ => None,
        }
    }

    pub fn to_json(&self) -> VerifyResult<Value> {
        Ok(eidolon_codec::to_value(self)?)
    }

    /// Build a list or world solution from a kernel proposal.
    pub fn from_proposal(
        interpretation: &Interpretation,
        proposal: &Proposal,
    ) -> VerifyResult<Solution> {
        let schema = |what: &str| {
            VerifyError::Kernel(format!(
                "proposal for {} has no valid {what}",
                interpretation.id
            ))
        };
        match interpretation.kind {
            TaskKind::List => {
                let function = interpretation.params["function"]
                    .as_str()
                    .ok_or_else(|| schema("function"))?
                    .to_string();
                let input = serde_json::from_value(interpretation.params["input"].clone())
                    .map_err(|_| schema("input"))?;
                let program = proposal
                    .program
                    .clone()
                    .ok_or_else(|| schema("program"))
                    .and_then(|p| serde_json::from_value(p).map_err(|_| schema("program")))?;
                let output = serde_json::from_value(proposal.output.clone())
                    .map_err(|_| schema("output"))?;
                Ok(Solution::List {
                    function,
                    program,
                    input,
                    output,
                })
            }
            TaskKind::World => {
                let world = serde_json::from_value(interpretation.params["world"].clone())
                    .map_err(|_| schema("world"))?;
                let actions = proposal
                    .program
                    .clone()
                    .ok_or_else(|| schema("actions"))
                    .and_then(|p| serde_json::from_value(p).map_err(|_| schema("actions")))?;
                Ok(Solution::World {
                    world,
                    actions,
                    output: proposal.output.clone(),
                })
            }
            other => Err(VerifyError::Kernel(format!(
                "kernels do not solve {other} tasks"
            ))),
        }
    }
}

fn require(errors: &mut Vec<String>, doc: &Value, field: &str, ok: impl Fn(&Value) -> bool) {
    match doc.get(field) {
        Some(value) if ok(value) => {}
        Some(_) => errors.push(format!("field '{field}' has the wrong shape")),
        None => errors.push(format!("missing field '{field}'")),
    }
}

/// Surface-shape check on a serialized solution. Returns the field errors.
pub fn validate_fields(doc: &Value) -> Vec<String> {
    let mut errors = Vec::new();
    match doc.get("kind").and_then(Value::as_str) {
        Some("arith") => {
            require(&mut errors, doc, "expression", |v| {
                v.as_str().is_some_and(|s| !s.trim().is_empty())
            });
            require(&mut errors, doc, "output", Value::is_number);
        }
        Some("list") => {
            require(&mut errors, doc, "program", |v| {
                v.as_array().is_some_and(|a| !a.is_empty())
            });
            require(&mut errors, doc, "input", Value::is_array);
            require(&mut errors, doc, "output", Value::is_array);
        }
        Some("world") => {
            require(&mut errors, doc, "actions", Value::is_array);
            require(&mut errors, doc, "world", |w| {
                ["goal", "width", "height"].iter().all(|k| w.get(k).is_some())
            });
        }
        Some("bvps_program" | "bvps_unsolved") => {
            require(&mut errors, doc, "spec", Value::is_object);
            require(&mut errors, doc, "program", Value::is_object);
        }
        Some(other) => errors.push(format!("unknown solution kind '{other}'")),
        None => errors.push("missing field 'kind'".to_string()),
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn arith_solution_shape() {
        let solution = Solution::Arith {
            expression: "2 + 3 * 4".into(),
            output: Number::Int(14),
        };
        let doc = solution.to_json().unwrap();
        assert_eq!(doc, json!({"kind": "arith", "expression": "2 + 3 * 4", "output": 14}));
        assert!(validate_fields(&doc).is_empty());
        assert_eq!(solution.render_output().unwrap(), "14");
        let back: Solution = serde_json::from_value(doc).unwrap();
        assert_eq!(back, solution);
    }

    #[test]
    fn validator_reports_missing_and_malformed_fields() {
        let errors = validate_fields(&json!({"kind": "arith", "expression": ""}));
        assert_eq!(errors.len(), 2);
        let errors =
            validate_fields(&json!({"kind": "world", "actions": [], "world": {"width": 3}}));
        assert_eq!(errors, vec!["field 'world' has the wrong shape".to_string()]);
        assert!(!validate_fields(&json!({"kind": "poem"})).is_empty());
        assert!(!validate_fields(&json!({})).is_empty());
    }

    #[test]
    fn list_output_renders_as_canonical_json() {
        let solution = Solution::List {
            function: "sort".into(),
            program: vec![ListOp::Sort],
            input: vec![3, 1, 2],
            output: vec![1, 2, 3],
        };
        assert_eq!(solution.render_output().unwrap(), "[1,2,3]");
        assert_eq!(solution.kind(), "list");
    }

    #[test]
    fn unsolved_bvps_has_no_program_field() {
        let spec = eidolon_bvps::canned_spec("abs").unwrap();
        let solution = Solution::BvpsUnsolved(BvpsFailure {
            spec: spec.clone(),
            attempt: 1,
            tried: 10,
            max_programs: 10,
            error: "enumeration exhausted".into(),
        });
        let doc = solution.to_json().unwrap();
        assert_eq!(doc["kind"], json!("bvps_unsolved"));
        assert_eq!(validate_fields(&doc), vec!["missing field 'program'".to_string()]);
        assert_eq!(solution.output(), Value::Null);
        assert!(solution.as_bvps().is_none());
        assert_eq!(solution.bvps_spec(), Some(&spec));
    }
}
