//! Kernel interface and the deterministic rule-based kernel.
//!
//! A kernel reads tasks the controller does not handle itself (list and
//! grid-world tasks), proposes interpretations and solutions, and critiques
//! lane outcomes. Only the `rule` kernel ships; LLM-backed adapters are not
//! built into this workspace.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{VerifyError, VerifyResult};
use crate::gridworld::{plan, replay, WorldSpec};
use crate::lanes::{LaneStatus, LaneVerdict};
use crate::list_dsl::{programs_for, reference_fn, run_list_program};
use crate::solution::Solution;
use crate::task::{Interpretation, TaskInput, TaskKind};

/// A candidate produced by [`Kernel::propose_solution`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub output: Value,
    pub solution_kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Critique {
    pub accept: bool,
    pub notes: Vec<String>,
}

pub trait Kernel: Send + Sync {
    fn name(&self) -> &str;

    fn propose_interpretations(
        &self,
        task: &TaskInput,
        seed: u64,
    ) -> VerifyResult<Vec<Interpretation>>;

    fn propose_solution(
        &self,
        task: &TaskInput,
        interpretation: &Interpretation,
        seed: u64,
    ) -> VerifyResult<Proposal>;

    fn critique(&self, task: &TaskInput, solution: &Solution, verdicts: &[LaneVerdict]) -> Critique;
}

/// Resolve a kernel by configured name.
pub fn kernel_from_name(name: &str) -> VerifyResult<Box<dyn Kernel>> {
    match name {
        "rule" => Ok(Box::new(RuleKernel)),
        "http" | "gguf" => Err(VerifyError::Config(format!(
            "kernel adapter '{name}' is not available in this build"
        ))),
        other => Err(VerifyError::Config(format!("unknown kernel '{other}'"))),
    }
}

/// Parses `LIST:` and `WORLD:` prompts (or `data.list` / `data.world`).
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleKernel;

enum Reading {
    List { function: String, input: Vec<i64> },
    World(WorldSpec),
}

fn strip_marker<'a>(text: &'a str, marker: &str) -> Option<&'a str> {
    let trimmed = text.trim_start();
    let head = trimmed.get(..marker.len())?;
    head.eq_ignore_ascii_case(marker)
        .then(|| trimmed[marker.len()..].trim())
}

fn parse_list_prompt(body: &str) -> VerifyResult<(String, Vec<i64>)> {
    let bad = || VerifyError::Kernel(format!("malformed list task: {body}"));
    let open = body.find('[').ok_or_else(bad)?;
    let function = body[..open].trim().to_string();
    let input: Vec<i64> = serde_json::from_str(body[open..].trim()).map_err(|_| bad())?;
    if function.is_empty() {
        return Err(bad());
    }
    Ok((function, input))
}

impl RuleKernel {
    fn read(&self, task: &TaskInput) -> VerifyResult<Reading> {
        if let Some(list) = task.data_field("list") {
            let function = list["function"]
                .as_str()
                .ok_or_else(|| VerifyError::Kernel("data.list.function is required".into()))?;
            let input = serde_json::from_value(list["input"].clone())
                .map_err(|e| VerifyError::Kernel(format!("data.list.input: {e}")))?;
            return Ok(Reading::List {
                function: function.to_string(),
                input,
            });
        }
        if let Some(world) = task.data_field("world") {
            let spec: WorldSpec = serde_json::from_value(world.clone())
                .map_err(|e| VerifyError::Kernel(format!("data.world: {e}")))?;
            spec.validate()?;
            return Ok(Reading::World(spec));
        }
        let text = task.normalized();
        if let Some(body) = strip_marker(text, "LIST:") {
            let (function, input) = parse_list_prompt(body)?;
            return Ok(Reading::List { function, input });
        }
        if let Some(body) = strip_marker(text, "WORLD:") {
            return Ok(Reading::World(WorldSpec::parse(body)?));
        }
        Err(VerifyError::Kernel(format!("rule kernel cannot read task: {text}")))
    }
}

impl Kernel for RuleKernel {
    fn name(&self) -> &str {
        "rule"
    }

    fn propose_interpretations(
        &self,
        task: &TaskInput,
        seed: u64,
    ) -> VerifyResult<Vec<Interpretation>> {
        let interpretations: Vec<Interpretation> = match self.read(task)? {
            Reading::List { function, input } => {
                let variants = programs_for(&function);
                if variants.is_empty() || reference_fn(&function, &input).is_none() {
                    return Err(VerifyError::Kernel(format!("unknown list function '{function}'")));
                }
                (0..variants.len())
                    .map(|variant| {
                        let id = if variant == 0 {
                            format!("list:{function}")
                        } else {
                            format!("list:{function}:alt{variant}")
                        };
                        Interpretation::new(
                            id,
                            TaskKind::List,
                            format!("apply '{function}' to the list"),
                            json!({"function": function, "input": input, "variant": variant}),
                        )
                    })
                    .collect()
            }
            Reading::World(world) => [true, false]
                .into_iter()
                .map(|horizontal_first| {
                    let (id, summary) = if horizontal_first {
                        ("world:horizontal_first", "move along x, then y")
                    } else {
                        ("world:vertical_first", "move along y, then x")
                    };
                    Interpretation::new(
                        id,
                        TaskKind::World,
                        summary,
                        json!({"world": world, "horizontal_first": horizontal_first}),
                    )
                })
                .collect(),
        };
        debug!(kernel = "rule", seed, count = interpretations.len(), "Proposed interpretations");
        Ok(interpretations)
    }

    fn propose_solution(
        &self,
        _task: &TaskInput,
        interpretation: &Interpretation,
        seed: u64,
    ) -> VerifyResult<Proposal> {
        let params = &interpretation.params;
        match interpretation.kind {
            TaskKind::List => {
                let function = params["function"]
                    .as_str()
                    .ok_or_else(|| VerifyError::Kernel("interpretation lacks a function".into()))?;
                let input: Vec<i64> = serde_json::from_value(params["input"].clone())
                    .map_err(|e| VerifyError::Kernel(format!("interpretation input: {e}")))?;
                let variant = params["variant"].as_u64().unwrap_or(0) as usize;
                let program = programs_for(function)
                    .into_iter()
                    .nth(variant)
                    .ok_or_else(|| {
                        VerifyError::Kernel(format!("no program for {}", interpretation.id))
                    })?;
                let output = run_list_program(&program, &input)?;
                Ok(Proposal {
                    output: json!(output),
                    solution_kind: "list".into(),
                    program: Some(json!(program)),
                    trace: Some(json!({"ops": program.len(), "seed": seed})),
                })
            }
            TaskKind::World => {
                let world: WorldSpec = serde_json::from_value(params["world"].clone())
                    .map_err(|e| VerifyError::Kernel(format!("interpretation world: {e}")))?;
                let horizontal_first = params["horizontal_first"].as_bool().unwrap_or(true);
                let actions = plan(&world, horizontal_first);
                let outcome = replay(&world, &actions, seed)?;
                Ok(Proposal {
                    output: json!({"done": outcome.done, "position": outcome.position}),
                    solution_kind: "world".into(),
                    program: Some(json!(actions)),
                    trace: Some(json!({
                        "total_reward": outcome.total_reward,
                        "steps": outcome.steps,
                    })),
                })
            }
            other => Err(VerifyError::Kernel(format!("rule kernel does not solve {other} tasks"))),
        }
    }

    fn critique(
        &self,
        _task: &TaskInput,
        solution: &Solution,
        verdicts: &[LaneVerdict],
    ) -> Critique {
        let notes: Vec<String> = verdicts
            .iter()
            .filter(|v| v.status != LaneStatus::Pass)
            .map(|v| match &v.notes {
                Some(note) => format!("{} {}: {note}", v.lane, v.status),
                None => format!("{} {}", v.lane, v.status),
            })
            .collect();
        Critique {
            accept: notes.is_empty() && !verdicts.is_empty(),
            notes: if notes.is_empty() {
                vec![format!("{} solution verified", solution.kind())]
            } else {
                notes
            },
        }
    }
}
