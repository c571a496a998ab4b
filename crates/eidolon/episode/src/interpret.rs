//! Task interpretation.
//!
//! BVPS and arithmetic tasks are read by the controller itself; everything
//! else is delegated to the kernel collaborator.

use eidolon_bvps::{spec_from_signature, Spec};
use eidolon_verify::{
    looks_like_arith, strip_arith_prefix, Interpretation, Kernel, TaskInput, TaskKind,
};
use serde_json::json;
use tracing::debug;

use crate::error::{EpisodeError, EpisodeResult};

pub const BVPS_SPEC_PREFIX: &str = "BVPS_SPEC:";
pub const BVPS_SIGNATURE_PREFIX: &str = "BVPS:";
pub const ARITH_INTERPRETATION_ID: &str = "arith:canonical";

/// How the controller will solve the task.
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    Arith { expression: String },
    Bvps(Box<Spec>),
    Kernel,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Interpreted {
    pub reading: Reading,
    /// Candidate readings; the first one is chosen.
    pub interpretations: Vec<Interpretation>,
}

impl Interpreted {
    pub fn chosen(&self) -> EpisodeResult<&Interpretation> {
        self.interpretations
            .first()
            .ok_or_else(|| EpisodeError::Schema("no interpretation was proposed".into()))
    }
}

fn strip_prefix_ci<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        text.get(prefix.len()..).map(str::trim)
    } else {
        None
    }
}

/// The BVPS spec carried by a task, if any.
///
/// Accepts `BVPS_SPEC:<json>`, a `data.bvps_spec` object, or a
/// `BVPS: name(types)->type` signature resolved against the built-in specs.
pub fn bvps_spec_from_task(task: &TaskInput) -> EpisodeResult<Option<Spec>> {
    let text = task.normalized();
    let spec = if let Some(body) = strip_prefix_ci(text, BVPS_SPEC_PREFIX) {
        serde_json::from_str::<Spec>(body)
            .map_err(|e| EpisodeError::Schema(format!("BVPS_SPEC payload: {e}")))?
    } else if let Some(value) = task.data_field("bvps_spec") {
        serde_json::from_value::<Spec>(value.clone())
            .map_err(|e| EpisodeError::Schema(format!("data.bvps_spec: {e}")))?
    } else if let Some(signature) = strip_prefix_ci(text, BVPS_SIGNATURE_PREFIX) {
        spec_from_signature(signature).map_err(|e| EpisodeError::Schema(e.to_string()))?
    } else {
        return Ok(None);
    };
    spec.validate().map_err(|e| EpisodeError::Schema(e.to_string()))?;
    Ok(Some(spec))
}

/// The arithmetic expression of an `ARITH:` or bare arithmetic task.
pub fn arith_expression(task: &TaskInput) -> Option<String> {
    let text = task.normalized();
    match strip_arith_prefix(text) {
        Some(expr) => Some(expr.to_string()),
        None if looks_like_arith(text) => Some(text.to_string()),
        None => None,
    }
}

pub fn interpret(task: &TaskInput, kernel: &dyn Kernel, seed: u64) -> EpisodeResult<Interpreted> {
    if let Some(spec) = bvps_spec_from_task(task)? {
        let spec_hash = spec.spec_hash()?;
        let interpretation = Interpretation::new(
            format!("bvps:{}", spec.name),
            TaskKind::Bvps,
            format!("synthesize a program for '{}'", spec.name),
            json!({"spec_name": spec.name, "spec_hash": spec_hash}),
        );
        debug!(spec = %spec.name, "Interpreted task as BVPS");
        return Ok(Interpreted {
            reading: Reading::Bvps(Box::new(spec)),
            interpretations: vec![interpretation],
        });
    }

    if let Some(expression) = arith_expression(task) {
        let interpretation = Interpretation::new(
            ARITH_INTERPRETATION_ID,
            TaskKind::Arith,
            "evaluate the arithmetic expression",
            json!({"expression": expression}),
        );
        return Ok(Interpreted {
            reading: Reading::Arith { expression },
            interpretations: vec![interpretation],
        });
    }

    let interpretations = kernel.propose_interpretations(task, seed)?;
    if interpretations.is_empty() {
        return Err(EpisodeError::Schema(format!(
            "kernel '{}' proposed no interpretation",
            kernel.name()
        )));
    }
    Ok(Interpreted {
        reading: Reading::Kernel,
        interpretations,
    })
}
