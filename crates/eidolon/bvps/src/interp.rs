//! Step-budgeted tree-walking evaluator.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{BvpsError, BvpsResult};
use crate::types::{Expr, Op, Program, Type, Value};

/// One evaluated node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceStep {
    pub step: u64,
    pub node: String,
    pub value: Value,
}

struct Evaluator<'a> {
    env: &'a HashMap<String, Value>,
    budget: u64,
    steps: u64,
    trace: Option<Vec<TraceStep>>,
}

impl Evaluator<'_> {
    fn eval(&mut self, expr: &Expr) -> BvpsResult<Value> {
        self.steps += 1;
        if self.steps > self.budget {
            return Err(BvpsError::StepBudgetExceeded {
                budget: self.budget,
            });
        }
        let step = self.steps;
        let value = match expr {
            Expr::IntConst { value } => Value::Int(*value),
            Expr::BoolConst { value } => Value::Bool(*value),
            Expr::Var { name } => *self
                .env
                .get(name)
                .ok_or_else(|| BvpsError::Type(format!("unbound variable {name}")))?,
            Expr::BinOp { op, left, right } => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                apply(*op, l, r)?
            }
            Expr::If {
                cond,
                then_branch,
                else_branch,
            } => match self.eval(cond)? {
                Value::Bool(true) => self.eval(then_branch)?,
                Value::Bool(false) => self.eval(else_branch)?,
                Value::Int(_) => {
                    return Err(BvpsError::Type("if condition is not a bool".into()));
                }
            },
            Expr::MacroCall { name, .. } => {
                return Err(BvpsError::UnexpandedMacro(name.clone()));
            }
        };
        if let Some(trace) = self.trace.as_mut() {
            trace.push(TraceStep {
                step,
                node: expr.kind_name().to_string(),
                value,
            });
        }
        Ok(value)
    }
}

fn ints(op: Op, l: Value, r: Value) -> BvpsResult<(i64, i64)> {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => Ok((a, b)),
        _ => Err(BvpsError::Type(format!(
            "{} expects int operands, got {} and {}",
            op.name(),
            l.type_of(),
            r.type_of()
        ))),
    }
}

fn overflow(op: Op, a: i64, b: i64) -> BvpsError {
    BvpsError::Arith(format!("{} overflow on {a} and {b}", op.name()))
}

/// Floored modulo: the result takes the sign of the divisor.
pub fn floored_mod(a: i64, b: i64) -> BvpsResult<i64> {
    if b == 0 {
        return Err(BvpsError::Arith("modulo by zero".into()));
    }
    let r = a.checked_rem(b).ok_or_else(|| overflow(Op::Mod, a, b))?;
    if r != 0 && ((r < 0) != (b < 0)) {
        Ok(r + b)
    } else {
        Ok(r)
    }
}

fn apply(op: Op, l: Value, r: Value) -> BvpsResult<Value> {
    match op {
        Op::Add => {
            let (a, b) = ints(op, l, r)?;
            a.checked_add(b).map(Value::Int).ok_or_else(|| overflow(op, a, b))
        }
        Op::Sub => {
            let (a, b) = ints(op, l, r)?;
            a.checked_sub(b).map(Value::Int).ok_or_else(|| overflow(op, a, b))
        }
        Op::Mul => {
            let (a, b) = ints(op, l, r)?;
            a.checked_mul(b).map(Value::Int).ok_or_else(|| overflow(op, a, b))
        }
        Op::Mod => {
            let (a, b) = ints(op, l, r)?;
            floored_mod(a, b).map(Value::Int)
        }
        Op::Lt => {
            let (a, b) = ints(op, l, r)?;
            Ok(Value::Bool(a < b))
        }
        Op::Gt => {
            let (a, b) = ints(op, l, r)?;
            Ok(Value::Bool(a > b))
        }
        Op::Eq => match (l, r) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Bool(a == b)),
            (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(a == b)),
            _ => Err(BvpsError::Type(format!(
                "eq over {} and {}",
                l.type_of(),
                r.type_of()
            ))),
        },
    }
}

/// Coerce named inputs to the declared parameter types.
///
/// Int parameters accept only ints; Bool parameters accept bools or ints
/// (non-zero is true).
pub fn bind_inputs(
    params: &[(String, Type)],
    inputs: &BTreeMap<String, Value>,
) -> BvpsResult<HashMap<String, Value>> {
    let mut env = HashMap::with_capacity(params.len());
    for (name, ty) in params {
        let raw = inputs
            .get(name)
            .ok_or_else(|| BvpsError::Type(format!("missing input {name}")))?;
        let value = match (ty, raw) {
            (Type::Int, Value::Int(v)) => Value::Int(*v),
            (Type::Int, Value::Bool(_)) => {
                return Err(BvpsError::Type(format!("input {name} must be an int")));
            }
            (Type::Bool, Value::Bool(b)) => Value::Bool(*b),
            (Type::Bool, Value::Int(v)) => Value::Bool(*v != 0),
        };
        env.insert(name.clone(), value);
    }
    Ok(env)
}

/// Evaluate an expression under an already-bound environment.
pub fn eval_expr(expr: &Expr, env: &HashMap<String, Value>, budget: u64) -> BvpsResult<Value> {
    Evaluator {
        env,
        budget,
        steps: 0,
        trace: None,
    }
    .eval(expr)
}

/// Run a macro-free program on named inputs.
pub fn run_program(
    program: &Program,
    inputs: &BTreeMap<String, Value>,
    budget: u64,
) -> BvpsResult<Value> {
    let env = bind_inputs(&program.params, inputs)?;
    eval_expr(&program.body, &env, budget)
}

/// [`run_program`] that also returns the post-order evaluation trace.
pub fn run_traced(
    program: &Program,
    inputs: &BTreeMap<String, Value>,
    budget: u64,
) -> BvpsResult<(Value, Vec<TraceStep>)> {
    let env = bind_inputs(&program.params, inputs)?;
    let mut evaluator = Evaluator {
        env: &env,
        budget,
        steps: 0,
        trace: Some(Vec::new()),
    };
    let value = evaluator.eval(&program.body)?;
    Ok((value, evaluator.trace.unwrap_or_default()))
}
