//! Typed expression DSL: values, expressions, programs and specs.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use eidolon_codec::{sha256_canonical_of, CodecResult};

use crate::error::{BvpsError, BvpsResult, MacroError};
use crate::macros::MacroSet;

/// Value type of the DSL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Type {
    #[serde(alias = "Int")]
    Int,
    #[serde(alias = "Bool")]
    Bool,
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => write!(f, "int"),
            Type::Bool => write!(f, "bool"),
        }
    }
}

impl FromStr for Type {
    type Err = BvpsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "int" => Ok(Type::Int),
            "bool" => Ok(Type::Bool),
            other => Err(BvpsError::Schema(format!("unknown type: {other}"))),
        }
    }
}

/// Runtime value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
}

impl Value {
    pub fn type_of(&self) -> Type {
        match self {
            Value::Int(_) => Type::Int,
            Value::Bool(_) => Type::Bool,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Bool(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(_) => None,
        }
    }

    /// Convert a JSON scalar (integer or boolean) into a value.
    pub fn from_json(value: &serde_json::Value) -> Option<Value> {
        match value {
            serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
            serde_json::Value::Number(n) => n.as_i64().map(Value::Int),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Int(v) => serde_json::Value::from(*v),
            Value::Bool(b) => serde_json::Value::Bool(*b),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Binary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    Add,
    Sub,
    Mul,
    Mod,
    Lt,
    Gt,
    Eq,
}

impl Op {
    /// Int-result operators in enumeration order.
    pub const INT_OPS: [Op; 4] = [Op::Sub, Op::Mod, Op::Add, Op::Mul];
    /// Bool-result operators in enumeration order.
    pub const BOOL_OPS: [Op; 3] = [Op::Eq, Op::Lt, Op::Gt];

    pub fn result_type(&self) -> Type {
        match self {
            Op::Add | Op::Sub | Op::Mul | Op::Mod => Type::Int,
            Op::Lt | Op::Gt | Op::Eq => Type::Bool,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Op::Add => "add",
            Op::Sub => "sub",
            Op::Mul => "mul",
            Op::Mod => "mod",
            Op::Lt => "lt",
            Op::Gt => "gt",
            Op::Eq => "eq",
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mul => "*",
            Op::Mod => "%",
            Op::Lt => "<",
            Op::Gt => ">",
            Op::Eq => "==",
        }
    }
}

/// Expression tree. The JSON form is tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expr {
    IntConst {
        value: i64,
    },
    BoolConst {
        value: bool,
    },
    Var {
        name: String,
    },
    BinOp {
        op: Op,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    If {
        cond: Box<Expr>,
        #[serde(rename = "then")]
        then_branch: Box<Expr>,
        #[serde(rename = "else")]
        else_branch: Box<Expr>,
    },
    MacroCall {
        name: String,
        args: Vec<Expr>,
    },
}

impl Expr {
    pub fn int(value: i64) -> Self {
        Expr::IntConst { value }
    }

    pub fn boolean(value: bool) -> Self {
        Expr::BoolConst { value }
    }

    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var { name: name.into() }
    }

    pub fn bin(op: Op, left: Expr, right: Expr) -> Self {
        Expr::BinOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn ite(cond: Expr, then_branch: Expr, else_branch: Expr) -> Self {
        Expr::If {
            cond: Box::new(cond),
            then_branch: Box::new(then_branch),
            else_branch: Box::new(else_branch),
        }
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::MacroCall {
            name: name.into(),
            args,
        }
    }

    /// Short node name used in traces.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Expr::IntConst { .. } => "int_const",
            Expr::BoolConst { .. } => "bool_const",
            Expr::Var { .. } => "var",
            Expr::BinOp { .. } => "bin_op",
            Expr::If { .. } => "if",
            Expr::MacroCall { .. } => "macro_call",
        }
    }

    /// Structural depth. Leaves and macro calls over leaves are depth 0.
    pub fn depth(&self) -> u32 {
        match self {
            Expr::IntConst { .. } | Expr::BoolConst { .. } | Expr::Var { .. } => 0,
            Expr::BinOp { left, right, .. } => 1 + left.depth().max(right.depth()),
            Expr::If {
                cond,
                then_branch,
                else_branch,
            } => 1 + cond.depth().max(then_branch.depth()).max(else_branch.depth()),
            Expr::MacroCall { args, .. } => args.iter().map(Expr::depth).max().unwrap_or(0),
        }
    }

    /// Number of nodes.
    pub fn size(&self) -> usize {
        match self {
            Expr::IntConst { .. } | Expr::BoolConst { .. } | Expr::Var { .. } => 1,
            Expr::BinOp { left, right, .. } => 1 + left.size() + right.size(),
            Expr::If {
                cond,
                then_branch,
                else_branch,
            } => 1 + cond.size() + then_branch.size() + else_branch.size(),
            Expr::MacroCall { args, .. } => 1 + args.iter().map(Expr::size).sum::<usize>(),
        }
    }

    pub fn is_if(&self) -> bool {
        matches!(self, Expr::If { .. })
    }

    pub fn is_bin_op(&self) -> bool {
        matches!(self, Expr::BinOp { .. })
    }

    pub fn contains_macro_call(&self) -> bool {
        match self {
            Expr::MacroCall { .. } => true,
            Expr::BinOp { left, right, .. } => {
                left.contains_macro_call() || right.contains_macro_call()
            }
            Expr::If {
                cond,
                then_branch,
                else_branch,
            } => {
                cond.contains_macro_call()
                    || then_branch.contains_macro_call()
                    || else_branch.contains_macro_call()
            }
            _ => false,
        }
    }

    /// Names of all variables referenced, sorted.
    pub fn free_vars(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_vars(&mut out);
        out
    }

    fn collect_vars(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Var { name } => {
                out.insert(name.clone());
            }
            Expr::BinOp { left, right, .. } => {
                left.collect_vars(out);
                right.collect_vars(out);
            }
            Expr::If {
                cond,
                then_branch,
                else_branch,
            } => {
                cond.collect_vars(out);
                then_branch.collect_vars(out);
                else_branch.collect_vars(out);
            }
            Expr::MacroCall { args, .. } => args.iter().for_each(|a| a.collect_vars(out)),
            Expr::IntConst { .. } | Expr::BoolConst { .. } => {}
        }
    }

    /// Rename variables through `mapping`; unmapped names are kept.
    pub fn rename_vars(&self, mapping: &BTreeMap<String, String>) -> Expr {
        match self {
            Expr::Var { name } => Expr::var(mapping.get(name).unwrap_or(name).clone()),
            Expr::BinOp { op, left, right } => {
                Expr::bin(*op, left.rename_vars(mapping), right.rename_vars(mapping))
            }
            Expr::If {
                cond,
                then_branch,
                else_branch,
            } => Expr::ite(
                cond.rename_vars(mapping),
                then_branch.rename_vars(mapping),
                else_branch.rename_vars(mapping),
            ),
            Expr::MacroCall { name, args } => Expr::call(
                name.clone(),
                args.iter().map(|a| a.rename_vars(mapping)).collect(),
            ),
            other => other.clone(),
        }
    }

    /// Canonical JSON text of the expression, identical to
    /// `canonical_string(serde_json::to_value(expr))`.
    pub fn canonical_key(&self) -> String {
        let mut out = String::new();
        self.write_canonical(&mut out);
        out
    }

    fn write_canonical(&self, out: &mut String) {
        match self {
            Expr::IntConst { value } => {
                out.push_str(r#"{"kind":"int_const","value":"#);
                out.push_str(&value.to_string());
                out.push('}');
            }
            Expr::BoolConst { value } => {
                out.push_str(r#"{"kind":"bool_const","value":"#);
                out.push_str(if *value { "true" } else { "false" });
                out.push('}');
            }
            Expr::Var { name } => {
                out.push_str(r#"{"kind":"var","name":"#);
                push_json_str(out, name);
                out.push('}');
            }
            Expr::BinOp { op, left, right } => {
                out.push_str(r#"{"kind":"bin_op","left":"#);
                left.write_canonical(out);
                out.push_str(r#","op":""#);
                out.push_str(op.name());
                out.push_str(r#"","right":"#);
                right.write_canonical(out);
                out.push('}');
            }
            Expr::If {
                cond,
                then_branch,
                else_branch,
            } => {
                out.push_str(r#"{"cond":"#);
                cond.write_canonical(out);
                out.push_str(r#","else":"#);
                else_branch.write_canonical(out);
                out.push_str(r#","kind":"if","then":"#);
                then_branch.write_canonical(out);
                out.push('}');
            }
            Expr::MacroCall { name, args } => {
                out.push_str(r#"{"args":["#);
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    arg.write_canonical(out);
                }
                out.push_str(r#"],"kind":"macro_call","name":"#);
                push_json_str(out, name);
                out.push('}');
            }
        }
    }
}

fn push_json_str(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::IntConst { value } => write!(f, "{value}"),
            Expr::BoolConst { value } => write!(f, "{value}"),
            Expr::Var { name } => write!(f, "{name}"),
            Expr::BinOp { op, left, right } => write!(f, "({left} {} {right})", op.symbol()),
            Expr::If {
                cond,
                then_branch,
                else_branch,
            } => write!(f, "(if {cond} then {then_branch} else {else_branch})"),
            Expr::MacroCall { name, args } => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// A typed, closed program over named parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Program {
    pub params: Vec<(String, Type)>,
    pub body: Expr,
    pub return_type: Type,
}

impl Program {
    pub fn new(params: Vec<(String, Type)>, body: Expr, return_type: Type) -> Self {
        Self {
            params,
            body,
            return_type,
        }
    }

    /// Human-readable rendering, e.g. `fn(x: int) -> int = (0 - x)`.
    pub fn pretty(&self) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|(name, ty)| format!("{name}: {ty}"))
            .collect();
        format!("fn({}) -> {} = {}", params.join(", "), self.return_type, self.body)
    }

    /// SHA-256 of the canonical program JSON.
    pub fn hash(&self) -> CodecResult<String> {
        sha256_canonical_of(self)
    }
}

/// Search and fuzzing limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bounds {
    pub int_min: i64,
    pub int_max: i64,
    pub fuzz_trials: u32,
    pub max_depth: u32,
    pub max_programs: usize,
    pub step_budget: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for Bounds {
    fn default() -> Self {
        Self {
            int_min: -5,
            int_max: 5,
            fuzz_trials: 20,
            max_depth: 3,
            max_programs: 1000,
            step_budget: 200,
            seed: None,
        }
    }
}

/// One input/output example. A missing output is filled from the oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Example {
    pub inputs: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

impl Example {
    pub fn new(inputs: impl IntoIterator<Item = (String, Value)>, output: Option<Value>) -> Self {
        Self {
            inputs: inputs.into_iter().collect(),
            output,
        }
    }
}

/// Synthesis problem statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spec {
    pub name: String,
    /// Parameters in declaration order.
    pub inputs: Vec<(String, Type)>,
    pub output: Type,
    #[serde(default)]
    pub examples: Vec<Example>,
    #[serde(default)]
    pub bounds: Bounds,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oracle: Option<Expr>,
}

impl Spec {
    /// SHA-256 of the canonical spec JSON.
    pub fn spec_hash(&self) -> CodecResult<String> {
        sha256_canonical_of(self)
    }

    /// The oracle as a program over the spec inputs.
    pub fn oracle_program(&self) -> Option<Program> {
        self.oracle
            .as_ref()
            .map(|body| Program::new(self.inputs.clone(), body.clone(), self.output))
    }

    /// Shape checks: non-empty name, unique input names, ordered int range,
    /// examples naming exactly the declared inputs.
    pub fn validate(&self) -> BvpsResult<()> {
        if self.name.trim().is_empty() {
            return Err(BvpsError::Schema("spec name is empty".into()));
        }
        let mut seen = BTreeSet::new();
        for (name, _) in &self.inputs {
            if !seen.insert(name.as_str()) {
                return Err(BvpsError::Schema(format!("duplicate input {name}")));
            }
        }
        if self.bounds.int_min > self.bounds.int_max {
            return Err(BvpsError::Schema(format!(
                "int_min {} exceeds int_max {}",
                self.bounds.int_min, self.bounds.int_max
            )));
        }
        for (i, example) in self.examples.iter().enumerate() {
            let names: BTreeSet<&str> = example.inputs.keys().map(String::as_str).collect();
            if names != seen {
                return Err(BvpsError::Schema(format!(
                    "example {i} inputs do not match declared inputs"
                )));
            }
        }
        Ok(())
    }
}

/// Definitional macro template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacroTemplate {
    pub params: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param_types: Option<Vec<Type>>,
    pub return_type: Type,
    pub body: Expr,
}

impl MacroTemplate {
    pub fn resolved_param_types(&self) -> Vec<Type> {
        match &self.param_types {
            Some(types) => types.clone(),
            None => vec![Type::Int; self.params.len()],
        }
    }
}

/// Infer the type of `expr` under `env`, resolving macro calls by their
/// declared return types.
pub fn type_of(expr: &Expr, env: &[(String, Type)], macros: &MacroSet) -> BvpsResult<Type> {
    match expr {
        Expr::IntConst { .. } => Ok(Type::Int),
        Expr::BoolConst { .. } => Ok(Type::Bool),
        Expr::Var { name } => env
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, ty)| *ty)
            .ok_or_else(|| BvpsError::Type(format!("unbound variable {name}"))),
        Expr::BinOp { op, left, right } => {
            let l = type_of(left, env, macros)?;
            let r = type_of(right, env, macros)?;
            match op {
                Op::Eq if l == r => Ok(Type::Bool),
                Op::Eq => Err(BvpsError::Type(format!("eq over {l} and {r}"))),
                _ if l == Type::Int && r == Type::Int => Ok(op.result_type()),
                _ => Err(BvpsError::Type(format!("{} over {l} and {r}", op.name()))),
            }
        }
        Expr::If {
            cond,
            then_branch,
            else_branch,
        } => {
            let c = type_of(cond, env, macros)?;
            if c != Type::Bool {
                return Err(BvpsError::Type(format!("if condition has type {c}")));
            }
            let t = type_of(then_branch, env, macros)?;
            let e = type_of(else_branch, env, macros)?;
            if t != e {
                return Err(BvpsError::Type(format!("if branches have types {t} and {e}")));
            }
            Ok(t)
        }
        Expr::MacroCall { name, args } => {
            let template = macros
                .get(name)
                .ok_or_else(|| MacroError::Unknown(name.clone()))?;
            if template.params.len() != args.len() {
                return Err(MacroError::Arity {
                    name: name.clone(),
                    expected: template.params.len(),
                    found: args.len(),
                }
                .into());
            }
            for (index, (arg, expected)) in args
                .iter()
                .zip(template.resolved_param_types())
                .enumerate()
            {
                let found = type_of(arg, env, macros)?;
                if found != expected {
                    return Err(MacroError::TypeMismatch {
                        name: name.clone(),
                        index,
                        expected,
                        found,
                    }
                    .into());
                }
            }
            Ok(template.return_type)
        }
    }
}
