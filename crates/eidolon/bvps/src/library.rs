//! Built-in BVPS specs and the `name(types)->type` signature syntax.

use crate::error::{BvpsError, BvpsResult};
use crate::types::{Bounds, Example, Expr, Op, Spec, Type, Value};

/// A parsed `name(int, int)->int` signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub inputs: Vec<Type>,
    pub output: Type,
}

/// Parse `name(t1, t2, ...)->t`. Whitespace is ignored.
pub fn parse_signature(text: &str) -> BvpsResult<Signature> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    let bad = || BvpsError::Schema(format!("malformed signature: {text}"));

    let open = compact.find('(').ok_or_else(bad)?;
    let close = compact.find(')').ok_or_else(bad)?;
    if close < open {
        return Err(bad());
    }
    let name = &compact[..open];
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(bad());
    }
    let args = &compact[open + 1..close];
    let rest = compact[close + 1..].strip_prefix("->").ok_or_else(bad)?;

    let inputs = if args.is_empty() {
        Vec::new()
    } else {
        args.split(',')
            .map(str::parse::<Type>)
            .collect::<BvpsResult<Vec<_>>>()?
    };
    Ok(Signature {
        name: name.to_string(),
        inputs,
        output: rest.parse()?,
    })
}

/// Names of the built-in specs.
pub const CANNED_SPECS: [&str; 9] = [
    "abs",
    "double",
    "identity",
    "is_positive",
    "is_zero",
    "max",
    "min",
    "neg",
    "x_plus_one",
];

fn unary(name: &str, output: Type, oracle: Expr, xs: &[i64]) -> Spec {
    Spec {
        name: name.to_string(),
        inputs: vec![("x".into(), Type::Int)],
        output,
        examples: xs
            .iter()
            .map(|x| Example::new([("x".to_string(), Value::Int(*x))], None))
            .collect(),
        bounds: Bounds::default(),
        oracle: Some(oracle),
    }
}

fn binary(name: &str, oracle: Expr, xys: &[(i64, i64)]) -> Spec {
    Spec {
        name: name.to_string(),
        inputs: vec![("x".into(), Type::Int), ("y".into(), Type::Int)],
        output: Type::Int,
        examples: xys
            .iter()
            .map(|(x, y)| {
                Example::new(
                    [
                        ("x".to_string(), Value::Int(*x)),
                        ("y".to_string(), Value::Int(*y)),
                    ],
                    None,
                )
            })
            .collect(),
        bounds: Bounds::default(),
        oracle: Some(oracle),
    }
}

/// A built-in spec by name. Example outputs are left for the oracle to fill.
pub fn canned_spec(name: &str) -> Option<Spec> {
    let x = || Expr::var("x");
    let y = || Expr::var("y");
    let spec = match name {
        "abs" => unary(
            "abs",
            Type::Int,
            Expr::ite(
                Expr::bin(Op::Lt, x(), Expr::int(0)),
                Expr::bin(Op::Sub, Expr::int(0), x()),
                x(),
            ),
            &[-3, 0, 2],
        ),
        "neg" => unary("neg", Type::Int, Expr::bin(Op::Sub, Expr::int(0), x()), &[-2, 3]),
        "double" => unary("double", Type::Int, Expr::bin(Op::Mul, Expr::int(2), x()), &[1, -3]),
        "x_plus_one" => unary(
            "x_plus_one",
            Type::Int,
            Expr::bin(Op::Add, x(), Expr::int(1)),
            &[0, 4],
        ),
        "identity" => unary("identity", Type::Int, x(), &[3, -1]),
        "is_positive" => unary(
            "is_positive",
            Type::Bool,
            Expr::bin(Op::Gt, x(), Expr::int(0)),
            &[-1, 0, 2],
        ),
        "is_zero" => unary(
            "is_zero",
            Type::Bool,
            Expr::bin(Op::Eq, x(), Expr::int(0)),
            &[0, 3],
        ),
        "max" => binary(
            "max",
            Expr::ite(Expr::bin(Op::Gt, x(), y()), x(), y()),
            &[(1, 2), (3, -1), (0, 0)],
        ),
        "min" => binary(
            "min",
            Expr::ite(Expr::bin(Op::Lt, x(), y()), x(), y()),
            &[(1, 2), (3, -1), (0, 0)],
        ),
        _ => return None,
    };
    Some(spec)
}

/// Resolve a signature against the built-in specs, checking its types.
pub fn spec_from_signature(text: &str) -> BvpsResult<Spec> {
    let sig = parse_signature(text)?;
    let spec = canned_spec(&sig.name)
        .ok_or_else(|| BvpsError::Schema(format!("no built-in spec named {}", sig.name)))?;
    let declared: Vec<Type> = spec.inputs.iter().map(|(_, t)| *t).collect();
    if declared != sig.inputs || spec.output != sig.output {
        return Err(BvpsError::Schema(format!(
            "signature {text} does not match built-in spec {}",
            sig.name
        )));
    }
    Ok(spec)
}
