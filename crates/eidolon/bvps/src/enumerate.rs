//! Deterministic, depth-bounded program enumeration.
//!
//! Programs are produced depth by depth. Within a depth the order is fixed:
//!
//! * depth 0: eligible macro calls (by macro name), constants
//!   (`0, 1, 2, -1` / `true, false`), then variables of the type by name;
//! * depth `d > 0`, Int: if-then-else seed shapes that are exactly depth
//!   `d`, binary operators, then generic `if`;
//! * depth `d > 0`, Bool: comparisons over Int operands, then generic `if`.
//!
//! Binary nodes iterate child-depth pairs `(l, r)` with `max(l, r) = d - 1`
//! sorted by `(l + r, l < d - 1, r < d - 1, l, r)`, then operators, then
//! left operands, then right operands. Each stage drops repeats by
//! canonical JSON, first seen wins. Lower depths are memoized; the top
//! depth is streamed.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::error::BvpsResult;
use crate::macros::{expand_expr, MacroSet};
use crate::types::{Expr, Op, Program, Spec, Type};

type ExprStream = Box<dyn Iterator<Item = Expr>>;

const INT_CONSTS: [i64; 4] = [0, 1, 2, -1];
const BOOL_CONSTS: [bool; 2] = [true, false];

/// Depth-memoizing expression generator for one variable environment.
pub struct Enumerator {
    vars: Vec<(String, Type)>,
    macros: MacroSet,
    memo: HashMap<(Type, u32), Rc<Vec<Expr>>>,
}

impl Enumerator {
    pub fn new(inputs: &[(String, Type)], macros: &MacroSet) -> Self {
        let mut vars = inputs.to_vec();
        vars.sort_by(|a, b| a.0.cmp(&b.0));
        Self {
            vars,
            macros: macros.clone(),
            memo: HashMap::new(),
        }
    }

    fn vars_of(&self, ty: Type) -> impl Iterator<Item = &String> {
        self.vars
            .iter()
            .filter(move |(_, t)| *t == ty)
            .map(|(n, _)| n)
    }

    /// Expressions of type `ty` whose depth is exactly `depth`.
    pub fn exprs_at(&mut self, ty: Type, depth: u32) -> Rc<Vec<Expr>> {
        if let Some(found) = self.memo.get(&(ty, depth)) {
            return Rc::clone(found);
        }
        let built: Vec<Expr> = self.stage(ty, depth).collect();
        let built = Rc::new(built);
        self.memo.insert((ty, depth), Rc::clone(&built));
        built
    }

    /// Lazy, deduplicated stream of the exact-depth stage.
    pub fn stage(&mut self, ty: Type, depth: u32) -> ExprStream {
        let raw = if depth == 0 {
            Box::new(self.base(ty).into_iter()) as ExprStream
        } else {
            self.composite(ty, depth)
        };
        let mut seen = HashSet::new();
        Box::new(raw.filter(move |e| seen.insert(e.canonical_key())))
    }

    fn base(&self, ty: Type) -> Vec<Expr> {
        let mut out = Vec::new();
        for (name, template) in &self.macros {
            if template.return_type != ty {
                continue;
            }
            let eligible = template
                .params
                .iter()
                .zip(template.resolved_param_types())
                .all(|(p, pt)| self.vars.iter().any(|(n, t)| n == p && *t == pt));
            if eligible {
                let args = template.params.iter().map(|p| Expr::var(p.clone())).collect();
                out.push(Expr::call(name.clone(), args));
            }
        }
        match ty {
            Type::Int => out.extend(INT_CONSTS.iter().map(|v| Expr::int(*v))),
            Type::Bool => out.extend(BOOL_CONSTS.iter().map(|b| Expr::boolean(*b))),
        }
        out.extend(self.vars_of(ty).map(|n| Expr::var(n.clone())));
        out
    }

    fn composite(&mut self, ty: Type, depth: u32) -> ExprStream {
        let below = depth - 1;

        // Binary operators always take Int operands.
        let mut pairs: Vec<(u32, u32)> = (0..=below)
            .flat_map(|l| (0..=below).map(move |r| (l, r)))
            .filter(|(l, r)| (*l).max(*r) == below)
            .collect();
        pairs.sort_by_key(|&(l, r)| (l + r, l < below, r < below, l, r));
        let operand_lists: Vec<(Rc<Vec<Expr>>, Rc<Vec<Expr>>)> = pairs
            .iter()
            .map(|&(l, r)| (self.exprs_at(Type::Int, l), self.exprs_at(Type::Int, r)))
            .collect();
        let ops: &'static [Op] = match ty {
            Type::Int => &Op::INT_OPS,
            Type::Bool => &Op::BOOL_OPS,
        };
        let binops = binop_stream(ops, operand_lists);

        let conds = self.cond_pool(below);
        let branches = self.branch_pool(ty, below);
        let ifs = if_stream(conds, branches, below);

        match ty {
            Type::Int => {
                let seeds: Vec<Expr> = self
                    .seed_set()
                    .into_iter()
                    .filter(|e| e.depth() == depth)
                    .collect();
                Box::new(seeds.into_iter().chain(binops).chain(ifs))
            }
            Type::Bool => Box::new(binops.chain(ifs)),
        }
    }

    /// Bool expressions of depth `<= max_depth`, `BinOp`-rooted ones only
    /// when there are any, stably ordered by operand pattern.
    fn cond_pool(&mut self, max_depth: u32) -> Rc<Vec<(Expr, u32)>> {
        let mut all = Vec::new();
        for d in 0..=max_depth {
            all.extend(self.exprs_at(Type::Bool, d).iter().cloned().map(|e| (e, d)));
        }
        if all.iter().any(|(e, _)| e.is_bin_op()) {
            all.retain(|(e, _)| e.is_bin_op());
        }
        all.sort_by_key(|(e, _)| condition_sort_key(e));
        Rc::new(all)
    }

    /// Branch candidates of depth `<= max_depth`, without `If` roots when
    /// any alternative exists.
    fn branch_pool(&mut self, ty: Type, max_depth: u32) -> Rc<Vec<(Expr, u32)>> {
        let mut all = Vec::new();
        for d in 0..=max_depth {
            all.extend(self.exprs_at(ty, d).iter().cloned().map(|e| (e, d)));
        }
        if all.iter().any(|(e, _)| !e.is_if()) {
            all.retain(|(e, _)| !e.is_if());
        }
        Rc::new(all)
    }

    /// Canonical if-then-else shapes over the Int variables.
    fn seed_set(&self) -> Vec<Expr> {
        let int_vars: Vec<&String> = self.vars_of(Type::Int).collect();
        let mut conds: Vec<(Expr, Vec<&String>, i64)> = Vec::new();
        for shape in SeedShape::ALL {
            for x in &int_vars {
                match shape.constant() {
                    Some(c) => conds.push((shape.build(x, None), vec![*x], c)),
                    None => {
                        for y in int_vars.iter().filter(|y| *y != x) {
                            conds.push((shape.build(x, Some(y.as_str())), vec![*x, *y], 0));
                        }
                    }
                }
            }
        }

        let mut out = Vec::new();
        for (cond, vars, c) in conds {
            let mut pool: Vec<Expr> = vars.iter().map(|v| Expr::var((*v).clone())).collect();
            pool.push(Expr::int(0));
            pool.push(Expr::int(1));
            for v in &vars {
                pool.push(Expr::bin(Op::Sub, Expr::int(c), Expr::var((*v).clone())));
                pool.push(Expr::bin(Op::Sub, Expr::var((*v).clone()), Expr::int(c)));
            }
            for then_branch in &pool {
                for else_branch in &pool {
                    if then_branch != else_branch {
                        out.push(Expr::ite(
                            cond.clone(),
                            then_branch.clone(),
                            else_branch.clone(),
                        ));
                    }
                }
            }
        }
        out
    }
}

#[derive(Clone, Copy)]
enum SeedShape {
    LtZero,
    GtZero,
    LtOne,
    GtOne,
    GtVar,
    LtVar,
}

impl SeedShape {
    const ALL: [SeedShape; 6] = [
        SeedShape::LtZero,
        SeedShape::GtZero,
        SeedShape::LtOne,
        SeedShape::GtOne,
        SeedShape::GtVar,
        SeedShape::LtVar,
    ];

    fn constant(self) -> Option<i64> {
        match self {
            SeedShape::LtZero | SeedShape::GtZero => Some(0),
            SeedShape::LtOne | SeedShape::GtOne => Some(1),
            SeedShape::GtVar | SeedShape::LtVar => None,
        }
    }

    fn build(self, x: &str, y: Option<&str>) -> Expr {
        let rhs = match (self.constant(), y) {
            (Some(c), _) => Expr::int(c),
            (None, Some(y)) => Expr::var(y),
            (None, None) => Expr::int(0),
        };
        let op = match self {
            SeedShape::LtZero | SeedShape::LtOne | SeedShape::LtVar => Op::Lt,
            SeedShape::GtZero | SeedShape::GtOne | SeedShape::GtVar => Op::Gt,
        };
        Expr::bin(op, Expr::var(x), rhs)
    }
}

/// `(var,const) < (var,var) < (const,var) < (const,const) < other`.
fn condition_sort_key(expr: &Expr) -> u8 {
    match expr {
        Expr::BinOp { left, right, .. } => match (left.as_ref(), right.as_ref()) {
            (Expr::Var { .. }, Expr::IntConst { .. }) => 0,
            (Expr::Var { .. }, Expr::Var { .. }) => 1,
            (Expr::IntConst { .. }, Expr::Var { .. }) => 2,
            (Expr::IntConst { .. }, Expr::IntConst { .. }) => 3,
            _ => 4,
        },
        _ => 4,
    }
}

fn binop_stream(
    ops: &'static [Op],
    operand_lists: Vec<(Rc<Vec<Expr>>, Rc<Vec<Expr>>)>,
) -> ExprStream {
    Box::new(operand_lists.into_iter().flat_map(move |(lefts, rights)| {
        ops.iter().copied().flat_map(move |op| {
            let lefts = Rc::clone(&lefts);
            let rights = Rc::clone(&rights);
            (0..lefts.len()).flat_map(move |i| {
                let left = lefts[i].clone();
                let rights = Rc::clone(&rights);
                (0..rights.len()).map(move |j| Expr::bin(op, left.clone(), rights[j].clone()))
            })
        })
    }))
}

fn if_stream(
    conds: Rc<Vec<(Expr, u32)>>,
    branches: Rc<Vec<(Expr, u32)>>,
    child_depth: u32,
) -> ExprStream {
    Box::new((0..conds.len()).flat_map(move |c| {
        let conds = Rc::clone(&conds);
        let branches = Rc::clone(&branches);
        (0..branches.len()).flat_map(move |t| {
            let conds = Rc::clone(&conds);
            let branches = Rc::clone(&branches);
            (0..branches.len()).filter_map(move |e| {
                if t == e {
                    return None;
                }
                let (cond, cd) = &conds[c];
                let (then_branch, td) = &branches[t];
                let (else_branch, ed) = &branches[e];
                if (*cd).max(*td).max(*ed) != child_depth {
                    return None;
                }
                Some(Expr::ite(
                    cond.clone(),
                    then_branch.clone(),
                    else_branch.clone(),
                ))
            })
        })
    }))
}

/// Stream of candidate programs for a spec, depth `0..=max_depth`.
pub struct ProgramStream {
    enumerator: Enumerator,
    params: Vec<(String, Type)>,
    output: Type,
    max_depth: u32,
    depth: u32,
    current: Option<ExprStream>,
}

impl ProgramStream {
    /// Depth of the most recently yielded program.
    pub fn current_depth(&self) -> u32 {
        self.depth
    }
}

impl Iterator for ProgramStream {
    type Item = Program;

    fn next(&mut self) -> Option<Program> {
        loop {
            if self.current.is_none() {
                if self.depth > self.max_depth {
                    return None;
                }
                self.current = Some(self.enumerator.stage(self.output, self.depth));
            }
            if let Some(stream) = self.current.as_mut() {
                if let Some(body) = stream.next() {
                    return Some(Program::new(self.params.clone(), body, self.output));
                }
            }
            self.current = None;
            self.depth += 1;
        }
    }
}

/// All candidate programs for `spec` in the enumeration order.
pub fn enumerate_programs(spec: &Spec, macros: &MacroSet) -> ProgramStream {
    ProgramStream {
        enumerator: Enumerator::new(&spec.inputs, macros),
        params: spec.inputs.clone(),
        output: spec.output,
        max_depth: spec.bounds.max_depth,
        depth: 0,
        current: None,
    }
}

/// Index of the first candidate whose macro-expanded body equals the
/// expanded body of `target`, looking at no more than `limit` candidates.
pub fn enumeration_index(
    spec: &Spec,
    macros: &MacroSet,
    target: &Program,
    limit: usize,
) -> BvpsResult<Option<usize>> {
    let wanted = expand_expr(&target.body, &target.params, macros)?;
    for (index, candidate) in enumerate_programs(spec, macros).take(limit).enumerate() {
        let expanded = expand_expr(&candidate.body, &candidate.params, macros)?;
        if expanded == wanted {
            return Ok(Some(index));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Bounds, Example, MacroTemplate};

    fn spec(inputs: &[(&str, Type)], output: Type) -> Spec {
        Spec {
            name: "t".into(),
            inputs: inputs.iter().map(|(n, t)| (n.to_string(), *t)).collect(),
            output,
            examples: Vec::<Example>::new(),
            bounds: Bounds::default(),
            oracle: None,
        }
    }

    #[test]
    fn depth_zero_order() {
        let s = spec(&[("y", Type::Int), ("x", Type::Int), ("b", Type::Bool)], Type::Int);
        let got: Vec<Expr> = enumerate_programs(&s, &MacroSet::new())
            .take(6)
            .map(|p| p.body)
            .collect();
        assert_eq!(
            got,
            vec![
                Expr::int(0),
                Expr::int(1),
                Expr::int(2),
                Expr::int(-1),
                Expr::var("x"),
                Expr::var("y"),
            ]
        );
    }

    #[test]
    fn depth_one_starts_with_sub_over_constants() {
        let s = spec(&[("x", Type::Int)], Type::Int);
        let got: Vec<Expr> = enumerate_programs(&s, &MacroSet::new())
            .skip(5)
            .take(2)
            .map(|p| p.body)
            .collect();
        assert_eq!(got[0], Expr::bin(Op::Sub, Expr::int(0), Expr::int(0)));
        assert_eq!(got[1], Expr::bin(Op::Sub, Expr::int(0), Expr::int(1)));
    }

    #[test]
    fn pair_order_for_depth_two() {
        let below = 1u32;
        let mut pairs: Vec<(u32, u32)> = (0..=below)
            .flat_map(|l| (0..=below).map(move |r| (l, r)))
            .filter(|(l, r)| (*l).max(*r) == below)
            .collect();
        pairs.sort_by_key(|&(l, r)| (l + r, l < below, r < below, l, r));
        assert_eq!(pairs, vec![(1, 0), (0, 1), (1, 1)]);
    }

    #[test]
    fn macro_calls_come_first() {
        let mut macros = MacroSet::new();
        macros.insert(
            "twice".into(),
            MacroTemplate {
                params: vec!["x".into()],
                param_types: None,
                return_type: Type::Int,
                body: Expr::bin(Op::Add, Expr::var("x"), Expr::var("x")),
            },
        );
        macros.insert(
            "needs_y".into(),
            MacroTemplate {
                params: vec!["y".into()],
                param_types: None,
                return_type: Type::Int,
                body: Expr::var("y"),
            },
        );
        let s = spec(&[("x", Type::Int)], Type::Int);
        let first = enumerate_programs(&s, &macros).next().unwrap();
        assert_eq!(first.body, Expr::call("twice", vec![Expr::var("x")]));
        let base: Vec<Expr> = enumerate_programs(&s, &macros).take(6).map(|p| p.body).collect();
        assert!(!base.contains(&Expr::call("needs_y", vec![Expr::var("y")])));
    }

    #[test]
    fn stages_are_deduplicated() {
        let s = spec(&[("x", Type::Int)], Type::Int);
        let mut seen = HashSet::new();
        for program in enumerate_programs(&s, &MacroSet::new()).take(3000) {
            assert!(seen.insert(program.body.canonical_key()));
        }
    }

    #[test]
    fn abs_shape_is_a_seed() {
        let s = spec(&[("x", Type::Int)], Type::Int);
        let target = Program::new(
            s.inputs.clone(),
            Expr::ite(
                Expr::bin(Op::Lt, Expr::var("x"), Expr::int(0)),
                Expr::bin(Op::Sub, Expr::int(0), Expr::var("x")),
                Expr::var("x"),
            ),
            Type::Int,
        );
        // 5 leaves, 100 binops and 40 ifs precede depth 2
        let idx = enumeration_index(&s, &MacroSet::new(), &target, 1000).unwrap();
        assert_eq!(idx, Some(157));
    }

    #[test]
    fn bool_conditions_prefer_var_const() {
        let s = spec(&[("x", Type::Int)], Type::Bool);
        let mut e = Enumerator::new(&s.inputs, &MacroSet::new());
        let pool = e.cond_pool(1);
        assert!(pool.iter().all(|(c, _)| c.is_bin_op()));
        assert_eq!(condition_sort_key(&pool[0].0), 0);
        assert_eq!(pool[0].0, Expr::bin(Op::Eq, Expr::var("x"), Expr::int(0)));
    }
}
