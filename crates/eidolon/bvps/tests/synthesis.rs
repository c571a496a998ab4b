//! End-to-end behavior of enumeration, CEGIS and macros.

use eidolon_bvps::{
    canned_spec, enumerate_programs, evaluate_open_metric, fuzz_counterexample, passes_examples,
    run_program, synthesize, Example, Expr, MacroLibrary, MacroSet, MacroTemplate, Op, Program,
    Type, Value, CANNED_SPECS,
};
use eidolon_codec::canonical_bytes_of;
use proptest::prelude::*;

fn abs_body() -> Expr {
    Expr::ite(
        Expr::bin(Op::Lt, Expr::var("x"), Expr::int(0)),
        Expr::bin(Op::Sub, Expr::int(0), Expr::var("x")),
        Expr::var("x"),
    )
}

#[test]
fn enumeration_bytes_are_stable_across_runs() {
    let spec = canned_spec("max").unwrap();
    let run = || -> Vec<Vec<u8>> {
        enumerate_programs(&spec, &MacroSet::new())
            .take(600)
            .map(|p| canonical_bytes_of(&p).unwrap())
            .collect()
    };
    assert_eq!(run(), run());
}

#[test]
fn abs_synthesizes_the_seed_shape() {
    let spec = canned_spec("abs").unwrap();
    let (program, stats) = synthesize(&spec, &MacroSet::new(), Some(0)).unwrap();
    assert_eq!(program.body, abs_body());
    assert_eq!(stats.depth, 2);
    assert_eq!(stats.candidates_tried, 158);
}

#[test]
fn max_synthesizes_a_conditional() {
    let spec = canned_spec("max").unwrap();
    let (program, _) = synthesize(&spec, &MacroSet::new(), None).unwrap();
    assert_eq!(
        program.body,
        Expr::ite(
            Expr::bin(Op::Gt, Expr::var("x"), Expr::var("y")),
            Expr::var("x"),
            Expr::var("y"),
        )
    );
}

#[test]
fn every_canned_spec_is_solvable_and_sound() {
    for name in CANNED_SPECS {
        let spec = canned_spec(name).unwrap();
        let (program, stats) = synthesize(&spec, &MacroSet::new(), Some(11)).unwrap();
        let examples = eidolon_bvps::fill_examples(&spec).unwrap();
        assert!(passes_examples(&program, &examples, spec.bounds.step_budget), "{name}");
        assert_eq!(
            fuzz_counterexample(&program, &spec, stats.seed, spec.bounds.fuzz_trials).unwrap(),
            None,
            "{name}"
        );
    }
}

#[test]
fn counterexample_refines_underspecified_examples() {
    let mut spec = canned_spec("x_plus_one").unwrap();
    spec.examples = vec![
        Example::new([("x".to_string(), Value::Int(0))], Some(Value::Int(0))),
        Example::new([("x".to_string(), Value::Int(1))], Some(Value::Int(1))),
    ];
    let (program, stats) = synthesize(&spec, &MacroSet::new(), None).unwrap();
    assert_eq!(program.body, Expr::var("x"));
    assert_eq!(stats.fuzz_trials, 0);

    let cex = fuzz_counterexample(&program, &spec, 0, 20).unwrap().unwrap();
    let x = cex.inputs["x"].as_int().unwrap();
    assert_eq!(cex.output, Some(Value::Int(x + 1)));

    spec.examples = vec![
        Example::new([("x".to_string(), Value::Int(0))], Some(Value::Int(1))),
        Example::new([("x".to_string(), Value::Int(1))], Some(Value::Int(2))),
        cex,
    ];
    let (repaired, _) = synthesize(&spec, &MacroSet::new(), None).unwrap();
    assert_eq!(repaired.body, Expr::bin(Op::Sub, Expr::var("x"), Expr::int(-1)));
}

#[test]
fn open_metric_rewards_a_useful_macro() {
    let spec = canned_spec("abs").unwrap();
    let mut macros = MacroSet::new();
    macros.insert(
        "absval".into(),
        MacroTemplate {
            params: vec!["x".into()],
            param_types: Some(vec![Type::Int]),
            return_type: Type::Int,
            body: abs_body(),
        },
    );
    let target = Program::new(spec.inputs.clone(), abs_body(), Type::Int);
    let metric = evaluate_open_metric(&spec, &macros, &target).unwrap();
    assert!(metric.passed);
    assert_eq!(metric.patched, 0);
    assert_eq!(metric.baseline, 157);

    let dir = tempfile::TempDir::new().unwrap();
    let library = MacroLibrary::new(dir.path());
    let admission = library.admit_patch(&spec, &macros, &target).unwrap();
    assert!(admission.admitted);
    let loaded = library.load_for_spec("abs").unwrap();
    assert_eq!(loaded.patch_ids, vec![admission.patch_id.clone()]);
    assert!(loaded.macros.contains_key("absval"));

    // with the macro available, synthesis finds the call first
    let (program, stats) = synthesize(&spec, &loaded.macros, None).unwrap();
    assert_eq!(program.body, abs_body());
    assert_eq!(stats.candidates_tried, 1);
}

#[test]
fn useless_macro_fails_open_metric() {
    let spec = canned_spec("abs").unwrap();
    let mut macros = MacroSet::new();
    macros.insert(
        "zero".into(),
        MacroTemplate {
            params: vec![],
            param_types: None,
            return_type: Type::Int,
            body: Expr::int(0),
        },
    );
    let target = Program::new(spec.inputs.clone(), abs_body(), Type::Int);
    let metric = evaluate_open_metric(&spec, &macros, &target).unwrap();
    assert!(!metric.passed);

    let dir = tempfile::TempDir::new().unwrap();
    let library = MacroLibrary::new(dir.path());
    assert!(!library.admit_patch(&spec, &macros, &target).unwrap().admitted);
    assert!(library.load_for_spec("abs").unwrap().patch_ids.is_empty());
}

fn arb_expr() -> impl Strategy<Value = Expr> {
    let leaf = prop_oneof![
        (-3i64..4).prop_map(Expr::int),
        Just(Expr::var("x")),
        Just(Expr::var("y")),
    ];
    leaf.prop_recursive(5, 64, 3, |inner| {
        prop_oneof![
            (
                prop_oneof![Just(Op::Add), Just(Op::Sub), Just(Op::Mul), Just(Op::Mod)],
                inner.clone(),
                inner.clone()
            )
                .prop_map(|(op, l, r)| Expr::bin(op, l, r)),
            (inner.clone(), inner.clone(), inner.clone(), inner).prop_map(|(a, b, t, e)| {
                Expr::ite(Expr::bin(Op::Lt, a, b), t, e)
            }),
        ]
    })
}

proptest! {
    #[test]
    fn interpreter_respects_step_budget(
        body in arb_expr(),
        x in -50i64..50,
        y in -50i64..50,
        budget in 1u64..40,
    ) {
        let program = Program::new(
            vec![("x".into(), Type::Int), ("y".into(), Type::Int)],
            body,
            Type::Int,
        );
        let inputs = [("x".to_string(), Value::Int(x)), ("y".to_string(), Value::Int(y))]
            .into_iter()
            .collect();
        match eidolon_bvps::run_traced(&program, &inputs, budget) {
            Ok((_, trace)) => prop_assert!(trace.len() as u64 <= budget),
            Err(eidolon_bvps::BvpsError::StepBudgetExceeded { budget: b }) => {
                prop_assert_eq!(b, budget)
            }
            Err(eidolon_bvps::BvpsError::Arith(_)) => {}
            Err(other) => prop_assert!(false, "unexpected error {other}"),
        }
        let _ = run_program(&program, &inputs, budget);
    }
}
