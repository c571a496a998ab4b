use eidolon_bvps::{canned_spec, Expr, Op, Program, Spec, Type};
use eidolon_codec::canonical_bytes_of;
use eidolon_skills::{
    admit, canary_token, compile_bundle, CompileRequest, Gate, SkillBundle, SkillError,
    SkillRegistry, BUNDLE_FILE, VERDICT_FILE,
};
use eidolon_store::{ArtifactStore, FlushMode};
use tempfile::TempDir;

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

fn compile(spec: &Spec) -> SkillBundle {
    compile_bundle(&CompileRequest {
        spec,
        program: &abs_program(),
        counterexamples: &[],
        required_lanes: vec!["translation".into(), "consequence".into()],
        seed: 0,
    })
    .unwrap()
}

#[test]
fn admitted_bundle_round_trips_through_the_registry() {
    let dir = TempDir::new().unwrap();
    let store =
        ArtifactStore::open(dir.path().join("artifact_store"), FlushMode::PerEpisode).unwrap();
    let spec = canned_spec("abs").unwrap();
    let bundle = compile(&spec);

    let admission = admit(&bundle, &store).unwrap();
    assert!(admission.verdict.admitted, "{:?}", admission.verdict.reasons);
    let gates: Vec<Gate> = admission.verdict.gates.iter().map(|g| g.gate).collect();
    assert_eq!(gates, vec![Gate::Regression, Gate::SealedLite, Gate::Canary]);
    assert_eq!(store.entries_of_type("skill_gate_canary").len(), 1);
    assert!(store.contains(&admission.bundle_ref.hash));

    let registry = SkillRegistry::new(dir.path());
    let skill_dir = registry.persist(&bundle, &admission.verdict).unwrap();
    assert!(skill_dir.join(BUNDLE_FILE).is_file());

    let verdict: serde_json::Value =
        serde_json::from_slice(&std::fs::read(skill_dir.join(VERDICT_FILE)).unwrap()).unwrap();
    for key in ["spec_hash", "bundle_hash", "name", "version"] {
        assert!(verdict.get(key).is_some(), "missing {key}");
    }
    assert_eq!(verdict["bundle_hash"], serde_json::json!(bundle.bundle_hash().unwrap()));

    let trusted = registry.lookup(&spec).unwrap().unwrap();
    assert_eq!(trusted.bundle, bundle);
    assert_eq!(registry.names().unwrap(), vec!["abs".to_string()]);
}

#[test]
fn canary_token_blocks_admission() {
    let dir = TempDir::new().unwrap();
    let store =
        ArtifactStore::open(dir.path().join("artifact_store"), FlushMode::PerEpisode).unwrap();
    let mut spec = canned_spec("abs").unwrap();
    spec.name = format!("abs-{}", canary_token("absmax"));
    let bundle = compile(&spec);

    let admission = admit(&bundle, &store).unwrap();
    assert!(!admission.verdict.admitted);
    let canary = admission
        .verdict
        .gates
        .iter()
        .find(|g| g.gate == Gate::Canary)
        .unwrap();
    assert!(!canary.passed);
    assert!(admission.verdict.gates.iter().filter(|g| g.gate != Gate::Canary).all(|g| g.passed));

    let registry = SkillRegistry::new(dir.path());
    match registry.persist(&bundle, &admission.verdict) {
        Err(SkillError::AdmissionReject { reasons, .. }) => {
            assert_eq!(reasons, vec!["canary gate failed".to_string()]);
        }
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[test]
fn lookup_ignores_tampered_bundles_and_other_specs() {
    let dir = TempDir::new().unwrap();
    let store =
        ArtifactStore::open(dir.path().join("artifact_store"), FlushMode::PerEpisode).unwrap();
    let spec = canned_spec("abs").unwrap();
    let bundle = compile(&spec);
    let admission = admit(&bundle, &store).unwrap();
    let registry = SkillRegistry::new(dir.path());
    let skill_dir = registry.persist(&bundle, &admission.verdict).unwrap();

    let mut changed = spec.clone();
    changed.bounds.int_max = 6;
    assert!(registry.lookup(&changed).unwrap().is_none());

    let mut tampered = bundle.clone();
    tampered.program.body = Expr::var("x");
    std::fs::write(skill_dir.join(BUNDLE_FILE), canonical_bytes_of(&tampered).unwrap()).unwrap();
    assert!(registry.lookup(&spec).unwrap().is_none());
}

#[test]
fn missing_registry_is_empty() {
    let dir = TempDir::new().unwrap();
    let registry = SkillRegistry::new(dir.path());
    assert!(registry.names().unwrap().is_empty());
    assert!(registry.lookup(&canned_spec("abs").unwrap()).unwrap().is_none());
}
