//! Macro templates: hygienic expansion, hashing, the open metric and the
//! on-disk library of admitted language patches.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use eidolon_codec::{canonical_bytes_of, sha256_canonical_of, CodecResult};

use crate::enumerate::enumeration_index;
use crate::error::{BvpsError, BvpsResult, MacroError};
use crate::types::{type_of, Expr, MacroTemplate, Program, Spec, Type};

/// Macros by name. Iteration order (by name) is part of the enumeration order.
pub type MacroSet = BTreeMap<String, MacroTemplate>;

/// Replace every `Var` named in `bindings` in one pass. Argument
/// expressions are never revisited, so their variables cannot be captured.
fn substitute(body: &Expr, bindings: &HashMap<&str, &Expr>) -> Expr {
    match body {
        Expr::Var { name } => match bindings.get(name.as_str()) {
            Some(arg) => (*arg).clone(),
            None => body.clone(),
        },
        Expr::BinOp { op, left, right } => {
            Expr::bin(*op, substitute(left, bindings), substitute(right, bindings))
        }
        Expr::If {
            cond,
            then_branch,
            else_branch,
        } => Expr::ite(
            substitute(cond, bindings),
            substitute(then_branch, bindings),
            substitute(else_branch, bindings),
        ),
        Expr::MacroCall { name, args } => Expr::call(
            name.clone(),
            args.iter().map(|a| substitute(a, bindings)).collect(),
        ),
        Expr::IntConst { .. } | Expr::BoolConst { .. } => body.clone(),
    }
}

fn template_env(name: &str, template: &MacroTemplate) -> Result<Vec<(String, Type)>, MacroError> {
    if let Some(types) = &template.param_types {
        if types.len() != template.params.len() {
            return Err(MacroError::ParamTypes {
                name: name.to_string(),
                params: template.params.len(),
                types: types.len(),
            });
        }
    }
    Ok(template
        .params
        .iter()
        .cloned()
        .zip(template.resolved_param_types())
        .collect())
}

fn expand_in(
    expr: &Expr,
    env: &[(String, Type)],
    macros: &MacroSet,
    stack: &mut Vec<String>,
) -> BvpsResult<Expr> {
    match expr {
        Expr::MacroCall { name, args } => {
            let template = macros
                .get(name)
                .ok_or_else(|| MacroError::Unknown(name.clone()))?;
            if stack.iter().any(|s| s == name) {
                let mut path = stack.clone();
                path.push(name.clone());
                return Err(MacroError::Cycle(path).into());
            }
            if template.params.len() != args.len() {
                return Err(MacroError::Arity {
                    name: name.clone(),
                    expected: template.params.len(),
                    found: args.len(),
                }
                .into());
            }
            let macro_env = template_env(name, template)?;
            for var in template.body.free_vars() {
                if !template.params.contains(&var) {
                    return Err(MacroError::FreeVariable {
                        name: name.clone(),
                        var,
                    }
                    .into());
                }
            }

            let mut expanded_args = Vec::with_capacity(args.len());
            for (index, (arg, (_, expected))) in args.iter().zip(&macro_env).enumerate() {
                let found = type_of(arg, env, macros)?;
                if found != *expected {
                    return Err(MacroError::TypeMismatch {
                        name: name.clone(),
                        index,
                        expected: *expected,
                        found,
                    }
                    .into());
                }
                expanded_args.push(expand_in(arg, env, macros, stack)?);
            }

            stack.push(name.clone());
            let body = expand_in(&template.body, &macro_env, macros, stack);
            stack.pop();
            let body = body?;

            let bindings: HashMap<&str, &Expr> = template
                .params
                .iter()
                .map(String::as_str)
                .zip(expanded_args.iter())
                .collect();
            Ok(substitute(&body, &bindings))
        }
        Expr::BinOp { op, left, right } => Ok(Expr::bin(
            *op,
            expand_in(left, env, macros, stack)?,
            expand_in(right, env, macros, stack)?,
        )),
        Expr::If {
            cond,
            then_branch,
            else_branch,
        } => Ok(Expr::ite(
            expand_in(cond, env, macros, stack)?,
            expand_in(then_branch, env, macros, stack)?,
            expand_in(else_branch, env, macros, stack)?,
        )),
        Expr::IntConst { .. } | Expr::BoolConst { .. } | Expr::Var { .. } => Ok(expr.clone()),
    }
}

/// Expand every macro call in `expr`, typing arguments under `env`.
pub fn expand_expr(expr: &Expr, env: &[(String, Type)], macros: &MacroSet) -> BvpsResult<Expr> {
    if !expr.contains_macro_call() {
        return Ok(expr.clone());
    }
    expand_in(expr, env, macros, &mut Vec::new())
}

/// Fully expand a program. The result contains no `MacroCall` nodes.
pub fn expand_program(program: &Program, macros: &MacroSet) -> BvpsResult<Program> {
    let body = expand_expr(&program.body, &program.params, macros)?;
    Ok(Program::new(program.params.clone(), body, program.return_type))
}

/// Check every template in isolation: parameter types, free variables,
/// body type against the declared return type, and cycles.
pub fn validate_macros(macros: &MacroSet) -> BvpsResult<()> {
    for (name, template) in macros {
        let env = template_env(name, template)?;
        for var in template.body.free_vars() {
            if !template.params.contains(&var) {
                return Err(MacroError::FreeVariable {
                    name: name.clone(),
                    var,
                }
                .into());
            }
        }
        let wrapped = Expr::call(
            name.clone(),
            template.params.iter().map(|p| Expr::var(p.clone())).collect(),
        );
        expand_expr(&wrapped, &env, macros)?;
        let found = type_of(&template.body, &env, macros)?;
        if found != template.return_type {
            return Err(MacroError::ReturnType {
                name: name.clone(),
                declared: template.return_type,
                found,
            }
            .into());
        }
    }
    Ok(())
}

/// `sha256_canonical` of the program JSON.
pub fn program_hash(program: &Program) -> CodecResult<String> {
    program.hash()
}

/// `sha256_canonical` of the macro set (an object keyed by name).
pub fn macros_hash(macros: &MacroSet) -> CodecResult<String> {
    sha256_canonical_of(macros)
}

/// Enumeration cost of a target with and without a macro set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenMetric {
    /// Index without macros; `max_programs` when not reached.
    pub baseline: usize,
    /// Index with the macro set; `max_programs` when not reached.
    pub patched: usize,
    pub baseline_found: bool,
    pub patched_found: bool,
    pub passed: bool,
}

/// Compare the enumeration index of `target` with and without `macros`.
/// Passes iff the patched index is strictly smaller.
pub fn evaluate_open_metric(
    spec: &Spec,
    macros: &MacroSet,
    target: &Program,
) -> BvpsResult<OpenMetric> {
    let limit = spec.bounds.max_programs;
    let expanded_target = expand_program(target, macros)?;
    let baseline_idx = enumeration_index(spec, &MacroSet::new(), &expanded_target, limit)?;
    let patched_idx = enumeration_index(spec, macros, &expanded_target, limit)?;
    let baseline = baseline_idx.unwrap_or(limit);
    let patched = patched_idx.unwrap_or(limit);
    let metric = OpenMetric {
        baseline,
        patched,
        baseline_found: baseline_idx.is_some(),
        patched_found: patched_idx.is_some(),
        passed: patched < baseline,
    };
    debug!(spec = %spec.name, baseline, patched, passed = metric.passed, "Open metric");
    Ok(metric)
}

/// A macro set admitted for one spec name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguagePatch {
    pub patch_id: String,
    pub macros: MacroSet,
    pub metric: OpenMetric,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LibraryFile {
    spec_name: String,
    #[serde(default)]
    patches: Vec<LanguagePatch>,
}

/// Macros active for a spec together with the patches they came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadedMacros {
    pub macros: MacroSet,
    pub patch_ids: Vec<String>,
}

/// Result of [`MacroLibrary::admit_patch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchAdmission {
    pub patch_id: String,
    pub metric: OpenMetric,
    pub admitted: bool,
}

/// Language patches stored as `<root>/macros/<spec_name>.json`.
#[derive(Debug, Clone)]
pub struct MacroLibrary {
    dir: PathBuf,
}

impl MacroLibrary {
    pub fn new(root: &Path) -> Self {
        Self {
            dir: root.join("macros"),
        }
    }

    pub fn path_for(&self, spec_name: &str) -> PathBuf {
        let safe: String = spec_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }

    fn read(&self, spec_name: &str) -> BvpsResult<LibraryFile> {
        let path = self.path_for(spec_name);
        if !path.exists() {
            return Ok(LibraryFile {
                spec_name: spec_name.to_string(),
                patches: Vec::new(),
            });
        }
        let bytes = std::fs::read(&path)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| BvpsError::Schema(format!("{}: {e}", path.display())))
    }

    /// Union of all admitted patches for `spec_name`. Earlier patches win
    /// on name clashes.
    pub fn load_for_spec(&self, spec_name: &str) -> BvpsResult<LoadedMacros> {
        let file = self.read(spec_name)?;
        let mut loaded = LoadedMacros::default();
        for patch in file.patches {
            for (name, template) in patch.macros {
                loaded.macros.entry(name).or_insert(template);
            }
            loaded.patch_ids.push(patch.patch_id);
        }
        Ok(loaded)
    }

    /// Evaluate the open metric and persist the patch only when it passes.
    pub fn admit_patch(
        &self,
        spec: &Spec,
        macros: &MacroSet,
        target: &Program,
    ) -> BvpsResult<PatchAdmission> {
        validate_macros(macros)?;
        let metric = evaluate_open_metric(spec, macros, target)?;
        let hash = macros_hash(macros)?;
        let patch_id = format!("lp-{}", hash.get(..12).unwrap_or(&hash));
        if !metric.passed {
            return Ok(PatchAdmission {
                patch_id,
                metric,
                admitted: false,
            });
        }

        let mut file = self.read(&spec.name)?;
        if !file.patches.iter().any(|p| p.patch_id == patch_id) {
            file.spec_name = spec.name.clone();
            file.patches.push(LanguagePatch {
                patch_id: patch_id.clone(),
                macros: macros.clone(),
                metric: metric.clone(),
            });
            std::fs::create_dir_all(&self.dir)?;
            std::fs::write(self.path_for(&spec.name), canonical_bytes_of(&file)?)?;
            info!(spec = %spec.name, patch_id = %patch_id, "Admitted language patch");
        }
        Ok(PatchAdmission {
            patch_id,
            metric,
            admitted: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Op;

    fn template(params: &[&str], body: Expr) -> MacroTemplate {
        MacroTemplate {
            params: params.iter().map(|p| p.to_string()).collect(),
            param_types: None,
            return_type: Type::Int,
            body,
        }
    }

    fn set(entries: Vec<(&str, MacroTemplate)>) -> MacroSet {
        entries.into_iter().map(|(n, t)| (n.to_string(), t)).collect()
    }

    #[test]
    fn substitution_is_simultaneous() {
        // swap(a, b) = a - b, called as swap(b, a)
        let macros = set(vec![(
            "swap",
            template(&["a", "b"], Expr::bin(Op::Sub, Expr::var("a"), Expr::var("b"))),
        )]);
        let env = vec![("a".to_string(), Type::Int), ("b".to_string(), Type::Int)];
        let call = Expr::call("swap", vec![Expr::var("b"), Expr::var("a")]);
        let expanded = expand_expr(&call, &env, &macros).unwrap();
        assert_eq!(expanded, Expr::bin(Op::Sub, Expr::var("b"), Expr::var("a")));
    }

    #[test]
    fn nested_macros_expand_to_fixed_point() {
        let macros = set(vec![
            ("inc", template(&["n"], Expr::bin(Op::Add, Expr::var("n"), Expr::int(1)))),
            (
                "inc2",
                template(&["n"], Expr::call("inc", vec![Expr::call("inc", vec![Expr::var("n")])])),
            ),
        ]);
        let p = Program::new(
            vec![("x".into(), Type::Int)],
            Expr::call("inc2", vec![Expr::var("x")]),
            Type::Int,
        );
        let expanded = expand_program(&p, &macros).unwrap();
        assert!(!expanded.body.contains_macro_call());
        assert_eq!(
            expanded.body,
            Expr::bin(
                Op::Add,
                Expr::bin(Op::Add, Expr::var("x"), Expr::int(1)),
                Expr::int(1)
            )
        );
    }

    #[test]
    fn cycles_are_rejected() {
        let macros = set(vec![
            ("f", template(&["n"], Expr::call("g", vec![Expr::var("n")]))),
            ("g", template(&["n"], Expr::call("f", vec![Expr::var("n")]))),
        ]);
        let env = vec![("x".to_string(), Type::Int)];
        let err = expand_expr(&Expr::call("f", vec![Expr::var("x")]), &env, &macros).unwrap_err();
        assert!(matches!(err, BvpsError::Macro(MacroError::Cycle(ref p)) if p == &["f", "g", "f"]));
        assert!(validate_macros(&macros).is_err());
    }

    #[test]
    fn arity_type_and_free_variable_errors() {
        let macros = set(vec![
            ("one", template(&["n"], Expr::var("n"))),
            ("leaky", template(&["n"], Expr::var("z"))),
        ]);
        let env = vec![("x".to_string(), Type::Int), ("b".to_string(), Type::Bool)];

        let arity = expand_expr(&Expr::call("one", vec![]), &env, &macros).unwrap_err();
        assert!(matches!(arity, BvpsError::Macro(MacroError::Arity { expected: 1, found: 0, .. })));

        let mismatch =
            expand_expr(&Expr::call("one", vec![Expr::var("b")]), &env, &macros).unwrap_err();
        assert!(matches!(mismatch, BvpsError::Macro(MacroError::TypeMismatch { .. })));

        let free =
            expand_expr(&Expr::call("leaky", vec![Expr::var("x")]), &env, &macros).unwrap_err();
        assert!(matches!(free, BvpsError::Macro(MacroError::FreeVariable { .. })));

        let unknown = expand_expr(&Expr::call("ghost", vec![]), &env, &macros).unwrap_err();
        assert!(matches!(unknown, BvpsError::Macro(MacroError::Unknown(_))));
    }

    #[test]
    fn macros_hash_is_order_independent() {
        let a = set(vec![
            ("p", template(&["n"], Expr::var("n"))),
            ("q", template(&["n"], Expr::int(0))),
        ]);
        let b = set(vec![
            ("q", template(&["n"], Expr::int(0))),
            ("p", template(&["n"], Expr::var("n"))),
        ]);
        assert_eq!(macros_hash(&a).unwrap(), macros_hash(&b).unwrap());
        assert_ne!(macros_hash(&a).unwrap(), macros_hash(&MacroSet::new()).unwrap());
    }
}
