//! # eidolon-bvps
//!
//! Bounded verified program synthesis over a tiny Int/Bool expression
//! language.
//!
//! - [`types`]: values, expressions, programs, specs and macro templates
//! - [`interp`]: step-budgeted evaluator
//! - [`enumerate`]: deterministic candidate order
//! - [`cegis`]: example-guided search with oracle fuzzing
//! - [`macros`]: hygienic expansion, open metric, macro library
//! - [`cache`]: two-tier result cache
//! - [`library`]: built-in specs and signature parsing

#![deny(unsafe_code)]

pub mod cache;
pub mod cegis;
pub mod enumerate;
pub mod error;
pub mod interp;
pub mod library;
pub mod macros;
pub mod types;

pub use cache::{
    cache_key, cache_stats, reset_cache_stats, reset_memory_tiers, BvpsCache, CacheEntry,
    CacheSettings, CacheStats, CacheTier, CACHE_ARTIFACT_TYPE,
};
pub use cegis::{
    effective_seed, fill_examples, fuzz_counterexample, oracle_agrees, oracle_output,
    passes_examples, sample_inputs, synthesize, SynthesisStats,
};
pub use enumerate::{enumerate_programs, enumeration_index, Enumerator, ProgramStream};
pub use error::{BvpsError, BvpsResult, MacroError};
pub use interp::{bind_inputs, eval_expr, run_program, run_traced, TraceStep};
pub use library::{canned_spec, parse_signature, spec_from_signature, Signature, CANNED_SPECS};
pub use macros::{
    evaluate_open_metric, expand_expr, expand_program, macros_hash, program_hash,
    validate_macros, LanguagePatch, LoadedMacros, MacroLibrary, MacroSet, OpenMetric,
    PatchAdmission,
};
pub use types::{type_of, Bounds, Example, Expr, MacroTemplate, Op, Program, Spec, Type, Value};
