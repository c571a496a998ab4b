use eidolon_codec::CodecError;
use eidolon_store::StoreError;
use thiserror::Error;

use crate::types::Type;

/// Errors raised while expanding macro calls.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MacroError {
    #[error("unknown macro: {0}")]
    Unknown(String),

    #[error("macro {name} expects {expected} arguments, got {found}")]
    Arity {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("macro {name} argument {index} expects {expected}, got {found}")]
    TypeMismatch {
        name: String,
        index: usize,
        expected: Type,
        found: Type,
    },

    #[error("macro {name} declares {params} params but {types} param types")]
    ParamTypes {
        name: String,
        params: usize,
        types: usize,
    },

    #[error("macro {name} body references free variable {var}")]
    FreeVariable { name: String, var: String },

    #[error("macro {name} body has type {found}, declared {declared}")]
    ReturnType {
        name: String,
        declared: Type,
        found: Type,
    },

    #[error("macro cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
}

/// Errors from synthesis, interpretation and caching.
#[derive(Debug, Error)]
pub enum BvpsError {
    #[error("step budget of {budget} exceeded")]
    StepBudgetExceeded { budget: u64 },

    #[error("arithmetic error: {0}")]
    Arith(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("program contains unexpanded macro call: {0}")]
    UnexpandedMacro(String),

    #[error(transparent)]
    Macro(#[from] MacroError),

    #[error("enumeration exhausted after {tried} candidates (max_programs = {max_programs})")]
    EnumerationExhausted { tried: usize, max_programs: usize },

    #[error("invalid spec: {0}")]
    Schema(String),

    #[error("cache entry rejected: {0}")]
    CacheParse(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type for BVPS operations.
pub type BvpsResult<T> = Result<T, BvpsError>;
