use eidolon_bvps::BvpsError;
use eidolon_codec::CodecError;
use eidolon_store::StoreError;
use thiserror::Error;

/// Failure of the safe arithmetic evaluator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("arithmetic error: {0}")]
pub struct ArithError(pub String);

/// Errors from verification and its collaborators.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error(transparent)]
    Arith(#[from] ArithError),

    #[error("invalid task or solution: {0}")]
    Schema(String),

    #[error("list program error: {0}")]
    List(String),

    #[error("grid world error: {0}")]
    World(String),

    #[error("kernel error: {0}")]
    Kernel(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Bvps(#[from] BvpsError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Convenience result type for verification.
pub type VerifyResult<T> = Result<T, VerifyError>;

impl VerifyError {
    /// Errors that abort an episode rather than failing a lane.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VerifyError::Store(_) | VerifyError::Codec(_) | VerifyError::Config(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arith_display() {
        let err: VerifyError = ArithError("division by zero".into()).into();
        assert_eq!(err.to_string(), "arithmetic error: division by zero");
        assert!(!err.is_fatal());
    }

    #[test]
    fn store_errors_are_fatal() {
        let err: VerifyError = StoreError::NotFound("x".into()).into();
        assert!(err.is_fatal());
    }
}
