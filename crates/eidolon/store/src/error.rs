use eidolon_codec::CodecError;
use thiserror::Error;

/// Errors from the artifact store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("artifact not found: {0}")]
    NotFound(String),

    #[error("artifact corrupted: expected {expected}, computed {computed}")]
    Corrupt { expected: String, computed: String },

    #[error("invalid artifact hash: {0}")]
    InvalidHash(String),

    #[error("unsupported media type: {0}")]
    InvalidMediaType(String),

    #[error("manifest error: {0}")]
    Manifest(String),
}

/// Convenience result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupt_display() {
        let err = StoreError::Corrupt {
            expected: "aa".into(),
            computed: "bb".into(),
        };
        assert_eq!(err.to_string(), "artifact corrupted: expected aa, computed bb");
    }

    #[test]
    fn io_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: StoreError = io.into();
        assert!(matches!(err, StoreError::Io(_)));
    }
}
