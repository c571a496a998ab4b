use thiserror::Error;

/// Errors raised while producing or parsing canonical bytes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The value cannot be represented as canonical JSON.
    #[error("encode error: {0}")]
    Encode(String),

    /// The bytes are not a valid JSON document.
    #[error("decode error: {0}")]
    Decode(String),
}

/// Convenience result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;
