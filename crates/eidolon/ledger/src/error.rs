use eidolon_codec::CodecError;
use thiserror::Error;

/// Errors returned by the ledgers.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("database error: {0}")]
    Database(String),

    #[error("ledger integrity violation at {position}: {reason}")]
    IntegrityViolation { position: u64, reason: String },
}

/// Convenience result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        LedgerError::Database(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_display() {
        let err = LedgerError::IntegrityViolation {
            position: 3,
            reason: "unreadable tail".into(),
        };
        assert_eq!(
            err.to_string(),
            "ledger integrity violation at 3: unreadable tail"
        );
    }
}
