use std::path::PathBuf;

use eidolon_bvps::BvpsError;
use eidolon_codec::CodecError;
use eidolon_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SkillError {
    #[error("skill {name} was not admitted: {}", reasons.join("; "))]
    AdmissionReject { name: String, reasons: Vec<String> },

    #[error("invalid skill bundle: {0}")]
    Schema(String),

    #[error("malformed skill file {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Bvps(#[from] BvpsError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

pub type SkillResult<T> = Result<T, SkillError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reject_lists_reasons() {
        let err = SkillError::AdmissionReject {
            name: "abs".into(),
            reasons: vec!["canary FAIL".into(), "regression FAIL".into()],
        };
        assert_eq!(
            err.to_string(),
            "skill abs was not admitted: canary FAIL; regression FAIL"
        );
    }
}
