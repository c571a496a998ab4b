use eidolon_bvps::BvpsError;
use eidolon_codec::CodecError;
use eidolon_ledger::LedgerError;
use eidolon_skills::SkillError;
use eidolon_store::StoreError;
use eidolon_verify::VerifyError;
use thiserror::Error;

/// Errors that abort an episode.
///
/// Lane-level failures never show up here: they become FAIL verdicts and a
/// `refuse` decision. What remains is configuration, malformed input and
/// the I/O of the store, run directory and ledgers.
#[derive(Debug, Error)]
pub enum EpisodeError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid task: {0}")]
    Schema(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Bvps(#[from] BvpsError),

    #[error(transparent)]
    Verify(#[from] VerifyError),

    #[error(transparent)]
    Skill(#[from] SkillError),
}

pub type EpisodeResult<T> = Result<T, EpisodeError>;

impl EpisodeError {
    /// True for errors caused by the caller's configuration or input rather
    /// than by the system.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            EpisodeError::Config(_)
                | EpisodeError::Schema(_)
                | EpisodeError::Verify(VerifyError::Config(_))
                | EpisodeError::Verify(VerifyError::Kernel(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_configuration_errors_count_as_usage() {
        let err = EpisodeError::from(VerifyError::Config("unknown kernel 'x'".into()));
        assert!(err.is_usage());
        assert_eq!(err.to_string(), "configuration error: unknown kernel 'x'");
        assert!(!EpisodeError::Io(std::io::Error::other("disk")).is_usage());
    }
}
