//! # eidolon-store
//!
//! Content-addressed artifact store. Every blob is named by the SHA-256 of
//! its bytes, carries a sidecar with its metadata, and is listed in a
//! canonical `manifest.json` at the store root.

#![deny(unsafe_code)]

pub mod costs;
pub mod error;
pub mod registry;
pub mod store;
pub mod types;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use costs::{FlushBreakdown, StoreCosts};
pub use error::{StoreError, StoreResult};
pub use registry::{registered_roots, reset_store_registry};
pub use store::{manifest_root_hash_of, ArtifactStore, UCR_TYPE};
pub use types::{
    extension_for, ArtifactRef, ManifestEntry, Sidecar, MEDIA_JSON, MEDIA_TAR, MEDIA_TEXT,
};

/// When the manifest is written to disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushMode {
    /// Synchronous write after each put.
    #[default]
    PerEpisode,
    /// Buffered until the suite boundary or a forced flush.
    #[serde(alias = "batch")]
    PerSuite,
}

impl fmt::Display for FlushMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlushMode::PerEpisode => write!(f, "per_episode"),
            FlushMode::PerSuite => write!(f, "per_suite"),
        }
    }
}

impl FromStr for FlushMode {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "per_episode" | "episode" => Ok(FlushMode::PerEpisode),
            "per_suite" | "suite" | "batch" => Ok(FlushMode::PerSuite),
            other => Err(StoreError::Manifest(format!("unknown flush mode: {other}"))),
        }
    }
}
