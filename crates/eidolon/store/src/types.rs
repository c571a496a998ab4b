use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Media type of canonical JSON artifacts.
pub const MEDIA_JSON: &str = "application/json";
/// Media type of tar capsules.
pub const MEDIA_TAR: &str = "application/x-tar";
/// Media type of plain-text artifacts.
pub const MEDIA_TEXT: &str = "text/plain";

/// Reference to a stored artifact.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Hex SHA-256 of the blob bytes.
    pub hash: String,
    /// Free-form artifact tag (`solution`, `lane_recompute`, ...).
    #[serde(rename = "type")]
    pub artifact_type: String,
    /// MIME type of the blob.
    pub media_type: String,
    /// Blob size in bytes.
    pub size: u64,
}

/// One row of `manifest.json`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub hash: String,
    #[serde(rename = "type")]
    pub artifact_type: String,
    pub media_type: String,
    pub producer: String,
    #[serde(default)]
    pub created_from: Vec<String>,
    pub size: u64,
    /// Path of the blob relative to the store root.
    pub relpath: String,
}

impl ManifestEntry {
    pub fn to_ref(&self) -> ArtifactRef {
        ArtifactRef {
            hash: self.hash.clone(),
            artifact_type: self.artifact_type.clone(),
            media_type: self.media_type.clone(),
            size: self.size,
        }
    }

    /// Tie-break used when one hash is put with differing metadata.
    pub(crate) fn precedence_key(&self) -> (&str, &str, &str, &[String]) {
        (
            &self.artifact_type,
            &self.media_type,
            &self.producer,
            &self.created_from,
        )
    }
}

/// Sidecar metadata written next to each blob as `<hash>.meta.json`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sidecar {
    pub hash: String,
    #[serde(rename = "type")]
    pub artifact_type: String,
    pub media_type: String,
    pub producer: String,
    pub created_from: Vec<String>,
    pub size: u64,
    pub relpath: String,
    /// Absolute path of the blob at write time.
    pub path: String,
}

/// File extension used when mirroring an artifact of this media type.
pub fn extension_for(media_type: &str) -> &'static str {
    match media_type {
        MEDIA_JSON => "json",
        MEDIA_TAR => "tar",
        _ => "txt",
    }
}

pub(crate) fn validate_media_type(media_type: &str) -> StoreResult<()> {
    if media_type == MEDIA_JSON || media_type == MEDIA_TAR || media_type.starts_with("text/") {
        Ok(())
    } else {
        Err(StoreError::InvalidMediaType(media_type.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_ref_serializes_type_field() {
        let r = ArtifactRef {
            hash: "ab".into(),
            artifact_type: "solution".into(),
            media_type: MEDIA_JSON.into(),
            size: 3,
        };
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["type"], "solution");
        assert!(v.get("artifact_type").is_none());
    }

    #[test]
    fn media_type_validation() {
        assert!(validate_media_type(MEDIA_JSON).is_ok());
        assert!(validate_media_type(MEDIA_TAR).is_ok());
        assert!(validate_media_type("text/markdown").is_ok());
        assert!(validate_media_type("image/png").is_err());
    }

    #[test]
    fn extensions() {
        assert_eq!(extension_for(MEDIA_JSON), "json");
        assert_eq!(extension_for(MEDIA_TAR), "tar");
        assert_eq!(extension_for("text/x-repro"), "txt");
    }
}
