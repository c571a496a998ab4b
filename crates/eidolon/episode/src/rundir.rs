//! Run directories: `runs/<episode_id>[-rNN]/`.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use eidolon_codec::canonical_bytes;
use eidolon_store::{extension_for, ArtifactRef, ArtifactStore};
use serde_json::Value;
use tracing::debug;

use crate::error::{EpisodeError, EpisodeResult};

pub const UCR_FILE: &str = "ucr.json";
pub const WITNESS_FILE: &str = "witness.json";
pub const ARTIFACTS_DIR: &str = "artifacts";

const MAX_RERUNS: u32 = 9_999;

/// One artifact to mirror, optionally under an extra stable name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorItem {
    pub artifact: ArtifactRef,
    /// Path relative to `artifacts/`, e.g. `verify/recompute_arith.json`.
    pub alias: Option<String>,
}

impl MirrorItem {
    pub fn new(artifact: &ArtifactRef) -> Self {
        Self {
            artifact: artifact.clone(),
            alias: None,
        }
    }

    pub fn aliased(artifact: &ArtifactRef, alias: impl Into<String>) -> Self {
        Self {
            artifact: artifact.clone(),
            alias: Some(alias.into()),
        }
    }

    /// `<type>-<hash>.<ext>`
    pub fn base_name(&self) -> String {
        format!(
            "{}-{}.{}",
            self.artifact.artifact_type,
            self.artifact.hash,
            extension_for(&self.artifact.media_type)
        )
    }
}

#[derive(Debug, Clone)]
pub struct RunDir {
    path: PathBuf,
    name: String,
}

impl RunDir {
    /// Create a fresh directory for `episode_id`, suffixing `-r01`, `-r02`,
    /// ... when earlier runs of the same episode exist.
    pub fn create(runs_dir: &Path, episode_id: &str) -> EpisodeResult<Self> {
        fs::create_dir_all(runs_dir)?;
        for rerun in 0..=MAX_RERUNS {
            let name = if rerun == 0 {
                episode_id.to_string()
            } else {
                format!("{episode_id}-r{rerun:02}")
            };
            let path = runs_dir.join(&name);
            match fs::create_dir(&path) {
                Ok(()) => {
                    debug!(run_dir = %path.display(), "Created run directory");
                    return Ok(Self { path, name });
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(EpisodeError::Io(std::io::Error::other(format!(
            "too many runs of episode {episode_id}"
        ))))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Write the canonical bytes of `value` to `<run_dir>/<file>`.
    pub fn write_canonical(&self, file: &str, value: &Value) -> EpisodeResult<PathBuf> {
        let path = self.path.join(file);
        write_atomic(&path, &canonical_bytes(value)?)?;
        Ok(path)
    }

    /// Copy artifacts out of the store. Returns the written paths relative
    /// to `artifacts/`, sorted.
    pub fn mirror(
        &self,
        store: &ArtifactStore,
        items: &[MirrorItem],
    ) -> EpisodeResult<Vec<String>> {
        let root = self.path.join(ARTIFACTS_DIR);
        fs::create_dir_all(&root)?;
        let mut written = Vec::new();
        for item in items {
            let bytes = store.get_bytes(&item.artifact.hash)?;
            let mut names = vec![item.base_name()];
            names.extend(item.alias.clone());
            for name in names {
                let relative = safe_relative(&name)?;
                let target = root.join(&relative);
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                write_atomic(&target, &bytes)?;
                written.push(name);
            }
        }
        written.sort();
        written.dedup();
        Ok(written)
    }
}

fn safe_relative(name: &str) -> EpisodeResult<PathBuf> {
    let path = PathBuf::from(name);
    let clean = path
        .components()
        .all(|c| matches!(c, std::path::Component::Normal(_)));
    if name.is_empty() || !clean {
        return Err(EpisodeError::Schema(format!("unsafe mirror path '{name}'")));
    }
    Ok(path)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> EpisodeResult<()> {
    let tmp = path.with_extension(format!("tmp-{}", std::process::id()));
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use eidolon_store::FlushMode;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn reruns_get_numbered_suffixes() {
        let dir = TempDir::new().unwrap();
        let runs = dir.path().join("runs");
        let first = RunDir::create(&runs, "ep-abc").unwrap();
        let second = RunDir::create(&runs, "ep-abc").unwrap();
        let third = RunDir::create(&runs, "ep-abc").unwrap();
        assert_eq!(first.name(), "ep-abc");
        assert_eq!(second.name(), "ep-abc-r01");
        assert_eq!(third.name(), "ep-abc-r02");
    }

    #[test]
    fn mirror_writes_base_and_alias_names() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::open(dir.path().join("store"), FlushMode::PerEpisode).unwrap();
        let artifact = store
            .put_json(&json!({"lane": "recompute"}), "lane_recompute", "t", &[])
            .unwrap();
        let run = RunDir::create(&dir.path().join("runs"), "ep-1").unwrap();

        let written = run
            .mirror(&store, &[MirrorItem::aliased(&artifact, "verify/recompute_arith.json")])
            .unwrap();
        let base = format!("lane_recompute-{}.json", artifact.hash);
        assert_eq!(written, vec![base.clone(), "verify/recompute_arith.json".to_string()]);
        let copied = fs::read(run.path().join(ARTIFACTS_DIR).join(&base)).unwrap();
        assert_eq!(copied, br#"{"lane":"recompute"}"#.to_vec());
    }

    #[test]
    fn mirror_rejects_escaping_aliases() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::open(dir.path().join("store"), FlushMode::PerEpisode).unwrap();
        let artifact = store.put_json(&json!({}), "x", "t", &[]).unwrap();
        let run = RunDir::create(&dir.path().join("runs"), "ep-2").unwrap();
        let err = run.mirror(&store, &[MirrorItem::aliased(&artifact, "../escape.json")]);
        assert!(matches!(err, Err(EpisodeError::Schema(_))));
    }
}
