//! On-disk registry of admitted skills under `<root>/skills/<name>/`.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use eidolon_bvps::Spec;
use eidolon_codec::canonical_bytes_of;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::admission::AdmissionVerdict;
use crate::bundle::SkillBundle;
use crate::error::{SkillError, SkillResult};

pub const BUNDLE_FILE: &str = "bundle.json";
pub const VERDICT_FILE: &str = "admission_verdict.json";

/// A bundle whose admission verdict matches its identity.
#[derive(Debug, Clone)]
pub struct TrustedSkill {
    pub bundle: SkillBundle,
    pub verdict: AdmissionVerdict,
    pub dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct SkillRegistry {
    root: PathBuf,
}

impl SkillRegistry {
    /// Registry rooted at `<root>/skills`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().join("skills"),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir_for(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Persist an admitted bundle and its verdict.
    pub fn persist(
        &self,
        bundle: &SkillBundle,
        verdict: &AdmissionVerdict,
    ) -> SkillResult<PathBuf> {
        if !verdict.admitted {
            return Err(SkillError::AdmissionReject {
                name: bundle.name.clone(),
                reasons: verdict.reasons.clone(),
            });
        }
        if !verdict.matches(bundle)? {
            return Err(SkillError::Schema(format!(
                "verdict identity does not match bundle {}",
                bundle.name
            )));
        }
        let dir = self.dir_for(&bundle.name);
        fs::create_dir_all(&dir)?;
        write_atomic(&dir.join(BUNDLE_FILE), &canonical_bytes_of(bundle)?)?;
        write_atomic(&dir.join(VERDICT_FILE), &canonical_bytes_of(verdict)?)?;
        debug!(skill = %bundle.name, dir = %dir.display(), "Persisted skill");
        Ok(dir)
    }

    /// Load a stored bundle and verdict, if both files exist.
    pub fn load(&self, name: &str) -> SkillResult<Option<(SkillBundle, AdmissionVerdict)>> {
        let dir = self.dir_for(name);
        let (bundle_path, verdict_path) = (dir.join(BUNDLE_FILE), dir.join(VERDICT_FILE));
        if !bundle_path.is_file() || !verdict_path.is_file() {
            return Ok(None);
        }
        Ok(Some((read_json(&bundle_path)?, read_json(&verdict_path)?)))
    }

    /// Resolve the skill triggered by `spec`: same name, same spec hash, and
    /// an admitted verdict whose identity matches the stored bundle.
    pub fn lookup(&self, spec: &Spec) -> SkillResult<Option<TrustedSkill>> {
        let Some((bundle, verdict)) = self.load(&spec.name)? else {
            return Ok(None);
        };
        let spec_hash = spec.spec_hash()?;
        if bundle.trigger.spec_name != spec.name || bundle.trigger.spec_hash != spec_hash {
            debug!(skill = %spec.name, "Stored skill was compiled for a different spec");
            return Ok(None);
        }
        if !verdict.admitted || !verdict.matches(&bundle)? {
            warn!(skill = %spec.name, "Stored admission verdict does not vouch for the bundle");
            return Ok(None);
        }
        Ok(Some(TrustedSkill {
            dir: self.dir_for(&spec.name),
            bundle,
            verdict,
        }))
    }

    /// Names of every stored skill, sorted.
    pub fn names(&self) -> SkillResult<Vec<String>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> SkillResult<T> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|e| SkillError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn write_atomic(path: &Path, bytes: &[u8]) -> SkillResult<()> {
    let tmp = path.with_extension(format!("tmp-{}", std::process::id()));
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}
