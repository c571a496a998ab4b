//! Content-addressed blob store.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use eidolon_codec::{canonical_bytes, canonical_bytes_of, from_bytes, is_sha256_hex, sha256_hex};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::costs::{elapsed_ms, FlushBreakdown, StoreCosts};
use crate::error::{StoreError, StoreResult};
use crate::registry::{manifest_for, ManifestState};
use crate::types::{validate_media_type, ArtifactRef, ManifestEntry, Sidecar, MEDIA_JSON};
use crate::FlushMode;

#[derive(Serialize)]
struct ManifestDoc<'a> {
    entries: &'a [ManifestEntry],
}

/// Artifact type excluded from the committed manifest root hash.
pub const UCR_TYPE: &str = "ucr";

/// Handle on a content-addressed store rooted at a directory.
///
/// Blobs live at `<root>/sha256/<hh>/<hh>/<hash>.bin` next to a
/// `<hash>.meta.json` sidecar. The manifest is shared per root through the
/// process registry.
pub struct ArtifactStore {
    root: PathBuf,
    mode: FlushMode,
    manifest: Arc<Mutex<ManifestState>>,
    costs: Mutex<StoreCosts>,
}

impl std::fmt::Debug for ArtifactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactStore")
            .field("root", &self.root)
            .field("mode", &self.mode)
            .finish()
    }
}

impl ArtifactStore {
    /// Open (creating if needed) the store at `root`.
    pub fn open(root: impl AsRef<Path>, mode: FlushMode) -> StoreResult<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root.join("sha256"))?;
        let root = fs::canonicalize(root)?;
        let manifest = manifest_for(&root)?;
        debug!(root = %root.display(), mode = %mode, "Opened artifact store");
        Ok(Self {
            root,
            mode,
            manifest,
            costs: Mutex::new(StoreCosts::default()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mode(&self) -> FlushMode {
        self.mode
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join("manifest.json")
    }

    /// Path of a blob relative to the root.
    pub fn relpath_for(hash: &str) -> String {
        format!("{}/{}.bin", shard_dir(hash), hash)
    }

    /// Absolute path of the blob for `hash`.
    pub fn blob_path(&self, hash: &str) -> PathBuf {
        self.root.join(Self::relpath_for(hash))
    }

    fn sidecar_path(&self, hash: &str) -> PathBuf {
        self.root
            .join(format!("{}/{}.meta.json", shard_dir(hash), hash))
    }

    /// Store `data` and upsert its manifest entry.
    pub fn put_bytes(
        &self,
        data: &[u8],
        artifact_type: &str,
        media_type: &str,
        producer: &str,
        created_from: &[String],
    ) -> StoreResult<ArtifactRef> {
        validate_media_type(media_type)?;

        let started = Instant::now();
        let hash = sha256_hex(data);
        let hash_ms = elapsed_ms(started);

        let relpath = Self::relpath_for(&hash);
        let path = self.root.join(&relpath);

        let started = Instant::now();
        let wrote = if path.exists() {
            false
        } else {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            write_atomic(&path, data, false)?;
            true
        };
        let blob_write_ms = elapsed_ms(started);

        let entry = ManifestEntry {
            hash: hash.clone(),
            artifact_type: artifact_type.to_string(),
            media_type: media_type.to_string(),
            producer: producer.to_string(),
            created_from: created_from.to_vec(),
            size: data.len() as u64,
            relpath: relpath.clone(),
        };

        let sidecar = self.sidecar_path(&hash);
        if !sidecar.exists() {
            let meta = Sidecar {
                hash: hash.clone(),
                artifact_type: entry.artifact_type.clone(),
                media_type: entry.media_type.clone(),
                producer: entry.producer.clone(),
                created_from: entry.created_from.clone(),
                size: entry.size,
                relpath,
                path: path.display().to_string(),
            };
            write_atomic(&sidecar, &canonical_bytes_of(&meta)?, false)?;
        }

        let reference = entry.to_ref();
        {
            let mut state = self.manifest.lock();
            let replace = match state.entries.get(&hash) {
                Some(existing) => entry.precedence_key() < existing.precedence_key(),
                None => true,
            };
            if replace {
                state.entries.insert(hash.clone(), entry);
                state.dirty = true;
            }
        }

        {
            let mut costs = self.costs.lock();
            costs.puts += 1;
            if wrote {
                costs.blob_writes += 1;
            }
            costs.hash_ms += hash_ms;
            costs.blob_write_ms += blob_write_ms;
        }

        debug!(hash = %hash, artifact_type, wrote, "Stored artifact");

        if self.mode == FlushMode::PerEpisode {
            self.flush_manifest(false)?;
        }
        Ok(reference)
    }

    /// Store the canonical bytes of `value` as `application/json`.
    pub fn put_json(
        &self,
        value: &Value,
        artifact_type: &str,
        producer: &str,
        created_from: &[String],
    ) -> StoreResult<ArtifactRef> {
        let bytes = canonical_bytes(value)?;
        self.put_bytes(&bytes, artifact_type, MEDIA_JSON, producer, created_from)
    }

    /// [`put_json`](Self::put_json) for any serializable value.
    pub fn put_serialized<T: Serialize + ?Sized>(
        &self,
        value: &T,
        artifact_type: &str,
        producer: &str,
        created_from: &[String],
    ) -> StoreResult<ArtifactRef> {
        let bytes = canonical_bytes_of(value)?;
        self.put_bytes(&bytes, artifact_type, MEDIA_JSON, producer, created_from)
    }

    /// Read a blob and check it still hashes to its name.
    pub fn get_bytes(&self, hash: &str) -> StoreResult<Vec<u8>> {
        if !is_sha256_hex(hash) {
            return Err(StoreError::InvalidHash(hash.to_string()));
        }
        let path = self.blob_path(hash);
        if !path.exists() {
            return Err(StoreError::NotFound(hash.to_string()));
        }
        let bytes = fs::read(&path)?;
        let computed = sha256_hex(&bytes);
        if computed != hash {
            return Err(StoreError::Corrupt {
                expected: hash.to_string(),
                computed,
            });
        }
        Ok(bytes)
    }

    pub fn read_json(&self, hash: &str) -> StoreResult<Value> {
        let bytes = self.get_bytes(hash)?;
        Ok(from_bytes(&bytes)?)
    }

    pub fn contains(&self, hash: &str) -> bool {
        is_sha256_hex(hash) && self.blob_path(hash).exists()
    }

    pub fn entry(&self, hash: &str) -> Option<ManifestEntry> {
        self.manifest.lock().entries.get(hash).cloned()
    }

    /// All manifest entries in `(hash, type)` order.
    pub fn entries(&self) -> Vec<ManifestEntry> {
        let state = self.manifest.lock();
        sorted_entries(state.entries.values().cloned().collect())
    }

    pub fn entries_of_type(&self, artifact_type: &str) -> Vec<ManifestEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.artifact_type == artifact_type)
            .collect()
    }

    /// Root hash over the in-memory manifest.
    pub fn manifest_root_hash(&self, exclude_ucr: bool) -> StoreResult<String> {
        manifest_root_hash_of(&self.entries(), exclude_ucr)
    }

    /// Write `manifest.json` when dirty.
    ///
    /// In [`FlushMode::PerSuite`] nothing is written unless `force` is set.
    /// Returns whether the file was written.
    pub fn flush_manifest(&self, force: bool) -> StoreResult<bool> {
        if self.mode == FlushMode::PerSuite && !force {
            return Ok(false);
        }
        let total = Instant::now();
        let mut state = self.manifest.lock();
        let path = self.manifest_path();
        if !state.dirty && path.exists() {
            return Ok(false);
        }

        let mut breakdown = FlushBreakdown::default();

        let t = Instant::now();
        let entries = sorted_entries(state.entries.values().cloned().collect());
        breakdown.prepare = elapsed_ms(t);

        let t = Instant::now();
        let root_hash = manifest_root_hash_of(&entries, false)?;
        breakdown.hash = elapsed_ms(t);

        let t = Instant::now();
        let bytes = canonical_bytes_of(&ManifestDoc { entries: &entries })?;
        breakdown.serialize = elapsed_ms(t);

        let t = Instant::now();
        let tmp = path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&bytes)?;
        breakdown.write = elapsed_ms(t);

        let t = Instant::now();
        file.sync_all()?;
        drop(file);
        breakdown.fsync = elapsed_ms(t);

        let t = Instant::now();
        fs::rename(&tmp, &path)?;
        state.dirty = false;
        breakdown.misc = elapsed_ms(t);
        drop(state);

        let mut costs = self.costs.lock();
        costs.manifest_flushes += 1;
        costs.manifest_ms += elapsed_ms(total);
        costs.flush.accumulate(&breakdown);

        info!(
            root = %self.root.display(),
            entries = entries.len(),
            root_hash = %root_hash,
            "Flushed manifest"
        );
        Ok(true)
    }

    /// Suite boundary: force out a buffered manifest.
    pub fn end_suite(&self) -> StoreResult<bool> {
        self.flush_manifest(true)
    }

    /// Snapshot of this handle's cost counters.
    pub fn costs(&self) -> StoreCosts {
        self.costs.lock().clone()
    }
}

fn shard_dir(hash: &str) -> String {
    let a = hash.get(0..2).unwrap_or("00");
    let b = hash.get(2..4).unwrap_or("00");
    format!("sha256/{a}/{b}")
}

fn sorted_entries(mut entries: Vec<ManifestEntry>) -> Vec<ManifestEntry> {
    entries.sort_by(|a, b| {
        (a.hash.as_str(), a.artifact_type.as_str())
            .cmp(&(b.hash.as_str(), b.artifact_type.as_str()))
    });
    entries
}

/// Root hash of an entry list: `sha256_canonical` of the sorted entries,
/// optionally dropping entries of type `ucr`.
pub fn manifest_root_hash_of(entries: &[ManifestEntry], exclude_ucr: bool) -> StoreResult<String> {
    let kept: Vec<ManifestEntry> = entries
        .iter()
        .filter(|e| !(exclude_ucr && e.artifact_type == UCR_TYPE))
        .cloned()
        .collect();
    let sorted = sorted_entries(kept);
    Ok(eidolon_codec::sha256_canonical_of(&sorted)?)
}

fn write_atomic(path: &Path, bytes: &[u8], sync: bool) -> StoreResult<()> {
    let tmp = path.with_extension(format!("tmp-{}", std::process::id()));
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        if sync {
            file.sync_all()?;
        }
    }
    fs::rename(&tmp, path)?;
    Ok(())
}
