//! Process-wide registry of store roots.
//!
//! Each root's manifest is loaded from disk once per process and shared by
//! every [`ArtifactStore`](crate::ArtifactStore) handle opened on that root.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use serde::Deserialize;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::types::ManifestEntry;

/// In-memory manifest of one store root.
#[derive(Debug, Default)]
pub(crate) struct ManifestState {
    pub entries: BTreeMap<String, ManifestEntry>,
    pub dirty: bool,
}

#[derive(Deserialize)]
struct ManifestFile {
    #[serde(default)]
    entries: Vec<ManifestEntry>,
}

type Roots = Mutex<HashMap<PathBuf, Arc<Mutex<ManifestState>>>>;

static ROOTS: OnceLock<Roots> = OnceLock::new();

fn roots() -> &'static Roots {
    ROOTS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Shared manifest state for `root`, preloading `manifest.json` on first touch.
pub(crate) fn manifest_for(root: &Path) -> StoreResult<Arc<Mutex<ManifestState>>> {
    let mut map = roots().lock();
    if let Some(state) = map.get(root) {
        return Ok(Arc::clone(state));
    }
    let state = Arc::new(Mutex::new(load_manifest(root)?));
    map.insert(root.to_path_buf(), Arc::clone(&state));
    Ok(state)
}

fn load_manifest(root: &Path) -> StoreResult<ManifestState> {
    let path = root.join("manifest.json");
    let mut state = ManifestState::default();
    if !path.exists() {
        return Ok(state);
    }
    let bytes = std::fs::read(&path)?;
    let file: ManifestFile = serde_json::from_slice(&bytes)
        .map_err(|e| StoreError::Manifest(format!("{}: {e}", path.display())))?;
    for entry in file.entries {
        state.entries.insert(entry.hash.clone(), entry);
    }
    debug!(root = %root.display(), entries = state.entries.len(), "Preloaded manifest");
    Ok(state)
}

/// Forget every registered root. The next open reloads from disk.
pub fn reset_store_registry() {
    roots().lock().clear();
}

/// Roots touched by this process, sorted.
pub fn registered_roots() -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = roots().lock().keys().cloned().collect();
    out.sort();
    out
}
