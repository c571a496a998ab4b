//! Two-tier program cache keyed by `(spec_hash, macros_hash, attempt)`.
//!
//! Tier one is a process-local memory map per artifact-store root, shared by
//! every [`BvpsCache`] handle opened for that root. Tier two is an artifact
//! store under the persist directory holding entries of type
//! `bvps_program_cache`. Counters are process-global.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use eidolon_codec::{canonical_bytes_of, sha256_canonical};
use eidolon_store::{ArtifactStore, FlushMode};

use crate::cegis::SynthesisStats;
use crate::error::{BvpsError, BvpsResult};
use crate::macros::{macros_hash, MacroSet};
use crate::types::{Program, Spec};

/// Artifact type of persisted cache entries.
pub const CACHE_ARTIFACT_TYPE: &str = "bvps_program_cache";

/// `sha256_canonical({attempt, macros_hash, spec_hash})`.
pub fn cache_key(spec_hash: &str, macros_hash: &str, attempt: u32) -> BvpsResult<String> {
    Ok(sha256_canonical(&json!({
        "attempt": attempt,
        "macros_hash": macros_hash,
        "spec_hash": spec_hash,
    }))?)
}

/// Persisted payload of one cached synthesis result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub spec_hash: String,
    pub macros_hash: String,
    pub attempt: u32,
    pub cache_key: String,
    pub program: Program,
    pub program_pretty: String,
    pub program_hash: String,
    pub report: Value,
    pub solve_bvps_stats: SynthesisStats,
}

impl CacheEntry {
    pub fn new(
        spec: &Spec,
        macros: &MacroSet,
        attempt: u32,
        program: &Program,
        report: Value,
        stats: &SynthesisStats,
    ) -> BvpsResult<Self> {
        let spec_hash = spec.spec_hash()?;
        let macros_hash = macros_hash(macros)?;
        Ok(Self {
            cache_key: cache_key(&spec_hash, &macros_hash, attempt)?,
            spec_hash,
            macros_hash,
            attempt,
            program: program.clone(),
            program_pretty: program.pretty(),
            program_hash: program.hash()?,
            report,
            solve_bvps_stats: stats.clone(),
        })
    }

    /// Decode a persisted entry, rejecting ones whose key or program hash
    /// does not recompute.
    pub fn parse(value: &Value) -> BvpsResult<Self> {
        let entry: CacheEntry = serde_json::from_value(value.clone())
            .map_err(|e| BvpsError::CacheParse(format!("malformed entry: {e}")))?;
        let key = cache_key(&entry.spec_hash, &entry.macros_hash, entry.attempt)?;
        if key != entry.cache_key {
            return Err(BvpsError::CacheParse(format!(
                "cache_key mismatch: stored {}, computed {key}",
                entry.cache_key
            )));
        }
        let program_hash = entry.program.hash()?;
        if program_hash != entry.program_hash {
            return Err(BvpsError::CacheParse(format!(
                "program_hash mismatch: stored {}, computed {program_hash}",
                entry.program_hash
            )));
        }
        Ok(entry)
    }
}

/// Timing accumulator for one cache operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpTiming {
    pub count: u64,
    pub sum_ns: u64,
    pub max_ns: u64,
}

impl OpTiming {
    fn record(&mut self, ns: u64) {
        self.count += 1;
        self.sum_ns += ns;
        self.max_ns = self.max_ns.max(ns);
    }

    pub fn sum_us(&self) -> f64 {
        self.sum_ns as f64 / 1_000.0
    }

    pub fn sum_ms(&self) -> f64 {
        self.sum_ns as f64 / 1_000_000.0
    }

    pub fn max_us(&self) -> f64 {
        self.max_ns as f64 / 1_000.0
    }

    pub fn max_ms(&self) -> f64 {
        self.max_ns as f64 / 1_000_000.0
    }
}

/// Process-wide cache counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub lookups: u64,
    pub hits_mem: u64,
    pub hits_persist: u64,
    pub misses: u64,
    pub reads: u64,
    pub writes: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub errors: u64,
    pub parse_errors: u64,
    pub lookup: OpTiming,
    pub read: OpTiming,
    pub write: OpTiming,
    /// One of `""`, `env_off`, `mkdir_failed`, `init_failed`.
    pub disable_reason: String,
}

impl CacheStats {
    /// JSON view including microsecond and millisecond figures.
    pub fn to_json(&self) -> Value {
        let timing = |t: &OpTiming| {
            json!({
                "count": t.count,
                "sum_ns": t.sum_ns,
                "max_ns": t.max_ns,
                "sum_us": t.sum_us(),
                "max_us": t.max_us(),
                "sum_ms": t.sum_ms(),
                "max_ms": t.max_ms(),
            })
        };
        json!({
            "lookups": self.lookups,
            "hits_mem": self.hits_mem,
            "hits_persist": self.hits_persist,
            "misses": self.misses,
            "reads": self.reads,
            "writes": self.writes,
            "bytes_read": self.bytes_read,
            "bytes_written": self.bytes_written,
            "errors": self.errors,
            "parse_errors": self.parse_errors,
            "lookup": timing(&self.lookup),
            "read": timing(&self.read),
            "write": timing(&self.write),
            "disable_reason": self.disable_reason,
        })
    }
}

static STATS: OnceLock<Mutex<CacheStats>> = OnceLock::new();

fn stats() -> &'static Mutex<CacheStats> {
    STATS.get_or_init(|| Mutex::new(CacheStats::default()))
}

/// Snapshot of the process-wide counters.
pub fn cache_stats() -> CacheStats {
    stats().lock().clone()
}

/// Zero the process-wide counters.
pub fn reset_cache_stats() {
    *stats().lock() = CacheStats::default();
}

type MemTier = Arc<Mutex<HashMap<String, CacheEntry>>>;

static MEM_TIERS: OnceLock<Mutex<HashMap<PathBuf, MemTier>>> = OnceLock::new();

fn mem_tiers() -> &'static Mutex<HashMap<PathBuf, MemTier>> {
    MEM_TIERS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Canonical form of a root that may not exist yet.
fn canonical_root(root: &Path) -> PathBuf {
    if let Ok(path) = std::fs::canonicalize(root) {
        return path;
    }
    match (root.parent(), root.file_name()) {
        (Some(parent), Some(name)) => std::fs::canonicalize(parent)
            .map(|p| p.join(name))
            .unwrap_or_else(|_| root.to_path_buf()),
        _ => root.to_path_buf(),
    }
}

/// Memory tier of `store_root`, created on first touch.
fn mem_tier_for(store_root: &Path) -> MemTier {
    let key = canonical_root(store_root);
    let mut tiers = mem_tiers().lock();
    Arc::clone(tiers.entry(key).or_default())
}

/// Drop every memory tier. Later handles start empty.
pub fn reset_memory_tiers() {
    mem_tiers().lock().clear();
}

fn elapsed_ns(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_nanos()).unwrap_or(u64::MAX)
}

/// Persistence settings of the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    pub persist: bool,
    pub persist_dir: Option<PathBuf>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            persist: true,
            persist_dir: None,
        }
    }
}

impl CacheSettings {
    /// Read `EIDOLON_BVPS_PERSIST` and `EIDOLON_BVPS_PERSIST_DIR`.
    pub fn from_env() -> Self {
        let persist = std::env::var("EIDOLON_BVPS_PERSIST")
            .map(|v| {
                !matches!(
                    v.trim().to_ascii_lowercase().as_str(),
                    "0" | "off" | "false" | "no"
                )
            })
            .unwrap_or(true);
        let persist_dir = std::env::var("EIDOLON_BVPS_PERSIST_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);
        Self {
            persist,
            persist_dir,
        }
    }

    /// Explicit directory, else `$XDG_CACHE_HOME/eidolon/bvps_persist`,
    /// else `~/.cache/eidolon/bvps_persist`.
    pub fn resolve_dir(&self) -> Option<PathBuf> {
        if let Some(dir) = &self.persist_dir {
            return Some(dir.clone());
        }
        if let Some(xdg) = std::env::var_os("XDG_CACHE_HOME").filter(|v| !v.is_empty()) {
            return Some(PathBuf::from(xdg).join("eidolon").join("bvps_persist"));
        }
        dirs::home_dir().map(|home| home.join(".cache").join("eidolon").join("bvps_persist"))
    }
}

/// Which tier answered a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    Mem,
    Persist,
}

impl CacheTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheTier::Mem => "mem",
            CacheTier::Persist => "persist",
        }
    }
}

/// Cache handle. Shares its root's memory tier and, when enabled, owns the
/// persist store.
pub struct BvpsCache {
    mem: MemTier,
    disk: HashMap<String, CacheEntry>,
    persist: Option<ArtifactStore>,
    scanned: bool,
}

impl std::fmt::Debug for BvpsCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BvpsCache")
            .field("mem_entries", &self.mem.lock().len())
            .field("persist", &self.persist.as_ref().map(|s| s.root().to_path_buf()))
            .finish()
    }
}

impl BvpsCache {
    /// Memory tier of `store_root` only.
    pub fn memory_only(store_root: &Path) -> Self {
        Self {
            mem: mem_tier_for(store_root),
            disk: HashMap::new(),
            persist: None,
            scanned: true,
        }
    }

    /// Open the cache for the artifact store at `store_root`, recording why
    /// persistence is off when it is.
    pub fn open(settings: &CacheSettings, store_root: &Path) -> Self {
        if !settings.persist {
            stats().lock().disable_reason = "env_off".into();
            return Self::memory_only(store_root);
        }
        let Some(dir) = settings.resolve_dir() else {
            stats().lock().disable_reason = "mkdir_failed".into();
            return Self::memory_only(store_root);
        };
        Self::open_dir(&dir, store_root)
    }

    fn open_dir(dir: &Path, store_root: &Path) -> Self {
        if let Err(err) = std::fs::create_dir_all(dir) {
            warn!(dir = %dir.display(), error = %err, "Cannot create BVPS persist dir");
            stats().lock().disable_reason = "mkdir_failed".into();
            return Self::memory_only(store_root);
        }
        match ArtifactStore::open(dir, FlushMode::PerEpisode) {
            Ok(store) => {
                debug!(dir = %dir.display(), "BVPS persist cache enabled");
                Self {
                    mem: mem_tier_for(store_root),
                    disk: HashMap::new(),
                    persist: Some(store),
                    scanned: false,
                }
            }
            Err(err) => {
                warn!(dir = %dir.display(), error = %err, "Cannot open BVPS persist store");
                stats().lock().disable_reason = "init_failed".into();
                Self::memory_only(store_root)
            }
        }
    }

    pub fn persist_enabled(&self) -> bool {
        self.persist.is_some()
    }

    pub fn persist_root(&self) -> Option<&Path> {
        self.persist.as_ref().map(|s| s.root())
    }

    pub fn mem_len(&self) -> usize {
        self.mem.lock().len()
    }

    /// Scan persisted entries once. Invalid entries are skipped and counted.
    pub fn preload(&mut self) -> usize {
        if self.scanned {
            return self.disk.len();
        }
        self.scanned = true;
        let Some(store) = self.persist.as_ref() else {
            return 0;
        };
        for manifest_entry in store.entries_of_type(CACHE_ARTIFACT_TYPE) {
            let started = Instant::now();
            let parsed = store
                .read_json(&manifest_entry.hash)
                .map_err(BvpsError::from)
                .and_then(|v| CacheEntry::parse(&v));
            let mut s = stats().lock();
            s.read.record(elapsed_ns(started));
            match parsed {
                Ok(entry) => {
                    s.reads += 1;
                    s.bytes_read += manifest_entry.size;
                    self.disk.insert(entry.cache_key.clone(), entry);
                }
                Err(BvpsError::CacheParse(reason)) => {
                    s.parse_errors += 1;
                    s.errors += 1;
                    warn!(hash = %manifest_entry.hash, reason = %reason, "Skipping cache entry");
                }
                Err(err) => {
                    s.errors += 1;
                    warn!(hash = %manifest_entry.hash, error = %err, "Unreadable cache entry");
                }
            }
        }
        info!(entries = self.disk.len(), "Preloaded BVPS persist cache");
        self.disk.len()
    }

    /// Look up a key in memory, then on disk.
    pub fn lookup(&mut self, key: &str) -> Option<(CacheEntry, CacheTier)> {
        let started = Instant::now();
        let in_mem = self.mem.lock().get(key).cloned();
        let found = if let Some(entry) = in_mem {
            Some((entry, CacheTier::Mem))
        } else if self.persist.is_some() {
            self.preload();
            self.disk.get(key).cloned().map(|entry| {
                self.mem.lock().insert(key.to_string(), entry.clone());
                (entry, CacheTier::Persist)
            })
        } else {
            None
        };

        let mut s = stats().lock();
        s.lookups += 1;
        s.lookup.record(elapsed_ns(started));
        match &found {
            Some((_, CacheTier::Mem)) => s.hits_mem += 1,
            Some((_, CacheTier::Persist)) => s.hits_persist += 1,
            None => s.misses += 1,
        }
        drop(s);
        debug!(key, hit = found.is_some(), "BVPS cache lookup");
        found
    }

    /// Insert into memory and, when enabled, persist.
    pub fn insert(&mut self, entry: CacheEntry) -> BvpsResult<()> {
        if let Some(store) = self.persist.as_ref() {
            let started = Instant::now();
            let bytes = canonical_bytes_of(&entry)?;
            let result = store.put_bytes(
                &bytes,
                CACHE_ARTIFACT_TYPE,
                eidolon_store::MEDIA_JSON,
                "bvps_cache",
                &[],
            );
            let mut s = stats().lock();
            s.write.record(elapsed_ns(started));
            match result {
                Ok(_) => {
                    s.writes += 1;
                    s.bytes_written += bytes.len() as u64;
                    self.disk.insert(entry.cache_key.clone(), entry.clone());
                }
                Err(err) => {
                    s.errors += 1;
                    warn!(key = %entry.cache_key, error = %err, "BVPS cache write failed");
                }
            }
        }
        self.mem.lock().insert(entry.cache_key.clone(), entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Bounds, Expr, Type};

    fn spec() -> Spec {
        Spec {
            name: "identity".into(),
            inputs: vec![("x".into(), Type::Int)],
            output: Type::Int,
            examples: vec![],
            bounds: Bounds::default(),
            oracle: None,
        }
    }

    fn entry(attempt: u32) -> CacheEntry {
        let s = spec();
        let program = Program::new(s.inputs.clone(), Expr::var("x"), Type::Int);
        let stats = SynthesisStats {
            candidates_tried: 5,
            depth: 0,
            counterexamples: vec![],
            seed: 0,
            fuzz_trials: 20,
        };
        CacheEntry::new(&s, &MacroSet::new(), attempt, &program, json!({}), &stats).unwrap()
    }

    #[test]
    fn key_depends_on_attempt() {
        assert_ne!(entry(1).cache_key, entry(2).cache_key);
    }

    #[test]
    fn parse_rejects_tampered_program() {
        let mut value = serde_json::to_value(entry(1)).unwrap();
        value["program"]["body"] = json!({"kind": "int_const", "value": 3});
        assert!(matches!(CacheEntry::parse(&value), Err(BvpsError::CacheParse(_))));
    }

    #[test]
    fn parse_rejects_wrong_key() {
        let mut value = serde_json::to_value(entry(1)).unwrap();
        value["attempt"] = json!(2);
        assert!(matches!(CacheEntry::parse(&value), Err(BvpsError::CacheParse(_))));
    }

    #[test]
    fn memory_tier_hit() {
        let root = tempfile::TempDir::new().unwrap();
        let mut cache = BvpsCache::memory_only(root.path());
        let e = entry(1);
        let key = e.cache_key.clone();
        assert!(cache.lookup(&key).is_none());
        cache.insert(e).unwrap();
        let (_, tier) = cache.lookup(&key).unwrap();
        assert_eq!(tier, CacheTier::Mem);
    }

    #[test]
    fn memory_tier_is_shared_per_store_root() {
        let root = tempfile::TempDir::new().unwrap();
        let other = tempfile::TempDir::new().unwrap();
        let e = entry(1);
        let key = e.cache_key.clone();
        BvpsCache::memory_only(root.path()).insert(e).unwrap();

        let (_, tier) = BvpsCache::memory_only(root.path()).lookup(&key).unwrap();
        assert_eq!(tier, CacheTier::Mem);
        assert!(BvpsCache::memory_only(other.path()).lookup(&key).is_none());
    }

    #[test]
    fn persist_tier_survives_new_handle() {
        let dir = tempfile::TempDir::new().unwrap();
        let settings = CacheSettings {
            persist: true,
            persist_dir: Some(dir.path().to_path_buf()),
        };
        let e = entry(1);
        let key = e.cache_key.clone();
        let first_root = tempfile::TempDir::new().unwrap();
        BvpsCache::open(&settings, first_root.path()).insert(e).unwrap();

        // another store root in this process starts with an empty memory tier
        let second_root = tempfile::TempDir::new().unwrap();
        let mut fresh = BvpsCache::open(&settings, second_root.path());
        let (found, tier) = fresh.lookup(&key).unwrap();
        assert_eq!(tier, CacheTier::Persist);
        assert_eq!(found.program_pretty, "fn(x: int) -> int = x");
        let (_, tier) = fresh.lookup(&key).unwrap();
        assert_eq!(tier, CacheTier::Mem);
    }

    #[test]
    fn explicit_dir_wins() {
        let settings = CacheSettings {
            persist: true,
            persist_dir: Some(PathBuf::from("/tmp/x")),
        };
        assert_eq!(settings.resolve_dir(), Some(PathBuf::from("/tmp/x")));
    }

    #[test]
    fn timing_views() {
        let mut t = OpTiming::default();
        t.record(2_000_000);
        t.record(1_000_000);
        assert_eq!(t.count, 2);
        assert_eq!(t.sum_ms(), 3.0);
        assert_eq!(t.max_us(), 2000.0);
    }
}
