//! Configuration for the episode controller.
//!
//! Resolution order: built-in defaults, then an optional TOML file, then
//! `EIDOLON_*` environment variables. The CLI applies its flags last.

use std::path::{Path, PathBuf};

use eidolon_bvps::CacheSettings;
use eidolon_store::FlushMode;
use eidolon_verify::LANE_NAMES;
use serde::{Deserialize, Serialize};

use crate::error::{EpisodeError, EpisodeResult};

/// Main controller configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EidolonConfig {
    /// Filesystem layout
    #[serde(default)]
    pub paths: PathsConfig,

    /// Artifact store behaviour
    #[serde(default)]
    pub store: StoreConfig,

    /// Synthesis and cache switches
    #[serde(default)]
    pub bvps: BvpsConfig,

    /// Skill admission
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// Kernel collaborator
    #[serde(default)]
    pub kernel: KernelConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory holding the store, ledgers, skills and runs
    #[serde(default = "default_root")]
    pub root: PathBuf,

    #[serde(default)]
    pub runs_dir: Option<PathBuf>,

    #[serde(default)]
    pub ledger_chain: Option<PathBuf>,

    #[serde(default)]
    pub ledger_db: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            runs_dir: None,
            ledger_chain: None,
            ledger_db: None,
        }
    }
}

impl PathsConfig {
    pub fn store_dir(&self) -> PathBuf {
        self.root.join("artifact_store")
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.runs_dir.clone().unwrap_or_else(|| self.root.join("runs"))
    }

    pub fn ledger_chain(&self) -> PathBuf {
        self.ledger_chain
            .clone()
            .unwrap_or_else(|| self.root.join(eidolon_ledger::CHAIN_FILE))
    }

    pub fn ledger_db(&self) -> PathBuf {
        self.ledger_db
            .clone()
            .unwrap_or_else(|| self.root.join(eidolon_ledger::DB_FILE))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub flush_mode: FlushMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BvpsConfig {
    /// Keep the on-disk tier of the program cache
    #[serde(default = "default_true")]
    pub persist: bool,

    #[serde(default)]
    pub persist_dir: Option<PathBuf>,

    /// Re-synthesize once after a consequence counter-example
    #[serde(default = "default_true")]
    pub autorepair: bool,

    /// Replay admitted skills instead of synthesizing
    #[serde(default = "default_true")]
    pub fastpath: bool,
}

impl Default for BvpsConfig {
    fn default() -> Self {
        Self {
            persist: true,
            persist_dir: None,
            autorepair: true,
            fastpath: true,
        }
    }
}

impl BvpsConfig {
    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            persist: self.persist,
            persist_dir: self.persist_dir.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Compile and admit skills from verified BVPS episodes
    #[serde(default)]
    pub auto_skills: bool,

    /// Re-run the gates on a stored skill before replaying it
    #[serde(default)]
    pub reverify: bool,

    /// Lanes that must PASS for an answer
    #[serde(default = "default_required_lanes")]
    pub required_lanes: Vec<String>,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            auto_skills: false,
            reverify: false,
            required_lanes: default_required_lanes(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelConfig {
    #[serde(default = "default_kernel")]
    pub name: String,

    /// Worker threads recorded in the runtime section; defaults to the
    /// available parallelism
    #[serde(default)]
    pub threads: Option<usize>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            name: default_kernel(),
            threads: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_kernel() -> String {
    "rule".to_string()
}

fn default_required_lanes() -> Vec<String> {
    LANE_NAMES.iter().map(|l| l.to_string()).collect()
}

fn parse_flag(key: &str, value: &str) -> EpisodeResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "on" | "true" | "yes" => Ok(true),
        "0" | "off" | "false" | "no" | "" => Ok(false),
        other => Err(EpisodeError::Config(format!("{key}: expected on/off, got '{other}'"))),
    }
}

impl EidolonConfig {
    /// Rooted at `root` with every other setting at its default.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.paths.root = root.into();
        config
    }

    /// Load configuration from file
    ///
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> EpisodeResult<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_config_path() {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)?;
            toml::from_str(&contents).map_err(|e| {
                EpisodeError::Config(format!("{}: {e}", config_path.display()))
            })
        } else {
            Ok(Self::default())
        }
    }

    /// `EIDOLON_CONFIG` (or the default location) plus environment overrides.
    pub fn from_env() -> EpisodeResult<Self> {
        let explicit = std::env::var_os("EIDOLON_CONFIG").map(PathBuf::from);
        let mut config = Self::load(explicit.as_deref())?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// `<config_dir>/eidolon/config.toml`
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("eidolon").join("config.toml"))
    }

    /// Apply `EIDOLON_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> EpisodeResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = |key: &str| lookup(key).filter(|v| !v.trim().is_empty()).map(PathBuf::from);
        let flag = |key: &str| -> EpisodeResult<Option<bool>> {
            lookup(key).map(|v| parse_flag(key, &v)).transpose()
        };

        if let Some(root) = path("EIDOLON_ROOT") {
            self.paths.root = root;
        }
        if let Some(dir) = path("EIDOLON_RUNS_DIR") {
            self.paths.runs_dir = Some(dir);
        }
        if let Some(chain) = path("EIDOLON_LEDGER_CHAIN") {
            self.paths.ledger_chain = Some(chain);
        }
        if let Some(db) = path("EIDOLON_LEDGER_DB") {
            self.paths.ledger_db = Some(db);
        }

        if flag("EIDOLON_MANIFEST_BATCH")? == Some(true) {
            self.store.flush_mode = FlushMode::PerSuite;
        }
        if let Some(mode) = lookup("EIDOLON_STORE_MANIFEST_FLUSH_MODE") {
            self.store.flush_mode = mode.parse().map_err(|e| {
                EpisodeError::Config(format!("EIDOLON_STORE_MANIFEST_FLUSH_MODE: {e}"))
            })?;
        }

        if let Some(persist) = flag("EIDOLON_BVPS_PERSIST")? {
            self.bvps.persist = persist;
        }
        if let Some(dir) = path("EIDOLON_BVPS_PERSIST_DIR") {
            self.bvps.persist_dir = Some(dir);
        }
        if let Some(on) = flag("EIDOLON_BVPS_AUTOREPAIR")? {
            self.bvps.autorepair = on;
        }
        if let Some(on) = flag("EIDOLON_BVPS_FASTPATH")? {
            self.bvps.fastpath = on;
        }
        if let Some(on) = flag("EIDOLON_AUTO_SKILLS")? {
            self.admission.auto_skills = on;
        }
        if let Some(on) = flag("EIDOLON_ADMISSION_REVERIFY")? {
            self.admission.reverify = on;
        }

        if let Some(kernel) = lookup("EIDOLON_KERNEL").filter(|v| !v.trim().is_empty()) {
            self.kernel.name = kernel.trim().to_string();
        }
        if let Some(threads) = lookup("EIDOLON_THREADS") {
            let parsed = threads
                .trim()
                .parse::<usize>()
                .map_err(|e| EpisodeError::Config(format!("EIDOLON_THREADS: {e}")))?;
            self.kernel.threads = Some(parsed.max(1));
        }
        Ok(())
    }

    /// Reject settings that cannot produce a decision.
    pub fn validate(&self) -> EpisodeResult<()> {
        if self.admission.required_lanes.is_empty() {
            return Err(EpisodeError::Config("required_lanes must not be empty".into()));
        }
        for lane in &self.admission.required_lanes {
            if !LANE_NAMES.contains(&lane.as_str()) {
                return Err(EpisodeError::Config(format!("unknown lane '{lane}'")));
            }
        }
        Ok(())
    }

    pub fn threads(&self) -> usize {
        self.kernel.threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn overrides(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = EidolonConfig::default();
        assert_eq!(config.kernel.name, "rule");
        assert_eq!(config.store.flush_mode, FlushMode::PerEpisode);
        assert!(config.bvps.persist && config.bvps.autorepair && config.bvps.fastpath);
        assert!(!config.admission.auto_skills);
        assert_eq!(config.admission.required_lanes.len(), 4);
        assert_eq!(config.paths.runs_dir(), PathBuf::from("./runs"));
    }

    #[test]
    fn test_partial_toml() {
        let config: EidolonConfig = toml::from_str(
            r#"
            [paths]
            root = "/var/lib/eidolon"

            [admission]
            auto_skills = true
            "#,
        )
        .unwrap();
        assert!(config.admission.auto_skills);
        assert_eq!(config.paths.store_dir(), PathBuf::from("/var/lib/eidolon/artifact_store"));
        assert_eq!(
            config.paths.ledger_chain(),
            PathBuf::from("/var/lib/eidolon/ledger.chain.jsonl")
        );
        assert!(config.bvps.fastpath);
    }

    #[test]
    fn test_load_missing_config() {
        let config = EidolonConfig::load(Some(Path::new("/nonexistent/eidolon.toml"))).unwrap();
        assert_eq!(config, EidolonConfig::default());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = EidolonConfig::default();
        config
            .apply_overrides(overrides(&[
                ("EIDOLON_ROOT", "/tmp/eid"),
                ("EIDOLON_MANIFEST_BATCH", "1"),
                ("EIDOLON_BVPS_PERSIST", "off"),
                ("EIDOLON_AUTO_SKILLS", "on"),
                ("EIDOLON_KERNEL", "gguf"),
                ("EIDOLON_THREADS", "0"),
            ]))
            .unwrap();
        assert_eq!(config.paths.root, PathBuf::from("/tmp/eid"));
        assert_eq!(config.store.flush_mode, FlushMode::PerSuite);
        assert!(!config.bvps.persist);
        assert!(config.admission.auto_skills);
        assert_eq!(config.kernel.name, "gguf");
        assert_eq!(config.threads(), 1);
    }

    #[test]
    fn test_flush_mode_override_wins_over_batch() {
        let mut config = EidolonConfig::default();
        config
            .apply_overrides(overrides(&[
                ("EIDOLON_MANIFEST_BATCH", "1"),
                ("EIDOLON_STORE_MANIFEST_FLUSH_MODE", "per_episode"),
            ]))
            .unwrap();
        assert_eq!(config.store.flush_mode, FlushMode::PerEpisode);
    }

    #[test]
    fn test_bad_values_are_config_errors() {
        let mut config = EidolonConfig::default();
        let err = config
            .apply_overrides(overrides(&[("EIDOLON_BVPS_FASTPATH", "maybe")]))
            .unwrap_err();
        assert!(matches!(err, EpisodeError::Config(_)));

        config.admission.required_lanes = vec!["vibes".into()];
        assert!(config.validate().is_err());
    }
}
