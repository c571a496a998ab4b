//! BVPS solving: skill replay, then the program cache, then CEGIS.

use std::path::Path;

use eidolon_bvps::{
    cache_key, effective_seed, macros_hash, synthesize, BvpsCache, BvpsError, CacheEntry,
    CacheTier, MacroLibrary, Program, Spec, SynthesisStats,
};
use eidolon_skills::{admit, SkillRegistry, TrustedSkill};
use eidolon_store::{ArtifactRef, ArtifactStore};
use eidolon_verify::{BvpsFailure, BvpsSolution, ProgramSource};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::EidolonConfig;
use crate::error::EpisodeResult;

pub const REPORT_ARTIFACT_TYPE: &str = "bvps_report";

/// Result of the cache consultation for one solve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheOutcome {
    pub key: String,
    pub hit: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<CacheTier>,
}

impl CacheOutcome {
    /// `miss`, `hit:mem` or `hit:persist`.
    pub fn status(&self) -> String {
        match self.tier {
            Some(tier) => format!("hit:{}", tier.as_str()),
            None => "miss".to_string(),
        }
    }

    pub fn to_json(&self) -> Value {
        json!({"key": self.key, "hit": self.hit, "status": self.status()})
    }
}

/// Skill replayed instead of synthesizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsedSkill {
    pub name: String,
    pub spec_hash: String,
    pub bundle_hash: String,
    pub reverified: bool,
}

#[derive(Debug, Clone)]
pub struct Solved {
    pub solution: BvpsSolution,
    pub report: ArtifactRef,
    /// `None` when a skill was replayed.
    pub cache: Option<CacheOutcome>,
    pub used_skill: Option<UsedSkill>,
    pub patch_ids: Vec<String>,
}

/// CEGIS ran out of candidates.
#[derive(Debug, Clone)]
pub struct Unsolved {
    pub failure: BvpsFailure,
    pub report: ArtifactRef,
    pub cache: CacheOutcome,
    pub patch_ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum SolveOutcome {
    Solved(Solved),
    Unsolved(Unsolved),
}

/// Owns the program cache and counts synthesis calls across a suite.
#[derive(Debug)]
pub struct BvpsSolver {
    cache: BvpsCache,
    macros: MacroLibrary,
    registry: SkillRegistry,
    fastpath: bool,
    reverify: bool,
    cegis_calls: u64,
}

impl BvpsSolver {
    pub fn new(config: &EidolonConfig) -> Self {
        let root = &config.paths.root;
        let cache = BvpsCache::open(&config.bvps.cache_settings(), &config.paths.store_dir());
        Self::with_cache(root, cache, config)
    }

    pub fn with_cache(root: &Path, cache: BvpsCache, config: &EidolonConfig) -> Self {
        Self {
            cache,
            macros: MacroLibrary::new(root),
            registry: SkillRegistry::new(root),
            fastpath: config.bvps.fastpath,
            reverify: config.admission.reverify,
            cegis_calls: 0,
        }
    }

    pub fn cegis_calls(&self) -> u64 {
        self.cegis_calls
    }

    pub fn registry(&self) -> &SkillRegistry {
        &self.registry
    }

    pub fn cache_mut(&mut self) -> &mut BvpsCache {
        &mut self.cache
    }

    /// Produce a program for `spec` and store a report artifact.
    ///
    /// Skills are only replayed on the first attempt; a repair attempt
    /// always goes through the cache and CEGIS. Enumeration exhaustion is
    /// a [`SolveOutcome::Unsolved`] with its own report; every other
    /// synthesis error propagates.
    pub fn solve(
        &mut self,
        spec: &Spec,
        attempt: u32,
        store: &ArtifactStore,
        parents: &[String],
    ) -> EpisodeResult<SolveOutcome> {
        let spec_hash = spec.spec_hash()?;

        if attempt <= 1 && self.fastpath {
            if let Some((skill, reverified)) = self.trusted_skill(spec, store)? {
                let solution = BvpsSolution {
                    spec: spec.clone(),
                    program_pretty: skill.bundle.program.pretty(),
                    program_hash: skill.bundle.program.hash()?,
                    program: skill.bundle.program.clone(),
                    stats: replay_stats(spec, &skill.bundle.program),
                    attempt,
                    source: ProgramSource::Skill,
                };
                let used = UsedSkill {
                    name: skill.bundle.name.clone(),
                    spec_hash: spec_hash.clone(),
                    bundle_hash: skill.verdict.identity.bundle_hash.clone(),
                    reverified,
                };
                info!(
                    skill = %used.name,
                    bundle_hash = %used.bundle_hash,
                    "Replaying admitted skill"
                );
                let report = self.store_report(&solution, None, Some(&used), &[], store, parents)?;
                return Ok(SolveOutcome::Solved(Solved {
                    solution,
                    report,
                    cache: None,
                    used_skill: Some(used),
                    patch_ids: Vec::new(),
                }));
            }
        }

        let loaded = self.macros.load_for_spec(&spec.name)?;
        let key = cache_key(&spec_hash, &macros_hash(&loaded.macros)?, attempt)?;

        let (program, stats, source, outcome) = match self.cache.lookup(&key) {
            Some((entry, tier)) => {
                let source = match tier {
                    CacheTier::Mem => ProgramSource::CacheMem,
                    CacheTier::Persist => ProgramSource::CachePersist,
                };
                let outcome = CacheOutcome {
                    key,
                    hit: true,
                    tier: Some(tier),
                };
                (entry.program, entry.solve_bvps_stats, source, outcome)
            }
            None => {
                let synthesized = synthesize(spec, &loaded.macros, None);
                self.cegis_calls += 1;
                let (program, stats) = match synthesized {
                    Ok(found) => found,
                    Err(BvpsError::EnumerationExhausted {
                        tried,
                        max_programs,
                    }) => {
                        let failure = BvpsFailure {
                            spec: spec.clone(),
                            attempt,
                            tried,
                            max_programs,
                            error: BvpsError::EnumerationExhausted {
                                tried,
                                max_programs,
                            }
                            .to_string(),
                        };
                        warn!(spec = %spec.name, attempt, tried, "BVPS synthesis exhausted");
                        let cache = CacheOutcome {
                            key,
                            hit: false,
                            tier: None,
                        };
                        let report = self.store_failure_report(
                            &failure,
                            &cache,
                            &loaded.patch_ids,
                            store,
                            parents,
                        )?;
                        return Ok(SolveOutcome::Unsolved(Unsolved {
                            failure,
                            report,
                            cache,
                            patch_ids: loaded.patch_ids,
                        }));
                    }
                    Err(err) => return Err(err.into()),
                };
                let report = json!({
                    "spec_name": spec.name,
                    "spec_hash": spec_hash,
                    "attempt": attempt,
                    "candidates_tried": stats.candidates_tried,
                    "depth": stats.depth,
                });
                let entry =
                    CacheEntry::new(spec, &loaded.macros, attempt, &program, report, &stats)?;
                if let Err(err) = self.cache.insert(entry) {
                    warn!(spec = %spec.name, error = %err, "Could not cache synthesized program");
                }
                let outcome = CacheOutcome {
                    key,
                    hit: false,
                    tier: None,
                };
                (program, stats, ProgramSource::Cegis, outcome)
            }
        };
        debug!(spec = %spec.name, attempt, cache = %outcome.status(), "Solved BVPS spec");

        let solution = BvpsSolution {
            spec: spec.clone(),
            program_pretty: program.pretty(),
            program_hash: program.hash()?,
            program,
            stats,
            attempt,
            source,
        };
        let report = self.store_report(
            &solution,
            Some(&outcome),
            None,
            &loaded.patch_ids,
            store,
            parents,
        )?;
        Ok(SolveOutcome::Solved(Solved {
            solution,
            report,
            cache: Some(outcome),
            used_skill: None,
            patch_ids: loaded.patch_ids,
        }))
    }

    fn trusted_skill(
        &self,
        spec: &Spec,
        store: &ArtifactStore,
    ) -> EpisodeResult<Option<(TrustedSkill, bool)>> {
        let Some(skill) = self.registry.lookup(spec)? else {
            return Ok(None);
        };
        if !self.reverify {
            return Ok(Some((skill, false)));
        }
        let admission = admit(&skill.bundle, store)?;
        if admission.verdict.admitted && admission.verdict.identity == skill.verdict.identity {
            Ok(Some((skill, true)))
        } else {
            warn!(skill = %skill.bundle.name, "Stored skill failed re-verification");
            Ok(None)
        }
    }

    fn store_report(
        &self,
        solution: &BvpsSolution,
        cache: Option<&CacheOutcome>,
        skill: Option<&UsedSkill>,
        patch_ids: &[String],
        store: &ArtifactStore,
        parents: &[String],
    ) -> EpisodeResult<ArtifactRef> {
        let report = json!({
            "spec_name": solution.spec.name,
            "spec_hash": solution.spec.spec_hash()?,
            "attempt": solution.attempt,
            "source": solution.source,
            "program": solution.program,
            "program_pretty": solution.program_pretty,
            "program_hash": solution.program_hash,
            "stats": solution.stats,
            "bvps_cache": cache.map(CacheOutcome::to_json),
            "skill": skill,
            "active_language_patches": patch_ids,
        });
        Ok(store.put_json(&report, REPORT_ARTIFACT_TYPE, "bvps:solve", parents)?)
    }

    fn store_failure_report(
        &self,
        failure: &BvpsFailure,
        cache: &CacheOutcome,
        patch_ids: &[String],
        store: &ArtifactStore,
        parents: &[String],
    ) -> EpisodeResult<ArtifactRef> {
        let report = json!({
            "spec_name": failure.spec.name,
            "spec_hash": failure.spec.spec_hash()?,
            "attempt": failure.attempt,
            "status": "exhausted",
            "tried": failure.tried,
            "max_programs": failure.max_programs,
            "error": failure.error,
            "bvps_cache": cache.to_json(),
            "active_language_patches": patch_ids,
        });
        Ok(store.put_json(&report, REPORT_ARTIFACT_TYPE, "bvps:solve", parents)?)
    }
}

fn replay_stats(spec: &Spec, program: &Program) -> SynthesisStats {
    SynthesisStats {
        candidates_tried: 0,
        depth: program.body.depth(),
        counterexamples: Vec::new(),
        seed: effective_seed(spec, None),
        fuzz_trials: spec.bounds.fuzz_trials,
    }
}
