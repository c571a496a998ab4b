//! Deterministic capsule archives.
//!
//! A capsule is a ustar archive with fixed metadata (mtime 0, mode 0644,
//! uid/gid 0) so equal members always produce equal bytes and therefore
//! the same artifact hash.

use std::io::Read;

use eidolon_codec::canonical_bytes;
use serde_json::Value;
use tar::{Archive, EntryType, Header};

use crate::error::EpisodeResult;

pub const CAPSULE_SUCCESS: &str = "capsule_success";
pub const CAPSULE_FAILURE: &str = "capsule_failure";

/// Members in archive order.
pub const CAPSULE_MEMBERS: [&str; 6] = [
    "task.json",
    "interpretation.json",
    "solution.json",
    "lanes.json",
    "decision.json",
    "repro.txt",
];

/// Inputs of one capsule.
#[derive(Debug, Clone)]
pub struct CapsuleContents {
    pub task: Value,
    pub interpretation: Value,
    pub solution: Value,
    pub lanes: Value,
    pub decision: Value,
    pub repro: String,
}

impl CapsuleContents {
    fn members(&self) -> EpisodeResult<Vec<(&'static str, Vec<u8>)>> {
        Ok(vec![
            ("task.json", canonical_bytes(&self.task)?),
            ("interpretation.json", canonical_bytes(&self.interpretation)?),
            ("solution.json", canonical_bytes(&self.solution)?),
            ("lanes.json", canonical_bytes(&self.lanes)?),
            ("decision.json", canonical_bytes(&self.decision)?),
            ("repro.txt", self.repro.clone().into_bytes()),
        ])
    }
}

/// Build the archive bytes.
pub fn build_capsule(contents: &CapsuleContents) -> EpisodeResult<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, data) in contents.members()? {
        let mut header = Header::new_ustar();
        header.set_entry_type(EntryType::Regular);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        builder.append_data(&mut header, name, data.as_slice())?;
    }
    Ok(builder.into_inner()?)
}

/// Member names and bytes of an archive, in order.
pub fn read_capsule(bytes: &[u8]) -> EpisodeResult<Vec<(String, Vec<u8>)>> {
    let mut archive = Archive::new(bytes);
    let mut members = Vec::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.to_string_lossy().into_owned();
        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;
        members.push((name, data));
    }
    Ok(members)
}

/// Human-readable reproduction notes stored as `repro.txt`.
pub fn repro_text(episode_id: &str, task: &str, seed: u64, kernel: &str) -> String {
    format!(
        "episode_id: {episode_id}\n\
         seed: {seed}\n\
         kernel: {kernel}\n\
         task: {task}\n\
         rerun: eidolon run --seed {seed} --kernel {kernel} '{task}'\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn contents() -> CapsuleContents {
        CapsuleContents {
            task: json!({"task": "ARITH: 1 + 1"}),
            interpretation: json!({"id": "arith:canonical"}),
            solution: json!({"kind": "arith", "output": 2}),
            lanes: json!({"recompute": "PASS"}),
            decision: json!({"action": "answer"}),
            repro: repro_text("ep-000000000000", "ARITH: 1 + 1", 0, "rule"),
        }
    }

    #[test]
    fn capsule_bytes_are_deterministic() {
        let a = build_capsule(&contents()).unwrap();
        let b = build_capsule(&contents()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn capsule_members_in_order() {
        let bytes = build_capsule(&contents()).unwrap();
        let members = read_capsule(&bytes).unwrap();
        let names: Vec<&str> = members.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, CAPSULE_MEMBERS);
        assert_eq!(members[0].1, br#"{"task":"ARITH: 1 + 1"}"#.to_vec());
        assert!(String::from_utf8_lossy(&members[5].1).contains("seed: 0"));
    }
}
