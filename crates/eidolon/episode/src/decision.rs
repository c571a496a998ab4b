use std::fmt;

use eidolon_verify::{Critique, LaneStatus, LaneVerdict, Solution};
use serde::{Deserialize, Serialize};

use crate::error::EpisodeResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Answer,
    Refuse,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Answer => write!(f, "answer"),
            Action::Refuse => write!(f, "refuse"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,
    pub required_lanes: Vec<String>,
    pub failed_lanes: Vec<String>,
    pub rationale: String,
    pub critique: Critique,
}

impl Decision {
    pub fn answered(&self) -> bool {
        self.action == Action::Answer
    }
}

/// Answer iff every required lane passed. A required lane without a
/// verdict counts as failed.
pub fn decide(required: &[String], verdicts: &[LaneVerdict], critique: Critique) -> Decision {
    let failed_lanes: Vec<String> = required
        .iter()
        .filter(|lane| {
            !verdicts
                .iter()
                .any(|v| &v.lane == *lane && v.status == LaneStatus::Pass)
        })
        .cloned()
        .collect();

    let (action, rationale) = if failed_lanes.is_empty() {
        (Action::Answer, format!("all required lanes passed: {}", required.join(", ")))
    } else {
        let detail: Vec<String> = failed_lanes
            .iter()
            .map(|lane| {
                let status = verdicts
                    .iter()
                    .find(|v| &v.lane == lane)
                    .map(|v| v.status.to_string())
                    .unwrap_or_else(|| "MISSING".to_string());
                format!("{lane}={status}")
            })
            .collect();
        (
            Action::Refuse,
            format!("required lanes did not pass: {}", detail.join(", ")),
        )
    };

    Decision {
        action,
        required_lanes: required.to_vec(),
        failed_lanes,
        rationale,
        critique,
    }
}

/// `result=<output>` on answer, a refusal naming the failed lanes otherwise.
pub fn final_result(decision: &Decision, solution: &Solution) -> EpisodeResult<String> {
    Ok(match decision.action {
        Action::Answer => format!("result={}", solution.render_output()?),
        Action::Refuse => format!("refused: failed lanes [{}]", decision.failed_lanes.join(", ")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use eidolon_verify::Number;
    use std::collections::BTreeMap;

    fn verdict(lane: &str, status: LaneStatus) -> LaneVerdict {
        LaneVerdict {
            lane: lane.into(),
            status,
            cost_ms: 0.0,
            evidence: Vec::new(),
            notes: None,
            costs: BTreeMap::new(),
        }
    }

    fn critique() -> Critique {
        Critique {
            accept: true,
            notes: Vec::new(),
        }
    }

    fn required() -> Vec<String> {
        ["recompute", "translation", "consequence", "anchors"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn all_pass_answers() {
        let verdicts: Vec<_> = required().iter().map(|l| verdict(l, LaneStatus::Pass)).collect();
        let decision = decide(&required(), &verdicts, critique());
        assert!(decision.answered());
        let solution = Solution::Arith {
            expression: "2 + 3 * 4".into(),
            output: Number::Int(14),
        };
        assert_eq!(final_result(&decision, &solution).unwrap(), "result=14");
    }

    #[test]
    fn borderline_and_missing_lanes_refuse() {
        let verdicts = vec![
            verdict("recompute", LaneStatus::Pass),
            verdict("translation", LaneStatus::Borderline),
            verdict("consequence", LaneStatus::Pass),
        ];
        let decision = decide(&required(), &verdicts, critique());
        assert_eq!(decision.action, Action::Refuse);
        assert_eq!(decision.failed_lanes, vec!["translation", "anchors"]);
        assert!(decision.rationale.contains("translation=BORDERLINE"));
        assert!(decision.rationale.contains("anchors=MISSING"));
        let solution = Solution::Arith {
            expression: "1".into(),
            output: Number::Int(1),
        };
        assert_eq!(
            final_result(&decision, &solution).unwrap(),
            "refused: failed lanes [translation, anchors]"
        );
    }

    #[test]
    fn required_subset_ignores_other_lanes() {
        let verdicts = vec![
            verdict("recompute", LaneStatus::Pass),
            verdict("translation", LaneStatus::Fail),
        ];
        let decision = decide(&["recompute".to_string()], &verdicts, critique());
        assert!(decision.answered());
    }
}
