use std::collections::BTreeMap;

use serde_json::json;

use super::{LaneCheck, LaneContext, LaneRunner, LaneStatus};
use crate::error::VerifyResult;

/// Cross-check of the other lanes' evidence.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnchorsLane;

impl LaneRunner for AnchorsLane {
    fn lane(&self) -> &'static str {
        "anchors"
    }

    fn check(&self, ctx: &LaneContext<'_>) -> VerifyResult<LaneCheck> {
        let mut statuses = BTreeMap::new();
        let mut anomalies = Vec::new();

        for verdict in ctx.prior.iter().filter(|v| v.lane != self.lane()) {
            statuses.insert(verdict.lane.clone(), verdict.status);
            if verdict.status != LaneStatus::Pass {
                continue;
            }
            if verdict.evidence.is_empty() {
                anomalies.push(format!("{} passed without evidence", verdict.lane));
            }
            for evidence in &verdict.evidence {
                if !ctx.store.contains(&evidence.hash) {
                    anomalies.push(format!(
                        "{} evidence {} is missing from the store",
                        verdict.lane, evidence.hash
                    ));
                }
            }
        }
        if statuses.is_empty() {
            anomalies.push("no lane verdicts to cross-check".to_string());
        }

        let ok = anomalies.is_empty();
        let check = LaneCheck::from_bool(ok, json!({"statuses": statuses, "anomalies": anomalies}));
        Ok(if ok {
            check
        } else {
            check.with_notes(anomalies.join("; "))
        })
    }
}
