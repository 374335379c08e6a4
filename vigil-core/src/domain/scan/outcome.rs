// vigil-core/src/domain/scan/outcome.rs

use serde::{Deserialize, Serialize};

/// Result of applying one rule during a scan.
///
/// A failed rule still appears in the job's outcome list (with `error` set),
/// so operators can tell "rule matched nothing" from "rule is broken".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub rule_id: i64,
    /// New violations recorded for this rule (after deduplication).
    pub violations: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RuleOutcome {
    pub fn matched(rule_id: i64, violations: u64) -> Self {
        Self { rule_id, violations, error: None }
    }

    pub fn failed(rule_id: i64, reason: impl Into<String>) -> Self {
        Self { rule_id, violations: 0, error: Some(reason.into()) }
    }

    /// A rule that ran but whose stream broke partway: earlier batches stay
    /// committed, the reason is still reported.
    pub fn interrupted(rule_id: i64, violations: u64, reason: impl Into<String>) -> Self {
        Self { rule_id, violations, error: Some(reason.into()) }
    }
}
