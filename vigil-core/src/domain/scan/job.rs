// vigil-core/src/domain/scan/job.rs

use crate::domain::error::DomainError;
use crate::domain::scan::outcome::RuleOutcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of one scan: `created -> running -> {completed, failed, cancelled}`.
/// The `created` state is the job row insert itself (progress = 0); terminal
/// states are write-once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Running => "running",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
            ScanStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ScanStatus::Running)
    }

    /// Terminal states accept no further transitions; the store uses this
    /// to name the rejected transition when a late write is ignored.
    pub fn validate_transition(&self, to: ScanStatus) -> Result<(), DomainError> {
        if self.is_terminal() {
            return Err(DomainError::InvalidTransition {
                from: self.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ScanStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(ScanStatus::Running),
            "completed" => Ok(ScanStatus::Completed),
            "failed" => Ok(ScanStatus::Failed),
            "cancelled" => Ok(ScanStatus::Cancelled),
            other => Err(DomainError::UnknownStatus(other.to_string())),
        }
    }
}

/// Progress record for one scan. One instance per invocation, never reused.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanJob {
    pub id: i64,
    pub table_name: String,
    pub status: ScanStatus,
    pub records_scanned: u64,
    pub violations_found: u64,
    /// 0–100, non-decreasing, exactly 100 on completion.
    pub progress: u8,
    /// Per-rule results, so "no violations" and "rule broken" stay distinguishable.
    pub rule_results: Vec<RuleOutcome>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Percentage of the rule set attempted so far, rounded to the nearest point.
pub fn progress_for(rules_done: usize, rules_total: usize) -> u8 {
    if rules_total == 0 {
        return 100;
    }
    ((rules_done as f64 / rules_total as f64) * 100.0).round() as u8
}

// --- UNIT TESTS ---
#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn test_progress_rounding() {
        assert_eq!(progress_for(0, 3), 0);
        assert_eq!(progress_for(1, 3), 33);
        assert_eq!(progress_for(2, 3), 67);
        assert_eq!(progress_for(3, 3), 100);
        // Empty rule sets complete immediately
        assert_eq!(progress_for(0, 0), 100);
    }

    #[test]
    fn test_progress_is_monotonic() {
        for total in 1..=20usize {
            let mut last = 0u8;
            for done in 0..=total {
                let p = progress_for(done, total);
                assert!(p >= last, "progress regressed at {done}/{total}");
                last = p;
            }
            assert_eq!(last, 100);
        }
    }

    #[test]
    fn test_terminal_states_are_write_once() {
        assert!(ScanStatus::Running.validate_transition(ScanStatus::Completed).is_ok());
        assert!(ScanStatus::Running.validate_transition(ScanStatus::Cancelled).is_ok());
        for terminal in [ScanStatus::Completed, ScanStatus::Failed, ScanStatus::Cancelled] {
            let err = terminal.validate_transition(ScanStatus::Running);
            assert!(err.is_err(), "{terminal} must be terminal");
        }
    }

    #[test]
    fn test_status_round_trip() -> Result<()> {
        for s in [
            ScanStatus::Running,
            ScanStatus::Completed,
            ScanStatus::Failed,
            ScanStatus::Cancelled,
        ] {
            assert_eq!(ScanStatus::from_str(s.as_str())?, s);
        }
        assert!(ScanStatus::from_str("paused").is_err());
        Ok(())
    }
}
