// vigil-core/src/domain/scan/mod.rs

pub mod job;
pub mod outcome;
pub mod rule;
pub mod violation;

// --- RE-EXPORTS (FACADE PATTERN) ---
pub use job::{ScanJob, ScanStatus, progress_for};
pub use outcome::RuleOutcome;
pub use rule::{Rule, Severity, TargetConnection, TargetKind};
pub use violation::{Violation, ViolationRow, extract_record_id};
