// vigil-core/src/application/mod.rs

pub mod dispatcher;
pub mod executor;
pub mod scan;

// --- RE-EXPORTS (FACADE PATTERN) ---
pub use dispatcher::{ALL_TABLES, ScanDispatcher, job_name_for};
pub use scan::{TargetSpec, run_scan};
