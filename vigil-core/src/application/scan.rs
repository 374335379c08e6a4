// vigil-core/src/application/scan.rs

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{error, info, instrument, warn};

// Application Services
use crate::application::executor;

// Domain
use crate::domain::compiler::RuleCompiler;
use crate::domain::scan::violation::UNKNOWN_RECORD_ID;
use crate::domain::scan::{Rule, RuleOutcome, ScanJob, TargetKind, progress_for};

// Infrastructure
use crate::error::VigilError;
use crate::infrastructure::binder::{BoundTarget, TargetBinder};
use crate::infrastructure::store::ComplianceStore;
use crate::ports::connector::TargetConnector;

/// Explicit description of what one scan reads. Always provided by the
/// caller: the engine never consults ambient "currently active connection"
/// state mid-scan, so two concurrent scans can aim at two different targets
/// without racing each other.
#[derive(Debug, Clone)]
pub struct TargetSpec {
    pub locator: String,
    pub kind: TargetKind,
}

impl TargetSpec {
    pub fn relational(locator: impl Into<String>) -> Self {
        Self { locator: locator.into(), kind: TargetKind::Relational }
    }

    pub fn flat_file(locator: impl Into<String>) -> Self {
        Self { locator: locator.into(), kind: TargetKind::FlatFile }
    }
}

/// Runs one full scan against `spec`, driving the already-created job row
/// `job_id` from `running` to a terminal state. `cancel` is polled between
/// rules and between batches; setting it ends the scan cooperatively with
/// status `cancelled` (work already committed stays committed).
///
/// Returns the finished job. An `Err` means the job was marked `failed`.
#[instrument(skip(store, spec, cancel), fields(locator = %spec.locator, kind = %spec.kind))]
pub async fn run_scan(
    store: &ComplianceStore,
    spec: &TargetSpec,
    job_id: i64,
    cancel: &AtomicBool,
) -> Result<ScanJob, VigilError> {
    let start = Instant::now();
    info!("🚀 Starting scan job {}", job_id);

    // Binding is the one fatal setup step: no target, nothing to scan.
    let target = match TargetBinder::bind(&spec.locator, spec.kind) {
        Ok(target) => target,
        Err(e) => {
            error!("❌ Target binding failed: {}", e);
            store.fail_scan_job(job_id)?;
            return Err(e.into());
        }
    };

    let result = scan_bound_target(store, &target, job_id, cancel).await;
    // Staging cleanup on every exit path, success or not
    target.release();

    match result {
        Ok(job) => {
            info!(
                status = %job.status,
                violations = job.violations_found,
                "🏁 Scan job {} finished in {:.2?}",
                job_id,
                start.elapsed()
            );
            Ok(job)
        }
        Err(e) => {
            error!("❌ Scan job {} aborted: {}", job_id, e);
            store.fail_scan_job(job_id)?;
            Err(e)
        }
    }
}

async fn scan_bound_target(
    store: &ComplianceStore,
    target: &BoundTarget,
    job_id: i64,
    cancel: &AtomicBool,
) -> Result<ScanJob, VigilError> {
    let connector = target.connector();
    let staging = target.staging_table();

    // An unreadable rule set propagates out of here, which marks the job
    // failed; the job row must never be left running.
    let rules = store.get_rules()?;
    let rules = rules.as_slice();

    let tables = tables_to_scan(staging, rules);
    let mut records: u64 = 0;
    for table in &tables {
        records += executor::get_record_count(connector, table).await;
        executor::ensure_scan_indexes(connector, table).await;
    }
    store.set_records_scanned(job_id, records)?;

    let mut outcomes: Vec<RuleOutcome> = Vec::with_capacity(rules.len());
    let mut total_violations: u64 = 0;

    for (done, rule) in rules.iter().enumerate() {
        if cancel.load(Ordering::SeqCst) {
            warn!("🛑 Cancellation requested before rule {}", rule.id);
            store.update_scan_progress(
                job_id,
                progress_for(done, rules.len()),
                total_violations,
                &outcomes,
            )?;
            store.cancel_scan_job(job_id)?;
            return load_job(store, job_id);
        }

        let outcome = apply_rule(store, connector, rule, staging, cancel).await?;
        total_violations += outcome.violations;
        outcomes.push(outcome);

        // One commit per rule, violations or not: this is the only progress
        // visibility callers have.
        store.update_scan_progress(
            job_id,
            progress_for(done + 1, rules.len()),
            total_violations,
            &outcomes,
        )?;
    }

    // The flag may have been raised during the final rule's batches
    if cancel.load(Ordering::SeqCst) {
        store.cancel_scan_job(job_id)?;
        return load_job(store, job_id);
    }

    store.complete_scan_job(job_id, total_violations, records)?;
    load_job(store, job_id)
}

/// Applies one rule. Rule-level problems (uncompilable rule, broken target
/// query) are absorbed into the returned outcome so the scan can move on to
/// the next rule; an `Err` here means OUR store failed to persist, which is
/// fatal to the whole scan.
async fn apply_rule(
    store: &ComplianceStore,
    connector: &dyn TargetConnector,
    rule: &Rule,
    staging: Option<&str>,
    cancel: &AtomicBool,
) -> Result<RuleOutcome, VigilError> {
    let query = match RuleCompiler::compile(rule, staging) {
        Ok(query) => query,
        Err(e) => {
            warn!("⚠️  Rule {} not executable: {}", rule.id, e);
            return Ok(RuleOutcome::failed(rule.id, e.to_string()));
        }
    };

    // Violations are scoped to the table actually read
    let table = staging.unwrap_or(rule.target_table.as_str());

    let mut cursor = match executor::stream_matches(connector, &query) {
        Ok(cursor) => cursor,
        Err(e) => return Ok(RuleOutcome::failed(rule.id, e.to_string())),
    };

    let mut inserted: u64 = 0;
    loop {
        if cancel.load(Ordering::SeqCst) {
            return Ok(RuleOutcome::interrupted(rule.id, inserted, "scan cancelled"));
        }

        let batch = match cursor.next_batch() {
            Ok(Some(batch)) => batch,
            Ok(None) => break,
            // Target-side failure mid-stream: earlier batches stay committed
            Err(e) => {
                error!("❌ Match stream for rule {} failed: {}", rule.id, e);
                return Ok(RuleOutcome::interrupted(rule.id, inserted, e.to_string()));
            }
        };

        let unidentified = batch
            .iter()
            .filter(|row| row.record_id == UNKNOWN_RECORD_ID)
            .count();
        if unidentified > 0 {
            // These all collapse onto one dedup identity, at most one survives
            warn!(
                "⚠️  Rule {} on '{}': {} matching rows carry no recognizable identifier",
                rule.id, table, unidentified
            );
        }

        let fresh = store.filter_new_rows(rule.id, table, batch)?;
        inserted += store.save_violations(rule.id, table, &fresh)?;
    }

    Ok(RuleOutcome::matched(rule.id, inserted))
}

/// Tables the record-count and index warmup passes touch: the staging table
/// in flat-file mode, otherwise every distinct table the rule set targets.
fn tables_to_scan(staging: Option<&str>, rules: &[Rule]) -> Vec<String> {
    match staging {
        Some(table) => vec![table.to_string()],
        None => rules
            .iter()
            .map(|rule| rule.target_table.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect(),
    }
}

fn load_job(store: &ComplianceStore, job_id: i64) -> Result<ScanJob, VigilError> {
    store
        .get_scan_job(job_id)?
        .ok_or_else(|| VigilError::InternalError(format!("Scan job {job_id} vanished")))
}
