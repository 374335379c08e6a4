// vigil-core/src/application/dispatcher.rs

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use crate::application::scan::{TargetSpec, run_scan};
use crate::domain::scan::{ScanJob, TargetKind};
use crate::error::VigilError;
use crate::infrastructure::store::ComplianceStore;

/// Job name used for relational sweeps, which cover every table the rule
/// set targets rather than a single one.
pub const ALL_TABLES: &str = "All Tables";

/// Entry point for starting, cancelling and scheduling scans.
///
/// Each in-flight scan is paired with a cancellation flag keyed by job id;
/// `cancel_scan` raises the flag and the scan winds down cooperatively at
/// the next rule or batch boundary. Cloning the dispatcher shares the flag
/// registry and the store.
#[derive(Clone)]
pub struct ScanDispatcher {
    store: ComplianceStore,
    cancel_flags: Arc<Mutex<HashMap<i64, Arc<AtomicBool>>>>,
}

impl ScanDispatcher {
    pub fn new(store: ComplianceStore) -> Self {
        Self {
            store,
            cancel_flags: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &ComplianceStore {
        &self.store
    }

    /// Runs one scan to completion on the current task. Used by one-shot
    /// callers that want the finished job back.
    pub async fn scan_once(&self, spec: &TargetSpec) -> Result<ScanJob, VigilError> {
        let job = self.store.create_scan_job(&job_name_for(spec))?;
        let flag = self.register(job.id)?;
        let result = run_scan(&self.store, spec, job.id, &flag).await;
        self.deregister(job.id);
        result
    }

    /// Starts a scan in the background and returns its job id immediately.
    /// Progress is observable through the store; errors are logged by the
    /// background task and reflected in the job's terminal status.
    pub fn trigger_scan(&self, spec: TargetSpec) -> Result<i64, VigilError> {
        let job = self.store.create_scan_job(&job_name_for(&spec))?;
        let flag = self.register(job.id)?;
        let dispatcher = self.clone();
        let job_id = job.id;

        tokio::spawn(async move {
            if let Err(e) = run_scan(&dispatcher.store, &spec, job_id, &flag).await {
                error!("❌ Background scan job {} failed: {}", job_id, e);
            }
            dispatcher.deregister(job_id);
        });

        Ok(job_id)
    }

    /// Requests cancellation of a running scan. Returns `false` when no scan
    /// with that job id is in flight (already finished, or never started
    /// here).
    pub fn cancel_scan(&self, job_id: i64) -> bool {
        let flags = match self.cancel_flags.lock() {
            Ok(flags) => flags,
            Err(_) => return false,
        };
        match flags.get(&job_id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                info!("🛑 Cancellation requested for scan job {}", job_id);
                true
            }
            None => false,
        }
    }

    /// One periodic sweep over the active connection. Skips without creating
    /// a job when there is nothing to do: no active connection, or an empty
    /// rule set.
    #[instrument(skip(self))]
    pub async fn run_periodic_scan(&self) -> Result<Option<ScanJob>, VigilError> {
        let Some(connection) = self.store.get_active_connection()? else {
            info!("💤 Periodic sweep skipped: no active connection");
            return Ok(None);
        };
        if self.store.get_rules()?.is_empty() {
            info!("💤 Periodic sweep skipped: no rules defined");
            return Ok(None);
        }

        info!(
            "⏰ Periodic sweep of '{}' ({})",
            connection.name, connection.kind
        );
        let spec = TargetSpec {
            locator: connection.locator,
            kind: connection.kind,
        };
        self.scan_once(&spec).await.map(Some)
    }

    /// Sweeps the active connection every `interval_secs`, forever. A failed
    /// sweep is logged and the schedule keeps its cadence.
    pub async fn run_scheduler(&self, interval_secs: u64) {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        // The first tick fires immediately; the schedule starts one interval out
        ticker.tick().await;

        info!("📅 Scheduler armed, sweeping every {}s", interval_secs);
        loop {
            ticker.tick().await;
            if let Err(e) = self.run_periodic_scan().await {
                warn!("⚠️  Periodic sweep failed: {}", e);
            }
        }
    }

    fn register(&self, job_id: i64) -> Result<Arc<AtomicBool>, VigilError> {
        let flag = Arc::new(AtomicBool::new(false));
        self.cancel_flags
            .lock()
            .map_err(|_| VigilError::InternalError("Cancel registry poisoned".into()))?
            .insert(job_id, flag.clone());
        Ok(flag)
    }

    fn deregister(&self, job_id: i64) {
        if let Ok(mut flags) = self.cancel_flags.lock() {
            flags.remove(&job_id);
        }
    }
}

/// Human-facing job name: relational sweeps cover every targeted table,
/// flat-file scans are named after the uploaded file.
pub fn job_name_for(spec: &TargetSpec) -> String {
    match spec.kind {
        TargetKind::Relational => ALL_TABLES.to_string(),
        TargetKind::FlatFile => Path::new(&spec.locator)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| spec.locator.clone()),
    }
}

// --- UNIT TESTS ---
#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::domain::scan::{ScanStatus, Severity};
    use crate::infrastructure::store::NewRule;
    use anyhow::Result;
    use duckdb::Connection;
    use tempfile::TempDir;

    fn seeded_database(dir: &TempDir) -> Result<String> {
        let path = dir.path().join("target.duckdb");
        let conn = Connection::open(&path)?;
        conn.execute_batch(
            "CREATE TABLE expenses (id INTEGER, category VARCHAR);
             INSERT INTO expenses VALUES (1, 'personal'), (2, 'office')",
        )?;
        Ok(path.to_string_lossy().into_owned())
    }

    fn seed_rule(store: &ComplianceStore) -> Result<()> {
        store.add_rule(NewRule {
            name: "no personal spend".to_string(),
            description: String::new(),
            severity: Severity::Medium,
            condition: Some("category = 'personal'".to_string()),
            sql_query: None,
            target_table: "expenses".to_string(),
        })?;
        Ok(())
    }

    #[test]
    fn test_job_naming() {
        assert_eq!(job_name_for(&TargetSpec::relational("/x/db.duckdb")), ALL_TABLES);
        assert_eq!(
            job_name_for(&TargetSpec::flat_file("/uploads/Q3 Report.csv")),
            "Q3 Report.csv"
        );
    }

    #[test]
    fn test_cancel_unknown_job_is_a_noop() -> Result<()> {
        let dispatcher = ScanDispatcher::new(ComplianceStore::open_in_memory()?);
        assert!(!dispatcher.cancel_scan(999));
        Ok(())
    }

    #[tokio::test]
    async fn test_periodic_sweep_skips_without_active_connection() -> Result<()> {
        let dispatcher = ScanDispatcher::new(ComplianceStore::open_in_memory()?);
        assert!(dispatcher.run_periodic_scan().await?.is_none());
        assert!(dispatcher.store().list_jobs(10)?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_periodic_sweep_skips_without_rules() -> Result<()> {
        let dir = TempDir::new()?;
        let store = ComplianceStore::open_in_memory()?;
        let conn = store.add_connection(
            "prod",
            crate::domain::scan::TargetKind::Relational,
            &seeded_database(&dir)?,
        )?;
        store.activate_connection(conn.id)?;

        let dispatcher = ScanDispatcher::new(store);
        assert!(dispatcher.run_periodic_scan().await?.is_none());
        assert!(dispatcher.store().list_jobs(10)?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_periodic_sweep_runs_against_the_active_connection() -> Result<()> {
        let dir = TempDir::new()?;
        let store = ComplianceStore::open_in_memory()?;
        seed_rule(&store)?;
        let conn = store.add_connection(
            "prod",
            crate::domain::scan::TargetKind::Relational,
            &seeded_database(&dir)?,
        )?;
        store.activate_connection(conn.id)?;

        let dispatcher = ScanDispatcher::new(store);
        let job = dispatcher
            .run_periodic_scan()
            .await?
            .expect("sweep should run");
        assert_eq!(job.table_name, ALL_TABLES);
        assert_eq!(job.status, ScanStatus::Completed);
        assert_eq!(job.violations_found, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_trigger_scan_runs_in_the_background() -> Result<()> {
        let dir = TempDir::new()?;
        let store = ComplianceStore::open_in_memory()?;
        seed_rule(&store)?;
        let dispatcher = ScanDispatcher::new(store);

        let job_id = dispatcher.trigger_scan(TargetSpec::relational(seeded_database(&dir)?))?;

        // Poll the store until the background task lands the terminal state
        for _ in 0..200 {
            let job = dispatcher
                .store()
                .get_scan_job(job_id)?
                .expect("job was created");
            if job.status.is_terminal() {
                assert_eq!(job.status, ScanStatus::Completed);
                assert_eq!(job.violations_found, 1);
                // The cancel flag is gone once the scan has finished
                assert!(!dispatcher.cancel_scan(job_id));
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        anyhow::bail!("background scan never finished");
    }

    #[tokio::test]
    async fn test_scan_once_reports_the_finished_job() -> Result<()> {
        let dir = TempDir::new()?;
        let store = ComplianceStore::open_in_memory()?;
        seed_rule(&store)?;
        let dispatcher = ScanDispatcher::new(store);

        let job = dispatcher
            .scan_once(&TargetSpec::relational(seeded_database(&dir)?))
            .await?;
        assert_eq!(job.status, ScanStatus::Completed);
        assert_eq!(job.table_name, ALL_TABLES);
        Ok(())
    }
}
