// vigil-core/src/infrastructure/store.rs

use chrono::{DateTime, Utc};
use duckdb::{Connection, OptionalExt, params};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::warn;

use crate::domain::scan::{
    Rule, RuleOutcome, ScanJob, ScanStatus, Severity, TargetConnection, TargetKind, Violation,
    ViolationRow,
};
use crate::error::VigilError;
use crate::infrastructure::error::InfrastructureError;

/// The engine's own persistence: rules and connections (read side), scan
/// jobs (progress reporting) and violations (dedup + sink).
///
/// The `UNIQUE (rule_id, table_name, record_id)` constraint on violations is
/// the single correctness backstop for duplicate suppression: concurrent
/// scans may race past `filter_new_rows`, and the constraint absorbs the
/// collision (`INSERT OR IGNORE`).
const SCHEMA: &str = "
CREATE SEQUENCE IF NOT EXISTS seq_rules START 1;
CREATE SEQUENCE IF NOT EXISTS seq_connections START 1;
CREATE SEQUENCE IF NOT EXISTS seq_scan_jobs START 1;
CREATE SEQUENCE IF NOT EXISTS seq_violations START 1;

CREATE TABLE IF NOT EXISTS rules (
    id            BIGINT PRIMARY KEY DEFAULT nextval('seq_rules'),
    name          VARCHAR NOT NULL,
    description   VARCHAR NOT NULL DEFAULT '',
    severity      VARCHAR NOT NULL DEFAULT 'medium',
    \"condition\"   VARCHAR,
    sql_query     VARCHAR,
    target_table  VARCHAR NOT NULL,
    created_at    VARCHAR NOT NULL
);

CREATE TABLE IF NOT EXISTS target_connections (
    id          BIGINT PRIMARY KEY DEFAULT nextval('seq_connections'),
    name        VARCHAR NOT NULL,
    kind        VARCHAR NOT NULL,
    locator     VARCHAR NOT NULL,
    is_active   BOOLEAN NOT NULL DEFAULT false,
    created_at  VARCHAR NOT NULL
);

CREATE TABLE IF NOT EXISTS scan_jobs (
    id                BIGINT PRIMARY KEY DEFAULT nextval('seq_scan_jobs'),
    table_name        VARCHAR NOT NULL,
    status            VARCHAR NOT NULL DEFAULT 'running',
    records_scanned   BIGINT NOT NULL DEFAULT 0,
    violations_found  BIGINT NOT NULL DEFAULT 0,
    progress          INTEGER NOT NULL DEFAULT 0,
    rule_results      VARCHAR NOT NULL DEFAULT '[]',
    start_time        VARCHAR NOT NULL,
    end_time          VARCHAR
);

CREATE TABLE IF NOT EXISTS violations (
    id           BIGINT PRIMARY KEY DEFAULT nextval('seq_violations'),
    rule_id      BIGINT NOT NULL,
    table_name   VARCHAR NOT NULL,
    record_id    VARCHAR NOT NULL,
    detail       VARCHAR,
    detected_at  VARCHAR NOT NULL,
    UNIQUE (rule_id, table_name, record_id)
);

CREATE INDEX IF NOT EXISTS idx_violations_rule_id ON violations (rule_id);
CREATE INDEX IF NOT EXISTS idx_violations_table_name ON violations (table_name);
";

#[derive(Clone)]
pub struct ComplianceStore {
    conn: Arc<Mutex<Connection>>,
}

/// One row of the violation export: the violation plus the owning rule's
/// display fields, timestamps kept as RFC 3339 text.
#[derive(Debug, Clone)]
pub struct ViolationExport {
    pub id: i64,
    pub rule_id: i64,
    pub rule_name: String,
    pub severity: String,
    pub table_name: String,
    pub record_id: String,
    pub detected_at: String,
}

/// Insert payload for rule seeding (CRUD itself is plumbing, not engine work).
#[derive(Debug, Clone)]
pub struct NewRule {
    pub name: String,
    pub description: String,
    pub severity: Severity,
    pub condition: Option<String>,
    pub sql_query: Option<String>,
    pub target_table: String,
}

impl ComplianceStore {
    pub fn open(db_path: &str) -> Result<Self, InfrastructureError> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self, InfrastructureError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, VigilError> {
        self.conn.lock().map_err(|_| {
            VigilError::Infrastructure(InfrastructureError::Io(std::io::Error::other(
                "Store Mutex Poisoned",
            )))
        })
    }

    // --- RULES (read side + seeding) ---

    pub fn add_rule(&self, rule: NewRule) -> Result<Rule, VigilError> {
        let conn = self.lock()?;
        let id: i64 = conn.query_row(
            "INSERT INTO rules (name, description, severity, \"condition\", sql_query, target_table, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING id",
            params![
                rule.name,
                rule.description,
                rule.severity.as_str(),
                rule.condition,
                rule.sql_query,
                rule.target_table,
                Utc::now().to_rfc3339(),
            ],
            |row| row.get(0),
        )?;
        Ok(Rule {
            id,
            name: rule.name,
            description: rule.description,
            severity: rule.severity,
            condition: rule.condition,
            sql_query: rule.sql_query,
            target_table: rule.target_table,
        })
    }

    /// All rules, in the creation order scans apply them in.
    pub fn get_rules(&self) -> Result<Vec<Rule>, VigilError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, description, severity, \"condition\", sql_query, target_table
             FROM rules ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Rule {
                id: row.get(0)?,
                name: row.get(1)?,
                description: row.get(2)?,
                severity: Severity::from_str(&row.get::<_, String>(3)?)
                    .unwrap_or(Severity::Medium),
                condition: row.get(4)?,
                sql_query: row.get(5)?,
                target_table: row.get(6)?,
            })
        })?;
        let mut rules = Vec::new();
        for row in rows {
            rules.push(row.map_err(VigilError::from)?);
        }
        Ok(rules)
    }

    // --- CONNECTIONS (read side + registry plumbing) ---

    pub fn add_connection(
        &self,
        name: &str,
        kind: TargetKind,
        locator: &str,
    ) -> Result<TargetConnection, VigilError> {
        let conn = self.lock()?;
        let id: i64 = conn.query_row(
            "INSERT INTO target_connections (name, kind, locator, is_active, created_at)
             VALUES (?, ?, ?, false, ?) RETURNING id",
            params![name, kind.as_str(), locator, Utc::now().to_rfc3339()],
            |row| row.get(0),
        )?;
        Ok(TargetConnection {
            id,
            name: name.to_string(),
            kind,
            locator: locator.to_string(),
            active: false,
        })
    }

    /// Exclusive activation: at most one connection is active at a time.
    pub fn activate_connection(&self, id: i64) -> Result<(), VigilError> {
        let conn = self.lock()?;
        conn.execute_batch("BEGIN TRANSACTION")?;
        let result = conn
            .execute("UPDATE target_connections SET is_active = false", [])
            .and_then(|_| {
                conn.execute(
                    "UPDATE target_connections SET is_active = true WHERE id = ?",
                    params![id],
                )
            });
        match result {
            Ok(_) => {
                conn.execute_batch("COMMIT")?;
                Ok(())
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                Err(e.into())
            }
        }
    }

    pub fn get_active_connection(&self) -> Result<Option<TargetConnection>, VigilError> {
        let conn = self.lock()?;
        let found = conn
            .query_row(
                "SELECT id, name, kind, locator FROM target_connections
                 WHERE is_active LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        match found {
            None => Ok(None),
            Some((id, name, kind, locator)) => Ok(Some(TargetConnection {
                id,
                name,
                kind: TargetKind::from_str(&kind)?,
                locator,
                active: true,
            })),
        }
    }

    // --- SCAN JOBS ---

    /// Inserts the job row: this is the `created` transition (progress = 0).
    pub fn create_scan_job(&self, table_name: &str) -> Result<ScanJob, VigilError> {
        let start = Utc::now();
        let conn = self.lock()?;
        let id: i64 = conn.query_row(
            "INSERT INTO scan_jobs (table_name, status, start_time)
             VALUES (?, 'running', ?) RETURNING id",
            params![table_name, start.to_rfc3339()],
            |row| row.get(0),
        )?;
        Ok(ScanJob {
            id,
            table_name: table_name.to_string(),
            status: ScanStatus::Running,
            records_scanned: 0,
            violations_found: 0,
            progress: 0,
            rule_results: Vec::new(),
            start_time: start,
            end_time: None,
        })
    }

    pub fn get_scan_job(&self, id: i64) -> Result<Option<ScanJob>, VigilError> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                "SELECT id, table_name, status, records_scanned, violations_found,
                        progress, rule_results, start_time, end_time
                 FROM scan_jobs WHERE id = ?",
                params![id],
                raw_job,
            )
            .optional()?;
        raw.map(RawJob::into_job).transpose()
    }

    pub fn list_jobs(&self, limit: usize) -> Result<Vec<ScanJob>, VigilError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, table_name, status, records_scanned, violations_found,
                    progress, rule_results, start_time, end_time
             FROM scan_jobs ORDER BY id DESC LIMIT ?",
        )?;
        let rows = stmt.query_map(params![limit as i64], raw_job)?;
        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row.map_err(VigilError::from)?.into_job()?);
        }
        Ok(jobs)
    }

    /// Record-count metric, committed once the binder has attached.
    pub fn set_records_scanned(&self, job_id: i64, records: u64) -> Result<(), VigilError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE scan_jobs SET records_scanned = ? WHERE id = ? AND status = 'running'",
            params![records as i64, job_id],
        )?;
        Ok(())
    }

    /// Incremental progress commit after each rule; the only progress
    /// visibility callers have, so it runs even for zero-violation rules.
    pub fn update_scan_progress(
        &self,
        job_id: i64,
        progress: u8,
        violations_found: u64,
        outcomes: &[RuleOutcome],
    ) -> Result<(), VigilError> {
        let results = serde_json::to_string(outcomes)
            .map_err(|e| VigilError::InternalError(format!("Serialization: {e}")))?;
        let conn = self.lock()?;
        conn.execute(
            "UPDATE scan_jobs SET progress = ?, violations_found = ?, rule_results = ?
             WHERE id = ? AND status = 'running'",
            params![progress as i64, violations_found as i64, results, job_id],
        )?;
        Ok(())
    }

    pub fn complete_scan_job(
        &self,
        job_id: i64,
        violations_found: u64,
        records_scanned: u64,
    ) -> Result<(), VigilError> {
        self.finish(job_id, ScanStatus::Completed, move |conn| {
            conn.execute(
                "UPDATE scan_jobs SET status = 'completed', progress = 100,
                        violations_found = ?, records_scanned = ?, end_time = ?
                 WHERE id = ? AND status = 'running'",
                params![
                    violations_found as i64,
                    records_scanned as i64,
                    Utc::now().to_rfc3339(),
                    job_id
                ],
            )
        })
    }

    pub fn fail_scan_job(&self, job_id: i64) -> Result<(), VigilError> {
        self.finish(job_id, ScanStatus::Failed, move |conn| {
            conn.execute(
                "UPDATE scan_jobs SET status = 'failed', end_time = ?
                 WHERE id = ? AND status = 'running'",
                params![Utc::now().to_rfc3339(), job_id],
            )
        })
    }

    pub fn cancel_scan_job(&self, job_id: i64) -> Result<(), VigilError> {
        self.finish(job_id, ScanStatus::Cancelled, move |conn| {
            conn.execute(
                "UPDATE scan_jobs SET status = 'cancelled', end_time = ?
                 WHERE id = ? AND status = 'running'",
                params![Utc::now().to_rfc3339(), job_id],
            )
        })
    }

    /// Terminal transitions are write-once: the `status = 'running'` guard
    /// makes a late writer a no-op, which we log instead of failing.
    fn finish<F>(&self, job_id: i64, to: ScanStatus, update: F) -> Result<(), VigilError>
    where
        F: FnOnce(&Connection) -> Result<usize, duckdb::Error>,
    {
        let conn = self.lock()?;
        let changed = update(&conn)?;
        if changed == 0 {
            let current = conn
                .query_row(
                    "SELECT status FROM scan_jobs WHERE id = ?",
                    params![job_id],
                    |row| row.get::<_, String>(0),
                )
                .optional()?;
            match current {
                Some(current) => {
                    // Name the rejected transition in the log
                    if let Err(e) = ScanStatus::from_str(&current)?.validate_transition(to) {
                        warn!(job_id, "Ignored scan job transition: {}", e);
                    }
                }
                None => warn!(job_id, status = %to, "Ignored transition on unknown scan job"),
            }
        }
        Ok(())
    }

    // --- DEDUPLICATION FILTER ---

    /// Removes rows already recorded for `(rule_id, table)` in one bulk
    /// lookup. Not atomic with the insert; the unique constraint is the
    /// final authority under concurrent scans.
    pub fn filter_new_rows(
        &self,
        rule_id: i64,
        table: &str,
        batch: Vec<ViolationRow>,
    ) -> Result<Vec<ViolationRow>, VigilError> {
        if batch.is_empty() {
            return Ok(batch);
        }

        let id_list = batch
            .iter()
            .map(|row| format!("'{}'", row.record_id.replace('\'', "''")))
            .collect::<Vec<_>>()
            .join(", ");

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT record_id FROM violations
             WHERE rule_id = ? AND table_name = ? AND record_id IN ({id_list})"
        ))?;
        let rows = stmt.query_map(params![rule_id, table], |row| row.get::<_, String>(0))?;

        let mut existing: HashSet<String> = HashSet::new();
        for row in rows {
            existing.insert(row.map_err(VigilError::from)?);
        }
        drop(stmt);
        drop(conn);

        Ok(batch
            .into_iter()
            .filter(|row| !existing.contains(&row.record_id))
            .collect())
    }

    // --- VIOLATION SINK ---

    /// Bulk-inserts one batch inside one transaction (batch granularity is
    /// the executor's cap, bounding memory and transaction size). Each batch
    /// commit is independent: a later failure leaves prior batches durable.
    /// Returns the count actually inserted; racing duplicates are ignored
    /// by the constraint, not surfaced as failures.
    pub fn save_violations(
        &self,
        rule_id: i64,
        table: &str,
        rows: &[ViolationRow],
    ) -> Result<u64, VigilError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let detected_at = Utc::now().to_rfc3339();
        let conn = self.lock()?;
        conn.execute_batch("BEGIN TRANSACTION")?;

        let mut inserted: u64 = 0;
        let result: Result<(), VigilError> = (|| {
            let mut stmt = conn.prepare(
                "INSERT OR IGNORE INTO violations (rule_id, table_name, record_id, detail, detected_at)
                 VALUES (?, ?, ?, ?, ?)",
            )?;
            for row in rows {
                let detail = serde_json::to_string(&row.detail)
                    .map_err(|e| VigilError::InternalError(format!("Serialization: {e}")))?;
                inserted +=
                    stmt.execute(params![rule_id, table, row.record_id, detail, detected_at])?
                        as u64;
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                conn.execute_batch("COMMIT")?;
                Ok(inserted)
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    pub fn list_violations(&self, limit: usize) -> Result<Vec<Violation>, VigilError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, rule_id, table_name, record_id, detail, detected_at
             FROM violations ORDER BY id DESC LIMIT ?",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut violations = Vec::new();
        for row in rows {
            let (id, rule_id, table_name, record_id, detail, detected_at) =
                row.map_err(VigilError::from)?;
            violations.push(Violation {
                id,
                rule_id,
                table_name,
                record_id,
                detail: detail
                    .as_deref()
                    .map(serde_json::from_str)
                    .transpose()
                    .map_err(|e| VigilError::InternalError(format!("Corrupt detail: {e}")))?
                    .unwrap_or(serde_json::Value::Null),
                detected_at: parse_timestamp(&detected_at)?,
            });
        }
        Ok(violations)
    }

    /// One export page: violations joined with their rule's name and
    /// severity, ordered by id, starting strictly after `after_id`. Callers
    /// page with `after_id = last row's id` so exports of any size stay at
    /// one page of memory.
    pub fn list_violation_export(
        &self,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<ViolationExport>, VigilError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT v.id, v.rule_id, r.name, r.severity, v.table_name, v.record_id, v.detected_at
             FROM violations v
             LEFT JOIN rules r ON r.id = v.rule_id
             WHERE v.id > ?
             ORDER BY v.id
             LIMIT ?",
        )?;
        let rows = stmt.query_map(params![after_id, limit as i64], |row| {
            Ok(ViolationExport {
                id: row.get(0)?,
                rule_id: row.get(1)?,
                rule_name: row
                    .get::<_, Option<String>>(2)?
                    .unwrap_or_else(|| "<deleted rule>".to_string()),
                severity: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                table_name: row.get(4)?,
                record_id: row.get(5)?,
                detected_at: row.get(6)?,
            })
        })?;

        let mut page = Vec::new();
        for row in rows {
            page.push(row.map_err(VigilError::from)?);
        }
        Ok(page)
    }

    pub fn count_violations(&self) -> Result<u64, VigilError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT count(*) FROM violations", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

#[cfg(test)]
impl ComplianceStore {
    /// Raw SQL escape hatch so tests can inject store-side failures
    /// (dropped tables, corrupted rows).
    pub(crate) fn execute_raw(&self, sql: &str) -> Result<(), VigilError> {
        let conn = self.lock()?;
        conn.execute_batch(sql).map_err(VigilError::from)
    }
}

// --- ROW MAPPING HELPERS ---

struct RawJob {
    id: i64,
    table_name: String,
    status: String,
    records_scanned: i64,
    violations_found: i64,
    progress: i64,
    rule_results: String,
    start_time: String,
    end_time: Option<String>,
}

fn raw_job(row: &duckdb::Row<'_>) -> Result<RawJob, duckdb::Error> {
    Ok(RawJob {
        id: row.get(0)?,
        table_name: row.get(1)?,
        status: row.get(2)?,
        records_scanned: row.get(3)?,
        violations_found: row.get(4)?,
        progress: row.get(5)?,
        rule_results: row.get(6)?,
        start_time: row.get(7)?,
        end_time: row.get(8)?,
    })
}

impl RawJob {
    fn into_job(self) -> Result<ScanJob, VigilError> {
        Ok(ScanJob {
            id: self.id,
            table_name: self.table_name,
            status: ScanStatus::from_str(&self.status)?,
            records_scanned: self.records_scanned.max(0) as u64,
            violations_found: self.violations_found.max(0) as u64,
            progress: self.progress.clamp(0, 100) as u8,
            rule_results: serde_json::from_str(&self.rule_results)
                .map_err(|e| VigilError::InternalError(format!("Corrupt rule_results: {e}")))?,
            start_time: parse_timestamp(&self.start_time)?,
            end_time: self.end_time.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, VigilError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| VigilError::InternalError(format!("Corrupt timestamp '{raw}': {e}")))
}
