// vigil-core/src/infrastructure/binder.rs

use duckdb::Connection;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{info, warn};

use crate::domain::scan::TargetKind;
use crate::infrastructure::adapters::DuckDbTarget;
use crate::infrastructure::error::InfrastructureError;
use crate::ports::connector::TargetConnector;

/// Fallback staging table name for files whose stem normalizes to nothing.
const DEFAULT_STAGING_TABLE: &str = "uploaded_data";

pub struct TargetBinder;

/// A read-capable handle on one scan target, owned exclusively by one scan.
/// Flat-file targets carry a staging store that MUST be released on every
/// exit path (`release()`), success or failure; `Drop` is the backstop.
pub struct BoundTarget {
    connector: Arc<DuckDbTarget>,
    staging: Option<StagingStore>,
}

/// Engine-private materialization of a flat file. Backed by a DuckDB file in
/// a temp directory, never `:memory:`: the staging write and the later rule
/// reads run on separate connections, and an in-memory store would be
/// invisible across them.
struct StagingStore {
    dir: TempDir,
    table: String,
}

impl TargetBinder {
    pub fn bind(locator: &str, kind: TargetKind) -> Result<BoundTarget, InfrastructureError> {
        match kind {
            TargetKind::Relational => Self::bind_relational(locator),
            TargetKind::FlatFile => Self::bind_flat_file(locator),
        }
    }

    fn bind_relational(locator: &str) -> Result<BoundTarget, InfrastructureError> {
        // DuckDB happily creates missing files; an absent locator must stay
        // a bind failure, not a silently empty database.
        if !Path::new(locator).is_file() {
            return Err(InfrastructureError::Bind(format!(
                "no database file at '{locator}'"
            )));
        }

        let connector = DuckDbTarget::new(locator).map_err(|e| {
            InfrastructureError::Bind(format!("cannot open database '{locator}': {e}"))
        })?;

        info!(locator, "Bound relational target");
        Ok(BoundTarget {
            connector: Arc::new(connector),
            staging: None,
        })
    }

    fn bind_flat_file(locator: &str) -> Result<BoundTarget, InfrastructureError> {
        let path = Path::new(locator);
        if !path.is_file() {
            return Err(InfrastructureError::Bind(format!(
                "no file at '{locator}'"
            )));
        }

        let table = path
            .file_stem()
            .map(|stem| normalize_identifier(&stem.to_string_lossy()))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_STAGING_TABLE.to_string());

        let dir = TempDir::new()?;
        let db_path = dir.path().join("staging.duckdb");
        let conn = Connection::open(&db_path)?;

        stage_csv(&conn, locator, &table)
            .map_err(|e| InfrastructureError::Bind(format!("malformed file '{locator}': {e}")))?;

        info!(locator, table, "Staged flat-file target");
        Ok(BoundTarget {
            connector: Arc::new(DuckDbTarget::from_connection(conn)),
            staging: Some(StagingStore { dir, table }),
        })
    }
}

impl BoundTarget {
    pub fn connector(&self) -> &dyn TargetConnector {
        self.connector.as_ref()
    }

    /// `Some(table)` in flat-file mode; rules are redirected onto it.
    pub fn staging_table(&self) -> Option<&str> {
        self.staging.as_ref().map(|s| s.table.as_str())
    }

    /// Frees the staging store (deletes the temp directory). Mandatory on
    /// every exit path; dropping the target without calling it still cleans
    /// up, but silently.
    pub fn release(mut self) {
        if let Some(staging) = self.staging.take() {
            let table = staging.table;
            match staging.dir.close() {
                Ok(()) => info!(table, "Released staging store"),
                Err(e) => warn!(table, "Staging store cleanup failed: {}", e),
            }
        }
    }
}

/// Loads the CSV into `table` with normalized column names and a synthetic
/// `id` when the file has none, so every staged row has a dedup identity.
fn stage_csv(conn: &Connection, locator: &str, table: &str) -> Result<(), duckdb::Error> {
    let source = format!("read_csv_auto('{}')", locator.replace('\'', "''"));

    // Header columns, in file order
    let mut stmt = conn.prepare(&format!("DESCRIBE SELECT * FROM {source}"))?;
    let headers: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<_, _>>()?;

    let mut projection: Vec<String> = Vec::with_capacity(headers.len() + 1);
    let mut seen: Vec<String> = Vec::with_capacity(headers.len());
    for header in &headers {
        let mut normalized = normalize_identifier(header);
        // Two headers may collapse onto one normalized name
        while seen.contains(&normalized) {
            normalized.push('_');
        }
        projection.push(format!(
            "\"{}\" AS \"{}\"",
            header.replace('"', "\"\""),
            normalized.replace('"', "\"\"")
        ));
        seen.push(normalized);
    }

    if !seen.iter().any(|c| c == "id") {
        projection.insert(0, "row_number() OVER () AS \"id\"".to_string());
    }

    conn.execute_batch(&format!(
        "CREATE TABLE \"{}\" AS SELECT {} FROM {source}",
        table.replace('"', "\"\""),
        projection.join(", ")
    ))
}

/// Lowercase, spaces to underscores; the same cleanup the upload surface
/// applies, so rule conditions written against cleaned names keep working.
fn normalize_identifier(raw: &str) -> String {
    raw.trim().to_lowercase().replace(' ', "_")
}
