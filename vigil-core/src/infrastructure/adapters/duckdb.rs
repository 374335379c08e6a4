// vigil-core/src/infrastructure/adapters/duckdb.rs

use async_trait::async_trait;
use duckdb::types::Value;
use duckdb::{Config, Connection};
use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use tracing::debug;

// Imports Hexagonaux
use crate::domain::scan::{ViolationRow, extract_record_id};
use crate::error::VigilError;
use crate::infrastructure::error::InfrastructureError;
use crate::ports::connector::{BatchCursor, ColumnSchema, TargetConnector};

pub struct DuckDbTarget {
    conn: Arc<Mutex<Connection>>,
}

impl DuckDbTarget {
    pub fn new(db_path: &str) -> Result<Self, InfrastructureError> {
        let config = Config::default();

        let conn = if db_path == ":memory:" {
            Connection::open_in_memory_with_flags(config)?
        } else {
            Connection::open_with_flags(db_path, config)?
        };

        Ok(Self::from_connection(conn))
    }

    /// Wraps an already-open connection (used by the binder after staging).
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, VigilError> {
        self.conn.lock().map_err(|_| {
            VigilError::Infrastructure(InfrastructureError::Io(std::io::Error::other(
                "DuckDB Mutex Poisoned",
            )))
        })
    }
}

#[async_trait]
impl TargetConnector for DuckDbTarget {
    async fn execute(&self, query: &str) -> Result<(), VigilError> {
        let conn = self.lock()?;
        conn.execute_batch(query).map_err(VigilError::from)
    }

    async fn query_scalar(&self, query: &str) -> Result<u64, VigilError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(query)?;
        let mut rows = stmt.query([])?;

        let row = rows
            .next()?
            .ok_or_else(|| VigilError::InternalError("No scalar value returned".into()))?;

        let value: u64 = row.get(0)?;
        Ok(value)
    }

    async fn fetch_columns(&self, table_name: &str) -> Result<Vec<ColumnSchema>, VigilError> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(&format!(
            "PRAGMA table_info('{}')",
            table_name.replace('\'', "''")
        ))?;

        let rows = stmt.query_map([], |row| {
            Ok(ColumnSchema {
                name: row.get("name")?,
                data_type: row.get("type")?,
                is_nullable: !row.get::<_, bool>("notnull")?,
            })
        })?;

        let mut columns = Vec::new();
        for row in rows {
            columns.push(row.map_err(VigilError::from)?);
        }

        Ok(columns)
    }

    fn stream(&self, query: &str, batch_size: usize) -> Result<Box<dyn BatchCursor>, VigilError> {
        // The worker gets its own connection to the same database instance:
        // the cursor must keep pulling while the primary handle stays usable.
        let worker_conn = self.lock()?.try_clone().map_err(VigilError::from)?;

        // Bounded to a single in-flight batch: the producer stalls until the
        // consumer has taken the previous one.
        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        let query = query.to_string();

        std::thread::spawn(move || {
            if let Err(e) = pump_rows(&worker_conn, &query, batch_size, &tx) {
                let _ = tx.send(Err(e));
            }
        });

        Ok(Box::new(DuckDbCursor { rx }))
    }

    fn engine_name(&self) -> &str {
        "duckdb"
    }
}

/// Pull side of the stream; owns the receiving half of the bounded channel.
struct DuckDbCursor {
    rx: Receiver<Result<Vec<ViolationRow>, duckdb::Error>>,
}

impl BatchCursor for DuckDbCursor {
    fn next_batch(&mut self) -> Result<Option<Vec<ViolationRow>>, VigilError> {
        match self.rx.recv() {
            Ok(Ok(batch)) => Ok(Some(batch)),
            Ok(Err(e)) => Err(VigilError::from(e)),
            // Sender dropped: the worker drained the result set
            Err(_) => Ok(None),
        }
    }
}

fn pump_rows(
    conn: &Connection,
    query: &str,
    batch_size: usize,
    tx: &SyncSender<Result<Vec<ViolationRow>, duckdb::Error>>,
) -> Result<(), duckdb::Error> {
    let columns = describe_columns(conn, query)?;

    let mut stmt = conn.prepare(query)?;
    let mut rows = stmt.query([])?;

    let mut batch: Vec<ViolationRow> = Vec::with_capacity(batch_size);
    while let Some(row) = rows.next()? {
        let mut snapshot = serde_json::Map::with_capacity(columns.len());
        for (idx, name) in columns.iter().enumerate() {
            let value: Value = row.get(idx)?;
            snapshot.insert(name.clone(), value_to_json(value));
        }
        let detail = serde_json::Value::Object(snapshot);
        let record_id = extract_record_id(&detail);
        batch.push(ViolationRow { record_id, detail });

        if batch.len() >= batch_size {
            let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
            if tx.send(Ok(full)).is_err() {
                // Consumer hung up; stop pulling rows
                return Ok(());
            }
        }
    }

    if !batch.is_empty() {
        let _ = tx.send(Ok(batch));
    }
    debug!("Row stream drained for query: {}", query);
    Ok(())
}

/// Result-column names for `query`, in projection order. DuckDB's DESCRIBE
/// works on any SELECT, which keeps the hot row loop free of statement
/// metadata calls.
fn describe_columns(conn: &Connection, query: &str) -> Result<Vec<String>, duckdb::Error> {
    let trimmed = query.trim().trim_end_matches(';');
    let mut stmt = conn.prepare(&format!("DESCRIBE {trimmed}"))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(0))?;
    names.collect()
}

/// Maps a DuckDB cell onto JSON so the snapshot round-trips losslessly for
/// the common scalar types; exotic types degrade to their debug rendering.
fn value_to_json(value: Value) -> serde_json::Value {
    use serde_json::json;
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Boolean(b) => json!(b),
        Value::TinyInt(i) => json!(i),
        Value::SmallInt(i) => json!(i),
        Value::Int(i) => json!(i),
        Value::BigInt(i) => json!(i),
        Value::UTinyInt(i) => json!(i),
        Value::USmallInt(i) => json!(i),
        Value::UInt(i) => json!(i),
        Value::UBigInt(i) => json!(i),
        Value::HugeInt(i) => json!(i.to_string()),
        Value::Float(f) => json!(f),
        Value::Double(f) => json!(f),
        Value::Text(s) => json!(s),
        Value::Blob(bytes) => json!(String::from_utf8_lossy(&bytes)),
        Value::List(values) => {
            serde_json::Value::Array(values.into_iter().map(value_to_json).collect())
        }
        other => json!(format!("{other:?}")),
    }
}
