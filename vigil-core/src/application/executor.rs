// vigil-core/src/application/executor.rs

use std::time::Instant;
use tracing::{debug, error, instrument, warn};

// Imports Hexagonaux
use crate::error::VigilError;
use crate::ports::connector::{BatchCursor, TargetConnector};

/// Hard cap on rows held in memory per batch while streaming rule matches.
pub const MAX_BATCH_ROWS: usize = 1000;

/// Columns worth indexing before a sweep, when the table has them.
const INDEX_CANDIDATES: [&str; 2] = ["created_date", "id"];

/// Opens the lazy match stream for one compiled rule query.
/// Batches come back capped at `MAX_BATCH_ROWS` however large the result is.
#[instrument(skip(connector), fields(query.len = query.len()))]
pub fn stream_matches(
    connector: &dyn TargetConnector,
    query: &str,
) -> Result<Box<dyn BatchCursor>, VigilError> {
    debug!("⚡ Opening match stream: {}", query);
    connector.stream(query, MAX_BATCH_ROWS)
}

/// Row count of one table, for the job's `records_scanned` metric.
/// Fail-soft: a count that cannot be computed degrades to 0 and the scan
/// goes on.
#[instrument(skip(connector))]
pub async fn get_record_count(connector: &dyn TargetConnector, table: &str) -> u64 {
    let start = Instant::now();
    let query = format!("SELECT count(*) FROM \"{}\"", table.replace('"', "\"\""));

    match connector.query_scalar(&query).await {
        Ok(count) => {
            debug!("✅ Counted {} records in {:.2?}", count, start.elapsed());
            count
        }
        Err(e) => {
            error!("❌ Record count failed for '{}': {}", table, e);
            0
        }
    }
}

/// Best-effort index warmup before scanning `table`. Read-mostly targets pay
/// the cost once; failures are logged and ignored, never fatal.
#[instrument(skip(connector))]
pub async fn ensure_scan_indexes(connector: &dyn TargetConnector, table: &str) {
    let columns = match connector.fetch_columns(table).await {
        Ok(columns) => columns,
        Err(e) => {
            warn!("⚠️  Cannot inspect '{}' for indexing: {}", table, e);
            return;
        }
    };

    for candidate in INDEX_CANDIDATES {
        if !columns.iter().any(|c| c.name == candidate) {
            continue;
        }
        let quoted_table = table.replace('"', "\"\"");
        let ddl = format!(
            "CREATE INDEX IF NOT EXISTS \"idx_{quoted_table}_{candidate}\" \
             ON \"{quoted_table}\" (\"{candidate}\")"
        );
        match connector.execute(&ddl).await {
            Ok(()) => debug!("✅ Index ready on {}.{}", table, candidate),
            Err(e) => warn!("⚠️  Index on {}.{} skipped: {}", table, candidate, e),
        }
    }
}

// --- UNIT TESTS ---
#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::infrastructure::adapters::DuckDbTarget;
    use anyhow::Result;

    #[tokio::test]
    async fn test_record_count_degrades_to_zero_on_error() -> Result<()> {
        let target = DuckDbTarget::new(":memory:")?;
        assert_eq!(get_record_count(&target, "missing_table").await, 0);

        target
            .execute("CREATE TABLE t AS SELECT range AS id FROM range(7)")
            .await?;
        assert_eq!(get_record_count(&target, "t").await, 7);
        Ok(())
    }

    #[tokio::test]
    async fn test_index_warmup_only_touches_known_columns() -> Result<()> {
        let target = DuckDbTarget::new(":memory:")?;
        target
            .execute("CREATE TABLE expenses (id INTEGER, created_date DATE, amount DOUBLE)")
            .await?;

        // Twice: IF NOT EXISTS must make the warmup idempotent
        ensure_scan_indexes(&target, "expenses").await;
        ensure_scan_indexes(&target, "expenses").await;

        let indexes = target
            .query_scalar(
                "SELECT count(*) FROM duckdb_indexes() WHERE table_name = 'expenses'",
            )
            .await?;
        assert_eq!(indexes, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_index_warmup_survives_a_missing_table() -> Result<()> {
        let target = DuckDbTarget::new(":memory:")?;
        // Must not panic or error, only log
        ensure_scan_indexes(&target, "nope").await;
        Ok(())
    }

    #[tokio::test]
    async fn test_stream_matches_respects_the_cap() -> Result<()> {
        let target = DuckDbTarget::new(":memory:")?;
        target
            .execute("CREATE TABLE t AS SELECT range AS id FROM range(3500)")
            .await?;

        let mut cursor = stream_matches(&target, "SELECT * FROM t")?;
        let mut total = 0usize;
        while let Some(batch) = cursor.next_batch()? {
            assert!(batch.len() <= MAX_BATCH_ROWS);
            total += batch.len();
        }
        assert_eq!(total, 3500);
        Ok(())
    }
}
