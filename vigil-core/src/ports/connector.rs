// vigil-core/src/ports/connector.rs

// This file defines what the engine needs from a scan target, without knowing
// how it's done. The coordinator talks to this trait only; whether rows come
// from a database file or a staged CSV is an infrastructure concern.

use crate::domain::scan::ViolationRow;
use crate::error::VigilError;
use async_trait::async_trait;

// Struct simple pour décrire une colonne (indépendant de la DB)
#[derive(Debug, Clone)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
}

/// Blocking pull over a lazy result stream. At most one batch (≤ the cap the
/// stream was opened with) is held in memory at a time, however large the
/// result set is.
pub trait BatchCursor: Send {
    /// `Ok(Some(batch))` until the stream is drained, then `Ok(None)`.
    /// An `Err` means query execution broke mid-stream; callers decide
    /// whether that is fatal (for Vigil it is fail-soft per rule).
    fn next_batch(&mut self) -> Result<Option<Vec<ViolationRow>>, VigilError>;
}

#[async_trait]
pub trait TargetConnector: Send + Sync {
    async fn execute(&self, query: &str) -> Result<(), VigilError>;

    async fn query_scalar(&self, query: &str) -> Result<u64, VigilError>;

    async fn fetch_columns(&self, table_name: &str) -> Result<Vec<ColumnSchema>, VigilError>;

    /// Opens a lazy, batched stream over `query` without materializing the
    /// result set in the caller's memory.
    fn stream(&self, query: &str, batch_size: usize) -> Result<Box<dyn BatchCursor>, VigilError>;

    fn engine_name(&self) -> &str;
}
