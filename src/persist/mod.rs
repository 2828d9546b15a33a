/// SQLite-backed journal.
pub mod sqlite;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    patch::{PatchBatch, StoredBatch},
    types::BatchSeq,
};

/// Journal failures.
#[derive(Debug, Error)]
pub enum PersistError {
    /// Database error.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Stored patches failed to encode or decode.
    #[error("serde: {0}")]
    Serde(#[from] serde_json::Error),
    /// Anything else, such as a failed worker join.
    #[error("{0}")]
    Message(String),
}

/// Result alias for journal operations.
pub type PersistResult<T> = Result<T, PersistError>;

/// Compacted history covering every batch up to and including `last_seq`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistorySnapshot {
    /// Last sequence folded into `batches`.
    pub last_seq: BatchSeq,
    /// Compacted batches.
    pub batches: Vec<PatchBatch>,
}

/// Where the relay's persistence worker writes accepted batches.
///
/// Calls run on a blocking thread.
pub trait HistorySink: Send {
    /// Appends batches in sequence order; returns the last sequence written.
    fn append_batches(&mut self, batches: &[StoredBatch]) -> PersistResult<BatchSeq>;
    /// Makes prior appends durable.
    fn flush(&mut self) -> PersistResult<()> {
        Ok(())
    }
    /// Stores a compacted snapshot.
    fn write_snapshot(&mut self, _snapshot: &HistorySnapshot) -> PersistResult<()> {
        Ok(())
    }
    /// Deletes journal rows covered by a snapshot; returns the count removed.
    fn compact_through(&mut self, _seq: BatchSeq) -> PersistResult<usize> {
        Ok(0)
    }
}
