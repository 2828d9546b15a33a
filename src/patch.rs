//! Structural patch model and journal wrappers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{BatchSeq, ConnId};

/// Version number for serialized [`StoredBatchEnvelope`] payloads.
pub const BATCH_FORMAT_VERSION: u16 = 1;

/// Kind of structural edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    /// Overwrite an existing value.
    Replace,
    /// Insert a value, overwriting any existing one.
    Add,
    /// Delete a value.
    Remove,
}

/// One structural edit relative to a specific source state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    /// Edit kind.
    pub op: PatchOp,
    /// Field names and gift ids leading to the edited value.
    pub path: Vec<String>,
    /// Payload; absent for `remove` and for unsetting an optional field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl Patch {
    /// Builds a `replace` patch.
    pub fn replace(path: Vec<String>, value: Option<Value>) -> Self {
        Self {
            op: PatchOp::Replace,
            path,
            value,
        }
    }

    /// Builds an `add` patch.
    pub fn add(path: Vec<String>, value: Value) -> Self {
        Self {
            op: PatchOp::Add,
            path,
            value: Some(value),
        }
    }

    /// Builds a `remove` patch.
    pub fn remove(path: Vec<String>) -> Self {
        Self {
            op: PatchOp::Remove,
            path,
            value: None,
        }
    }
}

/// Forward patches of one accepted action, as sent over the wire.
pub type PatchBatch = Vec<Patch>;

/// Builds a path from string-ish segments.
pub fn path<I, S>(segments: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    segments.into_iter().map(Into::into).collect()
}

/// Concatenates batches into one replayable patch list.
pub fn flatten(batches: &[PatchBatch]) -> Vec<Patch> {
    batches.iter().flatten().cloned().collect()
}

/// Journal row metadata plus batch payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredBatch {
    /// Relay-assigned sequence.
    pub seq: BatchSeq,
    /// Acceptance timestamp in milliseconds.
    pub ts_ms: u64,
    /// Connection that submitted the batch; `None` for compacted batches.
    pub origin: Option<ConnId>,
    /// Forward patches.
    pub patches: PatchBatch,
}

/// Versioned wrapper for stable on-disk payload decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredBatchEnvelope {
    /// Payload format version.
    pub format_version: u16,
    /// Wrapped batch.
    pub stored: StoredBatch,
}

impl StoredBatchEnvelope {
    /// Constructs an envelope using [`BATCH_FORMAT_VERSION`].
    pub fn new(stored: StoredBatch) -> Self {
        Self {
            format_version: BATCH_FORMAT_VERSION,
            stored,
        }
    }
}
