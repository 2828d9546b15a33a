//! Append-only batch log held by the relay, with compaction and dedup window.

use std::collections::VecDeque;

use hashbrown::HashMap;
use thiserror::Error;

use crate::{
    core::{
        apply::{apply_patches, PatchError},
        diff::diff_states,
    },
    model::State,
    patch::{flatten, Patch, PatchBatch},
    types::{BatchSeq, ConnId},
};

/// History that cannot be rebuilt from the initial state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompactionError {
    /// Replaying the log from the initial state failed; the log is untouched.
    #[error("replay failed at batch {index}: {source}")]
    Replay {
        /// Index of the failing batch.
        index: usize,
        /// Applier error.
        #[source]
        source: PatchError,
    },
}

/// Outcome of one compaction pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionStats {
    /// Batches before compaction.
    pub batches_before: usize,
    /// Patches before compaction.
    pub patches_before: usize,
    /// Patches after compaction (held in at most one batch).
    pub patches_after: usize,
}

/// Ordered forward-patch batches in relay acceptance order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryLog {
    batches: Vec<PatchBatch>,
    next_seq: BatchSeq,
}

impl HistoryLog {
    /// Empty log; the first append gets sequence `1`.
    pub fn new() -> Self {
        Self {
            batches: Vec::new(),
            next_seq: 1,
        }
    }

    /// Restores a log from previously accepted batches.
    pub fn from_batches(batches: Vec<PatchBatch>, next_seq: BatchSeq) -> Self {
        Self {
            batches,
            next_seq: next_seq.max(1),
        }
    }

    /// Appends `batch` and returns its sequence.
    pub fn append(&mut self, batch: PatchBatch) -> BatchSeq {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.batches.push(batch);
        seq
    }

    /// Accepted batches, oldest first.
    pub fn batches(&self) -> &[PatchBatch] {
        &self.batches
    }

    /// Number of batches held.
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    /// True when no batches are held.
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Total patches across all batches.
    pub fn patch_count(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }

    /// Sequence of the most recently accepted batch, `0` when none.
    pub fn latest_seq(&self) -> BatchSeq {
        self.next_seq.saturating_sub(1)
    }

    /// Whole log as one replayable patch list.
    pub fn flattened(&self) -> Vec<Patch> {
        flatten(&self.batches)
    }

    /// Replays the log from `initial`.
    pub fn replay(&self, initial: &State) -> Result<State, CompactionError> {
        replay(&self.batches, initial)
    }

    /// Replaces the log with one batch equivalent to it from `initial`.
    ///
    /// On error the log is left exactly as it was.
    pub fn compact(&mut self, initial: &State) -> Result<CompactionStats, CompactionError> {
        let batches_before = self.batches.len();
        let patches_before = self.patch_count();

        let compacted = compact(&self.batches, initial)?;
        let patches_after = compacted.iter().map(Vec::len).sum();
        self.batches = compacted;

        Ok(CompactionStats {
            batches_before,
            patches_before,
            patches_after,
        })
    }
}

impl Default for HistoryLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Collapses `batches` into at most one batch with the same effect from `initial`.
pub fn compact(batches: &[PatchBatch], initial: &State) -> Result<Vec<PatchBatch>, CompactionError> {
    let converged = replay(batches, initial)?;
    let patches = diff_states(initial, &converged);
    if patches.is_empty() {
        Ok(Vec::new())
    } else {
        Ok(vec![patches])
    }
}

/// Applies `batches` in order starting from `initial`.
pub fn replay(batches: &[PatchBatch], initial: &State) -> Result<State, CompactionError> {
    let mut state = initial.clone();
    for (index, batch) in batches.iter().enumerate() {
        state = apply_patches(&state, batch)
            .map_err(|source| CompactionError::Replay { index, source })?;
    }
    Ok(state)
}

/// Per-connection memory of recently accepted batches.
///
/// Suppresses a batch that equals one of the last `window` batches accepted
/// from the same connection. This only masks a client retransmission quirk;
/// a repeat outside the window is accepted again.
///
/// Windows are kept per connection on purpose. Comparing only with the last
/// batch appended relay-wide would miss a retransmission interleaved with
/// another peer's batch, and would skip identical edits sent by two peers.
#[derive(Debug, Clone, Default)]
pub struct RecentBatches {
    window: usize,
    seen: HashMap<ConnId, VecDeque<PatchBatch>>,
}

impl RecentBatches {
    /// Remembers up to `window` batches per connection; `0` disables suppression.
    pub fn new(window: usize) -> Self {
        Self {
            window,
            seen: HashMap::new(),
        }
    }

    /// True when `batch` equals a remembered batch from `conn`.
    pub fn is_duplicate(&self, conn: ConnId, batch: &PatchBatch) -> bool {
        self.seen
            .get(&conn)
            .is_some_and(|recent| recent.iter().any(|b| b == batch))
    }

    /// Records an accepted batch, evicting the oldest past the window.
    pub fn remember(&mut self, conn: ConnId, batch: &PatchBatch) {
        if self.window == 0 {
            return;
        }
        let recent = self.seen.entry(conn).or_default();
        if recent.len() == self.window {
            recent.pop_front();
        }
        recent.push_back(batch.clone());
    }

    /// Drops the window of a closed connection.
    pub fn forget(&mut self, conn: ConnId) {
        self.seen.remove(&conn);
    }
}
