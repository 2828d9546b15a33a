//! Relay event stream payloads.

use crate::{
    history::CompactionStats,
    types::{BatchSeq, ConnId},
};

/// Events emitted from the relay owner task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// A connection was registered and sent its bootstrap payload.
    Connected {
        /// New connection.
        conn: ConnId,
    },
    /// A connection left the live set.
    Disconnected {
        /// Departed connection.
        conn: ConnId,
    },
    /// A batch was appended to history and fanned out.
    BatchAccepted {
        /// Submitting connection.
        conn: ConnId,
        /// Assigned sequence.
        seq: BatchSeq,
        /// Number of peers the batch was queued for.
        delivered: usize,
    },
    /// A batch that does not apply to the relay's state was refused.
    Rejected {
        /// Submitting connection.
        conn: ConnId,
        /// Applier error.
        reason: String,
    },
    /// A retransmitted batch was skipped.
    DuplicateSkipped {
        /// Submitting connection.
        conn: ConnId,
    },
    /// A peer's outbound queue was full and a batch was dropped for it.
    Dropped {
        /// Slow connection.
        conn: ConnId,
    },
    /// History was compacted.
    Compacted {
        /// Before/after sizes.
        stats: CompactionStats,
    },
    /// Compaction failed; the uncompacted history stays authoritative.
    CompactionFailed {
        /// Failure description.
        reason: String,
    },
    /// The journal has persisted at least this sequence.
    DurableUpTo {
        /// Highest sequence known durable.
        seq: BatchSeq,
    },
}
