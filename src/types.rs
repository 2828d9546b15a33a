//! Shared primitive IDs used across the reducer, relay and journal.

/// Roster user identifier.
pub type UserId = u32;
/// Gift identifier; also the key in the gift map.
pub type GiftId = String;
/// Relay-assigned connection identifier.
pub type ConnId = u64;
/// Monotonic sequence assigned to each batch the relay accepts.
pub type BatchSeq = u64;
