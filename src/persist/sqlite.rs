//! SQLite-backed append-only batch journal.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

use crate::{
    history::HistoryLog,
    patch::{StoredBatch, StoredBatchEnvelope, BATCH_FORMAT_VERSION},
    types::{BatchSeq, ConnId},
};

use super::{HistorySink, HistorySnapshot, PersistError, PersistResult};

const SNAPSHOT_FORMAT_VERSION: u16 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotEnvelope {
    format_version: u16,
    snapshot: HistorySnapshot,
}

/// SQLite implementation of [`crate::persist::HistorySink`].
pub struct SqliteHistorySink {
    conn: Connection,
}

impl SqliteHistorySink {
    /// Opens or creates a SQLite-backed journal at `path`.
    ///
    /// Enables WAL mode and sets `synchronous=NORMAL`.
    pub fn open(path: impl AsRef<Path>) -> PersistResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(conn)
    }

    /// Opens an in-memory journal.
    pub fn open_in_memory() -> PersistResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn)
    }

    fn init_connection(conn: Connection) -> PersistResult<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(Self { conn })
    }

    /// Rebuilds the relay history from the latest snapshot plus tail batches.
    pub fn load_history(&self) -> PersistResult<HistoryLog> {
        let (mut batches, mut last_seq) = match self.load_latest_snapshot()? {
            Some(snapshot) => (snapshot.batches, snapshot.last_seq),
            None => (Vec::new(), 0),
        };

        for stored in self.load_batches_after(last_seq)? {
            last_seq = stored.seq;
            batches.push(stored.patches);
        }
        Ok(HistoryLog::from_batches(batches, last_seq + 1))
    }

    /// Loads batches strictly after `seq`.
    pub fn load_batches_after(&self, seq: BatchSeq) -> PersistResult<Vec<StoredBatch>> {
        let mut stmt = self
            .conn
            .prepare("SELECT seq, ts_ms, origin, payload FROM batches WHERE seq > ?1 ORDER BY seq ASC")?;

        let rows = stmt.query_map(params![seq as i64], |row| {
            let seq: i64 = row.get(0)?;
            let ts_ms: i64 = row.get(1)?;
            let origin: Option<i64> = row.get(2)?;
            let payload: Vec<u8> = row.get(3)?;
            let mut stored = decode_batch_payload(&payload).map_err(|err| {
                rusqlite::Error::FromSqlConversionFailure(
                    payload.len(),
                    rusqlite::types::Type::Blob,
                    Box::new(std::io::Error::other(err)),
                )
            })?;
            stored.seq = seq as BatchSeq;
            stored.ts_ms = ts_ms as u64;
            stored.origin = origin.map(|o| o as ConnId);
            Ok(stored)
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Writes a compacted snapshot.
    pub fn write_snapshot(&mut self, snapshot: &HistorySnapshot) -> PersistResult<()> {
        let env = SnapshotEnvelope {
            format_version: SNAPSHOT_FORMAT_VERSION,
            snapshot: snapshot.clone(),
        };
        let payload = serde_json::to_vec(&env)?;
        self.conn.execute(
            "INSERT INTO snapshots(last_seq, ts_ms, payload) VALUES (?1, ?2, ?3)",
            params![snapshot.last_seq as i64, now_ms() as i64, payload],
        )?;
        Ok(())
    }

    /// Deletes batches up to and including `seq`, and snapshots older than the latest.
    pub fn compact_through(&mut self, seq: BatchSeq) -> PersistResult<usize> {
        let count = self
            .conn
            .execute("DELETE FROM batches WHERE seq <= ?1", params![seq as i64])?;
        self.conn.execute(
            "DELETE FROM snapshots WHERE id < (SELECT MAX(id) FROM snapshots)",
            [],
        )?;
        Ok(count)
    }

    /// Returns the latest sequence persisted in the batches table.
    pub fn latest_seq(&self) -> PersistResult<BatchSeq> {
        let seq: Option<i64> = self
            .conn
            .query_row("SELECT MAX(seq) FROM batches", [], |row| row.get(0))
            .optional()?
            .flatten();
        Ok(seq.unwrap_or(0) as BatchSeq)
    }

    fn load_latest_snapshot(&self) -> PersistResult<Option<HistorySnapshot>> {
        let payload: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT payload FROM snapshots ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        let Some(payload) = payload else {
            return Ok(None);
        };

        let env: SnapshotEnvelope = serde_json::from_slice(&payload)?;
        if env.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(PersistError::Message(
                "unsupported snapshot format".to_string(),
            ));
        }
        Ok(Some(env.snapshot))
    }
}

impl HistorySink for SqliteHistorySink {
    fn append_batches(&mut self, batches: &[StoredBatch]) -> PersistResult<BatchSeq> {
        if batches.is_empty() {
            return self.latest_seq();
        }

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO batches(seq, ts_ms, origin, payload) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for stored in batches {
                let payload = serde_json::to_vec(&StoredBatchEnvelope::new(stored.clone()))?;
                stmt.execute(params![
                    stored.seq as i64,
                    stored.ts_ms as i64,
                    stored.origin.map(|o| o as i64),
                    payload,
                ])?;
            }
        }
        tx.commit()?;

        Ok(batches.last().map(|b| b.seq).unwrap_or(0))
    }

    fn flush(&mut self) -> PersistResult<()> {
        self.conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);")?;
        Ok(())
    }

    fn write_snapshot(&mut self, snapshot: &HistorySnapshot) -> PersistResult<()> {
        SqliteHistorySink::write_snapshot(self, snapshot)
    }

    fn compact_through(&mut self, seq: BatchSeq) -> PersistResult<usize> {
        SqliteHistorySink::compact_through(self, seq)
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn decode_batch_payload(payload: &[u8]) -> Result<StoredBatch, String> {
    let envelope: StoredBatchEnvelope = serde_json::from_slice(payload)
        .map_err(|e| format!("batch payload decode failed: {e}"))?;
    if envelope.format_version != BATCH_FORMAT_VERSION {
        return Err(format!(
            "unsupported batch format version: {}",
            envelope.format_version
        ));
    }
    Ok(envelope.stored)
}
