//! Relay owner task, its command handle and the persistence worker.

use std::{future, sync::Arc};

use hashbrown::HashMap;
use thiserror::Error;
use tokio::{
    sync::{broadcast, mpsc, mpsc::error::TrySendError, oneshot, Mutex},
    time::{Duration, Instant, Interval, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    config::RelayConfig,
    core::apply::apply_patches,
    history::{CompactionError, CompactionStats, HistoryLog, RecentBatches},
    model::State,
    patch::{PatchBatch, StoredBatch},
    persist::{sqlite::now_ms, HistorySink, HistorySnapshot, PersistError},
    types::{BatchSeq, ConnId},
};

use super::events::RelayEvent;

/// Relay failures surfaced through [`RelayHandle`].
#[derive(Debug, Error)]
pub enum RelayError {
    /// Journal write or snapshot failed.
    #[error(transparent)]
    Persist(#[from] PersistError),
    /// History no longer replays from the initial state.
    #[error(transparent)]
    Compaction(#[from] CompactionError),
    /// A frame was not a JSON patch list.
    #[error("malformed batch: {0}")]
    Codec(#[from] serde_json::Error),
    /// The connection id is not registered.
    #[error("unknown connection {0}")]
    UnknownConnection(ConnId),
    /// The owner task has stopped.
    #[error("relay channel closed")]
    ChannelClosed,
}

/// What happened to a submitted batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Appended to history and queued for every other open connection.
    Accepted {
        /// Assigned sequence.
        seq: BatchSeq,
        /// Peers the batch was queued for.
        delivered: usize,
    },
    /// Matched a recent batch from the same connection and was skipped.
    Duplicate,
    /// Empty batch; nothing to record.
    Empty,
    /// Did not apply to the relay's current state; neither recorded nor forwarded.
    Rejected,
}

/// A freshly registered connection.
///
/// The first frame on `outbound` is the bootstrap payload; broadcasts follow.
pub struct Joined {
    /// Relay-assigned id.
    pub id: ConnId,
    /// Frames to write to the peer, in order.
    pub outbound: mpsc::Receiver<Arc<str>>,
}

/// Cloneable front-end to the relay owner task.
pub struct RelayHandle {
    cmd_tx: mpsc::Sender<Command>,
    events_tx: broadcast::Sender<RelayEvent>,
    outbound_bound: usize,
}

impl Clone for RelayHandle {
    fn clone(&self) -> Self {
        Self {
            cmd_tx: self.cmd_tx.clone(),
            events_tx: self.events_tx.clone(),
            outbound_bound: self.outbound_bound,
        }
    }
}

enum Command {
    Join {
        outbound: mpsc::Sender<Arc<str>>,
        resp: oneshot::Sender<Result<ConnId, RelayError>>,
    },
    Submit {
        conn: ConnId,
        batch: PatchBatch,
        frame: Arc<str>,
        resp: oneshot::Sender<Result<SubmitOutcome, RelayError>>,
    },
    Leave {
        conn: ConnId,
        resp: oneshot::Sender<bool>,
    },
    History {
        resp: oneshot::Sender<Vec<PatchBatch>>,
    },
    ConnectionCount {
        resp: oneshot::Sender<usize>,
    },
    Compact {
        resp: oneshot::Sender<Result<Option<CompactionStats>, RelayError>>,
    },
    Flush {
        resp: oneshot::Sender<Result<BatchSeq, RelayError>>,
    },
    Shutdown {
        resp: oneshot::Sender<Result<(), RelayError>>,
    },
}

enum PersistMsg {
    Batch(StoredBatch),
    Snapshot(HistorySnapshot),
    Flush {
        resp: oneshot::Sender<Result<BatchSeq, PersistError>>,
    },
    Shutdown {
        resp: oneshot::Sender<()>,
    },
}

/// Starts the relay owner task.
///
/// `initial` is the state every client starts from; compaction replays history
/// against it. `history` seeds the log (empty, or reloaded from a journal) and
/// must replay cleanly from `initial`.
pub fn spawn_relay(
    initial: State,
    history: HistoryLog,
    sink: Option<Box<dyn HistorySink>>,
    config: RelayConfig,
) -> Result<RelayHandle, RelayError> {
    let converged = history.replay(&initial)?;
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(config.command_queue_bound.max(1));
    let (events_tx, _) = broadcast::channel::<RelayEvent>(1024);

    let (persist_tx, mut durable_rx) = if let Some(sink) = sink {
        let (persist_tx, persist_rx) = mpsc::channel::<PersistMsg>(config.persist_queue_bound.max(1));
        let (durable_tx, durable_rx) = mpsc::unbounded_channel::<Result<BatchSeq, PersistError>>();
        spawn_persistence_worker(sink, persist_rx, durable_tx, config.clone());
        (Some(persist_tx), Some(durable_rx))
    } else {
        (None, None)
    };

    let mut ticker = config.compaction_interval().map(|period| {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    let mut relay = Relay {
        initial,
        converged,
        history,
        conns: HashMap::new(),
        recent: RecentBatches::new(config.dedup_window),
        next_conn: 1,
        events_tx: events_tx.clone(),
        persist_tx,
        journal_dirty: false,
    };

    tokio::spawn(async move {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break; };
                    if relay.handle_command(cmd).await {
                        break;
                    }
                }
                durable = next_durable(&mut durable_rx) => {
                    match durable {
                        Some(Ok(seq)) => {
                            let _ = relay.events_tx.send(RelayEvent::DurableUpTo { seq });
                        }
                        Some(Err(err)) => warn!(error = %err, "journal write failed"),
                        None => durable_rx = None,
                    }
                }
                _ = next_tick(&mut ticker) => {
                    relay.compact_on_tick();
                }
            }
        }
        relay.conns.clear();
        debug!("relay owner task stopped");
    });

    Ok(RelayHandle {
        cmd_tx,
        events_tx,
        outbound_bound: config.outbound_queue_bound.max(1),
    })
}

impl RelayHandle {
    /// Subscribes to relay events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.events_tx.subscribe()
    }

    /// Registers a connection and queues its bootstrap frame.
    pub async fn join(&self) -> Result<Joined, RelayError> {
        let (tx, rx) = mpsc::channel(self.outbound_bound);
        let id = self
            .request(|resp| Command::Join { outbound: tx, resp })
            .await??;
        Ok(Joined { id, outbound: rx })
    }

    /// Submits a decoded batch; peers receive its JSON encoding.
    pub async fn submit(&self, conn: ConnId, batch: PatchBatch) -> Result<SubmitOutcome, RelayError> {
        let frame: Arc<str> = serde_json::to_string(&batch)?.into();
        self.request(|resp| Command::Submit {
            conn,
            batch,
            frame,
            resp,
        })
        .await?
    }

    /// Submits a raw text frame; peers receive it verbatim.
    pub async fn submit_frame(&self, conn: ConnId, text: String) -> Result<SubmitOutcome, RelayError> {
        let batch: PatchBatch = serde_json::from_str(&text)?;
        let frame: Arc<str> = text.into();
        self.request(|resp| Command::Submit {
            conn,
            batch,
            frame,
            resp,
        })
        .await?
    }

    /// Removes a connection; returns false if it was already gone.
    pub async fn leave(&self, conn: ConnId) -> Result<bool, RelayError> {
        self.request(|resp| Command::Leave { conn, resp }).await
    }

    /// Accepted batches in relay order.
    pub async fn history(&self) -> Result<Vec<PatchBatch>, RelayError> {
        self.request(|resp| Command::History { resp }).await
    }

    /// Number of open connections.
    pub async fn connection_count(&self) -> Result<usize, RelayError> {
        self.request(|resp| Command::ConnectionCount { resp }).await
    }

    /// Compacts immediately, regardless of log length.
    pub async fn compact_now(&self) -> Result<Option<CompactionStats>, RelayError> {
        self.request(|resp| Command::Compact { resp }).await?
    }

    /// Waits for queued journal writes; returns the highest durable sequence.
    pub async fn flush(&self) -> Result<BatchSeq, RelayError> {
        self.request(|resp| Command::Flush { resp }).await?
    }

    /// Flushes the journal and stops the owner task.
    pub async fn shutdown(&self) -> Result<(), RelayError> {
        self.request(|resp| Command::Shutdown { resp }).await?
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| RelayError::ChannelClosed)?;
        rx.await.map_err(|_| RelayError::ChannelClosed)
    }
}

struct Relay {
    initial: State,
    // `history` replayed from `initial`.
    converged: State,
    history: HistoryLog,
    conns: HashMap<ConnId, mpsc::Sender<Arc<str>>>,
    recent: RecentBatches,
    next_conn: ConnId,
    events_tx: broadcast::Sender<RelayEvent>,
    persist_tx: Option<mpsc::Sender<PersistMsg>>,
    // Set when a journal write was not queued; the next compaction, flush or
    // shutdown snapshots.
    journal_dirty: bool,
}

impl Relay {
    async fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Join { outbound, resp } => {
                let _ = resp.send(self.join(outbound));
            }
            Command::Submit {
                conn,
                batch,
                frame,
                resp,
            } => {
                let _ = resp.send(self.submit(conn, batch, frame));
            }
            Command::Leave { conn, resp } => {
                let _ = resp.send(self.leave(conn));
            }
            Command::History { resp } => {
                let _ = resp.send(self.history.batches().to_vec());
            }
            Command::ConnectionCount { resp } => {
                let _ = resp.send(self.conns.len());
            }
            Command::Compact { resp } => {
                let _ = resp.send(self.compact(true));
            }
            Command::Flush { resp } => {
                self.repair_journal().await;
                let out = if let Some(tx) = &self.persist_tx {
                    let (flush_tx, flush_rx) = oneshot::channel();
                    if tx.send(PersistMsg::Flush { resp: flush_tx }).await.is_err() {
                        Err(RelayError::ChannelClosed)
                    } else {
                        flush_rx
                            .await
                            .map_err(|_| RelayError::ChannelClosed)
                            .and_then(|r| r.map_err(RelayError::from))
                    }
                } else {
                    Ok(self.history.latest_seq())
                };
                let _ = resp.send(out);
            }
            Command::Shutdown { resp } => {
                self.repair_journal().await;
                let out = if let Some(tx) = self.persist_tx.take() {
                    let (done_tx, done_rx) = oneshot::channel();
                    if tx.send(PersistMsg::Shutdown { resp: done_tx }).await.is_err() {
                        Err(RelayError::ChannelClosed)
                    } else {
                        done_rx.await.map_err(|_| RelayError::ChannelClosed)
                    }
                } else {
                    Ok(())
                };
                let _ = resp.send(out);
                return true;
            }
        }

        false
    }

    fn join(&mut self, outbound: mpsc::Sender<Arc<str>>) -> Result<ConnId, RelayError> {
        let bootstrap: Arc<str> = serde_json::to_string(&self.history.flattened())?.into();
        // The queue is fresh, so this only fails if the peer is already gone.
        outbound
            .try_send(bootstrap)
            .map_err(|_| RelayError::ChannelClosed)?;

        let id = self.next_conn;
        self.next_conn += 1;
        self.conns.insert(id, outbound);

        info!(conn = id, batches = self.history.len(), "connection opened");
        let _ = self.events_tx.send(RelayEvent::Connected { conn: id });
        Ok(id)
    }

    fn submit(
        &mut self,
        conn: ConnId,
        batch: PatchBatch,
        frame: Arc<str>,
    ) -> Result<SubmitOutcome, RelayError> {
        if !self.conns.contains_key(&conn) {
            return Err(RelayError::UnknownConnection(conn));
        }
        if batch.is_empty() {
            return Ok(SubmitOutcome::Empty);
        }
        if self.recent.is_duplicate(conn, &batch) {
            debug!(conn, "duplicate batch skipped");
            let _ = self.events_tx.send(RelayEvent::DuplicateSkipped { conn });
            return Ok(SubmitOutcome::Duplicate);
        }

        let converged = match apply_patches(&self.converged, &batch) {
            Ok(state) => state,
            Err(err) => {
                warn!(conn, error = %err, "batch does not apply to relay state; rejected");
                let _ = self.events_tx.send(RelayEvent::Rejected {
                    conn,
                    reason: err.to_string(),
                });
                return Ok(SubmitOutcome::Rejected);
            }
        };
        self.converged = converged;

        self.recent.remember(conn, &batch);
        let journaled = self.persist_tx.is_some().then(|| batch.clone());
        let seq = self.history.append(batch);
        if let Some(patches) = journaled {
            self.journal(StoredBatch {
                seq,
                ts_ms: now_ms(),
                origin: Some(conn),
                patches,
            });
        }

        let delivered = self.broadcast(conn, &frame);
        debug!(conn, seq, delivered, "batch accepted");
        let _ = self.events_tx.send(RelayEvent::BatchAccepted {
            conn,
            seq,
            delivered,
        });
        Ok(SubmitOutcome::Accepted { seq, delivered })
    }

    fn leave(&mut self, conn: ConnId) -> bool {
        let removed = self.conns.remove(&conn).is_some();
        if removed {
            self.recent.forget(conn);
            info!(conn, "connection closed");
            let _ = self.events_tx.send(RelayEvent::Disconnected { conn });
        }
        removed
    }

    /// Queues `frame` for every open connection except `from`.
    ///
    /// Never waits on a peer: a full queue drops the frame for that peer and a
    /// closed queue removes the peer.
    fn broadcast(&mut self, from: ConnId, frame: &Arc<str>) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();

        for (&id, tx) in self.conns.iter() {
            if id == from {
                continue;
            }
            match tx.try_send(Arc::clone(frame)) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(conn = id, "outbound queue full; batch dropped for slow peer");
                    let _ = self.events_tx.send(RelayEvent::Dropped { conn: id });
                }
                Err(TrySendError::Closed(_)) => closed.push(id),
            }
        }

        for id in closed {
            self.leave(id);
        }
        delivered
    }

    fn compact(&mut self, force: bool) -> Result<Option<CompactionStats>, RelayError> {
        if !force && self.history.len() <= 1 && !self.journal_dirty {
            return Ok(None);
        }

        let stats = self.history.compact(&self.initial)?;
        debug!(
            batches_before = stats.batches_before,
            patches_before = stats.patches_before,
            patches_after = stats.patches_after,
            "history compacted"
        );
        let _ = self.events_tx.send(RelayEvent::Compacted { stats });
        self.snapshot();
        Ok(Some(stats))
    }

    fn compact_on_tick(&mut self) {
        if let Err(err) = self.compact(false) {
            warn!(error = %err, "compaction failed; keeping uncompacted history");
            let _ = self.events_tx.send(RelayEvent::CompactionFailed {
                reason: err.to_string(),
            });
        }
    }

    fn journal(&mut self, stored: StoredBatch) {
        let Some(tx) = &self.persist_tx else {
            return;
        };
        if let Err(err) = tx.try_send(PersistMsg::Batch(stored)) {
            warn!(error = %err, "journal queue rejected batch; next compaction will snapshot");
            self.journal_dirty = true;
        }
    }

    /// Writes a snapshot if a journal write was lost, waiting for queue space.
    async fn repair_journal(&mut self) {
        if !self.journal_dirty {
            return;
        }
        let Some(tx) = &self.persist_tx else {
            return;
        };
        let snapshot = HistorySnapshot {
            last_seq: self.history.latest_seq(),
            batches: self.history.batches().to_vec(),
        };
        if tx.send(PersistMsg::Snapshot(snapshot)).await.is_ok() {
            debug!("journal repaired with a snapshot");
            self.journal_dirty = false;
        }
    }

    fn snapshot(&mut self) {
        let Some(tx) = &self.persist_tx else {
            return;
        };
        let snapshot = HistorySnapshot {
            last_seq: self.history.latest_seq(),
            batches: self.history.batches().to_vec(),
        };
        match tx.try_send(PersistMsg::Snapshot(snapshot)) {
            Ok(()) => self.journal_dirty = false,
            Err(err) => {
                warn!(error = %err, "journal queue rejected snapshot");
                self.journal_dirty = true;
            }
        }
    }
}

async fn next_durable(
    rx: &mut Option<mpsc::UnboundedReceiver<Result<BatchSeq, PersistError>>>,
) -> Option<Result<BatchSeq, PersistError>> {
    match rx {
        Some(rx) => rx.recv().await,
        None => future::pending().await,
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => future::pending::<()>().await,
    }
}

fn spawn_persistence_worker(
    sink: Box<dyn HistorySink>,
    mut rx: mpsc::Receiver<PersistMsg>,
    durable_tx: mpsc::UnboundedSender<Result<BatchSeq, PersistError>>,
    config: RelayConfig,
) {
    let sink = Arc::new(Mutex::new(sink));
    let latency = Duration::from_millis(config.batch_max_latency_ms);
    tokio::spawn(async move {
        let mut buf = Vec::<StoredBatch>::new();
        let mut deadline = Instant::now() + latency;
        let mut last_durable: BatchSeq = 0;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else {
                        let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                        break;
                    };

                    match msg {
                        PersistMsg::Batch(stored) => {
                            buf.push(stored);
                            if buf.len() >= config.batch_max_ops {
                                let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                                deadline = Instant::now() + latency;
                            }
                        }
                        PersistMsg::Snapshot(snapshot) => {
                            let flush_result = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                            if flush_result.is_ok() {
                                let sink_ref = Arc::clone(&sink);
                                let result = tokio::task::spawn_blocking(move || {
                                    let mut sink = sink_ref.blocking_lock();
                                    sink.write_snapshot(&snapshot)?;
                                    sink.compact_through(snapshot.last_seq)
                                })
                                .await
                                .map_err(|e| PersistError::Message(format!("join error: {e}")))
                                .and_then(|r| r);
                                match result {
                                    Ok(removed) => debug!(removed, "journal compacted"),
                                    Err(err) => warn!(error = %err, "journal snapshot failed"),
                                }
                            }
                            deadline = Instant::now() + latency;
                        }
                        PersistMsg::Flush { resp } => {
                            let result = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                            let _ = resp.send(result.map(|_| last_durable));
                            deadline = Instant::now() + latency;
                        }
                        PersistMsg::Shutdown { resp } => {
                            let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                            let _ = resp.send(());
                            break;
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline), if !buf.is_empty() => {
                    let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, false).await;
                    deadline = Instant::now() + latency;
                }
            }
        }
    });
}

async fn flush_buf(
    sink: &Arc<Mutex<Box<dyn HistorySink>>>,
    buf: &mut Vec<StoredBatch>,
    last_durable: &mut BatchSeq,
    durable_tx: &mpsc::UnboundedSender<Result<BatchSeq, PersistError>>,
    call_flush: bool,
) -> Result<(), PersistError> {
    if buf.is_empty() {
        if call_flush {
            let sink_ref = Arc::clone(sink);
            tokio::task::spawn_blocking(move || {
                let mut sink = sink_ref.blocking_lock();
                sink.flush()
            })
            .await
            .map_err(|e| PersistError::Message(format!("join error: {e}")))??;
        }
        return Ok(());
    }

    let batches = std::mem::take(buf);
    let sink_ref = Arc::clone(sink);
    let append_res: Result<BatchSeq, PersistError> = tokio::task::spawn_blocking(move || {
        let mut sink = sink_ref.blocking_lock();
        let seq = sink.append_batches(&batches)?;
        if call_flush {
            sink.flush()?;
        }
        Ok(seq)
    })
    .await
    .map_err(|e| PersistError::Message(format!("join error: {e}")))?;

    match append_res {
        Ok(seq) => {
            *last_durable = (*last_durable).max(seq);
            let _ = durable_tx.send(Ok(*last_durable));
            Ok(())
        }
        Err(err) => {
            let _ = durable_tx.send(Err(PersistError::Message(format!("append failed: {err}"))));
            Err(err)
        }
    }
}
