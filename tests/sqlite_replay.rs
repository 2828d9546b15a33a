use std::sync::Arc;

use tempfile::TempDir;

use giftlog::{
    config::{RelayConfig, SeedData},
    core::{
        reducer::{Action, GiftReducer},
        session::Session,
    },
    history::HistoryLog,
    patch::StoredBatch,
    persist::{sqlite::SqliteHistorySink, HistorySink, HistorySnapshot},
    relay::spawn_relay,
};

fn reducer() -> Arc<GiftReducer> {
    Arc::new(GiftReducer::from_seed(&SeedData::builtin().expect("seed")).expect("reducer"))
}

fn batches(reducer: &Arc<GiftReducer>) -> (Session, Vec<StoredBatch>) {
    let mut jane = Session::new(Arc::clone(reducer), reducer.initial_state(1).expect("jane"));
    let actions = vec![
        Action::AddGift {
            id: "socks".to_string(),
            description: "Warm socks".to_string(),
            image: "socks.png".to_string(),
        },
        Action::ToggleReservation {
            id: "socks".to_string(),
        },
        Action::ToggleReservation {
            id: "coffee_mug".to_string(),
        },
        Action::ToggleReservation {
            id: "coffee_mug".to_string(),
        },
    ];

    let mut stored = Vec::new();
    for (i, action) in actions.into_iter().enumerate() {
        let patches = jane.dispatch(action).expect("dispatch");
        stored.push(StoredBatch {
            seq: i as u64 + 1,
            ts_ms: 1_000 + i as u64,
            origin: Some(7),
            patches,
        });
    }
    (jane, stored)
}

#[test]
fn journal_replay_round_trips_history_and_order() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("gifts.db");
    let reducer = reducer();
    let (jane, stored) = batches(&reducer);

    let mut sink = SqliteHistorySink::open(&db_path).expect("open sqlite");
    sink.append_batches(&stored).expect("append");
    assert_eq!(sink.latest_seq().expect("latest"), 4);
    drop(sink);

    let sink = SqliteHistorySink::open(&db_path).expect("reopen");
    let reloaded = sink.load_batches_after(0).expect("load");
    assert_eq!(reloaded, stored);

    let history = sink.load_history().expect("history");
    assert_eq!(history.len(), 4);
    assert_eq!(history.latest_seq(), 4);
    let state = history.replay(&reducer.relay_state()).expect("replay");
    assert_eq!(state.gifts(), jane.state().gifts());

    assert_eq!(sink.load_batches_after(2).expect("tail").len(), 2);
}

#[test]
fn snapshot_and_compaction_preserve_replay() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("snap.db");
    let reducer = reducer();
    let (jane, stored) = batches(&reducer);
    let initial = reducer.relay_state();

    let mut sink = SqliteHistorySink::open(&db_path).expect("open sqlite");
    sink.append_batches(&stored[..3]).expect("append head");

    let mut log = HistoryLog::new();
    for batch in &stored[..3] {
        log.append(batch.patches.clone());
    }
    log.compact(&initial).expect("compact");
    sink.write_snapshot(&HistorySnapshot {
        last_seq: log.latest_seq(),
        batches: log.batches().to_vec(),
    })
    .expect("snapshot");
    assert_eq!(sink.compact_through(3).expect("compact through"), 3);

    sink.append_batches(&stored[3..]).expect("append tail");
    drop(sink);

    let sink = SqliteHistorySink::open(&db_path).expect("reopen");
    let history = sink.load_history().expect("history");
    assert_eq!(history.len(), 2);
    assert_eq!(history.latest_seq(), 4);
    let state = history.replay(&initial).expect("replay");
    assert_eq!(state.gifts(), jane.state().gifts());
}

#[tokio::test]
async fn relay_journal_survives_restart() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("relay.db");
    let reducer = reducer();
    let config = RelayConfig {
        compaction_interval_ms: 0,
        journal_path: Some(db_path.clone()),
        ..RelayConfig::default()
    };
    let (jane, stored) = batches(&reducer);

    let sink = SqliteHistorySink::open(&db_path).expect("open");
    let handle = spawn_relay(reducer.relay_state(), HistoryLog::new(), Some(Box::new(sink)), config.clone())
        .expect("spawn");
    let conn = handle.join().await.expect("join");
    for batch in &stored[..2] {
        handle.submit(conn.id, batch.patches.clone()).await.expect("submit");
    }
    handle.compact_now().await.expect("compact");
    for batch in &stored[2..] {
        handle.submit(conn.id, batch.patches.clone()).await.expect("submit");
    }
    handle.shutdown().await.expect("shutdown");

    let sink = SqliteHistorySink::open(&db_path).expect("reopen");
    let history = sink.load_history().expect("history");
    assert_eq!(history.latest_seq(), 4);
    let state = history.replay(&reducer.relay_state()).expect("replay");
    assert_eq!(state.gifts(), jane.state().gifts());

    // The restarted relay continues numbering after the journal.
    let handle = spawn_relay(reducer.relay_state(), history, Some(Box::new(sink)), config).expect("respawn");
    let conn = handle.join().await.expect("join");
    let outcome = handle
        .submit(conn.id, stored[0].patches.clone())
        .await
        .expect("submit");
    assert!(matches!(
        outcome,
        giftlog::relay::SubmitOutcome::Accepted { seq: 5, .. }
    ));
    handle.shutdown().await.expect("shutdown");
}
