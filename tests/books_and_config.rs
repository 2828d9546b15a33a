use std::{io::Write, sync::Arc};

use tempfile::NamedTempFile;

use giftlog::{
    books::{open_library_url, parse_open_library, Book, BookLookup, LookupError, StaticBookLookup},
    config::{ConfigError, RelayConfig, SeedData},
    core::{
        reducer::{Action, GiftReducer},
        session::Session,
    },
    model::ModelError,
};

const OPEN_LIBRARY_BODY: &str = r#"{
  "ISBN:0201558025": {
    "title": "Concrete mathematics",
    "cover": {"small": "s.jpg", "medium": "https://covers.openlibrary.org/b/id/135182-M.jpg"},
    "identifiers": {"isbn_10": ["0201558025"], "lccn": ["93040325"]},
    "publishers": [{"name": "Addison-Wesley"}]
  }
}"#;

#[test]
fn open_library_response_decodes() {
    let book = parse_open_library("0201558025", OPEN_LIBRARY_BODY.as_bytes()).expect("parse");
    assert_eq!(book.title, "Concrete mathematics");
    assert_eq!(book.primary_id(), Some("0201558025"));

    let gift = book.to_gift().expect("gift");
    assert_eq!(gift.id, "0201558025");
    assert_eq!(gift.image, "https://covers.openlibrary.org/b/id/135182-M.jpg");
    assert!(open_library_url("0201558025").contains("bibkeys=ISBN:0201558025"));
}

#[test]
fn open_library_failures_are_reported() {
    assert!(matches!(
        parse_open_library("123", b"{}"),
        Err(LookupError::Failed { .. })
    ));
    assert!(parse_open_library("123", b"<html>").is_err());
    let no_isbn = r#"{"ISBN:123": {"title": "x", "identifiers": {}}}"#;
    assert!(parse_open_library("123", no_isbn.as_bytes()).is_err());
}

#[tokio::test]
async fn lookup_then_add_book() {
    let book = parse_open_library("0201558025", OPEN_LIBRARY_BODY.as_bytes()).expect("parse");
    let lookup: Arc<dyn BookLookup> = Arc::new(StaticBookLookup::new().with_book("0201558025", book));

    let reducer = Arc::new(GiftReducer::from_seed(&SeedData::builtin().expect("seed")).expect("reducer"));
    let mut session = Session::new(Arc::clone(&reducer), reducer.initial_state(1).expect("state"));

    let book: Book = lookup.lookup("0201558025").await.expect("lookup");
    let patches = session.dispatch(Action::AddBook { book }).expect("add book");
    assert_eq!(patches.len(), 1);
    assert!(session.state().gift("0201558025").is_some());

    // A failed lookup never reaches the reducer.
    let before = session.state().clone();
    assert!(lookup.lookup("9999999999").await.is_err());
    assert_eq!(session.state(), &before);
}

#[test]
fn config_loads_toml_with_defaults() {
    let mut file = NamedTempFile::new().expect("tmp");
    writeln!(
        file,
        "bind_addr = \"0.0.0.0:6001\"\ncompaction_interval_ms = 250\ndedup_window = 3"
    )
    .expect("write");

    let config = RelayConfig::load(file.path()).expect("load");
    assert_eq!(config.bind_addr.port(), 6001);
    assert_eq!(config.compaction_interval_ms, 250);
    assert_eq!(config.dedup_window, 3);
    assert_eq!(config.outbound_queue_bound, RelayConfig::default().outbound_queue_bound);
    assert!(config.journal_path.is_none());
}

#[test]
fn config_rejects_bad_values() {
    let mut file = NamedTempFile::new().expect("tmp");
    writeln!(file, "outbound_queue_bound = 0").expect("write");
    assert!(matches!(
        RelayConfig::load(file.path()),
        Err(ConfigError::Invalid { field: "outbound_queue_bound", .. })
    ));

    let mut file = NamedTempFile::new().expect("tmp");
    writeln!(file, "bind_addr = 5").expect("write");
    assert!(matches!(RelayConfig::load(file.path()), Err(ConfigError::Toml { .. })));

    assert!(matches!(
        RelayConfig::load("/definitely/not/here.toml"),
        Err(ConfigError::Io { .. })
    ));

    let disabled = RelayConfig {
        compaction_interval_ms: 0,
        ..RelayConfig::default()
    };
    assert!(disabled.compaction_interval().is_none());
}

#[test]
fn seed_files_override_builtin() {
    let mut users = NamedTempFile::new().expect("users");
    write!(users, r#"[{{"id": 7, "name": "Ada"}}]"#).expect("write users");
    let config = RelayConfig {
        users_path: Some(users.path().to_path_buf()),
        ..RelayConfig::default()
    };

    let seed = config.load_seed().expect("seed");
    assert_eq!(seed.users.len(), 1);
    assert_eq!(seed.gifts.len(), 3);
    assert_eq!(GiftReducer::from_seed(&seed).expect("reducer").relay_state().current_user().name, "Ada");
}

#[test]
fn seed_invariants_are_checked() {
    let dup = SeedData::from_json(
        r#"[{"id": 1, "name": "Jane"}]"#,
        r#"[{"id": "a", "description": "A", "image": "a"}, {"id": "a", "description": "B", "image": "b"}]"#,
    )
    .expect("json");
    assert!(matches!(
        GiftReducer::from_seed(&dup),
        Err(ModelError::DuplicateGiftId(id)) if id == "a"
    ));

    let foreign = SeedData::from_json(
        r#"[{"id": 1, "name": "Jane"}]"#,
        r#"[{"id": "a", "description": "A", "image": "a", "reservedBy": 5}]"#,
    )
    .expect("json");
    assert!(matches!(
        GiftReducer::from_seed(&foreign),
        Err(ModelError::UnknownReservingUser { user: 5, .. })
    ));

    let empty = SeedData::from_json("[]", "[]").expect("json");
    assert!(matches!(GiftReducer::from_seed(&empty), Err(ModelError::EmptyRoster)));

    assert!(matches!(
        SeedData::from_json("{", "[]"),
        Err(ConfigError::Json { .. })
    ));
}
