//! Shared gift reservation list replicated through structural patches.
//!
//! Every change goes through a pure reducer that yields a new immutable
//! [`model::State`] plus forward and inverse patches. Clients send forward
//! patches to a relay, which keeps an append-only history, compacts it, and
//! fans each batch out to the other connections.
//!
//! # Examples
//!
//! Local session with undo:
//! ```
//! use std::sync::Arc;
//!
//! use giftlog::{
//!     config::SeedData,
//!     core::{
//!         reducer::{Action, GiftReducer},
//!         session::Session,
//!     },
//! };
//!
//! let reducer = Arc::new(GiftReducer::from_seed(&SeedData::builtin().expect("seed")).expect("reducer"));
//! let state = reducer.initial_state(1).expect("state");
//! let mut session = Session::new(Arc::clone(&reducer), state);
//!
//! let outgoing = session
//!     .dispatch(Action::ToggleReservation { id: "coffee_mug".to_string() })
//!     .expect("toggle");
//! assert_eq!(outgoing.len(), 1);
//! assert_eq!(session.state().gift("coffee_mug").and_then(|g| g.reserved_by), Some(1));
//!
//! session.undo().expect("undo");
//! assert_eq!(session.state().gift("coffee_mug").and_then(|g| g.reserved_by), None);
//! ```
//!
//! Relay with a SQLite journal:
//! ```no_run
//! use giftlog::{
//!     config::{RelayConfig, SeedData},
//!     core::reducer::GiftReducer,
//!     persist::sqlite::SqliteHistorySink,
//!     relay::{serve, spawn_relay},
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let reducer = GiftReducer::from_seed(&SeedData::builtin()?)?;
//! let sink = SqliteHistorySink::open("gifts.db")?;
//! let history = sink.load_history()?;
//! let config = RelayConfig::default();
//! let handle = spawn_relay(reducer.relay_state(), history, Some(Box::new(sink)), config.clone())?;
//! let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
//! serve(listener, handle).await?;
//! # Ok(())
//! # }
//! ```
#![warn(missing_docs)]

/// Book metadata and the lookup seam used before `AddBook`.
pub mod books;
/// WebSocket client for the relay.
pub mod client;
/// Relay settings and seed data.
pub mod config;
/// Reducer, applier, diff, undo and client session.
pub mod core;
/// Relay history log, compaction and duplicate window.
pub mod history;
/// Users, gifts and the immutable state.
pub mod model;
/// Patch wire model.
pub mod patch;
/// Journal abstraction and SQLite implementation.
pub mod persist;
/// Relay owner task and WebSocket server.
pub mod relay;
/// Shared primitive ids.
pub mod types;
