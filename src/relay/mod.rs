//! Relay service: owner task, events and the WebSocket front-end.

pub mod events;
pub mod handle;
pub mod server;

pub use events::RelayEvent;
pub use handle::{spawn_relay, Joined, RelayError, RelayHandle, SubmitOutcome};
pub use server::{serve, serve_until};
