//! Playout daemon: schedules announcements and songs requested by teams onto
//! the venue's speakers and screen.
pub mod core;
pub mod driver;
pub mod engine;
pub mod error;
pub mod http;
pub mod locator;
pub mod projector;
pub mod socket;
pub mod store;

/// Fan-out to connected clients.
#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    /// The shared view changed; re-read it from the `StateManager`.
    StateUpdated,
    Log(String),
    /// Store or engine failure the operator should see.
    Error(String),
}
