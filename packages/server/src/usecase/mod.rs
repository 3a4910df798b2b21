//! Use cases: every inbound event and background job operates on the shared
//! server state through the functions in these modules.
//!
//! Handlers return `Result<(), EventError>`; the gateway logs failures per
//! event so a fault in one event's processing never reaches another
//! connection.

pub mod chat;
pub mod chess;
pub mod login;
pub mod presence;
pub mod reaper;
pub mod streams;

use crate::infrastructure::relay::RelayError;

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("unknown room '{0}'")]
    UnknownRoom(String),
    #[error("no relay server available")]
    NoRelayAvailable,
    #[error("relay failure: {0}")]
    Relay(#[from] RelayError),
}
