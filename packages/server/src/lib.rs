//! Authoritative server for the Hiroba virtual space.
//!
//! The crate is organized in layers the same way the whole workspace is:
//! domain models, use cases operating on the shared server state,
//! infrastructure (media relay, persistence, reputation, DTOs) and the
//! axum-based UI layer exposing the HTTP and WebSocket endpoints.

// layers
pub mod domain;
pub mod infrastructure;
pub mod ui;
pub mod usecase;

// cross-cutting
pub mod settings;
pub mod state;
