//! Data Transfer Objects for the server's wire formats.
//!
//! DTOs are organized by protocol:
//! - `websocket`: the tagged real-time event enums and their payloads
//! - `http`: login / admin / snapshot API shapes
//!
//! `conversion` builds viewer-aware projections (blocking, censorship and
//! forced anonymity are applied per recipient, never stored).

pub mod conversion;
pub mod http;
pub mod websocket;
