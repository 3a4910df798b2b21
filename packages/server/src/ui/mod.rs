//! UI layer: the axum router, HTTP handlers and the WebSocket gateway.

pub mod handler;
mod server;
mod signal;

pub use server::{build_router, run_server, serve};
