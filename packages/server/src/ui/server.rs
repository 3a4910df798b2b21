//! Server assembly and execution.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::infrastructure::persistence;
use crate::state::AppContext;
use crate::usecase::reaper;

use super::handler::http::{
    admin_ban_handler, admin_unban_handler, admin_user_list_handler, health_check, login_handler,
    room_snapshot_handler, streamers_handler, version_handler,
};
use super::handler::websocket::websocket_handler;
use super::signal::shutdown_signal;

pub fn build_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .route("/api/health", get(health_check))
        .route("/api/version", get(version_handler))
        .route("/api/login", post(login_handler))
        .route("/areas/{area_id}/rooms/{room_id}", get(room_snapshot_handler))
        .route("/areas/{area_id}/streamers", get(streamers_handler))
        .route("/api/admin/ban", post(admin_ban_handler))
        .route("/api/admin/unban", post(admin_unban_handler))
        .route("/api/admin/users", post(admin_user_list_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Serve on an already-bound listener (tests bind port 0 themselves).
pub async fn serve(
    listener: TcpListener,
    ctx: Arc<AppContext>,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = build_router(ctx);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    Ok(())
}

/// Run the virtual-space server: restore persisted state, start the
/// background jobs and serve until shutdown.
pub async fn run_server(
    host: String,
    port: u16,
    ctx: Arc<AppContext>,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = persistence::snapshot_store_from_settings(&ctx.settings);
    persistence::restore_state(&ctx, &store).await;

    reaper::spawn_background_reaper(Arc::clone(&ctx));
    persistence::spawn_persistence_loop(Arc::clone(&ctx), store);

    let bind_addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Hiroba server listening on {}", listener.local_addr()?);
    tracing::info!("WebSocket endpoint: ws://{}/ws", bind_addr);
    tracing::info!("Press Ctrl+C to shutdown gracefully");

    serve(listener, ctx).await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}
