//! HTTP API handlers: login, room snapshots, streamer listing and the
//! admin ban boundary.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json,
    extract::{ConnectInfo, Path, State},
    http::{HeaderMap, StatusCode},
};

use crate::infrastructure::dto::conversion::{to_player_dto, to_room_state_dto};
use crate::infrastructure::dto::http::{
    BanRequest, LoginRequest, LoginResponse, StreamerListRoom, UserListEntry, UserListRequest,
};
use crate::infrastructure::dto::websocket::RoomStateDto;
use crate::state::AppContext;
use crate::usecase::login;

/// The real client IP: the last entry of `x-forwarded-for` (the proxy
/// guarantees the real origin is the last item), falling back to the
/// socket address.
pub fn client_ip(headers: &HeaderMap, addr: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next_back())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| addr.ip().to_string())
}

pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

pub async fn version_handler(State(ctx): State<Arc<AppContext>>) -> Json<u32> {
    Json(ctx.settings.app_version)
}

pub async fn login_handler(
    State(ctx): State<Arc<AppContext>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> (StatusCode, Json<LoginResponse>) {
    let ip = client_ip(&headers, addr);
    let app_version = ctx.settings.app_version;

    let failure = |error: &str| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(LoginResponse {
                app_version,
                is_login_successful: false,
                error: Some(error.to_string()),
                user_id: None,
                private_user_id: None,
            }),
        )
    };

    if ctx.reputation.is_abusive(&ip).await {
        tracing::info!("Rejected login from abusive IP {}", ip);
        return failure("ip_restricted");
    }

    match login::login(
        &ctx,
        &request.user_name,
        &request.character_id,
        &request.area_id,
        &request.room_id,
        &ip,
    )
    .await
    {
        Ok(outcome) => (
            StatusCode::OK,
            Json(LoginResponse {
                app_version,
                is_login_successful: true,
                error: None,
                user_id: Some(outcome.user_id),
                private_user_id: Some(outcome.private_user_id),
            }),
        ),
        Err(e) => failure(e.code()),
    }
}

/// Room snapshot for the web front end, before the socket is opened.
///
/// The requesting IP can be linked to more than one player, each with a
/// different block relationship set, so the returned user list is the
/// intersection of every such player's filtered list: nobody hidden from
/// any of them is leaked.
pub async fn room_snapshot_handler(
    State(ctx): State<Arc<AppContext>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path((area_id, room_id)): Path<(String, String)>,
) -> Result<Json<RoomStateDto>, StatusCode> {
    let Some(room) = ctx.room(&room_id) else {
        return Err(StatusCode::NOT_FOUND);
    };
    let ip = client_ip(&headers, addr);

    let state = ctx.state.lock().await;
    let Some(room_state) = state.room_state(&area_id, &room_id) else {
        return Err(StatusCode::NOT_FOUND);
    };

    let viewer_ids = state.player_ids_by_ip(&ip, Some(&area_id));
    let mut intersection: Option<HashSet<String>> = None;
    for viewer_id in &viewer_ids {
        let visible: HashSet<String> = state
            .filtered_connected_user_list(viewer_id, Some(&room_id), &area_id)
            .iter()
            .map(|u| u.id.clone())
            .collect();
        intersection = Some(match intersection {
            None => visible,
            Some(acc) => acc.intersection(&visible).cloned().collect(),
        });
    }
    let visible_ids = intersection.unwrap_or_default();

    let connected_users = state
        .connected_user_list(Some(&room_id), &area_id)
        .into_iter()
        .filter(|u| visible_ids.contains(&u.id))
        .map(|u| to_player_dto(u, room, &ctx.settings.censored_words))
        .collect();

    Ok(Json(to_room_state_dto(
        room,
        connected_users,
        Vec::new(),
        &room_state.chess,
        room_state.coin_counter,
        false,
    )))
}

/// Names of publishers of non-private active streams, per non-secret room.
pub async fn streamers_handler(
    State(ctx): State<Arc<AppContext>>,
    Path(area_id): Path<String>,
) -> Json<Vec<StreamerListRoom>> {
    let state = ctx.state.lock().await;
    let mut list = Vec::new();

    for room in ctx.rooms.values() {
        if room.secret || room.stream_slot_count == 0 {
            continue;
        }
        let Some(room_state) = state.room_state(&area_id, &room.id) else {
            continue;
        };
        let streamers: Vec<String> = room_state
            .streams
            .iter()
            .filter(|slot| slot.is_active && slot.is_private_stream != Some(true))
            .filter_map(|slot| slot.publisher.as_ref())
            .filter_map(|publisher| state.player(&publisher.user_id))
            .map(|player| player.name.clone())
            .collect();
        if !streamers.is_empty() {
            list.push(StreamerListRoom {
                id: room.id.clone(),
                streamers,
            });
        }
    }
    list.sort_by(|a, b| a.id.cmp(&b.id));

    Json(list)
}

fn check_admin_key(ctx: &AppContext, pwd: &str) -> Result<(), StatusCode> {
    match &ctx.settings.admin_key {
        Some(key) if key == pwd => Ok(()),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

pub async fn admin_ban_handler(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<BanRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    check_admin_key(&ctx, &request.pwd)?;
    login::ban_ip(&ctx, &request.ip).await;
    Ok(Json(serde_json::json!({"status": "ok"})))
}

pub async fn admin_unban_handler(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<BanRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    check_admin_key(&ctx, &request.pwd)?;
    login::unban_ip(&ctx, &request.ip).await;
    Ok(Json(serde_json::json!({"status": "ok"})))
}

pub async fn admin_user_list_handler(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<UserListRequest>,
) -> Result<Json<Vec<UserListEntry>>, StatusCode> {
    check_admin_key(&ctx, &request.pwd)?;

    let state = ctx.state.lock().await;
    let mut entries: Vec<UserListEntry> = state
        .all_players()
        .filter(|p| !p.is_ghost)
        .map(|p| UserListEntry {
            id: p.id.clone(),
            name: p.name.clone(),
            area_id: p.area_id.clone(),
            room_id: p.room_id.clone(),
            ip: p.ip.clone(),
            is_streaming: state.published_slot_index(p).is_some(),
            last_room_message: p.last_room_message.clone(),
        })
        .collect();
    entries.sort_by(|a, b| {
        (a.area_id.as_str(), a.room_id.as_str(), a.name.as_str())
            .cmp(&(b.area_id.as_str(), b.room_id.as_str(), b.name.as_str()))
    });

    Ok(Json(entries))
}
