//! The WebSocket gateway: authentication, the per-connection event-rate
//! ceiling and inbound event dispatch.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ConnectInfo, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use hiroba_shared::time::get_timestamp_millis;

use crate::domain::StreamOptions;
use crate::infrastructure::dto::websocket::{ClientEvent, ServerEvent};
use crate::state::AppContext;
use crate::usecase::{EventError, chat, chess, presence, streams};

use super::http::client_ip;

/// Forcible-disconnect ceiling: no more than 100 events in one second.
const EVENT_RATE_WINDOW_MS: i64 = 1000;
const EVENT_RATE_MAX_EVENTS: usize = 100;

/// Query parameters for the WebSocket connection.
#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    #[serde(default)]
    pub private_user_id: Option<String>,
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(ctx): State<Arc<AppContext>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<ConnectQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let ip = client_ip(&headers, addr);

    {
        let state = ctx.state.lock().await;
        if state.banned_ips.contains(&ip) {
            return Err(StatusCode::FORBIDDEN);
        }
    }
    if ctx.reputation.is_abusive(&ip).await {
        tracing::info!("Rejected websocket from abusive IP {}", ip);
        return Err(StatusCode::FORBIDDEN);
    }

    // The private credential re-binds the connection to its player; it is
    // accepted as a header or a query parameter.
    let private_user_id = headers
        .get("private-user-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or(query.private_user_id);

    let user_id = match &private_user_id {
        Some(private_user_id) => {
            let state = ctx.state.lock().await;
            state
                .player_by_private_id(private_user_id)
                .map(|p| p.id.clone())
        }
        None => None,
    };
    tracing::info!("Connection attempt {} {:?}", ip, user_id);

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, ctx, user_id)))
}

/// Sliding-window inbound event ceiling, enforced before any per-event
/// logic. Returns `true` when the connection must be dropped.
fn event_rate_exceeded(dates: &mut Vec<i64>, now: i64) -> bool {
    dates.push(now);
    if dates.len() > EVENT_RATE_MAX_EVENTS {
        let first = dates.remove(0);
        if now - first < EVENT_RATE_WINDOW_MS {
            return true;
        }
    }
    false
}

fn pusher_loop(
    mut rx: mpsc::UnboundedReceiver<String>,
    mut sender: futures_util::stream::SplitSink<WebSocket, Message>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    })
}

async fn handle_socket(socket: WebSocket, ctx: Arc<AppContext>, user_id: Option<String>) {
    let (mut sender, mut receiver) = socket.split();

    let Some(user_id) = user_id else {
        tracing::info!("Websocket connection failed authentication");
        if let Ok(json) = serde_json::to_string(&ServerEvent::ServerCantLogYouIn) {
            let _ = sender.send(Message::Text(json.into())).await;
        }
        return;
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let connection_id = Uuid::new_v4().simple().to_string();

    // Bind the connection: the player stops being a ghost and gets the
    // current room state pushed.
    {
        let mut state = ctx.state.lock().await;
        let Some(player) = state.player_mut(&user_id) else {
            drop(state);
            if let Ok(json) = serde_json::to_string(&ServerEvent::ServerCantLogYouIn) {
                let _ = sender.send(Message::Text(json.into())).await;
            }
            return;
        };

        tracing::info!(
            "user-connect userId: '{}' name: <{}> disconnectionTime: {:?}",
            user_id,
            player.name,
            player.disconnection_time
        );

        let stale_connection = player.connection_id.replace(connection_id.clone());
        player.is_ghost = false;
        player.disconnection_time = None;
        let area_id = player.area_id.clone();

        if let Some(stale_connection) = stale_connection {
            state.unregister_connection(&stale_connection);
        }
        state.register_connection(connection_id.clone(), tx);

        presence::send_room_state(&ctx, &state, &user_id);
        presence::send_new_user_info(&ctx, &state, &user_id);
        state.emit_server_stats(&area_id);
    }

    let ctx_recv = Arc::clone(&ctx);
    let user_id_recv = user_id.clone();
    let mut recv_task = tokio::spawn(async move {
        let mut event_dates: Vec<i64> = Vec::new();
        while let Some(msg) = receiver.next().await {
            let msg = match msg {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::error!("WebSocket error: {}", e);
                    break;
                }
            };

            match msg {
                Message::Text(text) => {
                    if event_rate_exceeded(&mut event_dates, get_timestamp_millis()) {
                        tracing::warn!(
                            "'{}' exceeded the event rate ceiling, disconnecting",
                            user_id_recv
                        );
                        break;
                    }

                    let event = match serde_json::from_str::<ClientEvent>(&text) {
                        Ok(event) => event,
                        Err(e) => {
                            tracing::warn!("Failed to parse client event: {}", e);
                            continue;
                        }
                    };

                    // Fault isolation: an error in one event is logged and
                    // does not touch the rest of the connection.
                    if let Err(e) = dispatch_client_event(&ctx_recv, &user_id_recv, event).await {
                        tracing::error!("Server error for '{}': {}", user_id_recv, e);
                    }
                }
                Message::Ping(_) => {
                    tracing::debug!("Received ping");
                }
                Message::Close(_) => {
                    tracing::info!("Client '{}' requested close", user_id_recv);
                    break;
                }
                _ => {}
            }
        }
    });

    let mut send_task = pusher_loop(rx, sender);

    tokio::select! {
        _ = &mut recv_task => send_task.abort(),
        _ = &mut send_task => recv_task.abort(),
    };

    handle_disconnect(&ctx, &user_id, &connection_id).await;
}

/// The player becomes a ghost (retained for seamless reconnection); their
/// stream, listener handles and chess seat are torn down.
async fn handle_disconnect(ctx: &Arc<AppContext>, user_id: &str, connection_id: &str) {
    let scope = {
        let mut state = ctx.state.lock().await;
        state.unregister_connection(connection_id);
        match state.player_mut(user_id) {
            // a newer connection may have taken over this player
            Some(player) if player.connection_id.as_deref() == Some(connection_id) => {
                player.connection_id = None;
                player.is_ghost = true;
                player.disconnection_time = Some(get_timestamp_millis());
                Some((player.area_id.clone(), player.room_id.clone()))
            }
            _ => None,
        }
    };
    let Some((area_id, room_id)) = scope else {
        return;
    };
    tracing::info!("disconnect '{}'", user_id);

    streams::clear_stream(ctx, user_id).await;
    streams::clear_room_listener(ctx, user_id).await;

    let mut state = ctx.state.lock().await;
    state.emit_server_stats(&area_id);
    state.user_room_emit(
        user_id,
        &area_id,
        &room_id,
        &ServerEvent::ServerUserLeftRoom {
            user_id: user_id.to_string(),
        },
    );
    chess::stop_chess_game(&mut state, user_id);
}

/// Route one inbound event to its use case.
pub async fn dispatch_client_event(
    ctx: &Arc<AppContext>,
    user_id: &str,
    event: ClientEvent,
) -> Result<(), EventError> {
    match event {
        ClientEvent::UserMsg { message } => chat::handle_chat(ctx, user_id, &message).await,
        ClientEvent::UserMove { direction } => presence::handle_move(ctx, user_id, direction).await,
        ClientEvent::UserBubblePosition { position } => {
            presence::handle_bubble_position(ctx, user_id, position).await
        }
        ClientEvent::UserWantToChangeCharacter {
            character_id,
            is_alternate_character,
        } => {
            presence::handle_change_character(ctx, user_id, &character_id, is_alternate_character)
                .await
        }
        ClientEvent::UserChangeRoom {
            target_room_id,
            target_door_id,
        } => presence::handle_change_room(ctx, user_id, &target_room_id, target_door_id).await,
        ClientEvent::UserRoomList => presence::handle_room_list(ctx, user_id).await,
        ClientEvent::UserBlock { user_id: target } => {
            presence::handle_block(ctx, user_id, &target).await
        }
        ClientEvent::UserPing => presence::handle_ping(ctx, user_id).await,
        ClientEvent::UserWantToStream {
            stream_slot_id,
            with_video,
            with_sound,
            is_private_stream,
        } => {
            streams::handle_request_stream(
                ctx,
                user_id,
                stream_slot_id,
                StreamOptions {
                    with_video,
                    with_sound,
                    is_private_stream,
                },
            )
            .await
        }
        ClientEvent::UserWantToStopStream => streams::handle_stop_stream(ctx, user_id).await,
        ClientEvent::UserWantToTakeStream { stream_slot_id } => {
            streams::handle_take_stream(ctx, user_id, stream_slot_id).await
        }
        ClientEvent::UserWantToDropStream { stream_slot_id } => {
            streams::handle_drop_stream(ctx, user_id, stream_slot_id).await
        }
        ClientEvent::UserRtcMessage {
            stream_slot_id,
            kind,
            msg,
        } => streams::handle_rtc_message(ctx, user_id, stream_slot_id, kind, msg).await,
        ClientEvent::UserWantToPlayChess => chess::handle_play_chess(ctx, user_id).await,
        ClientEvent::UserWantToQuitChess => chess::handle_quit_chess(ctx, user_id).await,
        ClientEvent::UserChessMove { source, target } => {
            chess::handle_chess_move(ctx, user_id, &source, &target).await
        }
        ClientEvent::ClientAddShrineCoin => handle_add_shrine_coin(ctx, user_id).await,
    }
}

async fn handle_add_shrine_coin(ctx: &Arc<AppContext>, user_id: &str) -> Result<(), EventError> {
    let mut state = ctx.state.lock().await;
    let Some(player) = state.player(user_id) else {
        return Ok(());
    };
    let (area_id, room_id) = (player.area_id.clone(), player.room_id.clone());
    let Some(room_state) = state.room_state_mut(&area_id, &room_id) else {
        return Ok(());
    };
    room_state.coin_counter += 10;
    let count = room_state.coin_counter;

    state.user_room_emit(
        user_id,
        &area_id,
        &room_id,
        &ServerEvent::ServerAddShrineCoin { count },
    );
    Ok(())
}
