//! Stream signaling orchestrator.
//!
//! Slot lifecycle is `Idle → Requested → Negotiating → Ready → Idle`. The
//! state mutex is never held across a relay round-trip: every await
//! captures the slot's `stream_id` generation beforehand and re-validates
//! it (plus `is_active`) afterwards, releasing any already-allocated relay
//! resource when the slot moved on.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::domain::{Player, StreamOptions};
use crate::infrastructure::dto::conversion::stream_slot_dtos;
use crate::infrastructure::dto::websocket::{RtcMessageKind, ServerEvent, StreamRejectReason};
use crate::infrastructure::relay::{
    RelayClient, RelayError, RelayHandleId, RelayServer, RelaySessionId,
};
use crate::state::{AppContext, ServerState};
use crate::usecase::EventError;

/// Capacity requested when creating a relay room.
const RELAY_ROOM_PUBLISHERS: u32 = 20;
/// Listener weight floor: reserves headroom for a stream expected to gain
/// listeners.
const LISTENER_WEIGHT_FLOOR: i64 = 5;

/// Log a relay failure; a fatal plugin failure forces a process restart
/// since no in-process recovery is possible.
fn log_relay_failure(context: &str, error: &RelayError) {
    tracing::error!("{}: {}", context, error);
    if error.is_fatal_plugin_failure() {
        tracing::error!("Relay process is corrupted beyond recovery, restarting server");
        std::process::exit(1);
    }
}

/// Send every connected player in the room their own view of the slots.
pub fn broadcast_stream_slots(
    ctx: &AppContext,
    state: &ServerState,
    area_id: &str,
    room_id: &str,
) {
    let Some(room_state) = state.room_state(area_id, room_id) else {
        return;
    };
    let room_players: HashMap<String, &Player> = state
        .connected_user_list(Some(room_id), area_id)
        .into_iter()
        .map(|p| (p.id.clone(), p))
        .collect();

    for viewer in room_players.values() {
        let streams = stream_slot_dtos(
            viewer,
            &room_state.streams,
            &room_players,
            &ctx.settings.no_stream_ips,
        );
        state.emit_to_player(
            &viewer.id,
            &ServerEvent::ServerUpdateCurrentRoomStreams { streams },
        );
    }
}

/// Pick the least-loaded relay server: weight each by the listener counts
/// (floored) of every active slot assigned to it; ties break on the first
/// configured server.
pub fn least_loaded_relay<'a>(
    ctx: &'a AppContext,
    state: &ServerState,
) -> Option<&'a RelayServer> {
    if ctx.relays.is_empty() {
        return None;
    }
    let mut weights: HashMap<&str, i64> =
        ctx.relays.iter().map(|r| (r.id.as_str(), 0)).collect();
    for (_, _, room_state) in state.all_room_states() {
        for slot in &room_state.streams {
            if slot.publisher.is_some() {
                if let Some(server_id) = &slot.relay_server_id {
                    if let Some(weight) = weights.get_mut(server_id.as_str()) {
                        *weight += (slot.listeners.len() as i64).max(LISTENER_WEIGHT_FLOOR);
                    }
                }
            }
        }
    }
    ctx.relays
        .iter()
        .min_by_key(|r| weights.get(r.id.as_str()).copied().unwrap_or(0))
}

/// Claim a stream slot for a publisher.
pub async fn handle_request_stream(
    ctx: &Arc<AppContext>,
    user_id: &str,
    slot_index: usize,
    options: StreamOptions,
) -> Result<(), EventError> {
    tracing::info!(
        "user-want-to-stream '{}' private: {} streamSlotId: {}",
        user_id,
        options.is_private_stream,
        slot_index
    );

    // If the requester already owns this slot, clear it first.
    let owns_slot = {
        let state = ctx.state.lock().await;
        let Some(player) = state.player(user_id) else {
            return Ok(());
        };
        match state
            .room_state(&player.area_id, &player.room_id)
            .and_then(|rs| rs.streams.get(slot_index))
        {
            None => {
                tracing::info!(
                    "server-not-ok-to-stream slot {} does not exist in {}",
                    slot_index,
                    player.room_id
                );
                state.emit_to_player(
                    user_id,
                    &ServerEvent::ServerNotOkToStream {
                        reason: StreamRejectReason::SlotDoesNotExist,
                    },
                );
                return Ok(());
            }
            Some(slot) => slot.is_published_by(user_id),
        }
    };
    if owns_slot {
        clear_stream(ctx, user_id).await;
    }

    let mut state = ctx.state.lock().await;
    let Some(player) = state.player(user_id) else {
        return Ok(());
    };
    let (area_id, room_id, requester_ip) = (
        player.area_id.clone(),
        player.room_id.clone(),
        player.ip.clone(),
    );
    let requester_blocked = player.blocked_ips.clone();

    let Some(slot) = state
        .room_state(&area_id, &room_id)
        .and_then(|rs| rs.streams.get(slot_index))
    else {
        state.emit_to_player(
            user_id,
            &ServerEvent::ServerNotOkToStream {
                reason: StreamRejectReason::SlotDoesNotExist,
            },
        );
        return Ok(());
    };

    if slot.is_taken() {
        let publisher_id = slot.publisher.as_ref().unwrap().user_id.clone();
        let reason = match state.player(&publisher_id) {
            Some(publisher) if publisher.blocked_ips.contains(&requester_ip) => {
                StreamRejectReason::TakenByBlockingStreamer
            }
            Some(publisher) if requester_blocked.contains(&publisher.ip) => {
                StreamRejectReason::TakenByBlockedStreamer
            }
            _ => StreamRejectReason::AlreadyTaken,
        };
        tracing::info!("server-not-ok-to-stream '{}'", user_id);
        state.emit_to_player(user_id, &ServerEvent::ServerNotOkToStream { reason });
        return Ok(());
    }

    let slot = state
        .room_state_mut(&area_id, &room_id)
        .and_then(|rs| rs.streams.get_mut(slot_index))
        .expect("slot existed moments ago");
    let generation = slot.begin(user_id.to_string(), options);

    arm_negotiation_watchdog(ctx, &area_id, &room_id, slot_index, generation);

    broadcast_stream_slots(ctx, &state, &area_id, &room_id);
    state.emit_server_stats(&area_id);
    state.emit_to_player(user_id, &ServerEvent::ServerOkToStream);
    Ok(())
}

/// Auto-clear the slot if no signaling message arrives in time.
fn arm_negotiation_watchdog(
    ctx: &Arc<AppContext>,
    area_id: &str,
    room_id: &str,
    slot_index: usize,
    generation: u64,
) {
    let ctx = Arc::clone(ctx);
    let area_id = area_id.to_string();
    let room_id = room_id.to_string();
    let timeout = ctx.settings.stream_watchdog_ms;
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(timeout)).await;
        let should_clear = {
            let state = ctx.state.lock().await;
            state
                .room_state(&area_id, &room_id)
                .and_then(|rs| rs.streams.get(slot_index))
                .is_some_and(|s| {
                    s.stream_id == generation && s.is_active && s.relay_server_id.is_none()
                })
        };
        if should_clear {
            tracing::info!(
                "No RTC message received for slot {} in {}/{}",
                slot_index,
                area_id,
                room_id
            );
            clear_slot(&ctx, &area_id, &room_id, slot_index).await;
        }
    });
}

/// Deactivate a slot and release its relay resources. Idempotent; each
/// release failure is logged independently and never aborts the rest of
/// the teardown.
pub async fn clear_slot(ctx: &Arc<AppContext>, area_id: &str, room_id: &str, slot_index: usize) {
    struct Teardown {
        publisher_handle: Option<RelayHandleId>,
        listener_handles: Vec<RelayHandleId>,
        session: Option<RelaySessionId>,
        server_id: Option<String>,
        room_int: i64,
    }

    let teardown = {
        let mut state = ctx.state.lock().await;
        let Some(slot) = state
            .room_state_mut(area_id, room_id)
            .and_then(|rs| rs.streams.get_mut(slot_index))
        else {
            return;
        };
        if !slot.is_active && slot.publisher.is_none() && slot.relay_session.is_none() {
            return;
        }

        let teardown = Teardown {
            publisher_handle: slot.publisher.as_ref().and_then(|p| p.relay_handle),
            listener_handles: slot.listeners.iter().filter_map(|l| l.relay_handle).collect(),
            session: slot.relay_session,
            server_id: slot.relay_server_id.clone(),
            room_int: slot.relay_room_int,
        };
        slot.reset();

        broadcast_stream_slots(ctx, &state, area_id, room_id);
        state.emit_server_stats(area_id);
        teardown
    };

    let Some(session) = teardown.session else {
        return;
    };
    let Some(client) = teardown
        .server_id
        .as_deref()
        .and_then(|id| ctx.relay(id))
        .map(|r| Arc::clone(&r.client))
    else {
        return;
    };

    if let Some(handle) = teardown.publisher_handle {
        if let Err(e) = client.destroy_room(session, handle, teardown.room_int).await {
            log_relay_failure("Failed to destroy relay room", &e);
        }
        if let Err(e) = client.detach(session, handle).await {
            log_relay_failure("Failed to detach publisher handle", &e);
        }
    }
    for handle in teardown.listener_handles {
        if let Err(e) = client.detach(session, handle).await {
            log_relay_failure("Failed to detach listener handle", &e);
        }
    }
    if let Err(e) = client.destroy_session(session).await {
        log_relay_failure("Failed to destroy relay session", &e);
    }
}

/// Clear the stream the player currently publishes, if any.
pub async fn clear_stream(ctx: &Arc<AppContext>, user_id: &str) {
    let target = {
        let state = ctx.state.lock().await;
        state.player(user_id).and_then(|p| {
            state
                .published_slot_index(p)
                .map(|i| (p.area_id.clone(), p.room_id.clone(), i))
        })
    };
    if let Some((area_id, room_id, slot_index)) = target {
        tracing::info!("'{}' clearing stream in {}/{}", user_id, area_id, room_id);
        clear_slot(ctx, &area_id, &room_id, slot_index).await;
    }
}

/// Detach the player from every slot they listen to in their room.
pub async fn clear_room_listener(ctx: &Arc<AppContext>, user_id: &str) {
    let detachments = {
        let mut state = ctx.state.lock().await;
        let Some(player) = state.player(user_id) else {
            return;
        };
        let (area_id, room_id) = (player.area_id.clone(), player.room_id.clone());

        let mut out: Vec<(Option<String>, RelaySessionId, RelayHandleId)> = Vec::new();
        if let Some(room_state) = state.room_state_mut(&area_id, &room_id) {
            for slot in room_state
                .streams
                .iter_mut()
                .filter(|s| s.relay_session.is_some())
            {
                let session = slot.relay_session.expect("filtered on session presence");
                let server_id = slot.relay_server_id.clone();
                let mut kept = Vec::new();
                for listener in slot.listeners.drain(..) {
                    if listener.user_id == user_id {
                        if let Some(handle) = listener.relay_handle {
                            out.push((server_id.clone(), session, handle));
                        }
                    } else {
                        kept.push(listener);
                    }
                }
                slot.listeners = kept;
            }
        }
        out
    };

    for (server_id, session, handle) in detachments {
        let Some(client) = server_id
            .as_deref()
            .and_then(|id| ctx.relay(id))
            .map(|r| Arc::clone(&r.client))
        else {
            continue;
        };
        tracing::info!("'{}' listener handle {} detached", user_id, handle.0);
        if let Err(e) = client.detach(session, handle).await {
            log_relay_failure("Failed to detach listener handle", &e);
        }
    }
}

/// Stop the caller's own stream.
pub async fn handle_stop_stream(ctx: &Arc<AppContext>, user_id: &str) -> Result<(), EventError> {
    tracing::info!("'{}' user-want-to-stop-stream", user_id);
    clear_stream(ctx, user_id).await;
    Ok(())
}

/// Subscribe a listener to an established stream.
pub async fn handle_take_stream(
    ctx: &Arc<AppContext>,
    user_id: &str,
    slot_index: usize,
) -> Result<(), EventError> {
    tracing::info!("user-want-to-take-stream '{}' {}", user_id, slot_index);

    struct Capture {
        generation: u64,
        session: RelaySessionId,
        server_id: String,
        room_int: i64,
        feed_id: u64,
        area_id: String,
        room_id: String,
    }

    let reject = ServerEvent::ServerNotOkToTakeStream {
        stream_slot_id: slot_index,
    };

    let capture = {
        let state = ctx.state.lock().await;
        let Some(player) = state.player(user_id) else {
            return Ok(());
        };
        let listener_ip = player.ip.clone();
        let (area_id, room_id) = (player.area_id.clone(), player.room_id.clone());

        let slot = state
            .room_state(&area_id, &room_id)
            .and_then(|rs| rs.streams.get(slot_index));

        let capture = slot.and_then(|slot| {
            let publisher = slot.publisher.as_ref()?;
            let publisher_player = state.player(&publisher.user_id)?;
            if publisher_player.blocked_ips.contains(&listener_ip) {
                return None;
            }
            publisher.relay_handle?;
            Some(Capture {
                generation: slot.stream_id,
                session: slot.relay_session?,
                server_id: slot.relay_server_id.clone()?,
                room_int: slot.relay_room_int,
                feed_id: publisher.feed_id?,
                area_id,
                room_id,
            })
        });

        match capture {
            Some(capture) => capture,
            None => {
                tracing::info!("server-not-ok-to-take-stream '{}' {}", user_id, slot_index);
                state.emit_to_player(user_id, &reject);
                return Ok(());
            }
        }
    };

    let Some(client) = ctx
        .relay(&capture.server_id)
        .map(|r| Arc::clone(&r.client))
    else {
        let state = ctx.state.lock().await;
        state.emit_to_player(user_id, &reject);
        return Ok(());
    };

    let listened = async {
        client.ensure_connected().await?;
        client
            .listen_feed(capture.session, capture.room_int, capture.feed_id)
            .await
    }
    .await;
    let listened = match listened {
        Ok(listened) => listened,
        Err(e) => {
            log_relay_failure("Failed to open listener feed", &e);
            let state = ctx.state.lock().await;
            state.emit_to_player(user_id, &reject);
            return Ok(());
        }
    };

    let mut state = ctx.state.lock().await;
    let still_valid = state
        .room_state(&capture.area_id, &capture.room_id)
        .and_then(|rs| rs.streams.get(slot_index))
        .is_some_and(|s| s.stream_id == capture.generation && s.is_active);
    if !still_valid {
        drop(state);
        tracing::info!(
            "'{}' listener handle {} detached before full connection",
            user_id,
            listened.handle.0
        );
        if let Err(e) = client.detach(capture.session, listened.handle).await {
            log_relay_failure("Failed to detach stale listener handle", &e);
        }
        return Ok(());
    }

    let slot = state
        .room_state_mut(&capture.area_id, &capture.room_id)
        .and_then(|rs| rs.streams.get_mut(slot_index))
        .expect("slot validated above");
    let mut participant = crate::domain::StreamParticipant::new(user_id.to_string());
    participant.relay_handle = Some(listened.handle);
    slot.listeners.push(participant);

    wire_trickle_forwarding(
        ctx,
        client.as_ref(),
        capture.session,
        listened.handle,
        user_id,
        slot_index,
    );

    state.emit_to_player(
        user_id,
        &ServerEvent::ServerRtcMessage {
            stream_slot_id: slot_index,
            kind: RtcMessageKind::Offer,
            msg: listened.offer,
        },
    );
    Ok(())
}

/// Forward relay-originated trickle-ICE notifications for `handle` to the
/// player's connection.
fn wire_trickle_forwarding(
    ctx: &Arc<AppContext>,
    client: &dyn RelayClient,
    session: RelaySessionId,
    handle: RelayHandleId,
    user_id: &str,
    slot_index: usize,
) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    client.on_trickle(session, handle, tx);

    let ctx = Arc::clone(ctx);
    let user_id = user_id.to_string();
    tokio::spawn(async move {
        while let Some(candidate) = rx.recv().await {
            let state = ctx.state.lock().await;
            state.emit_to_player(
                &user_id,
                &ServerEvent::ServerRtcMessage {
                    stream_slot_id: slot_index,
                    kind: RtcMessageKind::Candidate,
                    msg: candidate,
                },
            );
        }
    });
}

/// Detach a listener from a slot; idempotent.
pub async fn handle_drop_stream(
    ctx: &Arc<AppContext>,
    user_id: &str,
    slot_index: usize,
) -> Result<(), EventError> {
    tracing::info!("'{}' user-want-to-drop-stream", user_id);

    let detachment = {
        let mut state = ctx.state.lock().await;
        let Some(player) = state.player(user_id) else {
            return Ok(());
        };
        let (area_id, room_id) = (player.area_id.clone(), player.room_id.clone());
        let Some(slot) = state
            .room_state_mut(&area_id, &room_id)
            .and_then(|rs| rs.streams.get_mut(slot_index))
        else {
            return Ok(());
        };
        if slot.relay_session.is_none() {
            return Ok(());
        }
        let session = slot.relay_session.expect("checked above");
        let server_id = slot.relay_server_id.clone();

        match slot.listeners.iter().position(|l| l.user_id == user_id) {
            Some(index) => {
                let listener = slot.listeners.remove(index);
                listener.relay_handle.map(|handle| (server_id, session, handle))
            }
            None => None,
        }
    };

    if let Some((server_id, session, handle)) = detachment {
        let Some(client) = server_id
            .as_deref()
            .and_then(|id| ctx.relay(id))
            .map(|r| Arc::clone(&r.client))
        else {
            return Ok(());
        };
        tracing::info!("'{}' listener handle {} detached", user_id, handle.0);
        if let Err(e) = client.detach(session, handle).await {
            log_relay_failure("Failed to detach listener handle", &e);
        }
    }
    Ok(())
}

/// Dispatch an RTC signaling message; failures clear the half-initialized
/// slot rather than leaving it dangling.
pub async fn handle_rtc_message(
    ctx: &Arc<AppContext>,
    user_id: &str,
    slot_index: usize,
    kind: RtcMessageKind,
    msg: Value,
) -> Result<(), EventError> {
    tracing::info!(
        "user-rtc-message start '{}' {} {:?}",
        user_id,
        slot_index,
        kind
    );

    let result = match kind {
        RtcMessageKind::Offer => handle_publisher_offer(ctx, user_id, slot_index, msg).await,
        RtcMessageKind::Answer => forward_answer(ctx, user_id, slot_index, msg).await,
        RtcMessageKind::Candidate => forward_candidate(ctx, user_id, slot_index, msg).await,
    };

    if let Err(e) = result {
        if let EventError::Relay(relay_error) = &e {
            log_relay_failure("RTC message handling failed", relay_error);
        } else {
            tracing::error!("RTC message handling failed for '{}': {}", user_id, e);
        }
        if kind == RtcMessageKind::Offer {
            clear_stream(ctx, user_id).await;
            let state = ctx.state.lock().await;
            state.emit_to_player(
                user_id,
                &ServerEvent::ServerNotOkToStream {
                    reason: StreamRejectReason::UnknownError,
                },
            );
        }
    }
    Ok(())
}

/// The publisher's offer: pick a relay by load, open a session and the
/// room resource, publish the media and hand the answer back.
async fn handle_publisher_offer(
    ctx: &Arc<AppContext>,
    user_id: &str,
    slot_index: usize,
    offer: Value,
) -> Result<(), EventError> {
    // Phase 1: assign the relay server under the lock.
    let (generation, room_int, server_id, area_id, room_id) = {
        let mut state = ctx.state.lock().await;
        let Some(player) = state.player(user_id) else {
            return Ok(());
        };
        let (area_id, room_id) = (player.area_id.clone(), player.room_id.clone());

        let Some(slot) = state
            .room_state(&area_id, &room_id)
            .and_then(|rs| rs.streams.get(slot_index))
        else {
            return Ok(());
        };
        if !slot.is_published_by(user_id) {
            return Ok(());
        }

        let server_id = least_loaded_relay(ctx, &state)
            .map(|r| r.id.clone())
            .ok_or(EventError::NoRelayAvailable)?;

        let slot = state
            .room_state_mut(&area_id, &room_id)
            .and_then(|rs| rs.streams.get_mut(slot_index))
            .expect("slot existed moments ago");
        slot.relay_server_id = Some(server_id.clone());
        (slot.stream_id, slot.relay_room_int, server_id, area_id, room_id)
    };

    let client = ctx
        .relay(&server_id)
        .map(|r| Arc::clone(&r.client))
        .ok_or(EventError::NoRelayAvailable)?;

    client.ensure_connected().await?;
    let session = client.create_session().await?;
    tracing::info!(
        "'{}' relay session {} created on server '{}'",
        user_id,
        session.0,
        server_id
    );

    // Re-validate and store the session so teardown can release it.
    {
        let mut state = ctx.state.lock().await;
        let valid = state
            .room_state(&area_id, &room_id)
            .and_then(|rs| rs.streams.get(slot_index))
            .is_some_and(|s| s.stream_id == generation && s.is_active);
        if !valid {
            drop(state);
            if let Err(e) = client.destroy_session(session).await {
                log_relay_failure("Failed to destroy stale relay session", &e);
            }
            return Ok(());
        }
        state
            .room_state_mut(&area_id, &room_id)
            .and_then(|rs| rs.streams.get_mut(slot_index))
            .expect("validated above")
            .relay_session = Some(session);
    }

    client
        .create_room(session, room_int, RELAY_ROOM_PUBLISHERS)
        .await?;
    tracing::info!(
        "'{}' relay room {} ensured on server '{}'",
        user_id,
        room_int,
        server_id
    );

    {
        let state = ctx.state.lock().await;
        let valid = state
            .room_state(&area_id, &room_id)
            .and_then(|rs| rs.streams.get(slot_index))
            .is_some_and(|s| s.stream_id == generation && s.is_active);
        if !valid {
            drop(state);
            if let Err(e) = client.destroy_session(session).await {
                log_relay_failure("Failed to destroy stale relay session", &e);
            }
            return Ok(());
        }
    }

    let published = client.publish_feed(session, room_int, offer).await?;
    tracing::info!(
        "'{}' relay publisher handle {} created on server '{}'",
        user_id,
        published.handle.0,
        server_id
    );

    let mut state = ctx.state.lock().await;
    let valid = state
        .room_state(&area_id, &room_id)
        .and_then(|rs| rs.streams.get(slot_index))
        .is_some_and(|s| s.stream_id == generation && s.is_active);
    if !valid {
        drop(state);
        if let Err(e) = client.detach(session, published.handle).await {
            log_relay_failure("Failed to detach stale publisher handle", &e);
        }
        if let Err(e) = client.destroy_session(session).await {
            log_relay_failure("Failed to destroy stale relay session", &e);
        }
        return Ok(());
    }

    let slot = state
        .room_state_mut(&area_id, &room_id)
        .and_then(|rs| rs.streams.get_mut(slot_index))
        .expect("validated above");
    if let Some(publisher) = slot.publisher.as_mut() {
        publisher.relay_handle = Some(published.handle);
        publisher.feed_id = Some(published.feed_id);
    }
    slot.is_ready = true;

    wire_trickle_forwarding(
        ctx,
        client.as_ref(),
        session,
        published.handle,
        user_id,
        slot_index,
    );

    broadcast_stream_slots(ctx, &state, &area_id, &room_id);
    state.emit_to_player(
        user_id,
        &ServerEvent::ServerRtcMessage {
            stream_slot_id: slot_index,
            kind: RtcMessageKind::Answer,
            msg: published.answer,
        },
    );
    Ok(())
}

/// Resolve the relay handle associated with the sender's role in a slot.
async fn sender_handle(
    ctx: &Arc<AppContext>,
    user_id: &str,
    slot_index: usize,
) -> Option<(Arc<dyn RelayClient>, RelaySessionId, RelayHandleId)> {
    let state = ctx.state.lock().await;
    let player = state.player(user_id)?;
    let slot = state
        .room_state(&player.area_id, &player.room_id)?
        .streams
        .get(slot_index)?;

    let participant = if slot.is_published_by(user_id) {
        slot.publisher.as_ref()
    } else {
        slot.listeners.iter().find(|l| l.user_id == user_id)
    };
    let handle = participant?.relay_handle?;
    let session = slot.relay_session?;
    let client = slot
        .relay_server_id
        .as_deref()
        .and_then(|id| ctx.relay(id))
        .map(|r| Arc::clone(&r.client))?;
    Some((client, session, handle))
}

async fn forward_answer(
    ctx: &Arc<AppContext>,
    user_id: &str,
    slot_index: usize,
    answer: Value,
) -> Result<(), EventError> {
    // Unresolvable association is a silent no-op.
    let Some((client, session, handle)) = sender_handle(ctx, user_id, slot_index).await else {
        return Ok(());
    };
    client.set_remote_answer(session, handle, answer).await?;
    Ok(())
}

async fn forward_candidate(
    ctx: &Arc<AppContext>,
    user_id: &str,
    slot_index: usize,
    msg: Value,
) -> Result<(), EventError> {
    let Some((client, session, handle)) = sender_handle(ctx, user_id, slot_index).await else {
        return Ok(());
    };
    let candidate = msg.get("candidate").cloned().unwrap_or(Value::Null);
    if candidate.as_str() == Some("") {
        client.trickle_completed(session, handle).await?;
    } else {
        client.trickle(session, handle, candidate).await?;
    }
    Ok(())
}
