//! Presence & movement engine: movement and direction, room changes,
//! character changes, blocking and the room list.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use hiroba_shared::time::get_timestamp_millis;

use crate::domain::{Direction, PERMANENT_CHARACTER_ID, Player, Position, TriggerEffect};
use crate::infrastructure::dto::conversion::{
    stream_slot_dtos, to_player_dto, to_room_state_dto,
};
use crate::infrastructure::dto::websocket::{RoomListItemDto, ServerEvent};
use crate::state::{AppContext, ServerState, blocked_either_way};
use crate::usecase::{EventError, chess, streams};

/// A repeated same-direction input within this window is a move (with the
/// spin-walk animation), not a redundant turn.
const SPIN_WINDOW_MS: i64 = 500;

/// Apply a character change, honoring the irreversible-transformation rule:
/// the permanent identity accepts no further changes.
pub fn change_character(
    state: &mut ServerState,
    user_id: &str,
    character_id: &str,
    is_alternate_character: bool,
    now: i64,
) {
    let Some(player) = state.player_mut(user_id) else {
        return;
    };
    if player.character_id == PERMANENT_CHARACTER_ID {
        return;
    }
    player.character_id = character_id.to_string();
    player.is_alternate_character = is_alternate_character;
    player.last_action = now;
    let (area_id, room_id) = (player.area_id.clone(), player.room_id.clone());

    state.user_room_emit(
        user_id,
        &area_id,
        &room_id,
        &ServerEvent::ServerCharacterChanged {
            user_id: user_id.to_string(),
            character_id: character_id.to_string(),
            is_alternate_character,
        },
    );
}

pub async fn handle_change_character(
    ctx: &Arc<AppContext>,
    user_id: &str,
    character_id: &str,
    is_alternate_character: bool,
) -> Result<(), EventError> {
    let mut state = ctx.state.lock().await;
    change_character(
        &mut state,
        user_id,
        character_id,
        is_alternate_character,
        get_timestamp_millis(),
    );
    Ok(())
}

/// Validate and apply a movement/direction input.
pub async fn handle_move(
    ctx: &Arc<AppContext>,
    user_id: &str,
    direction: Direction,
) -> Result<(), EventError> {
    let now = get_timestamp_millis();
    let mut state = ctx.state.lock().await;

    // read phase: decide what this input is
    let Some(player) = state.player(user_id) else {
        return Ok(());
    };
    if player.disconnection_time.is_some() {
        tracing::error!("user-move called for disconnected user '{}'", user_id);
        return Ok(());
    }
    tracing::debug!("user-move '{}' {:?}", user_id, direction);

    let (area_id, room_id) = (player.area_id.clone(), player.room_id.clone());
    let current_position = player.position;
    let current_direction = player.direction;
    let should_spinwalk = player.last_direction == Some(direction)
        && player
            .direction_changed_at
            .is_some_and(|t| now - t < SPIN_WINDOW_MS);

    let Some(room) = ctx.room(&room_id) else {
        return Err(EventError::UnknownRoom(room_id));
    };

    #[derive(Clone, Copy)]
    enum Action {
        Turn,
        Move(Position),
        Reject,
    }

    let action = if current_direction != direction && !should_spinwalk {
        Action::Turn
    } else {
        let target = direction.step(current_position);
        if !room.contains(target)
            || room.is_blocked(target)
            || room.is_forbidden_movement(current_position, target)
        {
            Action::Reject
        } else {
            Action::Move(target)
        }
    };

    // apply phase
    let mut immediate_transform: Option<&'static str> = None;
    let mut delayed_transform: Option<(&'static str, u64, Position)> = None;
    {
        let player = state.player_mut(user_id).expect("player still exists");
        player.mark_active(now);
        match action {
            Action::Turn => {
                player.last_direction = Some(player.direction);
                player.direction = direction;
                player.direction_changed_at = Some(now);
            }
            Action::Move(target) => {
                player.direction_changed_at = None;
                player.position = target;
                if let Some(trigger) = room.trigger_at(target) {
                    match trigger.effect {
                        TriggerEffect::Transform { character_id } => {
                            immediate_transform = Some(character_id);
                        }
                        TriggerEffect::DelayedTransform {
                            character_id,
                            delay_ms,
                        } => {
                            delayed_transform = Some((character_id, delay_ms, target));
                        }
                    }
                }
            }
            Action::Reject => {
                player.direction_changed_at = None;
            }
        }
    }

    if matches!(action, Action::Reject) {
        tracing::debug!("movement rejected '{}'", user_id);
        state.emit_to_player(user_id, &ServerEvent::ServerRejectMovement);
        return Ok(());
    }

    if let Some(character_id) = immediate_transform {
        change_character(&mut state, user_id, character_id, false, now);
    }

    let Some(player) = state.player(user_id) else {
        return Ok(());
    };
    let (x, y, facing) = (player.position.x, player.position.y, player.direction);
    state.user_room_emit(
        user_id,
        &area_id,
        &room_id,
        &ServerEvent::ServerMove {
            user_id: user_id.to_string(),
            x,
            y,
            direction: facing,
            is_instant: false,
            should_spinwalk,
        },
    );
    drop(state);

    if let Some((character_id, delay_ms, cell)) = delayed_transform {
        spawn_delayed_transform(ctx, user_id, &room_id, character_id, delay_ms, cell);
    }

    Ok(())
}

/// Identity change applied after a delay, only if the player still
/// occupies the trigger cell of that room by then.
fn spawn_delayed_transform(
    ctx: &Arc<AppContext>,
    user_id: &str,
    room_id: &str,
    character_id: &'static str,
    delay_ms: u64,
    cell: Position,
) {
    let ctx = Arc::clone(ctx);
    let user_id = user_id.to_string();
    let room_id = room_id.to_string();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        let mut state = ctx.state.lock().await;
        let still_there = state
            .player(&user_id)
            .is_some_and(|p| p.room_id == room_id && p.position == cell);
        if still_there {
            tracing::info!("'{}' changing to {}", user_id, character_id);
            change_character(&mut state, &user_id, character_id, false, get_timestamp_millis());
        }
    });
}

pub async fn handle_bubble_position(
    ctx: &Arc<AppContext>,
    user_id: &str,
    position: Direction,
) -> Result<(), EventError> {
    let mut state = ctx.state.lock().await;
    let Some(player) = state.player_mut(user_id) else {
        return Ok(());
    };
    player.bubble_position = position;
    let (area_id, room_id) = (player.area_id.clone(), player.room_id.clone());

    state.user_room_emit(
        user_id,
        &area_id,
        &room_id,
        &ServerEvent::ServerBubblePosition {
            user_id: user_id.to_string(),
            position,
        },
    );
    Ok(())
}

pub async fn handle_ping(ctx: &Arc<AppContext>, user_id: &str) -> Result<(), EventError> {
    let mut state = ctx.state.lock().await;
    let Some(player) = state.player_mut(user_id) else {
        return Ok(());
    };
    if player.disconnection_time.is_some() {
        return Ok(());
    }
    tracing::info!("user-ping '{}'", user_id);
    player.mark_active(get_timestamp_millis());
    let (area_id, room_id) = (player.area_id.clone(), player.room_id.clone());

    state.user_room_emit(
        user_id,
        &area_id,
        &room_id,
        &ServerEvent::ServerUserActive {
            user_id: user_id.to_string(),
        },
    );
    Ok(())
}

/// Send the full current-room snapshot to one player.
pub fn send_room_state(ctx: &AppContext, state: &ServerState, user_id: &str) {
    let Some(player) = state.player(user_id) else {
        return;
    };
    let Some(room) = ctx.room(&player.room_id) else {
        return;
    };
    let Some(room_state) = state.room_state(&player.area_id, &player.room_id) else {
        return;
    };

    let connected_users: Vec<_> = state
        .filtered_connected_user_list(user_id, Some(&player.room_id), &player.area_id)
        .iter()
        .map(|u| to_player_dto(u, room, &ctx.settings.censored_words))
        .collect();

    let room_players: HashMap<String, &Player> = state
        .connected_user_list(Some(&player.room_id), &player.area_id)
        .into_iter()
        .map(|p| (p.id.clone(), p))
        .collect();
    let streams = stream_slot_dtos(
        player,
        &room_state.streams,
        &room_players,
        &ctx.settings.no_stream_ips,
    );

    let dto = to_room_state_dto(
        room,
        connected_users,
        streams,
        &room_state.chess,
        room_state.coin_counter,
        ctx.settings.no_stream_ips.contains(&player.ip),
    );
    state.emit_to_player(
        user_id,
        &ServerEvent::ServerUpdateCurrentRoomState { state: dto },
    );
}

/// Announce a player to their room's visibility-filtered scope.
pub fn send_new_user_info(ctx: &AppContext, state: &ServerState, user_id: &str) {
    let Some(player) = state.player(user_id) else {
        return;
    };
    let Some(room) = ctx.room(&player.room_id) else {
        return;
    };
    state.user_room_emit(
        user_id,
        &player.area_id.clone(),
        &player.room_id.clone(),
        &ServerEvent::ServerUserJoinedRoom {
            user: to_player_dto(player, room, &ctx.settings.censored_words),
        },
    );
}

pub async fn handle_change_room(
    ctx: &Arc<AppContext>,
    user_id: &str,
    target_room_id: &str,
    target_door_id: Option<String>,
) -> Result<(), EventError> {
    tracing::info!(
        "user-change-room '{}' {} {:?}",
        user_id,
        target_room_id,
        target_door_id
    );

    let Some(target_room) = ctx.room(target_room_id) else {
        return Ok(());
    };
    if let Some(door_id) = &target_door_id {
        if !target_room.doors.contains_key(door_id) {
            return Ok(());
        }
    }

    streams::clear_stream(ctx, user_id).await;
    streams::clear_room_listener(ctx, user_id).await;

    let mut state = ctx.state.lock().await;
    chess::stop_chess_game(&mut state, user_id);

    let Some(player) = state.player(user_id) else {
        return Ok(());
    };
    let (area_id, old_room_id) = (player.area_id.clone(), player.room_id.clone());
    state.user_room_emit(
        user_id,
        &area_id,
        &old_room_id,
        &ServerEvent::ServerUserLeftRoom {
            user_id: user_id.to_string(),
        },
    );

    let door_id = target_door_id.unwrap_or_else(|| target_room.spawn_point.clone());
    let Some(door) = target_room.doors.get(&door_id) else {
        tracing::error!(
            "'{}' could not find door {} in room {}",
            user_id,
            door_id,
            target_room_id
        );
        return Ok(());
    };

    let now = get_timestamp_millis();
    let player = state
        .player_mut(user_id)
        .expect("player existed moments ago");
    player.position = door.position();
    if let Some(direction) = door.direction {
        player.direction = direction;
    }
    player.room_id = target_room_id.to_string();
    player.mark_active(now);
    player.last_room_message.clear();

    send_room_state(ctx, &state, user_id);
    send_new_user_info(ctx, &state, user_id);
    Ok(())
}

pub async fn handle_room_list(ctx: &Arc<AppContext>, user_id: &str) -> Result<(), EventError> {
    let state = ctx.state.lock().await;
    let Some(player) = state.player(user_id) else {
        return Ok(());
    };
    let area_id = player.area_id.clone();

    let mut rooms: Vec<RoomListItemDto> = Vec::new();
    for room in ctx.rooms.values().filter(|r| !r.secret) {
        let user_count = state
            .filtered_connected_user_list(user_id, Some(&room.id), &area_id)
            .len();

        let room_players: HashMap<String, &Player> = state
            .connected_user_list(Some(&room.id), &area_id)
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();
        let streamers = state
            .room_state(&area_id, &room.id)
            .map(|room_state| {
                stream_slot_dtos(
                    player,
                    &room_state.streams,
                    &room_players,
                    &ctx.settings.no_stream_ips,
                )
                .into_iter()
                .filter(|s| s.is_active && s.user_id.is_some())
                .map(|s| {
                    if room.forced_anonymous {
                        return String::new();
                    }
                    match state.player(s.user_id.as_deref().unwrap_or("")) {
                        Some(streamer) => streamer.name.clone(),
                        None => "N/A".to_string(),
                    }
                })
                .collect()
            })
            .unwrap_or_default();

        rooms.push(RoomListItemDto {
            id: room.id.clone(),
            group: room.group.clone(),
            user_count,
            streamers,
        });
    }
    rooms.sort_by(|a, b| a.id.cmp(&b.id));

    state.emit_to_player(user_id, &ServerEvent::ServerRoomList { rooms });
    Ok(())
}

/// Block another player by IP. Both sides immediately stop seeing each
/// other (filtering is symmetric even though storage is not).
pub async fn handle_block(
    ctx: &Arc<AppContext>,
    user_id: &str,
    target_user_id: &str,
) -> Result<(), EventError> {
    tracing::info!("user-block '{}' '{}'", user_id, target_user_id);
    let mut state = ctx.state.lock().await;

    let Some(target_ip) = state.player(target_user_id).map(|p| p.ip.clone()) else {
        return Ok(());
    };
    let Some(player) = state.player_mut(user_id) else {
        return Ok(());
    };
    player.blocked_ips.insert(target_ip);
    let (area_id, room_id) = (player.area_id.clone(), player.room_id.clone());

    // Mutually remove the newly hidden players from each other's view.
    let blocker = state.player(user_id).expect("blocker exists");
    let hidden_ids: Vec<String> = state
        .connected_user_list(Some(&room_id), &area_id)
        .into_iter()
        .filter(|u| u.id != user_id && blocked_either_way(u, blocker))
        .map(|u| u.id.clone())
        .collect();

    for hidden_id in &hidden_ids {
        state.emit_to_player(
            hidden_id,
            &ServerEvent::ServerUserLeftRoom {
                user_id: user_id.to_string(),
            },
        );
        state.emit_to_player(
            user_id,
            &ServerEvent::ServerUserLeftRoom {
                user_id: hidden_id.clone(),
            },
        );
    }

    streams::broadcast_stream_slots(ctx, &state, &area_id, &room_id);
    state.emit_server_stats(&area_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use crate::usecase::login;
    use tokio::sync::mpsc;

    async fn bind_player(
        ctx: &Arc<AppContext>,
        name: &str,
        ip: &str,
        room_id: &str,
    ) -> (String, mpsc::UnboundedReceiver<String>) {
        let outcome = login::login(ctx, name, "giko", "gen", room_id, ip)
            .await
            .unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = ctx.state.lock().await;
        let connection_id = format!("conn-{}", outcome.user_id);
        state.register_connection(connection_id.clone(), tx);
        let player = state.player_mut(&outcome.user_id).unwrap();
        player.is_ghost = false;
        player.disconnection_time = None;
        player.connection_id = Some(connection_id);
        (outcome.user_id, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<serde_json::Value> {
        let mut events = Vec::new();
        while let Ok(text) = rx.try_recv() {
            events.push(serde_json::from_str(&text).unwrap());
        }
        events
    }

    async fn place_player(ctx: &Arc<AppContext>, user_id: &str, x: i32, y: i32, d: Direction) {
        let mut state = ctx.state.lock().await;
        let player = state.player_mut(user_id).unwrap();
        player.position = Position::new(x, y);
        player.direction = d;
        player.last_direction = None;
        player.direction_changed_at = None;
    }

    #[tokio::test]
    async fn test_move_into_free_cell_is_broadcast() {
        let ctx = AppContext::with_relays(Settings::default(), Vec::new());
        let (alice, mut rx) = bind_player(&ctx, "alice", "10.0.0.1", "bar").await;
        place_player(&ctx, &alice, 4, 4, Direction::Right).await;

        handle_move(&ctx, &alice, Direction::Right).await.unwrap();

        let events = drain(&mut rx);
        let moved = events
            .iter()
            .find(|e| e["type"] == "server-move")
            .expect("move event");
        assert_eq!(moved["x"], 5);
        assert_eq!(moved["y"], 4);
        assert_eq!(moved["shouldSpinwalk"], false);
    }

    #[tokio::test]
    async fn test_different_direction_only_turns() {
        let ctx = AppContext::with_relays(Settings::default(), Vec::new());
        let (alice, mut rx) = bind_player(&ctx, "alice", "10.0.0.1", "bar").await;
        place_player(&ctx, &alice, 4, 4, Direction::Right).await;

        handle_move(&ctx, &alice, Direction::Up).await.unwrap();

        let state = ctx.state.lock().await;
        let player = state.player(&alice).unwrap();
        assert_eq!(player.position, Position::new(4, 4));
        assert_eq!(player.direction, Direction::Up);
        assert!(player.direction_changed_at.is_some());
        drop(state);

        let events = drain(&mut rx);
        let moved = events.iter().find(|e| e["type"] == "server-move").unwrap();
        assert_eq!(moved["x"], 4);
        assert_eq!(moved["y"], 4);
        assert_eq!(moved["direction"], "up");
    }

    #[tokio::test]
    async fn test_same_direction_repeat_in_spin_window_moves_with_spinwalk() {
        let ctx = AppContext::with_relays(Settings::default(), Vec::new());
        let (alice, mut rx) = bind_player(&ctx, "alice", "10.0.0.1", "bar").await;
        place_player(&ctx, &alice, 4, 4, Direction::Right).await;
        {
            // simulate a just-performed turn: facing up, was facing up before
            let mut state = ctx.state.lock().await;
            let player = state.player_mut(&alice).unwrap();
            player.direction = Direction::Up;
            player.last_direction = Some(Direction::Up);
            player.direction_changed_at = Some(get_timestamp_millis());
        }

        handle_move(&ctx, &alice, Direction::Up).await.unwrap();

        let events = drain(&mut rx);
        let moved = events.iter().find(|e| e["type"] == "server-move").unwrap();
        assert_eq!(moved["y"], 5);
        assert_eq!(moved["shouldSpinwalk"], true);
    }

    #[tokio::test]
    async fn test_out_of_bounds_blocked_and_forbidden_moves_are_rejected() {
        let ctx = AppContext::with_relays(Settings::default(), Vec::new());
        let (alice, mut rx) = bind_player(&ctx, "alice", "10.0.0.1", "bar").await;
        let (_bob, mut bob_rx) = bind_player(&ctx, "bob", "10.0.0.2", "bar").await;
        drain(&mut bob_rx);

        // out of bounds: x would become 9 in a 9-wide room
        place_player(&ctx, &alice, 8, 4, Direction::Right).await;
        handle_move(&ctx, &alice, Direction::Right).await.unwrap();
        // blocked cell (2,2)
        place_player(&ctx, &alice, 1, 2, Direction::Right).await;
        handle_move(&ctx, &alice, Direction::Right).await.unwrap();
        // forbidden edge (5,5)->(5,6)
        place_player(&ctx, &alice, 5, 5, Direction::Up).await;
        handle_move(&ctx, &alice, Direction::Up).await.unwrap();

        let events = drain(&mut rx);
        let rejections = events
            .iter()
            .filter(|e| e["type"] == "server-reject-movement")
            .count();
        assert_eq!(rejections, 3);
        assert!(!events.iter().any(|e| e["type"] == "server-move"));

        // the rejection is visible to the mover only; the other occupant
        // sees neither a move nor a rejection
        let bob_events = drain(&mut bob_rx);
        assert!(!bob_events.iter().any(|e| e["type"] == "server-move"));
        assert!(!bob_events
            .iter()
            .any(|e| e["type"] == "server-reject-movement"));

        let state = ctx.state.lock().await;
        assert_eq!(state.player(&alice).unwrap().position, Position::new(5, 5));
    }

    #[tokio::test]
    async fn test_blocked_pair_sees_no_move_broadcast() {
        let ctx = AppContext::with_relays(Settings::default(), Vec::new());
        let (alice, mut alice_rx) = bind_player(&ctx, "alice", "10.0.0.1", "bar").await;
        let (bob, mut bob_rx) = bind_player(&ctx, "bob", "10.0.0.2", "bar").await;
        {
            let mut state = ctx.state.lock().await;
            state
                .player_mut(&bob)
                .unwrap()
                .blocked_ips
                .insert("10.0.0.1".to_string());
        }
        place_player(&ctx, &alice, 4, 4, Direction::Right).await;
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        handle_move(&ctx, &alice, Direction::Right).await.unwrap();

        assert!(drain(&mut alice_rx).iter().any(|e| e["type"] == "server-move"));
        assert!(drain(&mut bob_rx).is_empty());
    }

    #[tokio::test]
    async fn test_trigger_cell_forces_character_change() {
        let ctx = AppContext::with_relays(Settings::default(), Vec::new());
        let (alice, _rx) = bind_player(&ctx, "alice", "10.0.0.1", "yoshinoya").await;
        place_player(&ctx, &alice, 2, 5, Direction::Down).await;

        handle_move(&ctx, &alice, Direction::Down).await.unwrap();

        let state = ctx.state.lock().await;
        assert_eq!(state.player(&alice).unwrap().character_id, "hungry_giko");
    }

    #[tokio::test]
    async fn test_permanent_character_never_changes_again() {
        let ctx = AppContext::with_relays(Settings::default(), Vec::new());
        let (alice, _rx) = bind_player(&ctx, "alice", "10.0.0.1", "bar").await;
        {
            let mut state = ctx.state.lock().await;
            state.player_mut(&alice).unwrap().character_id = PERMANENT_CHARACTER_ID.to_string();
        }

        handle_change_character(&ctx, &alice, "giko", false)
            .await
            .unwrap();

        let state = ctx.state.lock().await;
        assert_eq!(state.player(&alice).unwrap().character_id, PERMANENT_CHARACTER_ID);
    }

    #[tokio::test]
    async fn test_change_room_moves_player_and_notifies_both_rooms() {
        let ctx = AppContext::with_relays(Settings::default(), Vec::new());
        let (alice, mut alice_rx) = bind_player(&ctx, "alice", "10.0.0.1", "bar").await;
        let (_bob, mut bob_rx) = bind_player(&ctx, "bob", "10.0.0.2", "jinja").await;
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        handle_change_room(&ctx, &alice, "jinja", None).await.unwrap();

        let state = ctx.state.lock().await;
        let player = state.player(&alice).unwrap();
        assert_eq!(player.room_id, "jinja");
        let door = ctx.room("jinja").unwrap().doors["entrance"];
        assert_eq!(player.position, door.position());
        assert!(player.last_room_message.is_empty());
        drop(state);

        let alice_events = drain(&mut alice_rx);
        assert!(alice_events
            .iter()
            .any(|e| e["type"] == "server-update-current-room-state"));
        let bob_events = drain(&mut bob_rx);
        assert!(bob_events.iter().any(|e| e["type"] == "server-user-joined-room"));
    }

    #[tokio::test]
    async fn test_change_room_to_unknown_room_or_door_is_ignored() {
        let ctx = AppContext::with_relays(Settings::default(), Vec::new());
        let (alice, _rx) = bind_player(&ctx, "alice", "10.0.0.1", "bar").await;

        handle_change_room(&ctx, &alice, "nowhere", None).await.unwrap();
        handle_change_room(&ctx, &alice, "jinja", Some("no_such_door".to_string()))
            .await
            .unwrap();

        let state = ctx.state.lock().await;
        assert_eq!(state.player(&alice).unwrap().room_id, "bar");
    }

    #[tokio::test]
    async fn test_room_list_hides_secret_rooms() {
        let ctx = AppContext::with_relays(Settings::default(), Vec::new());
        let (alice, mut rx) = bind_player(&ctx, "alice", "10.0.0.1", "bar").await;
        drain(&mut rx);

        handle_room_list(&ctx, &alice).await.unwrap();

        let events = drain(&mut rx);
        let list = events
            .iter()
            .find(|e| e["type"] == "server-room-list")
            .unwrap();
        let ids: Vec<&str> = list["rooms"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["id"].as_str().unwrap())
            .collect();
        assert!(ids.contains(&"bar"));
        assert!(!ids.contains(&"basement"));
    }

    #[tokio::test]
    async fn test_block_hides_both_players_from_each_other() {
        let ctx = AppContext::with_relays(Settings::default(), Vec::new());
        let (alice, mut alice_rx) = bind_player(&ctx, "alice", "10.0.0.1", "bar").await;
        let (bob, mut bob_rx) = bind_player(&ctx, "bob", "10.0.0.2", "bar").await;
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        handle_block(&ctx, &alice, &bob).await.unwrap();

        let state = ctx.state.lock().await;
        assert!(state
            .player(&alice)
            .unwrap()
            .blocked_ips
            .contains("10.0.0.2"));
        drop(state);

        let alice_events = drain(&mut alice_rx);
        assert!(alice_events
            .iter()
            .any(|e| e["type"] == "server-user-left-room" && e["userId"] == bob.as_str()));
        let bob_events = drain(&mut bob_rx);
        assert!(bob_events
            .iter()
            .any(|e| e["type"] == "server-user-left-room" && e["userId"] == alice.as_str()));
    }
}
