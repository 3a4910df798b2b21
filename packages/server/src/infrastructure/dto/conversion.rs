//! Viewer-aware projections from domain entities to DTOs.
//!
//! Blocking, censorship and forced anonymity are applied here, per
//! recipient, so the stored state never needs to be scrubbed.

use std::collections::HashMap;

use crate::domain::{ChessState, Player, Room, StreamSlot};
use crate::state::blocked_either_way;

use super::websocket::{
    ChessboardStateDto, PlayerDto, RoomDto, RoomStateDto, StreamSlotDto,
};

/// Whether a message matches the configured censorship pattern.
pub fn is_censored(message: &str, censored_words: &[String]) -> bool {
    if message.is_empty() || censored_words.is_empty() {
        return false;
    }
    let lowered = message.to_lowercase();
    censored_words.iter().any(|word| lowered.contains(word))
}

/// Public projection of a player. The name is blanked in forced-anonymous
/// rooms and a censored open bubble is blanked for everyone but its author.
pub fn to_player_dto(player: &Player, room: &Room, censored_words: &[String]) -> PlayerDto {
    PlayerDto {
        id: player.id.clone(),
        name: if room.forced_anonymous {
            String::new()
        } else {
            player.name.clone()
        },
        position: player.position,
        direction: player.direction,
        room_id: player.room_id.clone(),
        character_id: player.character_id.clone(),
        is_inactive: player.is_inactive,
        bubble_position: player.bubble_position,
        voice_pitch: player.voice_pitch,
        last_room_message: if is_censored(&player.last_room_message, censored_words) {
            String::new()
        } else {
            player.last_room_message.clone()
        },
        is_alternate_character: player.is_alternate_character,
    }
}

pub fn to_room_dto(room: &Room) -> RoomDto {
    RoomDto {
        id: room.id.clone(),
        group: room.group.clone(),
        size: room.size,
        blocked: room.blocked.iter().copied().collect(),
        spawn_point: room.spawn_point.clone(),
        stream_slot_count: room.stream_slot_count,
        forced_anonymous: room.forced_anonymous,
    }
}

/// Project a room's stream slots for one viewer. Slots published by
/// someone blocked either way against the viewer read as empty; viewers
/// on the no-stream list see no slots at all.
pub fn stream_slot_dtos(
    viewer: &Player,
    slots: &[StreamSlot],
    players: &HashMap<String, &Player>,
    no_stream_ips: &[String],
) -> Vec<StreamSlotDto> {
    if no_stream_ips.contains(&viewer.ip) {
        return Vec::new();
    }

    slots
        .iter()
        .map(|slot| {
            let publisher = slot
                .publisher
                .as_ref()
                .and_then(|p| players.get(p.user_id.as_str()).copied());
            let hidden = match publisher {
                None => true,
                Some(p) => p.id != viewer.id && blocked_either_way(p, viewer),
            };
            if hidden {
                StreamSlotDto {
                    is_active: false,
                    is_ready: false,
                    with_sound: None,
                    with_video: None,
                    user_id: None,
                }
            } else {
                StreamSlotDto {
                    is_active: slot.is_active,
                    is_ready: slot.is_ready,
                    with_sound: slot.with_sound,
                    with_video: slot.with_video,
                    user_id: publisher.map(|p| p.id.clone()),
                }
            }
        })
        .collect()
}

pub fn to_chessboard_dto(chess: &ChessState) -> ChessboardStateDto {
    ChessboardStateDto {
        fen_string: chess.fen(),
        turn: chess.turn().map(|t| t.to_string()),
        white_user_id: chess.white_user_id.clone(),
        black_user_id: chess.black_user_id.clone(),
    }
}

/// Assemble the full per-viewer room snapshot.
pub fn to_room_state_dto(
    room: &Room,
    connected_users: Vec<PlayerDto>,
    streams: Vec<StreamSlotDto>,
    chess: &ChessState,
    coin_counter: i64,
    hide_streams: bool,
) -> RoomStateDto {
    RoomStateDto {
        current_room: to_room_dto(room),
        connected_users,
        streams,
        chessboard_state: to_chessboard_dto(chess),
        coin_counter,
        hide_streams,
    }
}
