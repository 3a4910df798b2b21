//! Real-time channel events.
//!
//! Every inbound and outbound message is a tagged variant; there are no
//! free-form payloads, so the contract is checkable at compile time.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{Direction, Position};

/// RTC signaling message kinds relayed between clients and the media relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RtcMessageKind {
    Offer,
    Answer,
    Candidate,
}

/// Closed set of reasons a stream request is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamRejectReason {
    #[serde(rename = "start_stream_stream_slot_does_not_exist")]
    SlotDoesNotExist,
    #[serde(rename = "start_stream_stream_slot_already_taken_by_blocking_streamer")]
    TakenByBlockingStreamer,
    #[serde(rename = "start_stream_stream_slot_already_taken_by_blocked_streamer")]
    TakenByBlockedStreamer,
    #[serde(rename = "start_stream_stream_slot_already_taken")]
    AlreadyTaken,
    #[serde(rename = "start_stream_unknown_error")]
    UnknownError,
}

/// Events a client may send over the real-time channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    UserMsg {
        message: String,
    },
    UserMove {
        direction: Direction,
    },
    UserBubblePosition {
        position: Direction,
    },
    UserWantToChangeCharacter {
        character_id: String,
        #[serde(default)]
        is_alternate_character: bool,
    },
    UserChangeRoom {
        target_room_id: String,
        #[serde(default)]
        target_door_id: Option<String>,
    },
    UserRoomList,
    UserBlock {
        user_id: String,
    },
    UserPing,
    UserWantToStream {
        stream_slot_id: usize,
        #[serde(default)]
        with_video: bool,
        #[serde(default)]
        with_sound: bool,
        #[serde(default)]
        is_private_stream: bool,
    },
    UserWantToStopStream,
    UserWantToTakeStream {
        stream_slot_id: usize,
    },
    UserWantToDropStream {
        stream_slot_id: usize,
    },
    UserRtcMessage {
        stream_slot_id: usize,
        kind: RtcMessageKind,
        msg: Value,
    },
    UserWantToPlayChess,
    UserWantToQuitChess,
    UserChessMove {
        source: String,
        target: String,
    },
    #[serde(rename = "special-events:client-add-shrine-coin")]
    ClientAddShrineCoin,
}

/// Events the server sends over the real-time channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    ServerUpdateCurrentRoomState {
        state: RoomStateDto,
    },
    ServerUserJoinedRoom {
        user: PlayerDto,
    },
    ServerUserLeftRoom {
        user_id: String,
    },
    ServerMove {
        user_id: String,
        x: i32,
        y: i32,
        direction: Direction,
        is_instant: bool,
        should_spinwalk: bool,
    },
    ServerRejectMovement,
    ServerBubblePosition {
        user_id: String,
        position: Direction,
    },
    ServerMsg {
        user_id: String,
        message: String,
    },
    ServerSystemMessage {
        code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        extra: Option<String>,
    },
    ServerCharacterChanged {
        user_id: String,
        character_id: String,
        is_alternate_character: bool,
    },
    ServerUserActive {
        user_id: String,
    },
    ServerUserInactive {
        user_id: String,
    },
    ServerStats {
        user_count: usize,
        stream_count: usize,
    },
    ServerRoomList {
        rooms: Vec<RoomListItemDto>,
    },
    ServerOkToStream,
    ServerNotOkToStream {
        reason: StreamRejectReason,
    },
    ServerNotOkToTakeStream {
        stream_slot_id: usize,
    },
    ServerUpdateCurrentRoomStreams {
        streams: Vec<StreamSlotDto>,
    },
    ServerRtcMessage {
        stream_slot_id: usize,
        kind: RtcMessageKind,
        msg: Value,
    },
    ServerUpdateChessboard {
        state: ChessboardStateDto,
    },
    ServerChessWin {
        winner_user_id: String,
    },
    ServerChessQuit {
        quitter_user_id: String,
    },
    #[serde(rename = "special-events:server-add-shrine-coin")]
    ServerAddShrineCoin {
        count: i64,
    },
    ServerCantLogYouIn,
}

/// Public projection of a player; `private_id` and `ip` never appear here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerDto {
    pub id: String,
    pub name: String,
    pub position: Position,
    pub direction: Direction,
    pub room_id: String,
    pub character_id: String,
    pub is_inactive: bool,
    pub bubble_position: Direction,
    pub voice_pitch: f64,
    pub last_room_message: String,
    pub is_alternate_character: bool,
}

/// Viewer-specific projection of a stream slot. For a viewer blocked
/// either way against the publisher the slot reads as inactive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSlotDto {
    pub is_active: bool,
    pub is_ready: bool,
    pub with_sound: Option<bool>,
    pub with_video: Option<bool>,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChessboardStateDto {
    pub fen_string: Option<String>,
    pub turn: Option<String>,
    pub white_user_id: Option<String>,
    pub black_user_id: Option<String>,
}

/// Static room data the client needs to render a room.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomDto {
    pub id: String,
    pub group: String,
    pub size: Position,
    pub blocked: Vec<Position>,
    pub spawn_point: String,
    pub stream_slot_count: usize,
    pub forced_anonymous: bool,
}

/// Full room snapshot sent on connect and on room change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStateDto {
    pub current_room: RoomDto,
    pub connected_users: Vec<PlayerDto>,
    pub streams: Vec<StreamSlotDto>,
    pub chessboard_state: ChessboardStateDto,
    pub coin_counter: i64,
    pub hide_streams: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomListItemDto {
    pub id: String,
    pub group: String,
    pub user_count: usize,
    pub streamers: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_wire_names_are_kebab_case() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"type":"user-move","direction":"left"}"#).unwrap();
        assert!(matches!(
            event,
            ClientEvent::UserMove {
                direction: Direction::Left
            }
        ));

        let event: ClientEvent =
            serde_json::from_str(r#"{"type":"user-want-to-take-stream","streamSlotId":2}"#)
                .unwrap();
        assert!(matches!(
            event,
            ClientEvent::UserWantToTakeStream { stream_slot_id: 2 }
        ));
    }

    #[test]
    fn test_shrine_coin_events_keep_their_namespaced_names() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"type":"special-events:client-add-shrine-coin"}"#).unwrap();
        assert!(matches!(event, ClientEvent::ClientAddShrineCoin));

        let json =
            serde_json::to_string(&ServerEvent::ServerAddShrineCoin { count: 20 }).unwrap();
        assert!(json.contains("special-events:server-add-shrine-coin"));
        assert!(json.contains("\"count\":20"));
    }

    #[test]
    fn test_stream_reject_reasons_serialize_to_stable_codes() {
        let json = serde_json::to_string(&ServerEvent::ServerNotOkToStream {
            reason: StreamRejectReason::TakenByBlockedStreamer,
        })
        .unwrap();
        assert!(json.contains("start_stream_stream_slot_already_taken_by_blocked_streamer"));
    }

    #[test]
    fn test_server_move_event_shape() {
        let json = serde_json::to_string(&ServerEvent::ServerMove {
            user_id: "u1".to_string(),
            x: 4,
            y: 5,
            direction: Direction::Right,
            is_instant: false,
            should_spinwalk: true,
        })
        .unwrap();

        assert!(json.contains("\"type\":\"server-move\""));
        assert!(json.contains("\"userId\":\"u1\""));
        assert!(json.contains("\"shouldSpinwalk\":true"));
    }
}
