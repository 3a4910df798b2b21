//! Player records and the movement value types.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// A cell on a room grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// A facing/movement direction on the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    /// The cell reached by taking one step from `from` in this direction.
    pub fn step(&self, from: Position) -> Position {
        match self {
            Direction::Up => Position::new(from.x, from.y + 1),
            Direction::Down => Position::new(from.x, from.y - 1),
            Direction::Left => Position::new(from.x - 1, from.y),
            Direction::Right => Position::new(from.x + 1, from.y),
        }
    }
}

/// One logical login. Created on login, reconnected to across websocket
/// connections via `private_id`, reaped only after the ghost-retention
/// window (or immediately on ban).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: String,
    /// Never broadcast; only used to re-bind a reconnecting connection.
    pub private_id: String,
    pub ip: String,
    pub name: String,
    pub character_id: String,
    #[serde(default)]
    pub is_alternate_character: bool,
    pub position: Position,
    pub direction: Direction,
    #[serde(default)]
    pub last_direction: Option<Direction>,
    #[serde(default)]
    pub direction_changed_at: Option<i64>,
    pub area_id: String,
    pub room_id: String,
    pub bubble_position: Direction,
    pub voice_pitch: f64,
    #[serde(default)]
    pub last_room_message: String,
    #[serde(default)]
    pub is_inactive: bool,
    #[serde(default)]
    pub is_ghost: bool,
    #[serde(default)]
    pub disconnection_time: Option<i64>,
    #[serde(default)]
    pub last_action: i64,
    #[serde(default)]
    pub blocked_ips: HashSet<String>,
    /// Sliding window of recent chat timestamps, bounded by flood control.
    #[serde(default)]
    pub last_message_dates: Vec<i64>,
    /// Bound transport handle. Never persisted.
    #[serde(skip)]
    pub connection_id: Option<String>,
}

impl Player {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        private_id: String,
        ip: String,
        name: String,
        character_id: String,
        area_id: String,
        room_id: String,
        position: Position,
        direction: Direction,
        voice_pitch: f64,
        now: i64,
    ) -> Self {
        Self {
            id,
            private_id,
            ip,
            name,
            character_id,
            is_alternate_character: false,
            position,
            direction,
            last_direction: None,
            direction_changed_at: None,
            area_id,
            room_id,
            bubble_position: Direction::Up,
            voice_pitch,
            last_room_message: String::new(),
            is_inactive: false,
            // A fresh login is a ghost until its websocket binds; the
            // disconnection time makes it reapable if the client never shows.
            is_ghost: true,
            disconnection_time: Some(now),
            last_action: now,
            blocked_ips: HashSet::new(),
            last_message_dates: Vec::new(),
            connection_id: None,
        }
    }

    /// Record activity: clears the inactivity flag.
    pub fn mark_active(&mut self, now: i64) {
        self.is_inactive = false;
        self.last_action = now;
    }
}
