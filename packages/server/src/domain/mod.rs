//! Domain models for the virtual space.

pub mod chess;
pub mod player;
pub mod room;
pub mod stream;

pub use self::chess::ChessState;
pub use self::player::{Direction, Player, Position};
pub use self::room::{CellTrigger, Door, Room, TriggerEffect, build_room_catalog};
pub use self::stream::{StreamOptions, StreamParticipant, StreamSlot};

/// The fixed set of areas. Every room exists once per area.
pub const AREAS: [&str; 2] = ["for", "gen"];

/// The character identity that, once taken, can never be changed again.
pub const PERMANENT_CHARACTER_ID: &str = "ika";
