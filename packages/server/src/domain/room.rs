//! The immutable room directory: grid layouts, doors and trigger rules.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use super::player::{Direction, Position};

/// A door: an entry point into a room, optionally forcing a direction.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Door {
    pub x: i32,
    pub y: i32,
    pub direction: Option<Direction>,
}

impl Door {
    pub fn position(&self) -> Position {
        Position::new(self.x, self.y)
    }
}

/// What happens when a player enters a trigger cell.
#[derive(Debug, Clone)]
pub enum TriggerEffect {
    /// Immediate forced appearance change.
    Transform { character_id: &'static str },
    /// Identity change applied after `delay_ms`, but only if the player
    /// still occupies the trigger cell by then.
    DelayedTransform {
        character_id: &'static str,
        delay_ms: u64,
    },
}

/// A room-scoped scripted side effect keyed on an exact cell.
#[derive(Debug, Clone)]
pub struct CellTrigger {
    pub at: Position,
    pub effect: TriggerEffect,
}

/// Static room layout. Loaded once at startup, read-only thereafter.
#[derive(Debug, Clone)]
pub struct Room {
    pub id: String,
    pub group: String,
    pub size: Position,
    pub blocked: HashSet<Position>,
    /// Directed edges movement may not cross even though both cells are
    /// individually unblocked.
    pub forbidden_movements: HashSet<(Position, Position)>,
    pub doors: HashMap<String, Door>,
    /// Door id used when a room change names no door.
    pub spawn_point: String,
    pub stream_slot_count: usize,
    pub secret: bool,
    pub forced_anonymous: bool,
    pub triggers: Vec<CellTrigger>,
}

impl Room {
    /// Whether `pos` lies inside the grid.
    pub fn contains(&self, pos: Position) -> bool {
        pos.x >= 0 && pos.y >= 0 && pos.x < self.size.x && pos.y < self.size.y
    }

    pub fn is_blocked(&self, pos: Position) -> bool {
        self.blocked.contains(&pos)
    }

    pub fn is_forbidden_movement(&self, from: Position, to: Position) -> bool {
        self.forbidden_movements.contains(&(from, to))
    }

    /// The trigger rule for a cell, if any.
    pub fn trigger_at(&self, pos: Position) -> Option<&CellTrigger> {
        self.triggers.iter().find(|t| t.at == pos)
    }
}

struct RoomSpec {
    id: &'static str,
    group: &'static str,
    size: (i32, i32),
    blocked: &'static [(i32, i32)],
    forbidden: &'static [((i32, i32), (i32, i32))],
    doors: &'static [(&'static str, i32, i32, Option<Direction>)],
    spawn_point: &'static str,
    stream_slot_count: usize,
    secret: bool,
    forced_anonymous: bool,
    triggers: &'static [((i32, i32), TriggerKind)],
}

enum TriggerKind {
    Transform(&'static str),
    DelayedTransform(&'static str, u64),
}

const ROOM_SPECS: &[RoomSpec] = &[
    RoomSpec {
        id: "admin_st",
        group: "gikopoi",
        size: (10, 10),
        blocked: &[(4, 4), (5, 4), (4, 5), (5, 5)],
        forbidden: &[],
        doors: &[
            ("spawn", 4, 2, Some(Direction::Up)),
            ("bar", 0, 4, Some(Direction::Left)),
            ("jinja", 9, 4, Some(Direction::Right)),
        ],
        spawn_point: "spawn",
        stream_slot_count: 2,
        secret: false,
        forced_anonymous: false,
        triggers: &[],
    },
    RoomSpec {
        id: "bar",
        group: "gikopoi",
        size: (9, 9),
        blocked: &[(2, 2), (3, 2), (4, 2), (2, 6), (3, 6)],
        forbidden: &[((5, 5), (5, 6)), ((5, 6), (5, 5))],
        doors: &[
            ("right", 8, 4, Some(Direction::Left)),
            ("ladder", 0, 0, Some(Direction::Up)),
        ],
        spawn_point: "right",
        stream_slot_count: 3,
        secret: false,
        forced_anonymous: false,
        triggers: &[],
    },
    RoomSpec {
        id: "jinja",
        group: "gikopoi",
        size: (12, 12),
        blocked: &[(5, 8), (6, 8), (5, 9), (6, 9)],
        forbidden: &[],
        doors: &[("entrance", 5, 0, Some(Direction::Up))],
        spawn_point: "entrance",
        stream_slot_count: 2,
        secret: false,
        forced_anonymous: false,
        triggers: &[],
    },
    RoomSpec {
        id: "yoshinoya",
        group: "gikopoi",
        size: (8, 8),
        blocked: &[(0, 4), (1, 4), (6, 4), (7, 4)],
        forbidden: &[],
        doors: &[("entrance", 3, 0, Some(Direction::Up))],
        spawn_point: "entrance",
        stream_slot_count: 1,
        secret: false,
        forced_anonymous: false,
        triggers: &[((2, 4), TriggerKind::Transform("hungry_giko"))],
    },
    RoomSpec {
        id: "ido",
        group: "gikopoi",
        size: (9, 9),
        blocked: &[],
        forbidden: &[],
        doors: &[("entrance", 0, 4, Some(Direction::Right))],
        spawn_point: "entrance",
        stream_slot_count: 0,
        secret: false,
        forced_anonymous: false,
        triggers: &[((6, 6), TriggerKind::DelayedTransform("takenoko", 10 * 1000))],
    },
    RoomSpec {
        id: "yatai",
        group: "gikopoi",
        size: (6, 6),
        blocked: &[(2, 3), (3, 3)],
        forbidden: &[],
        doors: &[("entrance", 0, 0, Some(Direction::Right))],
        spawn_point: "entrance",
        stream_slot_count: 1,
        secret: false,
        forced_anonymous: true,
        triggers: &[],
    },
    RoomSpec {
        id: "basement",
        group: "gikopoi",
        size: (7, 7),
        blocked: &[],
        forbidden: &[],
        doors: &[("hatch", 3, 3, Some(Direction::Down))],
        spawn_point: "hatch",
        stream_slot_count: 0,
        secret: true,
        forced_anonymous: false,
        triggers: &[],
    },
];

/// Build the process-wide room catalog. Called once at startup.
pub fn build_room_catalog() -> HashMap<String, Room> {
    ROOM_SPECS
        .iter()
        .map(|spec| {
            let room = Room {
                id: spec.id.to_string(),
                group: spec.group.to_string(),
                size: Position::new(spec.size.0, spec.size.1),
                blocked: spec
                    .blocked
                    .iter()
                    .map(|&(x, y)| Position::new(x, y))
                    .collect(),
                forbidden_movements: spec
                    .forbidden
                    .iter()
                    .map(|&((fx, fy), (tx, ty))| {
                        (Position::new(fx, fy), Position::new(tx, ty))
                    })
                    .collect(),
                doors: spec
                    .doors
                    .iter()
                    .map(|&(id, x, y, direction)| (id.to_string(), Door { x, y, direction }))
                    .collect(),
                spawn_point: spec.spawn_point.to_string(),
                stream_slot_count: spec.stream_slot_count,
                secret: spec.secret,
                forced_anonymous: spec.forced_anonymous,
                triggers: spec
                    .triggers
                    .iter()
                    .map(|&((x, y), ref kind)| CellTrigger {
                        at: Position::new(x, y),
                        effect: match *kind {
                            TriggerKind::Transform(character_id) => {
                                TriggerEffect::Transform { character_id }
                            }
                            TriggerKind::DelayedTransform(character_id, delay_ms) => {
                                TriggerEffect::DelayedTransform {
                                    character_id,
                                    delay_ms,
                                }
                            }
                        },
                    })
                    .collect(),
            };
            (room.id.clone(), room)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_every_spawn_point_is_a_real_door() {
        let catalog = build_room_catalog();

        assert!(!catalog.is_empty());
        for room in catalog.values() {
            let door = room
                .doors
                .get(&room.spawn_point)
                .unwrap_or_else(|| panic!("room '{}' has no spawn door", room.id));
            assert!(room.contains(door.position()));
            assert!(!room.is_blocked(door.position()));
        }
    }

    #[test]
    fn test_contains_rejects_out_of_bounds_cells() {
        let catalog = build_room_catalog();
        let bar = &catalog["bar"];

        assert!(bar.contains(Position::new(0, 0)));
        assert!(bar.contains(Position::new(8, 8)));
        assert!(!bar.contains(Position::new(-1, 0)));
        assert!(!bar.contains(Position::new(9, 0)));
        assert!(!bar.contains(Position::new(0, 9)));
    }

    #[test]
    fn test_forbidden_movement_is_directional_data() {
        let catalog = build_room_catalog();
        let bar = &catalog["bar"];

        assert!(bar.is_forbidden_movement(Position::new(5, 5), Position::new(5, 6)));
        assert!(!bar.is_forbidden_movement(Position::new(4, 5), Position::new(5, 5)));
    }

    #[test]
    fn test_trigger_cells_are_room_data() {
        let catalog = build_room_catalog();

        let yoshinoya = &catalog["yoshinoya"];
        assert!(matches!(
            yoshinoya.trigger_at(Position::new(2, 4)).map(|t| &t.effect),
            Some(TriggerEffect::Transform {
                character_id: "hungry_giko"
            })
        ));

        let ido = &catalog["ido"];
        assert!(matches!(
            ido.trigger_at(Position::new(6, 6)).map(|t| &t.effect),
            Some(TriggerEffect::DelayedTransform {
                character_id: "takenoko",
                delay_ms: 10000
            })
        ));
    }
}
