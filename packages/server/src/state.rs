//! Shared server state and the application context.
//!
//! All mutable registries (players, room states, bans, connection senders)
//! live in one `ServerState` owned by the `AppContext` that is passed to
//! every component; there is no ambient/static state. Event handlers lock
//! the state, mutate, and release the lock across every suspension point
//! (relay RPCs, persistence writes), re-validating afterwards.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};

use crate::domain::{AREAS, ChessState, Player, Room, StreamSlot, build_room_catalog};
use crate::infrastructure::dto::websocket::ServerEvent;
use crate::infrastructure::relay::{HttpRelayClient, RelayServer};
use crate::infrastructure::reputation::ReputationChecker;
use crate::settings::Settings;

/// Mutable per-(area, room) state. Exists for the process lifetime.
pub struct RoomState {
    pub streams: Vec<StreamSlot>,
    pub chess: ChessState,
    pub coin_counter: i64,
}

/// Whether two players are hidden from each other. Blocking is stored
/// asymmetrically (per player, by IP) but filtering applies symmetrically.
pub fn blocked_either_way(a: &Player, b: &Player) -> bool {
    a.blocked_ips.contains(&b.ip) || b.blocked_ips.contains(&a.ip)
}

pub struct ServerState {
    players: HashMap<String, Player>,
    /// private credential -> public player id
    private_index: HashMap<String, String>,
    pub banned_ips: HashSet<String>,
    /// areaId -> roomId -> state
    room_states: HashMap<String, HashMap<String, RoomState>>,
    /// connectionId -> outbound channel
    senders: HashMap<String, mpsc::UnboundedSender<String>>,
}

impl ServerState {
    pub fn new(rooms: &HashMap<String, Room>, settings: &Settings) -> Self {
        let mut room_ids: Vec<&String> = rooms.keys().collect();
        room_ids.sort();

        let mut room_states: HashMap<String, HashMap<String, RoomState>> = HashMap::new();
        for (area_index, area_id) in AREAS.iter().enumerate() {
            let mut area_states = HashMap::new();
            for (room_index, room_id) in room_ids.iter().enumerate() {
                let room = &rooms[*room_id];
                let streams = (0..room.stream_slot_count)
                    .map(|slot_index| {
                        StreamSlot::new(
                            format!(
                                "{}:{}:{}:{}",
                                settings.relay_room_name_prefix, area_id, room_id, slot_index
                            ),
                            settings.relay_room_int_prefix * 1_000_000_000
                                + (area_index as i64) * 1_000_000
                                + (room_index as i64) * 100
                                + slot_index as i64,
                        )
                    })
                    .collect();
                area_states.insert(
                    (*room_id).clone(),
                    RoomState {
                        streams,
                        chess: ChessState::default(),
                        coin_counter: 0,
                    },
                );
            }
            room_states.insert(area_id.to_string(), area_states);
        }

        Self {
            players: HashMap::new(),
            private_index: HashMap::new(),
            banned_ips: HashSet::new(),
            room_states,
            senders: HashMap::new(),
        }
    }

    // ---- players ----

    pub fn add_player(&mut self, player: Player) {
        self.private_index
            .insert(player.private_id.clone(), player.id.clone());
        self.players.insert(player.id.clone(), player);
    }

    /// Fully remove a player (ghost reaping, ban). Returns the record.
    pub fn remove_player(&mut self, user_id: &str) -> Option<Player> {
        let player = self.players.remove(user_id)?;
        self.private_index.remove(&player.private_id);
        Some(player)
    }

    pub fn player(&self, user_id: &str) -> Option<&Player> {
        self.players.get(user_id)
    }

    pub fn player_mut(&mut self, user_id: &str) -> Option<&mut Player> {
        self.players.get_mut(user_id)
    }

    pub fn player_by_private_id(&self, private_id: &str) -> Option<&Player> {
        self.private_index
            .get(private_id)
            .and_then(|id| self.players.get(id))
    }

    pub fn all_players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn all_player_ids(&self) -> Vec<String> {
        self.players.keys().cloned().collect()
    }

    /// Player ids for an IP, optionally restricted to one area.
    pub fn player_ids_by_ip(&self, ip: &str, area_id: Option<&str>) -> Vec<String> {
        self.players
            .values()
            .filter(|p| p.ip == ip && area_id.is_none_or(|a| p.area_id == a))
            .map(|p| p.id.clone())
            .collect()
    }

    // ---- visibility ----

    /// Non-ghost players in scope. `room_id == None` means the whole area.
    pub fn connected_user_list(&self, room_id: Option<&str>, area_id: &str) -> Vec<&Player> {
        self.players
            .values()
            .filter(|p| {
                !p.is_ghost
                    && p.area_id == area_id
                    && room_id.is_none_or(|r| p.room_id == r)
            })
            .collect()
    }

    /// The canonical broadcast-recipient list: connected players in scope,
    /// minus anyone blocked either way against the viewer. The viewer is
    /// included when in scope.
    pub fn filtered_connected_user_list(
        &self,
        viewer_id: &str,
        room_id: Option<&str>,
        area_id: &str,
    ) -> Vec<&Player> {
        let Some(viewer) = self.players.get(viewer_id) else {
            return Vec::new();
        };
        self.connected_user_list(room_id, area_id)
            .into_iter()
            .filter(|u| u.id == viewer.id || !blocked_either_way(u, viewer))
            .collect()
    }

    // ---- room states ----

    pub fn room_state(&self, area_id: &str, room_id: &str) -> Option<&RoomState> {
        self.room_states.get(area_id)?.get(room_id)
    }

    pub fn room_state_mut(&mut self, area_id: &str, room_id: &str) -> Option<&mut RoomState> {
        self.room_states.get_mut(area_id)?.get_mut(room_id)
    }

    pub fn area_room_states(&self, area_id: &str) -> impl Iterator<Item = &RoomState> {
        self.room_states.get(area_id).into_iter().flatten().map(|(_, s)| s)
    }

    pub fn all_room_states(&self) -> impl Iterator<Item = (&str, &str, &RoomState)> {
        self.room_states.iter().flat_map(|(area, rooms)| {
            rooms
                .iter()
                .map(move |(room, state)| (area.as_str(), room.as_str(), state))
        })
    }

    /// Index of the slot the player currently publishes in their room.
    pub fn published_slot_index(&self, player: &Player) -> Option<usize> {
        self.room_state(&player.area_id, &player.room_id)?
            .streams
            .iter()
            .position(|s| s.is_published_by(&player.id))
    }

    // ---- connections & emits ----

    pub fn register_connection(
        &mut self,
        connection_id: String,
        sender: mpsc::UnboundedSender<String>,
    ) {
        self.senders.insert(connection_id, sender);
    }

    pub fn unregister_connection(&mut self, connection_id: &str) {
        self.senders.remove(connection_id);
    }

    fn send_to_connection(&self, connection_id: &str, text: String) {
        if let Some(sender) = self.senders.get(connection_id) {
            if sender.send(text).is_err() {
                tracing::warn!("Failed to push message to connection '{}'", connection_id);
            }
        }
    }

    /// Send one event to one player, if they have a bound connection.
    pub fn emit_to_player(&self, user_id: &str, event: &ServerEvent) {
        let Some(player) = self.players.get(user_id) else {
            return;
        };
        let Some(connection_id) = &player.connection_id else {
            return;
        };
        match serde_json::to_string(event) {
            Ok(json) => self.send_to_connection(connection_id, json),
            Err(e) => tracing::error!("Failed to serialize server event: {}", e),
        }
    }

    /// Broadcast to the actor's visibility-filtered room scope (the actor
    /// included).
    pub fn user_room_emit(&self, actor_id: &str, area_id: &str, room_id: &str, event: &ServerEvent) {
        let recipients: Vec<String> = self
            .filtered_connected_user_list(actor_id, Some(room_id), area_id)
            .iter()
            .map(|u| u.id.clone())
            .collect();
        for user_id in recipients {
            self.emit_to_player(&user_id, event);
        }
    }

    /// Broadcast to every connected player in the room, unfiltered.
    pub fn room_emit(&self, area_id: &str, room_id: &str, event: &ServerEvent) {
        let recipients: Vec<String> = self
            .connected_user_list(Some(room_id), area_id)
            .iter()
            .map(|u| u.id.clone())
            .collect();
        for user_id in recipients {
            self.emit_to_player(&user_id, event);
        }
    }

    /// Per-user area statistics: each connected user of the area gets the
    /// counts for the subset of users they can actually see.
    pub fn emit_server_stats(&self, area_id: &str) {
        let user_ids: Vec<String> = self
            .connected_user_list(None, area_id)
            .iter()
            .map(|u| u.id.clone())
            .collect();

        for user_id in user_ids {
            let visible_ids: HashSet<&str> = self
                .filtered_connected_user_list(&user_id, None, area_id)
                .iter()
                .map(|u| u.id.as_str())
                .collect();

            let stream_count = self
                .area_room_states(area_id)
                .flat_map(|s| s.streams.iter())
                .filter(|slot| {
                    slot.publisher
                        .as_ref()
                        .is_some_and(|p| visible_ids.contains(p.user_id.as_str()))
                })
                .count();

            self.emit_to_player(
                &user_id,
                &ServerEvent::ServerStats {
                    user_count: visible_ids.len(),
                    stream_count,
                },
            );
        }
    }
}

/// Process-wide context: settings, the immutable room catalog, the relay
/// pool and the mutable server state behind its single mutex.
pub struct AppContext {
    pub settings: Settings,
    pub rooms: HashMap<String, Room>,
    pub relays: Vec<RelayServer>,
    pub reputation: ReputationChecker,
    pub state: Mutex<ServerState>,
}

impl AppContext {
    pub fn new(settings: Settings) -> Arc<Self> {
        let relays = settings
            .relay_servers
            .iter()
            .map(|s| RelayServer {
                id: s.id.clone(),
                client: Arc::new(HttpRelayClient::new(
                    s.url.clone(),
                    settings.relay_api_secret.clone(),
                )),
            })
            .collect();
        Self::with_relays(settings, relays)
    }

    /// Build a context with an explicit relay pool (tests inject mocks).
    pub fn with_relays(settings: Settings, relays: Vec<RelayServer>) -> Arc<Self> {
        let rooms = build_room_catalog();
        let state = Mutex::new(ServerState::new(&rooms, &settings));
        let reputation = ReputationChecker::from_settings(&settings);
        Arc::new(Self {
            settings,
            rooms,
            relays,
            reputation,
            state,
        })
    }

    pub fn room(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    pub fn relay(&self, relay_id: &str) -> Option<&RelayServer> {
        self.relays.iter().find(|r| r.id == relay_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Direction, Position};

    fn test_player(id: &str, ip: &str, area_id: &str, room_id: &str) -> Player {
        let mut player = Player::new(
            id.to_string(),
            format!("private-{}", id),
            ip.to_string(),
            id.to_string(),
            "giko".to_string(),
            area_id.to_string(),
            room_id.to_string(),
            Position::new(1, 1),
            Direction::Down,
            0.5,
            1000,
        );
        player.is_ghost = false;
        player.disconnection_time = None;
        player
    }

    fn test_state() -> ServerState {
        ServerState::new(&build_room_catalog(), &Settings::default())
    }

    #[test]
    fn test_room_states_exist_for_every_area_and_room() {
        let state = test_state();

        for area_id in AREAS {
            let bar = state.room_state(area_id, "bar").unwrap();
            assert_eq!(bar.streams.len(), 3);
            assert_eq!(bar.coin_counter, 0);
            assert!(!bar.chess.is_in_progress());
        }
    }

    #[test]
    fn test_relay_room_ints_are_unique() {
        let state = test_state();

        let mut ints: Vec<i64> = state
            .all_room_states()
            .flat_map(|(_, _, s)| s.streams.iter().map(|slot| slot.relay_room_int))
            .collect();
        let total = ints.len();
        ints.sort();
        ints.dedup();
        assert_eq!(ints.len(), total);
    }

    #[test]
    fn test_filtered_list_hides_blocked_pairs_symmetrically() {
        let mut state = test_state();
        let alice = test_player("alice", "10.0.0.1", "gen", "bar");
        let mut bob = test_player("bob", "10.0.0.2", "gen", "bar");
        let carol = test_player("carol", "10.0.0.3", "gen", "bar");
        // bob blocks alice; filtering must hide them from each other
        bob.blocked_ips.insert("10.0.0.1".to_string());
        state.add_player(alice);
        state.add_player(bob);
        state.add_player(carol);

        let for_alice: Vec<&str> = state
            .filtered_connected_user_list("alice", Some("bar"), "gen")
            .iter()
            .map(|u| u.id.as_str())
            .collect();
        let for_bob: Vec<&str> = state
            .filtered_connected_user_list("bob", Some("bar"), "gen")
            .iter()
            .map(|u| u.id.as_str())
            .collect();

        assert!(for_alice.contains(&"alice"));
        assert!(for_alice.contains(&"carol"));
        assert!(!for_alice.contains(&"bob"));
        assert!(!for_bob.contains(&"alice"));
        assert!(for_bob.contains(&"carol"));
    }

    #[test]
    fn test_ghosts_are_not_connected() {
        let mut state = test_state();
        let mut ghost = test_player("ghost", "10.0.0.9", "gen", "bar");
        ghost.is_ghost = true;
        state.add_player(ghost);

        assert!(state.connected_user_list(Some("bar"), "gen").is_empty());
    }

    #[test]
    fn test_private_index_follows_player_lifecycle() {
        let mut state = test_state();
        state.add_player(test_player("alice", "10.0.0.1", "gen", "bar"));

        assert_eq!(
            state.player_by_private_id("private-alice").map(|p| p.id.as_str()),
            Some("alice")
        );

        state.remove_player("alice");
        assert!(state.player_by_private_id("private-alice").is_none());
    }
}
