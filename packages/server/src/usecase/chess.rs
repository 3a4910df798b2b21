//! The embedded chess sub-game: seating, moves, quits and the turn timer.
//!
//! Legality, FEN and game-over detection are delegated entirely to the
//! external rules engine; this module only runs the seat/turn state
//! machine around it.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chess::{BoardStatus, ChessMove, Color, Game, Piece, Square};
use tokio::task::JoinHandle;

use hiroba_shared::time::get_timestamp_millis;

use crate::infrastructure::dto::conversion::to_chessboard_dto;
use crate::infrastructure::dto::websocket::ServerEvent;
use crate::state::{AppContext, ServerState};
use crate::usecase::EventError;

/// Broadcast the current board to everyone in the room.
pub fn broadcast_chessboard(state: &ServerState, area_id: &str, room_id: &str) {
    let Some(room_state) = state.room_state(area_id, room_id) else {
        return;
    };
    let dto = to_chessboard_dto(&room_state.chess);
    state.room_emit(
        area_id,
        room_id,
        &ServerEvent::ServerUpdateChessboard { state: dto },
    );
}

/// Win/quit/timeout notifications go to the union of the filtered room
/// occupants of wherever the two seats currently are (the players may
/// have changed rooms mid-game).
fn users_to_notify(
    state: &ServerState,
    white_user_id: Option<&str>,
    black_user_id: Option<&str>,
) -> HashSet<String> {
    let mut recipients = HashSet::new();
    for seat in [white_user_id, black_user_id].into_iter().flatten() {
        if let Some(player) = state.player(seat) {
            for u in state.filtered_connected_user_list(seat, Some(&player.room_id), &player.area_id)
            {
                recipients.insert(u.id.clone());
            }
        }
    }
    recipients
}

/// Reset the game in the player's room if they hold a seat, and broadcast
/// the vacated board.
pub fn stop_chess_game(state: &mut ServerState, user_id: &str) {
    let Some(player) = state.player(user_id) else {
        return;
    };
    let (area_id, room_id) = (player.area_id.clone(), player.room_id.clone());
    let Some(room_state) = state.room_state_mut(&area_id, &room_id) else {
        return;
    };
    if room_state.chess.seat_of(user_id).is_none() {
        return;
    }

    tracing::info!("Stopping chess game for '{}'", user_id);
    room_state.chess.reset();
    broadcast_chessboard(state, &area_id, &room_id);
}

/// Arm the turn watchdog: when it fires, both seats are notified and the
/// game force-resets.
fn arm_turn_timer(ctx: &Arc<AppContext>, area_id: &str, room_id: &str) -> JoinHandle<()> {
    let ctx = Arc::clone(ctx);
    let area_id = area_id.to_string();
    let room_id = room_id.to_string();
    let timeout = ctx.settings.max_wait_for_chess_move_ms;
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(timeout)).await;

        let mut state = ctx.state.lock().await;
        let Some(room_state) = state.room_state(&area_id, &room_id) else {
            return;
        };
        let seats: Vec<String> = [
            room_state.chess.white_user_id.clone(),
            room_state.chess.black_user_id.clone(),
        ]
        .into_iter()
        .flatten()
        .collect();
        if seats.is_empty() {
            return;
        }

        tracing::info!("Chess turn timeout in {}/{}", area_id, room_id);
        for user_id in &seats {
            state.emit_to_player(
                user_id,
                &ServerEvent::ServerSystemMessage {
                    code: "chess_timeout_reached".to_string(),
                    extra: None,
                },
            );
        }
        state
            .room_state_mut(&area_id, &room_id)
            .expect("room state existed moments ago")
            .chess
            .reset();
        broadcast_chessboard(&state, &area_id, &room_id);
    })
}

/// The first user who requests a game becomes white, the second becomes
/// black and the game starts.
pub async fn handle_play_chess(ctx: &Arc<AppContext>, user_id: &str) -> Result<(), EventError> {
    tracing::info!("user-want-to-play-chess '{}'", user_id);
    let mut state = ctx.state.lock().await;
    let Some(player) = state.player(user_id) else {
        return Ok(());
    };
    let (area_id, room_id) = (player.area_id.clone(), player.room_id.clone());
    let Some(room_state) = state.room_state_mut(&area_id, &room_id) else {
        return Ok(());
    };
    let chess = &mut room_state.chess;

    if chess.black_user_id.is_some() {
        // game already started
        return Ok(());
    }

    if chess.white_user_id.is_none() {
        chess.white_user_id = Some(user_id.to_string());
    } else if chess.white_user_id.as_deref() == Some(user_id) {
        // can't play against yourself
        return Ok(());
    } else {
        tracing::info!("chess game starts '{}'", user_id);
        chess.black_user_id = Some(user_id.to_string());
        chess.game = Some(Game::new());
        chess.timer = Some(arm_turn_timer(ctx, &area_id, &room_id));
    }

    broadcast_chessboard(&state, &area_id, &room_id);
    Ok(())
}

pub async fn handle_quit_chess(ctx: &Arc<AppContext>, user_id: &str) -> Result<(), EventError> {
    tracing::info!("user-want-to-quit-chess '{}'", user_id);
    let mut state = ctx.state.lock().await;
    let Some(player) = state.player(user_id) else {
        return Ok(());
    };
    let (area_id, room_id) = (player.area_id.clone(), player.room_id.clone());

    let seats = state.room_state(&area_id, &room_id).map(|rs| {
        (
            rs.chess.white_user_id.clone(),
            rs.chess.black_user_id.clone(),
        )
    });
    if let Some((white, black)) = seats {
        // Notify only if the game was already started.
        if black.is_some() {
            let recipients = users_to_notify(&state, white.as_deref(), black.as_deref());
            for recipient in recipients {
                state.emit_to_player(
                    &recipient,
                    &ServerEvent::ServerChessQuit {
                        quitter_user_id: user_id.to_string(),
                    },
                );
            }
        }
    }

    stop_chess_game(&mut state, user_id);
    Ok(())
}

/// Find the legal move from `source` to `target` and apply it, with the
/// queen as the default promotion. Returns whether a move was made.
fn try_move(game: &mut Game, source: Square, target: Square) -> bool {
    game.make_move(ChessMove::new(source, target, None))
        || game.make_move(ChessMove::new(source, target, Some(Piece::Queen)))
}

pub async fn handle_chess_move(
    ctx: &Arc<AppContext>,
    user_id: &str,
    source: &str,
    target: &str,
) -> Result<(), EventError> {
    tracing::info!("user-chess-move '{}' {} {}", user_id, source, target);
    let now = get_timestamp_millis();
    let mut state = ctx.state.lock().await;
    let Some(player) = state.player(user_id) else {
        return Ok(());
    };
    let (area_id, room_id) = (player.area_id.clone(), player.room_id.clone());

    struct GameEnd {
        winner: Option<String>,
        white: Option<String>,
        black: Option<String>,
    }

    enum Outcome {
        Ignored,
        ResyncMover,
        Played { end: Option<GameEnd> },
    }

    let outcome = {
        let Some(room_state) = state.room_state_mut(&area_id, &room_id) else {
            return Ok(());
        };
        let chess = &mut room_state.chess;

        if chess.game.is_none() || source == target {
            Outcome::Ignored
        } else {
            let mover_holds_turn = {
                let game = chess.game.as_ref().expect("checked above");
                match game.side_to_move() {
                    Color::White => chess.white_user_id.as_deref() == Some(user_id),
                    Color::Black => chess.black_user_id.as_deref() == Some(user_id),
                }
            };

            if !mover_holds_turn {
                // not an error, just a resync of the mover's board
                Outcome::ResyncMover
            } else {
                match (Square::from_str(source), Square::from_str(target)) {
                    (Ok(from), Ok(to)) => {
                        let game = chess.game.as_mut().expect("checked above");
                        // an illegal move is simply not applied
                        if try_move(game, from, to) {
                            chess.last_move_time = Some(now);
                            if let Some(timer) = chess.timer.take() {
                                timer.abort();
                            }
                            chess.timer = Some(arm_turn_timer(ctx, &area_id, &room_id));
                        }

                        let game = chess.game.as_ref().expect("checked above");
                        if game.current_position().status() != BoardStatus::Ongoing {
                            // the winner is the side that just moved
                            let winner = match game.side_to_move() {
                                Color::Black => chess.white_user_id.clone(),
                                Color::White => chess.black_user_id.clone(),
                            };
                            let end = GameEnd {
                                winner,
                                white: chess.white_user_id.clone(),
                                black: chess.black_user_id.clone(),
                            };
                            chess.reset();
                            Outcome::Played { end: Some(end) }
                        } else {
                            Outcome::Played { end: None }
                        }
                    }
                    _ => Outcome::Ignored,
                }
            }
        }
    };

    match outcome {
        Outcome::Ignored => return Ok(()),
        Outcome::ResyncMover => {
            let dto = state
                .room_state(&area_id, &room_id)
                .map(|rs| to_chessboard_dto(&rs.chess))
                .expect("room state existed moments ago");
            state.emit_to_player(user_id, &ServerEvent::ServerUpdateChessboard { state: dto });
            return Ok(());
        }
        Outcome::Played { end: None } => {}
        Outcome::Played { end: Some(end) } => {
            let winner = end.winner.unwrap_or_default();
            tracing::info!("chess game over, winner '{}'", winner);
            let recipients = users_to_notify(&state, end.white.as_deref(), end.black.as_deref());
            for recipient in recipients {
                state.emit_to_player(
                    &recipient,
                    &ServerEvent::ServerChessWin {
                        winner_user_id: winner.clone(),
                    },
                );
            }
        }
    }

    broadcast_chessboard(&state, &area_id, &room_id);
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
    ) -> (String, mpsc::UnboundedReceiver<String>) {
        let outcome = login::login(ctx, name, "giko", "gen", "bar", ip)
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

    async fn fen(ctx: &Arc<AppContext>) -> Option<String> {
        let state = ctx.state.lock().await;
        state.room_state("gen", "bar").unwrap().chess.fen()
    }

    #[tokio::test]
    async fn test_two_distinct_players_start_a_game_in_sequence() {
        let ctx = AppContext::with_relays(Settings::default(), Vec::new());
        let (alice, _a) = bind_player(&ctx, "alice", "10.0.0.1").await;
        let (bob, _b) = bind_player(&ctx, "bob", "10.0.0.2").await;

        handle_play_chess(&ctx, &alice).await.unwrap();
        {
            let state = ctx.state.lock().await;
            let chess = &state.room_state("gen", "bar").unwrap().chess;
            assert_eq!(chess.white_user_id.as_deref(), Some(alice.as_str()));
            assert!(!chess.is_in_progress());
        }

        handle_play_chess(&ctx, &bob).await.unwrap();
        let state = ctx.state.lock().await;
        let chess = &state.room_state("gen", "bar").unwrap().chess;
        assert_eq!(chess.black_user_id.as_deref(), Some(bob.as_str()));
        assert!(chess.is_in_progress());
        assert!(chess.timer.is_some());
    }

    #[tokio::test]
    async fn test_a_player_cannot_hold_both_seats() {
        let ctx = AppContext::with_relays(Settings::default(), Vec::new());
        let (alice, _a) = bind_player(&ctx, "alice", "10.0.0.1").await;

        handle_play_chess(&ctx, &alice).await.unwrap();
        handle_play_chess(&ctx, &alice).await.unwrap();

        let state = ctx.state.lock().await;
        let chess = &state.room_state("gen", "bar").unwrap().chess;
        assert_eq!(chess.white_user_id.as_deref(), Some(alice.as_str()));
        assert!(chess.black_user_id.is_none());
        assert!(!chess.is_in_progress());
    }

    #[tokio::test]
    async fn test_third_player_cannot_join_started_game() {
        let ctx = AppContext::with_relays(Settings::default(), Vec::new());
        let (alice, _a) = bind_player(&ctx, "alice", "10.0.0.1").await;
        let (bob, _b) = bind_player(&ctx, "bob", "10.0.0.2").await;
        let (carol, _c) = bind_player(&ctx, "carol", "10.0.0.3").await;
        handle_play_chess(&ctx, &alice).await.unwrap();
        handle_play_chess(&ctx, &bob).await.unwrap();

        handle_play_chess(&ctx, &carol).await.unwrap();

        let state = ctx.state.lock().await;
        let chess = &state.room_state("gen", "bar").unwrap().chess;
        assert_eq!(chess.white_user_id.as_deref(), Some(alice.as_str()));
        assert_eq!(chess.black_user_id.as_deref(), Some(bob.as_str()));
    }

    #[tokio::test]
    async fn test_illegal_move_leaves_board_unchanged() {
        let ctx = AppContext::with_relays(Settings::default(), Vec::new());
        let (alice, _a) = bind_player(&ctx, "alice", "10.0.0.1").await;
        let (bob, _b) = bind_player(&ctx, "bob", "10.0.0.2").await;
        handle_play_chess(&ctx, &alice).await.unwrap();
        handle_play_chess(&ctx, &bob).await.unwrap();
        let before = fen(&ctx).await.unwrap();

        // a rook cannot jump over its own pawn
        handle_chess_move(&ctx, &alice, "a1", "a5").await.unwrap();

        assert_eq!(fen(&ctx).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_out_of_turn_move_resyncs_mover_without_applying() {
        let ctx = AppContext::with_relays(Settings::default(), Vec::new());
        let (alice, _a) = bind_player(&ctx, "alice", "10.0.0.1").await;
        let (bob, mut bob_rx) = bind_player(&ctx, "bob", "10.0.0.2").await;
        handle_play_chess(&ctx, &alice).await.unwrap();
        handle_play_chess(&ctx, &bob).await.unwrap();
        let before = fen(&ctx).await.unwrap();
        drain(&mut bob_rx);

        // black tries to move on white's turn
        handle_chess_move(&ctx, &bob, "e7", "e5").await.unwrap();

        assert_eq!(fen(&ctx).await.unwrap(), before);
        let events = drain(&mut bob_rx);
        assert!(events
            .iter()
            .any(|e| e["type"] == "server-update-chessboard"));
    }

    #[tokio::test]
    async fn test_legal_move_advances_turn_and_rearms_timer() {
        let ctx = AppContext::with_relays(Settings::default(), Vec::new());
        let (alice, _a) = bind_player(&ctx, "alice", "10.0.0.1").await;
        let (bob, _b) = bind_player(&ctx, "bob", "10.0.0.2").await;
        handle_play_chess(&ctx, &alice).await.unwrap();
        handle_play_chess(&ctx, &bob).await.unwrap();

        handle_chess_move(&ctx, &alice, "e2", "e4").await.unwrap();

        let state = ctx.state.lock().await;
        let chess = &state.room_state("gen", "bar").unwrap().chess;
        assert_eq!(chess.turn(), Some("b"));
        assert!(chess.last_move_time.is_some());
        assert!(chess.timer.is_some());
    }

    #[tokio::test]
    async fn test_checkmate_resets_game_and_notifies_room() {
        let ctx = AppContext::with_relays(Settings::default(), Vec::new());
        let (alice, _a) = bind_player(&ctx, "alice", "10.0.0.1").await;
        let (bob, mut bob_rx) = bind_player(&ctx, "bob", "10.0.0.2").await;
        let (_carol, mut carol_rx) = bind_player(&ctx, "carol", "10.0.0.3").await;
        handle_play_chess(&ctx, &alice).await.unwrap();
        handle_play_chess(&ctx, &bob).await.unwrap();

        // fool's mate, black delivers checkmate
        handle_chess_move(&ctx, &alice, "f2", "f3").await.unwrap();
        handle_chess_move(&ctx, &bob, "e7", "e5").await.unwrap();
        handle_chess_move(&ctx, &alice, "g2", "g4").await.unwrap();
        drain(&mut bob_rx);
        drain(&mut carol_rx);
        handle_chess_move(&ctx, &bob, "d8", "h4").await.unwrap();

        let state = ctx.state.lock().await;
        let chess = &state.room_state("gen", "bar").unwrap().chess;
        assert!(!chess.is_in_progress());
        assert!(chess.white_user_id.is_none());
        assert!(chess.black_user_id.is_none());
        drop(state);

        // the filtered occupants of the players' room are notified,
        // bystanders included
        for rx in [&mut bob_rx, &mut carol_rx] {
            let events = drain(rx);
            let win = events
                .iter()
                .find(|e| e["type"] == "server-chess-win")
                .expect("win notification");
            assert_eq!(win["winnerUserId"], bob.as_str());
        }
    }

    #[tokio::test]
    async fn test_quit_notifies_participants_and_resets() {
        let ctx = AppContext::with_relays(Settings::default(), Vec::new());
        let (alice, mut alice_rx) = bind_player(&ctx, "alice", "10.0.0.1").await;
        let (bob, _b) = bind_player(&ctx, "bob", "10.0.0.2").await;
        handle_play_chess(&ctx, &alice).await.unwrap();
        handle_play_chess(&ctx, &bob).await.unwrap();
        drain(&mut alice_rx);

        handle_quit_chess(&ctx, &bob).await.unwrap();

        let events = drain(&mut alice_rx);
        let quit = events
            .iter()
            .find(|e| e["type"] == "server-chess-quit")
            .expect("quit notification");
        assert_eq!(quit["quitterUserId"], bob.as_str());

        let state = ctx.state.lock().await;
        assert!(!state.room_state("gen", "bar").unwrap().chess.is_in_progress());
    }

    #[tokio::test]
    async fn test_quit_before_game_starts_resets_silently() {
        let ctx = AppContext::with_relays(Settings::default(), Vec::new());
        let (alice, _a) = bind_player(&ctx, "alice", "10.0.0.1").await;
        let (bob, mut bob_rx) = bind_player(&ctx, "bob", "10.0.0.2").await;
        handle_play_chess(&ctx, &alice).await.unwrap();
        drain(&mut bob_rx);

        handle_quit_chess(&ctx, &alice).await.unwrap();

        let state = ctx.state.lock().await;
        assert!(state.room_state("gen", "bar").unwrap().chess.white_user_id.is_none());
        drop(state);
        assert!(!drain(&mut bob_rx).iter().any(|e| e["type"] == "server-chess-quit"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_turn_timeout_notifies_seats_and_resets() {
        let ctx = AppContext::with_relays(Settings::default(), Vec::new());
        let (alice, mut alice_rx) = bind_player(&ctx, "alice", "10.0.0.1").await;
        let (bob, _b) = bind_player(&ctx, "bob", "10.0.0.2").await;
        handle_play_chess(&ctx, &alice).await.unwrap();
        handle_play_chess(&ctx, &bob).await.unwrap();
        drain(&mut alice_rx);

        tokio::time::sleep(Duration::from_millis(
            ctx.settings.max_wait_for_chess_move_ms + 100,
        ))
        .await;
        tokio::task::yield_now().await;

        let state = ctx.state.lock().await;
        assert!(!state.room_state("gen", "bar").unwrap().chess.is_in_progress());
        drop(state);

        let events = drain(&mut alice_rx);
        assert!(events
            .iter()
            .any(|e| e["type"] == "server-system-message" && e["code"] == "chess_timeout_reached"));
    }
}
