//! The embedded chess sub-game state, layered on the external rules engine.

use chess::{Color, Game};
use tokio::task::JoinHandle;

/// Per-room chess state. A game is in progress iff both seats are filled
/// and a rules-engine instance exists.
///
/// The turn timer is owned here and aborted on any transition that makes
/// it moot (reset, re-arm after a move).
#[derive(Debug, Default)]
pub struct ChessState {
    /// External rules-engine instance. Kept across games; replaced with a
    /// fresh instance when a new game starts.
    pub game: Option<Game>,
    pub white_user_id: Option<String>,
    pub black_user_id: Option<String>,
    pub last_move_time: Option<i64>,
    pub timer: Option<JoinHandle<()>>,
}

impl ChessState {
    pub fn is_in_progress(&self) -> bool {
        self.game.is_some() && self.white_user_id.is_some() && self.black_user_id.is_some()
    }

    /// The seat held by `user_id`, if any.
    pub fn seat_of(&self, user_id: &str) -> Option<Color> {
        if self.white_user_id.as_deref() == Some(user_id) {
            Some(Color::White)
        } else if self.black_user_id.as_deref() == Some(user_id) {
            Some(Color::Black)
        } else {
            None
        }
    }

    /// FEN of the current board, if an engine instance exists.
    pub fn fen(&self) -> Option<String> {
        self.game.as_ref().map(|g| g.current_position().to_string())
    }

    /// Whose turn it is, as the wire format's "w"/"b".
    pub fn turn(&self) -> Option<&'static str> {
        self.game.as_ref().map(|g| match g.side_to_move() {
            Color::White => "w",
            Color::Black => "b",
        })
    }

    /// Vacate both seats and cancel the turn timer. The engine instance is
    /// kept; a new game replaces it.
    pub fn reset(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.white_user_id = None;
        self.black_user_id = None;
        self.last_move_time = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_game_in_progress_requires_both_seats_and_instance() {
        let mut state = ChessState::default();
        assert!(!state.is_in_progress());

        state.white_user_id = Some("alice".to_string());
        assert!(!state.is_in_progress());

        state.black_user_id = Some("bob".to_string());
        state.game = Some(Game::new());
        assert!(state.is_in_progress());
    }

    #[test]
    fn test_seat_lookup() {
        let mut state = ChessState::default();
        state.white_user_id = Some("alice".to_string());
        state.black_user_id = Some("bob".to_string());

        assert_eq!(state.seat_of("alice"), Some(Color::White));
        assert_eq!(state.seat_of("bob"), Some(Color::Black));
        assert_eq!(state.seat_of("carol"), None);
    }

    #[test]
    fn test_reset_vacates_seats_but_keeps_engine_instance() {
        let mut state = ChessState::default();
        state.white_user_id = Some("alice".to_string());
        state.black_user_id = Some("bob".to_string());
        state.game = Some(Game::new());

        state.reset();

        assert!(state.white_user_id.is_none());
        assert!(state.black_user_id.is_none());
        assert!(state.game.is_some());
        assert!(!state.is_in_progress());
    }

    #[test]
    fn test_fresh_game_reports_white_to_move() {
        let mut state = ChessState::default();
        state.game = Some(Game::new());

        assert_eq!(state.turn(), Some("w"));
        let fen = state.fen().unwrap();
        assert!(fen.starts_with("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w"));
    }
}
