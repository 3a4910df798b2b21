//! Chat: commands, flood control, the content filter pipeline and
//! censorship with author-only delivery.

use std::sync::Arc;

use hiroba_shared::time::get_timestamp_millis;

use crate::infrastructure::dto::conversion::is_censored;
use crate::infrastructure::dto::websocket::ServerEvent;
use crate::state::AppContext;
use crate::usecase::{EventError, presence};

const MAX_MESSAGE_LENGTH: usize = 500;
/// No more than 5 messages in the last 5 seconds.
const FLOOD_WINDOW_MS: i64 = 5000;
const FLOOD_MAX_MESSAGES: usize = 5;

const TIGER_SUBSTITUTE: &str = "(´・ω・`)";
const MOONWALK_SUBSTITUTE: &str = "(^Д^)";

/// The adversarial "TIGER" phrase: after stripping case-insensitive TIGER
/// repetitions and whitespace, what remains is a prefix of "TIGER".
fn is_tiger_spam(msg: &str) -> bool {
    let chars: Vec<char> = msg.chars().collect();
    if chars.len() <= 5 {
        return false;
    }
    let mut residue = String::new();
    let mut i = 0;
    while i < chars.len() {
        let matches_tiger = i + 5 <= chars.len()
            && chars[i..i + 5]
                .iter()
                .zip("TIGER".chars())
                .all(|(c, t)| c.eq_ignore_ascii_case(&t));
        if matches_tiger {
            i += 5;
            continue;
        }
        if !chars[i].is_whitespace() {
            residue.push(chars[i]);
        }
        i += 1;
    }
    "TIGER".starts_with(residue.as_str())
}

/// The content filter pipeline applied to every non-empty message.
pub fn sanitize_message(msg: &str) -> String {
    if is_tiger_spam(msg) {
        return TIGER_SUBSTITUTE.to_string();
    }

    let lowered = msg.to_lowercase();
    if lowered.contains("moonwalk") || lowered.contains("moon-walk") {
        return MOONWALK_SUBSTITUTE.to_string();
    }

    let msg = msg.replace('◆', "◇");
    msg.chars().take(MAX_MESSAGE_LENGTH).collect()
}

/// Sliding-window flood check. Records `now` in the queue; returns `true`
/// when this message exceeds the rate and must be dropped.
pub fn register_message_is_flood(dates: &mut Vec<i64>, now: i64) -> bool {
    dates.push(now);
    if dates.len() > FLOOD_MAX_MESSAGES {
        let first = dates.remove(0);
        if now - first < FLOOD_WINDOW_MS {
            return true;
        }
    }
    false
}

pub async fn handle_chat(
    ctx: &Arc<AppContext>,
    user_id: &str,
    message: &str,
) -> Result<(), EventError> {
    let now = get_timestamp_millis();
    let mut state = ctx.state.lock().await;
    let Some(player) = state.player_mut(user_id) else {
        return Ok(());
    };
    player.mark_active(now);

    // Not subject to flood control; it is no more spammy than user-move.
    if message == "#henshin" {
        let character_id = player.character_id.clone();
        let is_alternate = !player.is_alternate_character;
        presence::change_character(&mut state, user_id, &character_id, is_alternate, now);
        return Ok(());
    }

    // Whitespace becomes an empty string (to clear bubbles)
    let mut msg = if message.trim().is_empty() {
        String::new()
    } else {
        message.to_string()
    };

    let player = state.player_mut(user_id).expect("player still exists");
    if msg.is_empty() && player.last_room_message.is_empty() {
        return Ok(());
    }

    if !msg.is_empty() {
        if register_message_is_flood(&mut player.last_message_dates, now) {
            let warning = ServerEvent::ServerSystemMessage {
                code: "flood_warning".to_string(),
                extra: Some(msg),
            };
            state.emit_to_player(user_id, &warning);
            return Ok(());
        }

        if msg == "#ika" {
            presence::change_character(&mut state, user_id, "ika", false, now);
            return Ok(());
        }

        msg = sanitize_message(&msg);
    }

    let player = state.player_mut(user_id).expect("player still exists");
    player.last_room_message = msg.clone();
    player.last_action = now;
    let (area_id, room_id, ip) = (
        player.area_id.clone(),
        player.room_id.clone(),
        player.ip.clone(),
    );

    if !msg.is_empty() {
        tracing::info!(
            "MSG: {} {} {} {} <{}>: {}",
            ip,
            user_id,
            area_id,
            room_id,
            state.player(user_id).map(|p| p.name.clone()).unwrap_or_default(),
            msg.replace(['\n', '\r'], " ")
        );
    }

    let event = ServerEvent::ServerMsg {
        user_id: user_id.to_string(),
        message: msg.clone(),
    };
    if is_censored(&msg, &ctx.settings.censored_words) {
        // visually present for the author, invisible to the room
        state.emit_to_player(user_id, &event);
    } else {
        state.user_room_emit(user_id, &area_id, &room_id, &event);
    }
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

    #[test]
    fn test_sanitize_replaces_tiger_phrase() {
        assert_eq!(sanitize_message("TIGERTIGER"), TIGER_SUBSTITUTE);
        assert_eq!(sanitize_message("tiger TIGER tIgEr"), TIGER_SUBSTITUTE);
        assert_eq!(sanitize_message("TIGERTIG"), TIGER_SUBSTITUTE);
        // unrelated text survives
        assert_eq!(sanitize_message("I saw a tiger at the zoo"), "I saw a tiger at the zoo");
        // too short to be the spam phrase
        assert_eq!(sanitize_message("TIGER"), "TIGER");
    }

    #[test]
    fn test_sanitize_replaces_moonwalk() {
        assert_eq!(sanitize_message("watch me MoonWalk"), MOONWALK_SUBSTITUTE);
        assert_eq!(sanitize_message("moon-walking is fine?"), MOONWALK_SUBSTITUTE);
        assert_eq!(sanitize_message("walking on the moon"), "walking on the moon");
    }

    #[test]
    fn test_sanitize_substitutes_reserved_character_and_caps_length() {
        assert_eq!(sanitize_message("a◆b"), "a◇b");

        let long: String = "x".repeat(600);
        assert_eq!(sanitize_message(&long).chars().count(), 500);
    }

    #[test]
    fn test_flood_window_allows_five_then_drops_the_sixth() {
        let mut dates = Vec::new();

        for i in 0..5 {
            assert!(!register_message_is_flood(&mut dates, 1000 + i));
        }
        assert!(register_message_is_flood(&mut dates, 1010));

        // after the window passes, messages flow again
        assert!(!register_message_is_flood(&mut dates, 20_000));
    }

    #[tokio::test]
    async fn test_chat_is_broadcast_to_room() {
        let ctx = AppContext::with_relays(Settings::default(), Vec::new());
        let (alice, mut alice_rx) = bind_player(&ctx, "alice", "10.0.0.1").await;
        let (_bob, mut bob_rx) = bind_player(&ctx, "bob", "10.0.0.2").await;
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        handle_chat(&ctx, &alice, "hello there").await.unwrap();

        for rx in [&mut alice_rx, &mut bob_rx] {
            let events = drain(rx);
            let msg = events.iter().find(|e| e["type"] == "server-msg").unwrap();
            assert_eq!(msg["message"], "hello there");
        }
    }

    #[tokio::test]
    async fn test_double_empty_message_is_suppressed() {
        let ctx = AppContext::with_relays(Settings::default(), Vec::new());
        let (alice, mut rx) = bind_player(&ctx, "alice", "10.0.0.1").await;

        handle_chat(&ctx, &alice, "hello").await.unwrap();
        drain(&mut rx);

        // whitespace collapses to the empty "clear bubble" message
        handle_chat(&ctx, &alice, "   \n  ").await.unwrap();
        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| e["type"] == "server-msg" && e["message"] == ""));

        // a second empty in a row produces nothing
        handle_chat(&ctx, &alice, "").await.unwrap();
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_sixth_message_in_window_warns_sender_only() {
        let ctx = AppContext::with_relays(Settings::default(), Vec::new());
        let (alice, mut alice_rx) = bind_player(&ctx, "alice", "10.0.0.1").await;
        let (_bob, mut bob_rx) = bind_player(&ctx, "bob", "10.0.0.2").await;
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        for i in 0..6 {
            handle_chat(&ctx, &alice, &format!("message {}", i))
                .await
                .unwrap();
        }

        let alice_events = drain(&mut alice_rx);
        assert!(alice_events
            .iter()
            .any(|e| e["type"] == "server-system-message" && e["code"] == "flood_warning"));

        let bob_events = drain(&mut bob_rx);
        let broadcast: Vec<_> = bob_events
            .iter()
            .filter(|e| e["type"] == "server-msg")
            .collect();
        assert_eq!(broadcast.len(), 5);
        assert!(!broadcast.iter().any(|e| e["message"] == "message 5"));
    }

    #[tokio::test]
    async fn test_censored_message_reaches_author_only() {
        let mut settings = Settings::default();
        settings.censored_words = vec!["forbidden".to_string()];
        let ctx = AppContext::with_relays(settings, Vec::new());
        let (alice, mut alice_rx) = bind_player(&ctx, "alice", "10.0.0.1").await;
        let (_bob, mut bob_rx) = bind_player(&ctx, "bob", "10.0.0.2").await;
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        handle_chat(&ctx, &alice, "this is FORBIDDEN knowledge")
            .await
            .unwrap();

        let alice_events = drain(&mut alice_rx);
        assert!(alice_events.iter().any(|e| e["type"] == "server-msg"));
        assert!(!drain(&mut bob_rx).iter().any(|e| e["type"] == "server-msg"));
    }

    #[tokio::test]
    async fn test_henshin_toggles_alternate_character() {
        let ctx = AppContext::with_relays(Settings::default(), Vec::new());
        let (alice, _rx) = bind_player(&ctx, "alice", "10.0.0.1").await;

        handle_chat(&ctx, &alice, "#henshin").await.unwrap();
        {
            let state = ctx.state.lock().await;
            assert!(state.player(&alice).unwrap().is_alternate_character);
        }

        handle_chat(&ctx, &alice, "#henshin").await.unwrap();
        let state = ctx.state.lock().await;
        assert!(!state.player(&alice).unwrap().is_alternate_character);
    }

    #[tokio::test]
    async fn test_ika_command_applies_permanent_identity() {
        let ctx = AppContext::with_relays(Settings::default(), Vec::new());
        let (alice, _rx) = bind_player(&ctx, "alice", "10.0.0.1").await;

        handle_chat(&ctx, &alice, "#ika").await.unwrap();

        let state = ctx.state.lock().await;
        assert_eq!(state.player(&alice).unwrap().character_id, "ika");
    }
}
