//! Session registry: login, trip-code names, full removal and the IP ban
//! boundary.

use std::sync::Arc;

use rand::Rng;
use uuid::Uuid;

use hiroba_shared::time::get_timestamp_millis;

use crate::domain::{AREAS, Direction, Player};
use crate::infrastructure::dto::websocket::ServerEvent;
use crate::state::AppContext;
use crate::usecase::{chess, streams};

/// Fallback room when a login names an unknown one.
const DEFAULT_ROOM_ID: &str = "admin_st";
const DEFAULT_AREA_ID: &str = "gen";
const MAX_NAME_LENGTH: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginError {
    IpRestricted,
    InvalidUsername,
}

impl LoginError {
    pub fn code(&self) -> &'static str {
        match self {
            LoginError::IpRestricted => "ip_restricted",
            LoginError::InvalidUsername => "invalid_username",
        }
    }
}

/// Identifiers returned by a successful login.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user_id: String,
    pub private_user_id: String,
}

/// Digest a trip-code secret into its 10-character tag.
fn tripcode(secret: &str) -> String {
    let digest = Uuid::new_v5(&Uuid::NAMESPACE_OID, secret.as_bytes());
    digest.simple().to_string()[..10].to_string()
}

/// Normalize a requested display name: cap the length, substitute the
/// reserved `◆`, and turn a `#secret` suffix into a `◆tag` trip code.
pub fn process_user_name(raw: &str) -> String {
    let truncated: String = raw.chars().take(MAX_NAME_LENGTH).collect();
    match truncated.find('#') {
        Some(n) => {
            let base = truncated[..n].replace('◆', "◇");
            let secret = &truncated[n + 1..];
            format!("{}◆{}", base, tripcode(secret))
        }
        None => truncated.replace('◆', "◇"),
    }
}

/// Create a player for a login request. Enforces the ban list and the
/// maximum concurrent-login count per IP per area (purging that IP's
/// ghosts first).
pub async fn login(
    ctx: &Arc<AppContext>,
    user_name: &str,
    character_id: &str,
    area_id: &str,
    room_id: &str,
    ip: &str,
) -> Result<LoginOutcome, LoginError> {
    {
        let state = ctx.state.lock().await;
        if state.banned_ips.contains(ip) {
            return Err(LoginError::IpRestricted);
        }
    }

    tracing::info!(
        "Attempting to login {} <{}> {} {}",
        ip,
        user_name.split('#').next().unwrap_or(""),
        character_id,
        area_id
    );

    let area_id = if AREAS.contains(&area_id) {
        area_id
    } else {
        DEFAULT_AREA_ID
    };

    if ctx.settings.restrict_login_by_ip {
        let candidate_ids = {
            let state = ctx.state.lock().await;
            state.player_ids_by_ip(ip, Some(area_id))
        };

        let mut same_ip_count = 0;
        for id in candidate_ids {
            let is_ghost = {
                let state = ctx.state.lock().await;
                state.player(&id).map(|p| p.is_ghost)
            };
            match is_ghost {
                // Don't count ghosts and also remove them, while we're at it
                Some(true) => disconnect_user(ctx, &id).await,
                Some(false) => same_ip_count += 1,
                None => {}
            }
            if same_ip_count >= ctx.settings.max_users_per_ip_per_area {
                return Err(LoginError::IpRestricted);
            }
        }
    }

    let name = process_user_name(user_name);

    let room = ctx
        .room(room_id)
        .or_else(|| ctx.room(DEFAULT_ROOM_ID))
        .ok_or(LoginError::InvalidUsername)?;
    let door = room
        .doors
        .get(&room.spawn_point)
        .expect("spawn point must be a door");

    let now = get_timestamp_millis();
    let player = Player::new(
        Uuid::new_v4().simple().to_string(),
        Uuid::new_v4().simple().to_string(),
        ip.to_string(),
        name,
        character_id.to_string(),
        area_id.to_string(),
        room.id.clone(),
        door.position(),
        door.direction.unwrap_or(Direction::Down),
        rand::thread_rng().gen_range(0.0..1.0),
        now,
    );
    let outcome = LoginOutcome {
        user_id: player.id.clone(),
        private_user_id: player.private_id.clone(),
    };

    let name_for_log = player.name.clone();
    ctx.state.lock().await.add_player(player);
    tracing::info!(
        "Logged in '{}' <{}> from {} {}",
        outcome.user_id,
        name_for_log,
        ip,
        area_id
    );
    Ok(outcome)
}

/// Fully remove a player: tear down their stream and chess participation,
/// notify the room and update stats.
pub async fn disconnect_user(ctx: &Arc<AppContext>, user_id: &str) {
    let info = {
        let state = ctx.state.lock().await;
        state
            .player(user_id)
            .map(|p| (p.area_id.clone(), p.room_id.clone(), p.name.clone()))
    };
    let Some((area_id, room_id, name)) = info else {
        return;
    };
    tracing::info!("Removing user '{}' <{}> {}", user_id, name, area_id);

    streams::clear_stream(ctx, user_id).await;
    streams::clear_room_listener(ctx, user_id).await;

    let mut state = ctx.state.lock().await;
    chess::stop_chess_game(&mut state, user_id);
    state.user_room_emit(
        user_id,
        &area_id,
        &room_id,
        &ServerEvent::ServerUserLeftRoom {
            user_id: user_id.to_string(),
        },
    );
    state.remove_player(user_id);
    state.emit_server_stats(&area_id);
}

/// Ban an IP: reject it from now on, and disconnect and fully remove every
/// current player from it.
pub async fn ban_ip(ctx: &Arc<AppContext>, ip: &str) {
    tracing::info!("BANNING {}", ip);

    let user_ids = {
        let mut state = ctx.state.lock().await;
        state.banned_ips.insert(ip.to_string());
        state.player_ids_by_ip(ip, None)
    };

    for user_id in user_ids {
        {
            // Drop the connection channel so the socket tasks wind down.
            let mut state = ctx.state.lock().await;
            let connection_id = state
                .player_mut(&user_id)
                .and_then(|p| p.connection_id.take());
            if let Some(connection_id) = connection_id {
                state.unregister_connection(&connection_id);
            }
        }
        disconnect_user(ctx, &user_id).await;
    }
}

pub async fn unban_ip(ctx: &Arc<AppContext>, ip: &str) {
    tracing::info!("Unbanning {}", ip);
    ctx.state.lock().await.banned_ips.remove(ip);
}
