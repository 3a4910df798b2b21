//! Background reaper: removes expired ghosts and marks idle players
//! inactive.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use hiroba_shared::time::get_timestamp_millis;

use crate::infrastructure::dto::websocket::ServerEvent;
use crate::state::AppContext;
use crate::usecase::login;

const REAPER_INTERVAL_MS: u64 = 1000;

/// Spawn the fixed-interval reaper. A single task owns the loop and missed
/// ticks are skipped, so runs never overlap.
pub fn spawn_background_reaper(ctx: Arc<AppContext>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(REAPER_INTERVAL_MS));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            reap_once(&ctx).await;
        }
    })
}

enum Verdict {
    Keep,
    Remove,
    MarkInactive,
}

/// One reaper pass over every player.
pub async fn reap_once(ctx: &Arc<AppContext>) {
    let now = get_timestamp_millis();
    let user_ids = {
        let state = ctx.state.lock().await;
        state.all_player_ids()
    };

    for user_id in user_ids {
        let verdict = {
            let state = ctx.state.lock().await;
            match state.player(&user_id) {
                None => Verdict::Keep,
                Some(player) => {
                    if let Some(disconnection_time) = player.disconnection_time {
                        if now - disconnection_time > ctx.settings.max_ghost_retention_ms {
                            tracing::info!(
                                "'{}' ghost expired ({} ms disconnected)",
                                user_id,
                                now - disconnection_time
                            );
                            Verdict::Remove
                        } else {
                            Verdict::Keep
                        }
                    } else if player.is_ghost {
                        // a ghost without a disconnection time is an
                        // inconsistent record; reap it right away
                        tracing::info!("'{}' is a ghost without connection time", user_id);
                        Verdict::Remove
                    } else if !player.is_inactive
                        && now - player.last_action > ctx.settings.inactivity_timeout_ms
                    {
                        Verdict::MarkInactive
                    } else {
                        Verdict::Keep
                    }
                }
            }
        };

        match verdict {
            Verdict::Keep => {}
            Verdict::Remove => login::disconnect_user(ctx, &user_id).await,
            Verdict::MarkInactive => {
                let mut state = ctx.state.lock().await;
                let Some(player) = state.player_mut(&user_id) else {
                    continue;
                };
                player.is_inactive = true;
                let (area_id, room_id) = (player.area_id.clone(), player.room_id.clone());
                tracing::info!("'{}' is inactive", user_id);
                state.user_room_emit(
                    &user_id,
                    &area_id,
                    &room_id,
                    &ServerEvent::ServerUserInactive {
                        user_id: user_id.clone(),
                    },
                );
            }
        }
    }
}
