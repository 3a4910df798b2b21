//! Periodic snapshot/restore of players, bans and per-area counters.
//!
//! The sink is pluggable: a remote persistor endpoint authenticated with a
//! shared secret header, or a local file. Whichever fails, the cycle is
//! logged and skipped; a restore failure starts the process from an empty
//! state. Stream and chess sub-state is intentionally never persisted.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use hiroba_shared::time::get_timestamp_millis;

use crate::domain::{AREAS, Player};
use crate::settings::Settings;
use crate::state::{AppContext, ServerState};

/// The room whose coin counter is the persisted per-area counter.
const COIN_COUNTER_ROOM: &str = "jinja";
/// Current snapshot schema version.
const SCHEMA_VERSION: u32 = 1;

fn default_version() -> u32 {
    SCHEMA_VERSION
}

/// The player collection: a sequence since schema version 1, with the
/// older plain `id -> player` mapping still accepted on restore.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlayerCollection {
    Sequence(Vec<Player>),
    LegacyMap(HashMap<String, Player>),
}

impl Default for PlayerCollection {
    fn default() -> Self {
        PlayerCollection::Sequence(Vec::new())
    }
}

impl PlayerCollection {
    pub fn into_vec(self) -> Vec<Player> {
        match self {
            PlayerCollection::Sequence(players) => players,
            PlayerCollection::LegacyMap(players) => players.into_values().collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub players: PlayerCollection,
    #[serde(default, rename = "bannedIPs")]
    pub banned_ips: Vec<String>,
    /// areaId -> coin counter of that area's shrine room.
    #[serde(default)]
    pub coin_counters: HashMap<String, i64>,
}

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("snapshot i/o failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot transport failure: {0}")]
    Http(String),
    #[error("snapshot encode failure: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<reqwest::Error> for PersistError {
    fn from(e: reqwest::Error) -> Self {
        PersistError::Http(e.to_string())
    }
}

/// Take a snapshot of everything that survives a restart.
pub fn snapshot(state: &ServerState) -> PersistedState {
    let coin_counters = AREAS
        .iter()
        .filter_map(|area_id| {
            state
                .room_state(area_id, COIN_COUNTER_ROOM)
                .map(|rs| (area_id.to_string(), rs.coin_counter))
        })
        .collect();

    PersistedState {
        version: SCHEMA_VERSION,
        players: PlayerCollection::Sequence(state.all_players().cloned().collect()),
        banned_ips: state.banned_ips.iter().cloned().collect(),
        coin_counters,
    }
}

/// Restore a snapshot. Players come back as ghosts with their connection
/// bindings unset; a client reconnects with the persisted private
/// credential.
pub fn apply(state: &mut ServerState, persisted: PersistedState, now: i64) {
    for mut player in persisted.players.into_vec() {
        player.is_ghost = true;
        player.connection_id = None;
        if player.disconnection_time.is_none() {
            player.disconnection_time = Some(now);
        }
        state.add_player(player);
    }

    state.banned_ips = persisted.banned_ips.into_iter().collect();

    for (area_id, count) in persisted.coin_counters {
        if let Some(room_state) = state.room_state_mut(&area_id, COIN_COUNTER_ROOM) {
            room_state.coin_counter = count;
        }
    }
}

/// Where snapshots are written to and read from.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load(&self) -> Result<Option<String>, PersistError>;
    async fn store(&self, payload: String) -> Result<(), PersistError>;
}

/// Local durable file.
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn load(&self) -> Result<Option<String>, PersistError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, payload: String) -> Result<(), PersistError> {
        tokio::fs::write(&self.path, payload).await?;
        Ok(())
    }
}

/// Remote persistor endpoint with a shared secret header.
pub struct RemoteSnapshotStore {
    url: String,
    secret: Option<String>,
    http: reqwest::Client,
}

impl RemoteSnapshotStore {
    pub fn new(url: String, secret: Option<String>) -> Self {
        Self {
            url,
            secret,
            http: reqwest::Client::new(),
        }
    }

    fn secret_header(&self) -> &str {
        self.secret.as_deref().unwrap_or("")
    }
}

#[async_trait]
impl SnapshotStore for RemoteSnapshotStore {
    async fn load(&self) -> Result<Option<String>, PersistError> {
        let response = self
            .http
            .get(&self.url)
            .header("persistor-secret", self.secret_header())
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::OK {
            Ok(Some(response.text().await?))
        } else {
            Ok(None)
        }
    }

    async fn store(&self, payload: String) -> Result<(), PersistError> {
        self.http
            .post(&self.url)
            .header("persistor-secret", self.secret_header())
            .header("Content-Type", "text/plain")
            .body(payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Build the configured store: remote endpoint when set, local file
/// otherwise.
pub fn snapshot_store_from_settings(settings: &Settings) -> Arc<dyn SnapshotStore> {
    match &settings.persistor_url {
        Some(url) => Arc::new(RemoteSnapshotStore::new(
            url.clone(),
            settings.persistor_secret.clone(),
        )),
        None => Arc::new(FileSnapshotStore::new(settings.persisted_state_path.clone())),
    }
}

/// One persistence cycle. Failures are logged and the cycle skipped.
pub async fn persist_state(ctx: &Arc<AppContext>, store: &Arc<dyn SnapshotStore>) {
    let payload = {
        let state = ctx.state.lock().await;
        serde_json::to_string_pretty(&snapshot(&state))
    };
    let payload = match payload {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!("Failed to encode persisted state: {}", e);
            return;
        }
    };
    if let Err(e) = store.store(payload).await {
        tracing::error!("Failed to persist state: {}", e);
    }
}

/// Restore the latest snapshot, if any. Any decode failure is swallowed
/// and the process starts from an empty state.
pub async fn restore_state(ctx: &Arc<AppContext>, store: &Arc<dyn SnapshotStore>) {
    tracing::info!("Restoring state...");
    let payload = match store.load().await {
        Ok(Some(payload)) => payload,
        Ok(None) => {
            tracing::info!("No persisted state found, starting fresh");
            return;
        }
        Err(e) => {
            tracing::error!("Failed to read persisted state: {}", e);
            return;
        }
    };

    match serde_json::from_str::<PersistedState>(&payload) {
        Ok(persisted) => {
            let mut state = ctx.state.lock().await;
            apply(&mut state, persisted, get_timestamp_millis());
            tracing::info!(
                "Restored {} players, {} banned IPs",
                state.all_players().count(),
                state.banned_ips.len()
            );
        }
        Err(e) => {
            tracing::error!("Failed to decode persisted state, starting fresh: {}", e);
        }
    }
}

/// Persist every few seconds, so that people can seamlessly reconnect
/// after a server restart.
pub fn spawn_persistence_loop(
    ctx: Arc<AppContext>,
    store: Arc<dyn SnapshotStore>,
) -> JoinHandle<()> {
    let interval_ms = ctx.settings.persist_interval_ms;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            persist_state(&ctx, &store).await;
        }
    })
}
