//! Server configuration.
//!
//! Settings are read from a JSON file (via `--settings <path>`) or from the
//! `HIROBA_SETTINGS` environment variable; every field has a default so a
//! bare server can run with no configuration at all.

use std::path::Path;

use serde::Deserialize;

/// One external media-relay server (Janus-style videoroom instance).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayServerSettings {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Version number reported on login and `/api/version`.
    pub app_version: u32,
    /// Shared secret for the admin ban endpoints. `None` disables them.
    pub admin_key: Option<String>,
    pub restrict_login_by_ip: bool,
    pub max_users_per_ip_per_area: usize,
    /// Lower-case substrings; a chat message containing one is delivered
    /// only to its author.
    pub censored_words: Vec<String>,
    /// IPs for which stream slots are hidden entirely.
    pub no_stream_ips: Vec<String>,

    pub relay_servers: Vec<RelayServerSettings>,
    pub relay_api_secret: Option<String>,
    pub relay_room_name_prefix: String,
    pub relay_room_int_prefix: i64,

    /// Remote persistor endpoint; when unset, a local file is used.
    pub persistor_url: Option<String>,
    pub persistor_secret: Option<String>,
    pub persisted_state_path: String,
    pub persist_interval_ms: u64,

    pub max_ghost_retention_ms: i64,
    pub inactivity_timeout_ms: i64,
    pub max_wait_for_chess_move_ms: u64,
    pub stream_watchdog_ms: u64,

    pub abuse_api_url: Option<String>,
    pub abuse_api_key: Option<String>,
    pub maximum_abuse_confidence_score: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_version: 1,
            admin_key: None,
            restrict_login_by_ip: true,
            max_users_per_ip_per_area: 2,
            censored_words: Vec::new(),
            no_stream_ips: Vec::new(),
            relay_servers: Vec::new(),
            relay_api_secret: None,
            relay_room_name_prefix: "hiroba".to_string(),
            relay_room_int_prefix: 1,
            persistor_url: None,
            persistor_secret: None,
            persisted_state_path: "persisted-state.json".to_string(),
            persist_interval_ms: 5 * 1000,
            max_ghost_retention_ms: 30 * 60 * 1000,
            inactivity_timeout_ms: 30 * 60 * 1000,
            max_wait_for_chess_move_ms: 5 * 60 * 1000,
            stream_watchdog_ms: 10 * 1000,
            abuse_api_url: None,
            abuse_api_key: None,
            maximum_abuse_confidence_score: 50,
        }
    }
}

impl Settings {
    /// Load settings from the given file, falling back to the
    /// `HIROBA_SETTINGS` environment variable, falling back to defaults.
    pub fn load(path: Option<&Path>) -> Self {
        if let Some(path) = path {
            match std::fs::read_to_string(path) {
                Ok(text) => return Self::parse(&text, &path.display().to_string()),
                Err(e) => {
                    tracing::warn!("Could not read settings file '{}': {}", path.display(), e);
                }
            }
        }

        if let Ok(text) = std::env::var("HIROBA_SETTINGS") {
            return Self::parse(&text, "HIROBA_SETTINGS");
        }

        tracing::info!("No settings provided, using defaults");
        Self::default()
    }

    fn parse(text: &str, source: &str) -> Self {
        match serde_json::from_str(text) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("Invalid settings in '{}', using defaults: {}", source, e);
                Self::default()
            }
        }
    }
}
