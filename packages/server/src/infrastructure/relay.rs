//! Client boundary for the external WebRTC media-relay service.
//!
//! The server never touches media; it only orchestrates signaling against
//! one or more relay (Janus-style videoroom) processes. The `RelayClient`
//! trait is the seam: use cases depend on it, `HttpRelayClient` implements
//! it over the relay's REST transport, and tests mock it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

/// Error code the relay reports when a room already exists; tolerated as
/// success when creating rooms.
pub const RELAY_ROOM_EXISTS_CODE: i64 = 427;

/// Failure pattern indicating the relay process itself is corrupted. No
/// in-process recovery is possible; the server restarts when it sees this.
const FATAL_PLUGIN_FAILURE: &str = "Couldn't attach to plugin: error '-1'";

/// Opaque relay session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RelaySessionId(pub u64);

/// Opaque relay plugin-handle identifier, scoped to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RelayHandleId(pub u64);

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("relay transport failure: {0}")]
    Transport(String),
    #[error("relay rejected request (code {code}): {reason}")]
    Api { code: i64, reason: String },
    #[error("malformed relay response: {0}")]
    Protocol(String),
}

impl RelayError {
    pub fn is_room_exists(&self) -> bool {
        matches!(self, RelayError::Api { code, .. } if *code == RELAY_ROOM_EXISTS_CODE)
    }

    /// Whether this failure means the relay process is beyond recovery.
    pub fn is_fatal_plugin_failure(&self) -> bool {
        matches!(self, RelayError::Api { reason, .. } if reason.contains(FATAL_PLUGIN_FAILURE))
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(e: reqwest::Error) -> Self {
        RelayError::Transport(e.to_string())
    }
}

/// A feed the relay accepted for publishing.
#[derive(Debug, Clone)]
pub struct PublishedFeed {
    pub handle: RelayHandleId,
    /// Relay-assigned identifier listeners use to subscribe to this feed.
    pub feed_id: u64,
    /// JSEP answer to return to the publishing client.
    pub answer: Value,
}

/// A subscription the relay opened on an existing feed.
#[derive(Debug, Clone)]
pub struct ListenedFeed {
    pub handle: RelayHandleId,
    /// JSEP offer to return to the listening client.
    pub offer: Value,
}

/// Long-lived connection to one media-relay process.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RelayClient: Send + Sync {
    /// Lazily establish the connection; idempotent.
    async fn ensure_connected(&self) -> Result<(), RelayError>;

    async fn create_session(&self) -> Result<RelaySessionId, RelayError>;

    async fn destroy_session(&self, session: RelaySessionId) -> Result<(), RelayError>;

    /// Create the room-equivalent resource on the relay. An
    /// already-exists error is reported as `Ok`.
    async fn create_room(
        &self,
        session: RelaySessionId,
        room: i64,
        publishers: u32,
    ) -> Result<(), RelayError>;

    /// Destroy the room-equivalent resource through the given handle.
    async fn destroy_room(
        &self,
        session: RelaySessionId,
        handle: RelayHandleId,
        room: i64,
    ) -> Result<(), RelayError>;

    /// Publish the offered media into `room`, returning the relay's answer.
    async fn publish_feed(
        &self,
        session: RelaySessionId,
        room: i64,
        offer: Value,
    ) -> Result<PublishedFeed, RelayError>;

    /// Subscribe to `feed_id` in `room`, returning the relay's offer.
    async fn listen_feed(
        &self,
        session: RelaySessionId,
        room: i64,
        feed_id: u64,
    ) -> Result<ListenedFeed, RelayError>;

    async fn detach(
        &self,
        session: RelaySessionId,
        handle: RelayHandleId,
    ) -> Result<(), RelayError>;

    async fn set_remote_answer(
        &self,
        session: RelaySessionId,
        handle: RelayHandleId,
        answer: Value,
    ) -> Result<(), RelayError>;

    async fn trickle(
        &self,
        session: RelaySessionId,
        handle: RelayHandleId,
        candidate: Value,
    ) -> Result<(), RelayError>;

    async fn trickle_completed(
        &self,
        session: RelaySessionId,
        handle: RelayHandleId,
    ) -> Result<(), RelayError>;

    /// Register a forwarder for trickle-ICE notifications the relay emits
    /// for `handle`. Candidates are pushed into `forward` until the handle
    /// is detached or the receiver is dropped.
    fn on_trickle(
        &self,
        session: RelaySessionId,
        handle: RelayHandleId,
        forward: mpsc::UnboundedSender<Value>,
    );
}

/// One configured relay server: identity plus its long-lived client.
#[derive(Clone)]
pub struct RelayServer {
    pub id: String,
    pub client: Arc<dyn RelayClient>,
}

#[derive(Default)]
struct HttpRelayInner {
    /// Pending synchronous-looking requests waiting for their event on the
    /// session long-poll, keyed by transaction id.
    waiters: HashMap<String, oneshot::Sender<Value>>,
    /// Trickle forwarders keyed by (session, handle).
    trickle_routes: HashMap<(u64, u64), mpsc::UnboundedSender<Value>>,
    /// Event pump task per session.
    pumps: HashMap<u64, JoinHandle<()>>,
}

/// `RelayClient` over the relay's REST transport.
pub struct HttpRelayClient {
    base_url: String,
    api_secret: Option<String>,
    http: reqwest::Client,
    transaction_counter: AtomicU64,
    connected: AtomicBool,
    inner: Arc<Mutex<HttpRelayInner>>,
}

impl HttpRelayClient {
    pub fn new(base_url: String, api_secret: Option<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_secret,
            http: reqwest::Client::new(),
            transaction_counter: AtomicU64::new(1),
            connected: AtomicBool::new(false),
            inner: Arc::new(Mutex::new(HttpRelayInner::default())),
        }
    }

    fn next_transaction(&self) -> String {
        format!(
            "hiroba-{}",
            self.transaction_counter.fetch_add(1, Ordering::Relaxed)
        )
    }

    fn with_secret(&self, mut body: Value) -> Value {
        if let (Some(secret), Some(obj)) = (&self.api_secret, body.as_object_mut()) {
            obj.insert("apisecret".to_string(), json!(secret));
        }
        body
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, RelayError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .json(&self.with_secret(body))
            .send()
            .await?
            .json::<Value>()
            .await?;
        check_relay_error(&response)?;
        Ok(response)
    }

    /// Send a plugin message whose real result arrives as an event on the
    /// session long-poll; await that event by transaction id.
    async fn message_and_wait(
        &self,
        session: RelaySessionId,
        handle: RelayHandleId,
        body: Value,
        jsep: Option<Value>,
    ) -> Result<Value, RelayError> {
        let transaction = self.next_transaction();
        let (tx, rx) = oneshot::channel();
        self.inner
            .lock()
            .await
            .waiters
            .insert(transaction.clone(), tx);

        let mut request = json!({
            "janus": "message",
            "transaction": transaction,
            "body": body,
        });
        if let Some(jsep) = jsep {
            request["jsep"] = jsep;
        }

        let response = self
            .post(&format!("/{}/{}", session.0, handle.0), request)
            .await;
        if let Err(e) = response {
            self.inner.lock().await.waiters.remove(&transaction);
            return Err(e);
        }
        let response = response.unwrap();

        // Some requests answer synchronously instead of via the long-poll.
        if response["janus"] == "success" {
            self.inner.lock().await.waiters.remove(&transaction);
            return Ok(response);
        }

        match rx.await {
            Ok(event) => {
                check_relay_error(&event)?;
                Ok(event)
            }
            Err(_) => Err(RelayError::Transport(
                "relay event channel closed before response".to_string(),
            )),
        }
    }

    /// Start the long-poll event pump for a session. Routes trickle events
    /// to their registered forwarders and everything else to transaction
    /// waiters.
    async fn start_event_pump(&self, session: RelaySessionId) {
        let base_url = self.base_url.clone();
        let api_secret = self.api_secret.clone();
        let http = self.http.clone();
        let inner = Arc::clone(&self.inner);

        let pump = tokio::spawn(async move {
            loop {
                let mut url = format!("{}/{}?maxev=1", base_url, session.0);
                if let Some(secret) = &api_secret {
                    url.push_str(&format!("&apisecret={}", secret));
                }

                let event = match http.get(&url).send().await {
                    Ok(response) => match response.json::<Value>().await {
                        Ok(event) => event,
                        Err(e) => {
                            tracing::warn!(
                                "Relay session {} event decode failed: {}",
                                session.0,
                                e
                            );
                            continue;
                        }
                    },
                    Err(e) => {
                        tracing::warn!("Relay session {} poll failed: {}", session.0, e);
                        break;
                    }
                };

                match event["janus"].as_str() {
                    Some("keepalive") => {}
                    Some("trickle") => {
                        let handle = event["sender"].as_u64().unwrap_or(0);
                        let candidate = event["candidate"].clone();
                        let inner = inner.lock().await;
                        if let Some(forward) = inner.trickle_routes.get(&(session.0, handle)) {
                            let _ = forward.send(candidate);
                        }
                    }
                    _ => {
                        if let Some(transaction) = event["transaction"].as_str() {
                            let waiter =
                                inner.lock().await.waiters.remove(transaction);
                            if let Some(waiter) = waiter {
                                let _ = waiter.send(event);
                            }
                        }
                    }
                }
            }
        });

        self.inner.lock().await.pumps.insert(session.0, pump);
    }

    async fn attach_handle(&self, session: RelaySessionId) -> Result<RelayHandleId, RelayError> {
        let response = self
            .post(
                &format!("/{}", session.0),
                json!({
                    "janus": "attach",
                    "plugin": "janus.plugin.videoroom",
                    "transaction": self.next_transaction(),
                }),
            )
            .await?;
        let id = response["data"]["id"]
            .as_u64()
            .ok_or_else(|| RelayError::Protocol("attach response without handle id".into()))?;
        Ok(RelayHandleId(id))
    }
}

#[async_trait]
impl RelayClient for HttpRelayClient {
    async fn ensure_connected(&self) -> Result<(), RelayError> {
        if self.connected.load(Ordering::Relaxed) {
            return Ok(());
        }
        let url = format!("{}/info", self.base_url);
        self.http.get(&url).send().await?.error_for_status()?;
        self.connected.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn create_session(&self) -> Result<RelaySessionId, RelayError> {
        let response = self
            .post(
                "",
                json!({ "janus": "create", "transaction": self.next_transaction() }),
            )
            .await?;
        let id = response["data"]["id"]
            .as_u64()
            .ok_or_else(|| RelayError::Protocol("create response without session id".into()))?;
        let session = RelaySessionId(id);
        self.start_event_pump(session).await;
        Ok(session)
    }

    async fn destroy_session(&self, session: RelaySessionId) -> Result<(), RelayError> {
        let result = self
            .post(
                &format!("/{}", session.0),
                json!({ "janus": "destroy", "transaction": self.next_transaction() }),
            )
            .await;

        let mut inner = self.inner.lock().await;
        if let Some(pump) = inner.pumps.remove(&session.0) {
            pump.abort();
        }
        inner
            .trickle_routes
            .retain(|(session_id, _), _| *session_id != session.0);

        result.map(|_| ())
    }

    async fn create_room(
        &self,
        session: RelaySessionId,
        room: i64,
        publishers: u32,
    ) -> Result<(), RelayError> {
        let handle = self.attach_handle(session).await?;
        let result = self
            .message_and_wait(
                session,
                handle,
                json!({ "request": "create", "room": room, "publishers": publishers }),
                None,
            )
            .await;
        // The creating handle is only needed for this one request.
        let _ = self.detach(session, handle).await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.is_room_exists() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn destroy_room(
        &self,
        session: RelaySessionId,
        handle: RelayHandleId,
        room: i64,
    ) -> Result<(), RelayError> {
        self.message_and_wait(
            session,
            handle,
            json!({ "request": "destroy", "room": room }),
            None,
        )
        .await
        .map(|_| ())
    }

    async fn publish_feed(
        &self,
        session: RelaySessionId,
        room: i64,
        offer: Value,
    ) -> Result<PublishedFeed, RelayError> {
        let handle = self.attach_handle(session).await?;
        let event = self
            .message_and_wait(
                session,
                handle,
                json!({
                    "request": "joinandconfigure",
                    "ptype": "publisher",
                    "room": room,
                }),
                Some(offer),
            )
            .await?;

        let feed_id = event["plugindata"]["data"]["id"]
            .as_u64()
            .ok_or_else(|| RelayError::Protocol("publish event without feed id".into()))?;
        let answer = event["jsep"].clone();
        if answer.is_null() {
            return Err(RelayError::Protocol("publish event without answer".into()));
        }

        Ok(PublishedFeed {
            handle,
            feed_id,
            answer,
        })
    }

    async fn listen_feed(
        &self,
        session: RelaySessionId,
        room: i64,
        feed_id: u64,
    ) -> Result<ListenedFeed, RelayError> {
        let handle = self.attach_handle(session).await?;
        let event = self
            .message_and_wait(
                session,
                handle,
                json!({
                    "request": "join",
                    "ptype": "subscriber",
                    "room": room,
                    "feed": feed_id,
                }),
                None,
            )
            .await?;

        let offer = event["jsep"].clone();
        if offer.is_null() {
            return Err(RelayError::Protocol("listen event without offer".into()));
        }

        Ok(ListenedFeed { handle, offer })
    }

    async fn detach(
        &self,
        session: RelaySessionId,
        handle: RelayHandleId,
    ) -> Result<(), RelayError> {
        self.inner
            .lock()
            .await
            .trickle_routes
            .remove(&(session.0, handle.0));
        self.post(
            &format!("/{}/{}", session.0, handle.0),
            json!({ "janus": "detach", "transaction": self.next_transaction() }),
        )
        .await
        .map(|_| ())
    }

    async fn set_remote_answer(
        &self,
        session: RelaySessionId,
        handle: RelayHandleId,
        answer: Value,
    ) -> Result<(), RelayError> {
        self.message_and_wait(
            session,
            handle,
            json!({ "request": "start" }),
            Some(answer),
        )
        .await
        .map(|_| ())
    }

    async fn trickle(
        &self,
        session: RelaySessionId,
        handle: RelayHandleId,
        candidate: Value,
    ) -> Result<(), RelayError> {
        self.post(
            &format!("/{}/{}", session.0, handle.0),
            json!({
                "janus": "trickle",
                "transaction": self.next_transaction(),
                "candidate": candidate,
            }),
        )
        .await
        .map(|_| ())
    }

    async fn trickle_completed(
        &self,
        session: RelaySessionId,
        handle: RelayHandleId,
    ) -> Result<(), RelayError> {
        self.post(
            &format!("/{}/{}", session.0, handle.0),
            json!({
                "janus": "trickle",
                "transaction": self.next_transaction(),
                "candidate": { "completed": true },
            }),
        )
        .await
        .map(|_| ())
    }

    fn on_trickle(
        &self,
        session: RelaySessionId,
        handle: RelayHandleId,
        forward: mpsc::UnboundedSender<Value>,
    ) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner
                .lock()
                .await
                .trickle_routes
                .insert((session.0, handle.0), forward);
        });
    }
}

/// Map a relay error payload (top-level or plugin-level) to `RelayError`.
fn check_relay_error(response: &Value) -> Result<(), RelayError> {
    if response["janus"] == "error" {
        return Err(RelayError::Api {
            code: response["error"]["code"].as_i64().unwrap_or(0),
            reason: response["error"]["reason"]
                .as_str()
                .unwrap_or("unknown")
                .to_string(),
        });
    }
    let plugin_data = &response["plugindata"]["data"];
    if let Some(code) = plugin_data["error_code"].as_i64() {
        return Err(RelayError::Api {
            code,
            reason: plugin_data["error"].as_str().unwrap_or("unknown").to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_exists_error_is_tolerated() {
        let error = RelayError::Api {
            code: RELAY_ROOM_EXISTS_CODE,
            reason: "Room already exists".to_string(),
        };
        assert!(error.is_room_exists());

        let other = RelayError::Api {
            code: 426,
            reason: "No such room".to_string(),
        };
        assert!(!other.is_room_exists());
    }

    #[test]
    fn test_fatal_plugin_failure_pattern_is_recognized() {
        let fatal = RelayError::Api {
            code: -1,
            reason: "Couldn't attach to plugin: error '-1'".to_string(),
        };
        assert!(fatal.is_fatal_plugin_failure());

        let benign = RelayError::Transport("connection refused".to_string());
        assert!(!benign.is_fatal_plugin_failure());
    }

    #[test]
    fn test_check_relay_error_reads_both_error_shapes() {
        let top_level = serde_json::json!({
            "janus": "error",
            "error": { "code": 458, "reason": "No such session" }
        });
        assert!(matches!(
            check_relay_error(&top_level),
            Err(RelayError::Api { code: 458, .. })
        ));

        let plugin_level = serde_json::json!({
            "janus": "event",
            "plugindata": { "data": { "error_code": 427, "error": "Room exists" } }
        });
        let error = check_relay_error(&plugin_level).unwrap_err();
        assert!(error.is_room_exists());

        let ok = serde_json::json!({ "janus": "success", "data": { "id": 1 } });
        assert!(check_relay_error(&ok).is_ok());
    }
}
