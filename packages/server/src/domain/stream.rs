//! Per-room stream slots for the WebRTC signaling orchestrator.

use crate::infrastructure::relay::{RelayHandleId, RelaySessionId};

/// Options the publisher picked when requesting the slot.
#[derive(Debug, Clone, Copy)]
pub struct StreamOptions {
    pub with_video: bool,
    pub with_sound: bool,
    pub is_private_stream: bool,
}

/// One end of a stream bound to a relay handle: the publisher or a listener.
#[derive(Debug, Clone)]
pub struct StreamParticipant {
    pub user_id: String,
    pub relay_handle: Option<RelayHandleId>,
    /// The relay-assigned feed identifier; set only on the publisher once
    /// the relay has accepted the published media.
    pub feed_id: Option<u64>,
}

impl StreamParticipant {
    pub fn new(user_id: String) -> Self {
        Self {
            user_id,
            relay_handle: None,
            feed_id: None,
        }
    }
}

/// A fixed per-room channel that can host at most one publisher and many
/// listeners.
///
/// `stream_id` is a generation counter: it is incremented every time the
/// slot leaves `Idle`, and any asynchronous relay continuation must capture
/// it and re-check it (together with `is_active`) before applying its
/// effect. A mismatch means the slot was reused or torn down while the
/// relay round-trip was in flight.
#[derive(Debug)]
pub struct StreamSlot {
    pub stream_id: u64,
    pub is_active: bool,
    pub is_ready: bool,
    pub with_video: Option<bool>,
    pub with_sound: Option<bool>,
    pub is_private_stream: Option<bool>,
    pub relay_server_id: Option<String>,
    pub relay_session: Option<RelaySessionId>,
    pub relay_room_name: String,
    pub relay_room_int: i64,
    pub publisher: Option<StreamParticipant>,
    pub listeners: Vec<StreamParticipant>,
}

impl StreamSlot {
    pub fn new(relay_room_name: String, relay_room_int: i64) -> Self {
        Self {
            stream_id: 0,
            is_active: false,
            is_ready: false,
            with_video: None,
            with_sound: None,
            is_private_stream: None,
            relay_server_id: None,
            relay_session: None,
            relay_room_name,
            relay_room_int,
            publisher: None,
            listeners: Vec::new(),
        }
    }

    /// A slot is taken iff it is active and has a publisher.
    pub fn is_taken(&self) -> bool {
        self.is_active && self.publisher.is_some()
    }

    /// Start a new stream generation for `user_id`. Returns the generation
    /// value that pending asynchronous continuations must capture.
    pub fn begin(&mut self, user_id: String, options: StreamOptions) -> u64 {
        self.stream_id += 1;
        self.is_active = true;
        self.is_ready = false;
        self.relay_server_id = None;
        self.relay_session = None;
        self.with_video = Some(options.with_video);
        self.with_sound = Some(options.with_sound);
        self.is_private_stream = Some(options.is_private_stream);
        self.publisher = Some(StreamParticipant::new(user_id));
        self.listeners.clear();
        self.stream_id
    }

    /// Reset the slot back to `Idle`. Does not touch the generation
    /// counter, so in-flight continuations from the old generation still
    /// fail their re-validation.
    pub fn reset(&mut self) {
        self.is_active = false;
        self.is_ready = false;
        self.with_video = None;
        self.with_sound = None;
        self.is_private_stream = None;
        self.relay_server_id = None;
        self.relay_session = None;
        self.publisher = None;
        self.listeners.clear();
    }

    /// Whether `user_id` currently owns this slot as publisher.
    pub fn is_published_by(&self, user_id: &str) -> bool {
        self.publisher
            .as_ref()
            .is_some_and(|p| p.user_id == user_id)
    }
}
