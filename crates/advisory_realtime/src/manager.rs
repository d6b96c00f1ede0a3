use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, Weak,
    },
};

use serde_json::{json, Value};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::RealtimeError,
    presence::{PresenceEntry, PresenceSet},
    protocol::{
        access_token_frame, broadcast_frame, events, join_frame, leave_frame,
        parse_broadcast, parse_reply, parse_row_change, track_frame, ChangeKind, Frame, Reply,
        RowChange, PHOENIX_TOPIC,
    },
    scope::Scope,
    transport::Transport,
};

pub type RowCallback = Arc<dyn Fn(&Value) + Send + Sync>;
pub type PresenceCallback = Arc<dyn Fn(&[PresenceEntry]) + Send + Sync>;
pub type BroadcastCallback = Arc<dyn Fn(&str, &Value) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&RealtimeError) + Send + Sync>;

/// The current user as published into presence.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
    connection_id: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: None,
            avatar: None,
            connection_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_avatar(mut self, avatar: impl Into<String>) -> Self {
        self.avatar = Some(avatar.into());
        self
    }

    fn presence_record(&self) -> Value {
        json!({
            "userId": self.user_id,
            "name": self.display_name,
            "avatar": self.avatar,
            "connectionId": self.connection_id,
            "onlineAt": chrono::Utc::now().to_rfc3339(),
        })
    }
}

/// Callbacks for one channel. Only the ones relevant to the scope are used:
/// conversation scopes route `messages` inserts to `on_message` and
/// `conversations` updates to `on_conversation_update`; document scopes route
/// by change kind; meeting scopes use `on_message`; usage scopes `on_usage`.
#[derive(Clone, Default)]
pub struct ChannelCallbacks {
    on_message: Option<RowCallback>,
    on_conversation_update: Option<RowCallback>,
    on_document_added: Option<RowCallback>,
    on_document_updated: Option<RowCallback>,
    on_document_deleted: Option<RowCallback>,
    on_usage: Option<RowCallback>,
    on_presence_sync: Option<PresenceCallback>,
    on_join: Option<PresenceCallback>,
    on_leave: Option<PresenceCallback>,
    on_broadcast: Option<BroadcastCallback>,
    on_error: Option<ErrorCallback>,
}

macro_rules! callback_setter {
    ($name:ident, $ty:ty, $($arg:ty),*) => {
        pub fn $name<F>(mut self, callback: F) -> Self
        where
            F: Fn($($arg),*) + Send + Sync + 'static,
        {
            self.$name = Some(Arc::new(callback) as $ty);
            self
        }
    };
}

impl ChannelCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    callback_setter!(on_message, RowCallback, &Value);
    callback_setter!(on_conversation_update, RowCallback, &Value);
    callback_setter!(on_document_added, RowCallback, &Value);
    callback_setter!(on_document_updated, RowCallback, &Value);
    callback_setter!(on_document_deleted, RowCallback, &Value);
    callback_setter!(on_usage, RowCallback, &Value);
    callback_setter!(on_presence_sync, PresenceCallback, &[PresenceEntry]);
    callback_setter!(on_join, PresenceCallback, &[PresenceEntry]);
    callback_setter!(on_leave, PresenceCallback, &[PresenceEntry]);
    callback_setter!(on_broadcast, BroadcastCallback, &str, &Value);
    callback_setter!(on_error, ErrorCallback, &RealtimeError);

    fn row_callback(&self, scope: &Scope, change: &RowChange) -> Option<&RowCallback> {
        match (scope, change.table.as_str(), change.kind) {
            (Scope::Conversation(_), "messages", ChangeKind::Insert) => self.on_message.as_ref(),
            (Scope::Conversation(_), "conversations", ChangeKind::Update) => {
                self.on_conversation_update.as_ref()
            }
            (Scope::Documents(_), "documents", ChangeKind::Insert) => self.on_document_added.as_ref(),
            (Scope::Documents(_), "documents", ChangeKind::Update) => {
                self.on_document_updated.as_ref()
            }
            (Scope::Documents(_), "documents", ChangeKind::Delete) => {
                self.on_document_deleted.as_ref()
            }
            (Scope::Meeting(_), "meeting_messages", ChangeKind::Insert) => self.on_message.as_ref(),
            (Scope::Usage(_), "usage_events", ChangeKind::Insert | ChangeKind::Update) => {
                self.on_usage.as_ref()
            }
            _ => None,
        }
    }
}

struct Channel {
    scope: Scope,
    generation: u64,
    join_ref: String,
    joined: bool,
    callbacks: ChannelCallbacks,
    presence: PresenceSet,
    last_seq: Option<u64>,
}

/// Work decided under the channel lock and run after it is released, so
/// callbacks may call back into the manager.
enum Delivery {
    Row(RowCallback, Value),
    Presence(PresenceCallback, Vec<PresenceEntry>),
    Broadcast(BroadcastCallback, String, Value),
    Error(Option<ErrorCallback>, RealtimeError),
}

impl Delivery {
    fn run(self) {
        match self {
            Self::Row(callback, row) => callback(&row),
            Self::Presence(callback, entries) => callback(&entries),
            Self::Broadcast(callback, event, payload) => callback(&event, &payload),
            Self::Error(Some(callback), error) => callback(&error),
            Self::Error(None, error) => warn!(error = %error, "realtime error with no handler"),
        }
    }
}

struct ManagerInner {
    transport: Arc<dyn Transport>,
    identity: Identity,
    channels: Mutex<HashMap<String, Channel>>,
    next_ref: AtomicU64,
    next_generation: AtomicU64,
    access_token: Mutex<Option<String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ManagerInner {
    fn next_ref(&self) -> String {
        self.next_ref.fetch_add(1, Ordering::Relaxed).to_string()
    }

    fn send_leave(&self, topic: &str) {
        if let Err(error) = self.transport.send(leave_frame(topic, &self.next_ref())) {
            debug!(topic, error = %error, "leave not sent");
        }
    }

    fn unsubscribe(&self, topic: &str, generation: u64) -> bool {
        let removed = {
            let mut channels = lock(&self.channels);
            let current = channels
                .get(topic)
                .is_some_and(|channel| channel.generation == generation);
            if current {
                channels.remove(topic)
            } else {
                None
            }
        };
        match removed {
            Some(_) => {
                self.send_leave(topic);
                debug!(topic, generation, "channel unsubscribed");
                true
            }
            None => false,
        }
    }
}

/// Owns every open realtime channel. Cheap to clone; clones share channels.
#[derive(Clone)]
pub struct RealtimeManager {
    inner: Arc<ManagerInner>,
}

impl RealtimeManager {
    pub fn new(transport: Arc<dyn Transport>, identity: Identity) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                transport,
                identity,
                channels: Mutex::new(HashMap::new()),
                next_ref: AtomicU64::new(1),
                next_generation: AtomicU64::new(1),
                access_token: Mutex::new(None),
            }),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.inner.identity
    }

    pub fn subscribe_to_conversation(
        &self,
        conversation_id: &str,
        callbacks: ChannelCallbacks,
    ) -> Result<Subscription, RealtimeError> {
        self.subscribe(Scope::Conversation(conversation_id.to_string()), callbacks)
    }

    pub fn subscribe_to_documents(
        &self,
        user_id: &str,
        callbacks: ChannelCallbacks,
    ) -> Result<Subscription, RealtimeError> {
        self.subscribe(Scope::Documents(user_id.to_string()), callbacks)
    }

    pub fn subscribe_to_meeting(
        &self,
        meeting_id: &str,
        callbacks: ChannelCallbacks,
    ) -> Result<Subscription, RealtimeError> {
        self.subscribe(Scope::Meeting(meeting_id.to_string()), callbacks)
    }

    pub fn subscribe_to_usage(
        &self,
        user_id: &str,
        callbacks: ChannelCallbacks,
    ) -> Result<Subscription, RealtimeError> {
        self.subscribe(Scope::Usage(user_id.to_string()), callbacks)
    }

    /// Opens a channel for `scope`. An existing channel with the same name is
    /// torn down first, so events are never delivered twice.
    pub fn subscribe(
        &self,
        scope: Scope,
        callbacks: ChannelCallbacks,
    ) -> Result<Subscription, RealtimeError> {
        let inner = &self.inner;
        let topic = scope.topic();

        let previous = lock(&inner.channels).remove(&topic);
        if let Some(previous) = previous {
            debug!(topic = %topic, generation = previous.generation, "replacing open channel");
            inner.send_leave(&topic);
        }

        let join_ref = inner.next_ref();
        let presence_key = if scope.tracks_presence() {
            inner.identity.user_id.as_str()
        } else {
            ""
        };
        let access_token = lock(&inner.access_token).clone();
        let frame = join_frame(
            &topic,
            &join_ref,
            &scope.postgres_changes(),
            presence_key,
            access_token.as_deref(),
        );
        inner.transport.send(frame).map_err(|error| match error {
            RealtimeError::TransportClosed => RealtimeError::Send {
                topic: topic.clone(),
                reason: "transport is closed".to_string(),
            },
            other => other,
        })?;

        let generation = inner.next_generation.fetch_add(1, Ordering::Relaxed);
        lock(&inner.channels).insert(
            topic.clone(),
            Channel {
                scope,
                generation,
                join_ref,
                joined: false,
                callbacks,
                presence: PresenceSet::new(),
                last_seq: None,
            },
        );
        info!(topic = %topic, generation, "channel join sent");

        Ok(Subscription {
            manager: Arc::downgrade(inner),
            topic,
            generation,
        })
    }

    /// Closes every channel (sign-out). Returns how many were open.
    pub fn unsubscribe_all(&self) -> usize {
        let drained: Vec<String> = lock(&self.inner.channels).drain().map(|(topic, _)| topic).collect();
        for topic in &drained {
            self.inner.send_leave(topic);
        }
        info!(count = drained.len(), "all realtime channels closed");
        drained.len()
    }

    pub fn is_subscribed(&self, scope: &Scope) -> bool {
        lock(&self.inner.channels).contains_key(&scope.topic())
    }

    pub fn is_joined(&self, scope: &Scope) -> bool {
        lock(&self.inner.channels)
            .get(&scope.topic())
            .is_some_and(|channel| channel.joined)
    }

    pub fn channel_count(&self) -> usize {
        lock(&self.inner.channels).len()
    }

    pub fn presence(&self, scope: &Scope) -> Vec<PresenceEntry> {
        lock(&self.inner.channels)
            .get(&scope.topic())
            .map(|channel| channel.presence.entries())
            .unwrap_or_default()
    }

    /// Publishes an ephemeral message on an open channel. Returns `false`
    /// without queuing when the channel is not joined.
    pub fn broadcast(&self, scope: &Scope, event: &str, payload: Value) -> bool {
        let topic = scope.topic();
        let joined = lock(&self.inner.channels)
            .get(&topic)
            .is_some_and(|channel| channel.joined);
        if !joined {
            debug!(topic = %topic, event, "broadcast skipped, channel not open");
            return false;
        }

        let frame = broadcast_frame(&topic, &self.inner.next_ref(), event, payload);
        match self.inner.transport.send(frame) {
            Ok(()) => true,
            Err(error) => {
                debug!(topic = %topic, error = %error, "broadcast not sent");
                false
            }
        }
    }

    pub fn broadcast_cursor(&self, scope: &Scope, x: f64, y: f64) -> bool {
        self.broadcast(
            scope,
            "cursor",
            json!({ "userId": self.inner.identity.user_id, "x": x, "y": y }),
        )
    }

    pub fn broadcast_voice_activity(&self, scope: &Scope, speaking: bool, level: f32) -> bool {
        self.broadcast(
            scope,
            "voice_activity",
            json!({ "userId": self.inner.identity.user_id, "speaking": speaking, "level": level }),
        )
    }

    /// Refreshes the auth token on every joined channel and for later joins.
    pub fn set_access_token(&self, token: impl Into<String>) {
        let token = token.into();
        *lock(&self.inner.access_token) = Some(token.clone());

        let topics: Vec<String> = lock(&self.inner.channels)
            .iter()
            .filter(|(_, channel)| channel.joined)
            .map(|(topic, _)| topic.clone())
            .collect();
        for topic in topics {
            let frame = access_token_frame(&topic, &self.inner.next_ref(), &token);
            if let Err(error) = self.inner.transport.send(frame) {
                warn!(topic = %topic, error = %error, "access token refresh not sent");
            }
        }
    }

    /// Routes one inbound frame to the callbacks of the channel it belongs to.
    /// Frames for channels that are no longer open are dropped.
    pub fn handle_frame(&self, frame: Frame) {
        let deliveries = if frame.topic == PHOENIX_TOPIC {
            self.connection_frame(&frame)
        } else {
            self.channel_frame(frame)
        };
        for delivery in deliveries {
            delivery.run();
        }
    }

    /// Feeds frames from a transport receiver into `handle_frame` until the
    /// receiver closes.
    pub fn spawn_pump(&self, mut inbound: mpsc::Receiver<Frame>) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            while let Some(frame) = inbound.recv().await {
                manager.handle_frame(frame);
            }
            debug!("realtime inbound stream ended");
        })
    }

    fn connection_frame(&self, frame: &Frame) -> Vec<Delivery> {
        if frame.event != events::CLOSE && frame.event != events::ERROR {
            return Vec::new();
        }

        let mut channels = lock(&self.inner.channels);
        channels
            .values_mut()
            .map(|channel| {
                channel.joined = false;
                Delivery::Error(channel.callbacks.on_error.clone(), RealtimeError::TransportClosed)
            })
            .collect()
    }

    fn channel_frame(&self, frame: Frame) -> Vec<Delivery> {
        let inner = &self.inner;
        let mut channels = lock(&inner.channels);
        let Some(channel) = channels.get_mut(&frame.topic) else {
            debug!(topic = %frame.topic, event = %frame.event, "frame for closed channel dropped");
            return Vec::new();
        };
        let callbacks = channel.callbacks.clone();
        let malformed = |reason: String| {
            vec![Delivery::Error(
                callbacks.on_error.clone(),
                RealtimeError::Malformed {
                    topic: frame.topic.clone(),
                    event: frame.event.clone(),
                    reason,
                },
            )]
        };

        match frame.event.as_str() {
            events::REPLY => {
                if frame.reference.as_deref() != Some(channel.join_ref.as_str()) {
                    return Vec::new();
                }
                match parse_reply(&frame.payload) {
                    Ok(Reply::Ok(_)) => {
                        channel.joined = true;
                        info!(topic = %frame.topic, "channel joined");
                        if channel.scope.tracks_presence() {
                            let track = track_frame(
                                &frame.topic,
                                &inner.next_ref(),
                                inner.identity.presence_record(),
                            );
                            if let Err(error) = inner.transport.send(track) {
                                warn!(topic = %frame.topic, error = %error, "presence track not sent");
                            }
                        }
                        Vec::new()
                    }
                    Ok(Reply::Error(response)) => {
                        let reason = response
                            .get("reason")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                            .unwrap_or_else(|| response.to_string());
                        channels.remove(&frame.topic);
                        vec![Delivery::Error(
                            callbacks.on_error.clone(),
                            RealtimeError::JoinRejected {
                                topic: frame.topic.clone(),
                                reason,
                            },
                        )]
                    }
                    Err(reason) => malformed(reason),
                }
            }

            events::POSTGRES_CHANGES => {
                let change = match parse_row_change(&frame.payload) {
                    Ok(change) => change,
                    Err(reason) => return malformed(reason),
                };
                if let Some(seq) = change.row().get("seq").and_then(Value::as_u64) {
                    if channel.last_seq.is_some_and(|last| seq <= last) {
                        debug!(topic = %frame.topic, seq, "stale row change dropped");
                        return Vec::new();
                    }
                    channel.last_seq = Some(seq);
                }
                match callbacks.row_callback(&channel.scope, &change) {
                    Some(callback) => vec![Delivery::Row(callback.clone(), change.row().clone())],
                    None => Vec::new(),
                }
            }

            events::PRESENCE_STATE => match channel.presence.sync(&frame.payload) {
                Ok(()) => callbacks
                    .on_presence_sync
                    .clone()
                    .map(|callback| vec![Delivery::Presence(callback, channel.presence.entries())])
                    .unwrap_or_default(),
                Err(reason) => malformed(reason),
            },

            events::PRESENCE_DIFF => match channel.presence.apply_diff(&frame.payload) {
                Ok((joined, left)) => {
                    let mut deliveries = Vec::new();
                    if let (Some(callback), false) = (callbacks.on_join.clone(), joined.is_empty()) {
                        deliveries.push(Delivery::Presence(callback, joined));
                    }
                    if let (Some(callback), false) = (callbacks.on_leave.clone(), left.is_empty()) {
                        deliveries.push(Delivery::Presence(callback, left));
                    }
                    if let Some(callback) = callbacks.on_presence_sync.clone() {
                        deliveries.push(Delivery::Presence(callback, channel.presence.entries()));
                    }
                    deliveries
                }
                Err(reason) => malformed(reason),
            },

            events::BROADCAST => match parse_broadcast(&frame.payload) {
                Ok((event, payload)) => callbacks
                    .on_broadcast
                    .clone()
                    .map(|callback| vec![Delivery::Broadcast(callback, event, payload)])
                    .unwrap_or_default(),
                Err(reason) => malformed(reason),
            },

            events::ERROR | events::CLOSE => {
                if frame
                    .reference
                    .as_deref()
                    .is_some_and(|reference| reference != channel.join_ref)
                {
                    return Vec::new();
                }
                channel.joined = false;
                let error = if frame.event == events::ERROR {
                    RealtimeError::ChannelError {
                        topic: frame.topic.clone(),
                    }
                } else {
                    RealtimeError::ChannelClosed {
                        topic: frame.topic.clone(),
                    }
                };
                warn!(error = %error, "channel lost");
                vec![Delivery::Error(callbacks.on_error.clone(), error)]
            }

            other => {
                debug!(topic = %frame.topic, event = other, "unhandled channel event");
                Vec::new()
            }
        }
    }
}

/// Returned by every `subscribe_to_*` call. Unsubscribing only closes the
/// channel this subscription opened; a later re-subscribe on the same scope is
/// left alone.
#[must_use = "keep the subscription to unsubscribe on teardown"]
#[derive(Debug)]
pub struct Subscription {
    manager: Weak<ManagerInner>,
    topic: String,
    generation: u64,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn unsubscribe(self) -> bool {
        match self.manager.upgrade() {
            Some(manager) => manager.unsubscribe(&self.topic, self.generation),
            None => false,
        }
    }
}
