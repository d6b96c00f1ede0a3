//! Channel wire format: JSON object frames `{topic, event, payload, ref}`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::scope::ChangeFilter;

pub const PHOENIX_TOPIC: &str = "phoenix";

pub mod events {
    pub const JOIN: &str = "phx_join";
    pub const LEAVE: &str = "phx_leave";
    pub const REPLY: &str = "phx_reply";
    pub const ERROR: &str = "phx_error";
    pub const CLOSE: &str = "phx_close";
    pub const HEARTBEAT: &str = "heartbeat";
    pub const POSTGRES_CHANGES: &str = "postgres_changes";
    pub const PRESENCE_STATE: &str = "presence_state";
    pub const PRESENCE_DIFF: &str = "presence_diff";
    pub const PRESENCE: &str = "presence";
    pub const BROADCAST: &str = "broadcast";
    pub const ACCESS_TOKEN: &str = "access_token";
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Frame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

impl Frame {
    pub fn new(topic: impl Into<String>, event: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            event: event.into(),
            payload,
            reference: None,
        }
    }

    pub fn with_ref(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

pub fn join_frame(
    topic: &str,
    join_ref: &str,
    filters: &[ChangeFilter],
    presence_key: &str,
    access_token: Option<&str>,
) -> Frame {
    let mut payload = json!({
        "config": {
            "broadcast": { "self": false, "ack": false },
            "presence": { "key": presence_key },
            "postgres_changes": filters,
            "private": false,
        }
    });
    if let Some(token) = access_token {
        payload["access_token"] = Value::String(token.to_string());
    }
    Frame::new(topic, events::JOIN, payload).with_ref(join_ref)
}

pub fn leave_frame(topic: &str, reference: &str) -> Frame {
    Frame::new(topic, events::LEAVE, json!({})).with_ref(reference)
}

pub fn track_frame(topic: &str, reference: &str, record: Value) -> Frame {
    Frame::new(
        topic,
        events::PRESENCE,
        json!({ "type": "presence", "event": "track", "payload": record }),
    )
    .with_ref(reference)
}

pub fn broadcast_frame(topic: &str, reference: &str, event: &str, payload: Value) -> Frame {
    Frame::new(
        topic,
        events::BROADCAST,
        json!({ "type": "broadcast", "event": event, "payload": payload }),
    )
    .with_ref(reference)
}

pub fn heartbeat_frame(reference: &str) -> Frame {
    Frame::new(PHOENIX_TOPIC, events::HEARTBEAT, json!({})).with_ref(reference)
}

pub fn access_token_frame(topic: &str, reference: &str, token: &str) -> Frame {
    Frame::new(topic, events::ACCESS_TOKEN, json!({ "access_token": token })).with_ref(reference)
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One row-level change from a `postgres_changes` event.
#[derive(Debug, Clone, PartialEq)]
pub struct RowChange {
    pub kind: ChangeKind,
    pub table: String,
    pub record: Value,
    pub old_record: Value,
    pub commit_timestamp: Option<String>,
}

impl RowChange {
    /// The row the change is about: the old row for deletes, the new one otherwise.
    pub fn row(&self) -> &Value {
        match self.kind {
            ChangeKind::Delete => &self.old_record,
            ChangeKind::Insert | ChangeKind::Update => &self.record,
        }
    }
}

pub fn parse_row_change(payload: &Value) -> Result<RowChange, String> {
    let data = payload.get("data").unwrap_or(payload);
    let kind = match data
        .get("type")
        .or_else(|| data.get("eventType"))
        .and_then(Value::as_str)
    {
        Some("INSERT") => ChangeKind::Insert,
        Some("UPDATE") => ChangeKind::Update,
        Some("DELETE") => ChangeKind::Delete,
        Some(other) => return Err(format!("unknown change type {other}")),
        None => return Err("missing change type".to_string()),
    };
    let table = data
        .get("table")
        .and_then(Value::as_str)
        .ok_or("missing table")?
        .to_string();

    let record = data.get("record").cloned().unwrap_or(Value::Null);
    let old_record = data.get("old_record").cloned().unwrap_or(Value::Null);
    let row = if kind == ChangeKind::Delete { &old_record } else { &record };
    if !row.is_object() {
        return Err(format!("{table} change carries no row"));
    }

    Ok(RowChange {
        kind,
        table,
        commit_timestamp: data
            .get("commit_timestamp")
            .and_then(Value::as_str)
            .map(str::to_string),
        record,
        old_record,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Ok(Value),
    Error(Value),
}

pub fn parse_reply(payload: &Value) -> Result<Reply, String> {
    let response = payload.get("response").cloned().unwrap_or(Value::Null);
    match payload.get("status").and_then(Value::as_str) {
        Some("ok") => Ok(Reply::Ok(response)),
        Some(_) => Ok(Reply::Error(response)),
        None => Err("reply without status".to_string()),
    }
}

/// Inbound broadcast: `{type: "broadcast", event, payload}`.
pub fn parse_broadcast(payload: &Value) -> Result<(String, Value), String> {
    let event = payload
        .get("event")
        .and_then(Value::as_str)
        .ok_or("broadcast without event name")?;
    Ok((
        event.to_string(),
        payload.get("payload").cloned().unwrap_or(Value::Null),
    ))
}
