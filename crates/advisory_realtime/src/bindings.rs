//! Scope bindings: subscribe a scope and turn its events into store actions.
//! Channel failures and undecodable rows become error notifications.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use advisory_core::{
    models::{
        ConversationPatch, Document, DocumentAnalysis, DocumentPatch, DocumentStatus, Message,
        MessageRole, NewNotification, NotificationKind, UsageSnapshot,
    },
    Action, Dispatcher,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    error::RealtimeError,
    manager::{ChannelCallbacks, RealtimeManager, Subscription},
};

/// Usage share of the token limit that triggers a one-time warning.
pub const USAGE_WARNING_THRESHOLD: f64 = 0.8;

#[derive(Debug, Deserialize)]
struct MessageRow {
    id: String,
    #[serde(default)]
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    advisor_id: Option<String>,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    seq: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct DocumentRow {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, alias = "type", alias = "mime_type")]
    file_type: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    status: Option<DocumentStatus>,
    #[serde(default)]
    analysis: Option<DocumentAnalysis>,
    #[serde(default)]
    created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConversationRow {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageRow {
    #[serde(default)]
    tokens_used: u64,
    #[serde(default)]
    request_count: u64,
    #[serde(default)]
    token_limit: Option<u64>,
    #[serde(default)]
    updated_at: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
}

fn role_from_column(role: &str) -> MessageRole {
    match role {
        "advisor" | "assistant" => MessageRole::Advisor,
        "system" => MessageRole::System,
        _ => MessageRole::User,
    }
}

pub fn message_from_row(row: &Value) -> Result<Message, serde_json::Error> {
    let row = MessageRow::deserialize(row)?;
    Ok(Message {
        id: row.id,
        role: role_from_column(&row.role),
        content: row.content,
        advisor_id: row.advisor_id,
        conversation_id: row.conversation_id,
        created_at: row.created_at,
        seq: row.seq,
    })
}

pub fn document_from_row(row: &Value) -> Result<Document, serde_json::Error> {
    let row = DocumentRow::deserialize(row)?;
    Ok(Document {
        id: row.id,
        name: row.name.unwrap_or_default(),
        mime_type: row.file_type.unwrap_or_default(),
        size: row.size.unwrap_or_default(),
        status: row.status.unwrap_or_default(),
        analysis: row.analysis,
        uploaded_at: row.created_at,
    })
}

pub fn document_patch_from_row(row: &Value) -> Result<DocumentPatch, serde_json::Error> {
    let row = DocumentRow::deserialize(row)?;
    Ok(DocumentPatch {
        id: row.id,
        name: row.name,
        mime_type: row.file_type,
        size: row.size,
        status: row.status,
        analysis: row.analysis,
    })
}

pub fn conversation_patch_from_row(row: &Value) -> Result<ConversationPatch, serde_json::Error> {
    let row = ConversationRow::deserialize(row)?;
    Ok(ConversationPatch {
        id: row.id,
        title: row.title,
        messages: None,
        updated_at: row.updated_at,
    })
}

pub fn usage_from_row(row: &Value) -> Result<UsageSnapshot, serde_json::Error> {
    let row = UsageRow::deserialize(row)?;
    Ok(UsageSnapshot {
        tokens_used: row.tokens_used,
        request_count: row.request_count,
        token_limit: row.token_limit,
        updated_at: row.updated_at.or(row.created_at),
    })
}

fn deliver(dispatcher: &dyn Dispatcher, action: Action) {
    let action_type = action.type_name();
    if let Err(error) = dispatcher.dispatch(action) {
        warn!(action = action_type, error = %error, "realtime event dropped, store unavailable");
    }
}

fn notify(dispatcher: &dyn Dispatcher, kind: NotificationKind, message: String) {
    deliver(dispatcher, Action::AddNotification(NewNotification::now(kind, message)));
}

/// Builds a row callback that decodes with `decode`, wraps the value with
/// `into_action` and dispatches it. Decode failures notify instead.
fn row_handler<T>(
    dispatcher: &Arc<dyn Dispatcher>,
    topic: String,
    entity: &'static str,
    decode: fn(&Value) -> Result<T, serde_json::Error>,
    into_action: fn(T) -> Action,
) -> impl Fn(&Value) + Send + Sync + 'static
where
    T: 'static,
{
    let dispatcher = dispatcher.clone();
    move |row: &Value| match decode(row) {
        Ok(value) => deliver(dispatcher.as_ref(), into_action(value)),
        Err(source) => {
            let error = RealtimeError::Decode {
                topic: topic.clone(),
                entity,
                reason: source.to_string(),
            };
            warn!(error = %error, "undecodable realtime row");
            notify(dispatcher.as_ref(), NotificationKind::Error, error.to_string());
        }
    }
}

fn error_handler(
    dispatcher: &Arc<dyn Dispatcher>,
    what: &'static str,
) -> impl Fn(&RealtimeError) + Send + Sync + 'static {
    let dispatcher = dispatcher.clone();
    move |error: &RealtimeError| {
        warn!(error = %error, "{what} updates interrupted");
        notify(
            dispatcher.as_ref(),
            NotificationKind::Error,
            format!("Live {what} updates stopped: {error}"),
        );
    }
}

pub fn bind_conversation(
    manager: &RealtimeManager,
    dispatcher: Arc<dyn Dispatcher>,
    conversation_id: &str,
) -> Result<Subscription, RealtimeError> {
    let topic = crate::Scope::Conversation(conversation_id.to_string()).topic();
    let callbacks = ChannelCallbacks::new()
        .on_message(row_handler(
            &dispatcher,
            topic.clone(),
            "message",
            message_from_row,
            Action::AddMessage,
        ))
        .on_conversation_update(row_handler(
            &dispatcher,
            topic,
            "conversation",
            conversation_patch_from_row,
            Action::UpdateConversation,
        ))
        .on_error(error_handler(&dispatcher, "conversation"));

    manager.subscribe_to_conversation(conversation_id, callbacks)
}

pub fn bind_documents(
    manager: &RealtimeManager,
    dispatcher: Arc<dyn Dispatcher>,
    user_id: &str,
) -> Result<Subscription, RealtimeError> {
    let topic = crate::Scope::Documents(user_id.to_string()).topic();
    let delete_dispatcher = dispatcher.clone();
    let delete_topic = topic.clone();

    let callbacks = ChannelCallbacks::new()
        .on_document_added(row_handler(
            &dispatcher,
            topic.clone(),
            "document",
            document_from_row,
            Action::AddDocument,
        ))
        .on_document_updated(row_handler(
            &dispatcher,
            topic,
            "document",
            document_patch_from_row,
            Action::UpdateDocument,
        ))
        .on_document_deleted(move |row| match row.get("id").and_then(Value::as_str) {
            Some(id) => deliver(delete_dispatcher.as_ref(), Action::DeleteDocument(id.to_string())),
            None => debug!(topic = %delete_topic, "document delete without id ignored"),
        })
        .on_error(error_handler(&dispatcher, "document"));

    manager.subscribe_to_documents(user_id, callbacks)
}

pub fn bind_meeting(
    manager: &RealtimeManager,
    dispatcher: Arc<dyn Dispatcher>,
    meeting_id: &str,
) -> Result<Subscription, RealtimeError> {
    let topic = crate::Scope::Meeting(meeting_id.to_string()).topic();
    let callbacks = ChannelCallbacks::new()
        .on_message(row_handler(
            &dispatcher,
            topic,
            "meeting message",
            message_from_row,
            Action::AddMeetingMessage,
        ))
        .on_error(error_handler(&dispatcher, "meeting"));

    manager.subscribe_to_meeting(meeting_id, callbacks)
}

pub fn bind_usage(
    manager: &RealtimeManager,
    dispatcher: Arc<dyn Dispatcher>,
    user_id: &str,
) -> Result<Subscription, RealtimeError> {
    let topic = crate::Scope::Usage(user_id.to_string()).topic();
    let warned = Arc::new(AtomicBool::new(false));
    let usage_dispatcher = dispatcher.clone();

    let callbacks = ChannelCallbacks::new()
        .on_usage(move |row| {
            let usage = match usage_from_row(row) {
                Ok(usage) => usage,
                Err(source) => {
                    let error = RealtimeError::Decode {
                        topic: topic.clone(),
                        entity: "usage",
                        reason: source.to_string(),
                    };
                    notify(usage_dispatcher.as_ref(), NotificationKind::Error, error.to_string());
                    return;
                }
            };

            let crossed = usage
                .utilization()
                .is_some_and(|share| share >= USAGE_WARNING_THRESHOLD);
            let percent = usage.utilization().map(|share| (share * 100.0).round());
            deliver(usage_dispatcher.as_ref(), Action::SetUsage(usage));

            // Re-arms once usage drops back under the threshold (a new period).
            if !crossed {
                warned.store(false, Ordering::SeqCst);
            } else if !warned.swap(true, Ordering::SeqCst) {
                notify(
                    usage_dispatcher.as_ref(),
                    NotificationKind::Warning,
                    format!(
                        "You have used {}% of your token limit",
                        percent.unwrap_or_default()
                    ),
                );
            }
        })
        .on_error(error_handler(&dispatcher, "usage"));

    manager.subscribe_to_usage(user_id, callbacks)
}
