use std::sync::Arc;

use serde::Serialize;

use crate::models::{
    Advisor, Conversation, Document, FeaturePreferences, Message, Notification, Settings,
    UsageSnapshot,
};

/// The whole client state.
///
/// Every slice sits behind an `Arc`; a transition clones the top-level struct
/// and only reallocates the slices it touches, so unchanged slices stay
/// pointer-equal to the previous state.
#[derive(Debug, Clone, PartialEq)]
pub struct AppState {
    pub documents: Arc<Vec<Document>>,
    pub selected_document: Option<String>,
    pub documents_loading: bool,

    pub advisors: Arc<Vec<Advisor>>,
    /// Selection is kept as ids and resolved against `advisors` on read.
    pub selected_advisor_ids: Arc<Vec<String>>,
    pub advisors_loading: bool,

    pub conversations: Arc<Vec<Conversation>>,
    pub active_conversation_id: Option<String>,
    /// Mirror of the active conversation's messages. Without an active
    /// conversation it holds the unsaved chat.
    pub conversation_messages: Arc<Vec<Message>>,
    pub conversations_loading: bool,

    pub is_meeting_active: bool,
    pub meeting_messages: Arc<Vec<Message>>,
    pub meeting_document_ids: Arc<Vec<String>>,

    pub notifications: Arc<Vec<Notification>>,
    pub last_notification_id: u64,

    pub settings: Arc<Settings>,
    pub feature_preferences: Arc<FeaturePreferences>,
    pub usage: Arc<UsageSnapshot>,
}

impl Default for AppState {
    fn default() -> Self {
        Self::initial()
    }
}

impl AppState {
    pub fn initial() -> Self {
        Self {
            documents: Arc::default(),
            selected_document: None,
            documents_loading: true,
            advisors: Arc::default(),
            selected_advisor_ids: Arc::default(),
            advisors_loading: true,
            conversations: Arc::default(),
            active_conversation_id: None,
            conversation_messages: Arc::default(),
            conversations_loading: true,
            is_meeting_active: false,
            meeting_messages: Arc::default(),
            meeting_document_ids: Arc::default(),
            notifications: Arc::default(),
            last_notification_id: 0,
            settings: Arc::new(Settings::default()),
            feature_preferences: Arc::default(),
            usage: Arc::default(),
        }
    }

    pub fn document(&self, id: &str) -> Option<&Document> {
        self.documents.iter().find(|document| document.id == id)
    }

    pub fn advisor(&self, id: &str) -> Option<&Advisor> {
        self.advisors.iter().find(|advisor| advisor.id == id)
    }

    pub fn conversation(&self, id: &str) -> Option<&Conversation> {
        self.conversations
            .iter()
            .find(|conversation| conversation.id == id)
    }

    pub fn selected_document(&self) -> Option<&Document> {
        self.selected_document
            .as_deref()
            .and_then(|id| self.document(id))
    }

    pub fn active_conversation(&self) -> Option<&Conversation> {
        self.active_conversation_id
            .as_deref()
            .and_then(|id| self.conversation(id))
    }

    /// Selected advisors in selection order, skipping ids no longer on the roster.
    pub fn selected_advisors(&self) -> Vec<&Advisor> {
        self.selected_advisor_ids
            .iter()
            .filter_map(|id| self.advisor(id))
            .collect()
    }

    pub fn meeting_documents(&self) -> Vec<&Document> {
        self.meeting_document_ids
            .iter()
            .filter_map(|id| self.document(id))
            .collect()
    }

    pub fn is_loading(&self) -> bool {
        self.documents_loading || self.advisors_loading || self.conversations_loading
    }

    pub fn snapshot(&self) -> StateSnapshot<'_> {
        StateSnapshot {
            documents: &self.documents,
            selected_document: self.selected_document(),
            documents_loading: self.documents_loading,
            advisors: &self.advisors,
            selected_advisors: self.selected_advisors(),
            advisors_loading: self.advisors_loading,
            conversations: &self.conversations,
            active_conversation: self.active_conversation(),
            conversation_messages: &self.conversation_messages,
            conversations_loading: self.conversations_loading,
            is_meeting_active: self.is_meeting_active,
            meeting_messages: &self.meeting_messages,
            meeting_documents: self.meeting_documents(),
            notifications: &self.notifications,
            settings: &self.settings,
            feature_preferences: &self.feature_preferences,
            usage: &self.usage,
        }
    }
}

/// Read-only, serializable view handed to hosts.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot<'a> {
    pub documents: &'a [Document],
    pub selected_document: Option<&'a Document>,
    pub documents_loading: bool,
    pub advisors: &'a [Advisor],
    pub selected_advisors: Vec<&'a Advisor>,
    pub advisors_loading: bool,
    pub conversations: &'a [Conversation],
    pub active_conversation: Option<&'a Conversation>,
    pub conversation_messages: &'a [Message],
    pub conversations_loading: bool,
    pub is_meeting_active: bool,
    pub meeting_messages: &'a [Message],
    pub meeting_documents: Vec<&'a Document>,
    pub notifications: &'a [Notification],
    pub settings: &'a Settings,
    pub feature_preferences: &'a FeaturePreferences,
    pub usage: &'a UsageSnapshot,
}
