use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::ActionDecodeError,
    models::{
        Advisor, AdvisorPatch, Conversation, ConversationPatch, Document, DocumentPatch,
        FeaturePreferences, Message, NewNotification, Settings, SettingsPatch, UsageSnapshot,
    },
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum LoadingSlice {
    Documents,
    Advisors,
    Conversations,
}

/// Externally supplied state fragment merged by `LOAD_USER_DATA`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct UserDataFragment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documents: Option<Vec<Document>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advisors: Option<Vec<Advisor>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversations: Option<Vec<Conversation>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Settings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_preferences: Option<FeaturePreferences>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageSnapshot>,
}

impl UserDataFragment {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Every state transition the store accepts.
///
/// On the wire an action is `{"type": "SET_DOCUMENTS", "payload": [...]}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    SetDocuments(Vec<Document>),
    AddDocument(Document),
    UpdateDocument(DocumentPatch),
    DeleteDocument(String),
    SelectDocument(Option<String>),

    SetAdvisors(Vec<Advisor>),
    AddAdvisor(Advisor),
    UpdateAdvisor(AdvisorPatch),
    DeleteAdvisor(String),
    SelectAdvisors(Vec<Advisor>),

    SetConversations(Vec<Conversation>),
    AddConversation(Conversation),
    UpdateConversation(ConversationPatch),
    DeleteConversation(String),
    SetActiveConversation(Option<String>),
    AddMessage(Message),

    StartMeeting,
    EndMeeting,
    AddMeetingMessage(Message),
    AttachMeetingDocument(String),
    DetachMeetingDocument(String),

    AddNotification(NewNotification),
    RemoveNotification(u64),
    ExpireNotifications(i64),

    UpdateSettings(SettingsPatch),
    SetFeaturePreference {
        feature: String,
        key: String,
        value: Value,
    },
    SetUsage(UsageSnapshot),
    SetLoading {
        slice: LoadingSlice,
        loading: bool,
    },

    ResetState,
    LoadUserData(UserDataFragment),
}

impl Action {
    pub const KNOWN_TYPES: &'static [&'static str] = &[
        "SET_DOCUMENTS",
        "ADD_DOCUMENT",
        "UPDATE_DOCUMENT",
        "DELETE_DOCUMENT",
        "SELECT_DOCUMENT",
        "SET_ADVISORS",
        "ADD_ADVISOR",
        "UPDATE_ADVISOR",
        "DELETE_ADVISOR",
        "SELECT_ADVISORS",
        "SET_CONVERSATIONS",
        "ADD_CONVERSATION",
        "UPDATE_CONVERSATION",
        "DELETE_CONVERSATION",
        "SET_ACTIVE_CONVERSATION",
        "ADD_MESSAGE",
        "START_MEETING",
        "END_MEETING",
        "ADD_MEETING_MESSAGE",
        "ATTACH_MEETING_DOCUMENT",
        "DETACH_MEETING_DOCUMENT",
        "ADD_NOTIFICATION",
        "REMOVE_NOTIFICATION",
        "EXPIRE_NOTIFICATIONS",
        "UPDATE_SETTINGS",
        "SET_FEATURE_PREFERENCE",
        "SET_USAGE",
        "SET_LOADING",
        "RESET_STATE",
        "LOAD_USER_DATA",
    ];

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::SetDocuments(_) => "SET_DOCUMENTS",
            Self::AddDocument(_) => "ADD_DOCUMENT",
            Self::UpdateDocument(_) => "UPDATE_DOCUMENT",
            Self::DeleteDocument(_) => "DELETE_DOCUMENT",
            Self::SelectDocument(_) => "SELECT_DOCUMENT",
            Self::SetAdvisors(_) => "SET_ADVISORS",
            Self::AddAdvisor(_) => "ADD_ADVISOR",
            Self::UpdateAdvisor(_) => "UPDATE_ADVISOR",
            Self::DeleteAdvisor(_) => "DELETE_ADVISOR",
            Self::SelectAdvisors(_) => "SELECT_ADVISORS",
            Self::SetConversations(_) => "SET_CONVERSATIONS",
            Self::AddConversation(_) => "ADD_CONVERSATION",
            Self::UpdateConversation(_) => "UPDATE_CONVERSATION",
            Self::DeleteConversation(_) => "DELETE_CONVERSATION",
            Self::SetActiveConversation(_) => "SET_ACTIVE_CONVERSATION",
            Self::AddMessage(_) => "ADD_MESSAGE",
            Self::StartMeeting => "START_MEETING",
            Self::EndMeeting => "END_MEETING",
            Self::AddMeetingMessage(_) => "ADD_MEETING_MESSAGE",
            Self::AttachMeetingDocument(_) => "ATTACH_MEETING_DOCUMENT",
            Self::DetachMeetingDocument(_) => "DETACH_MEETING_DOCUMENT",
            Self::AddNotification(_) => "ADD_NOTIFICATION",
            Self::RemoveNotification(_) => "REMOVE_NOTIFICATION",
            Self::ExpireNotifications(_) => "EXPIRE_NOTIFICATIONS",
            Self::UpdateSettings(_) => "UPDATE_SETTINGS",
            Self::SetFeaturePreference { .. } => "SET_FEATURE_PREFERENCE",
            Self::SetUsage(_) => "SET_USAGE",
            Self::SetLoading { .. } => "SET_LOADING",
            Self::ResetState => "RESET_STATE",
            Self::LoadUserData(_) => "LOAD_USER_DATA",
        }
    }

    /// Decodes a JSON action. An unrecognized `type` yields `Ok(None)` so the
    /// caller can treat it as a no-op; a known type with a bad payload is an error.
    pub fn decode(value: Value) -> Result<Option<Self>, ActionDecodeError> {
        let action_type = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ActionDecodeError::MissingType)?
            .to_string();

        if !Self::KNOWN_TYPES.contains(&action_type.as_str()) {
            return Ok(None);
        }

        serde_json::from_value(value)
            .map(Some)
            .map_err(|source| ActionDecodeError::InvalidPayload {
                action_type,
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentStatus, NotificationKind};
    use serde_json::json;

    fn samples() -> Vec<Action> {
        vec![
            Action::SetDocuments(Vec::new()),
            Action::AddDocument(Document::new("d1", "a.txt", DocumentStatus::Uploading)),
            Action::UpdateDocument(DocumentPatch {
                id: "d1".to_string(),
                ..DocumentPatch::default()
            }),
            Action::DeleteDocument("d1".to_string()),
            Action::SelectDocument(None),
            Action::SetAdvisors(Vec::new()),
            Action::AddAdvisor(Advisor::default()),
            Action::UpdateAdvisor(AdvisorPatch::default()),
            Action::DeleteAdvisor("a1".to_string()),
            Action::SelectAdvisors(Vec::new()),
            Action::SetConversations(Vec::new()),
            Action::AddConversation(Conversation::new("c1", "Q3 plan")),
            Action::UpdateConversation(ConversationPatch::default()),
            Action::DeleteConversation("c1".to_string()),
            Action::SetActiveConversation(Some("c1".to_string())),
            Action::AddMessage(Message::default()),
            Action::StartMeeting,
            Action::EndMeeting,
            Action::AddMeetingMessage(Message::default()),
            Action::AttachMeetingDocument("d1".to_string()),
            Action::DetachMeetingDocument("d1".to_string()),
            Action::AddNotification(NewNotification {
                message: "saved".to_string(),
                kind: NotificationKind::Success,
                created_at_ms: 1,
            }),
            Action::RemoveNotification(1),
            Action::ExpireNotifications(10),
            Action::UpdateSettings(SettingsPatch::default()),
            Action::SetFeaturePreference {
                feature: "voice".to_string(),
                key: "rate".to_string(),
                value: json!(1.2),
            },
            Action::SetUsage(UsageSnapshot::default()),
            Action::SetLoading {
                slice: LoadingSlice::Documents,
                loading: true,
            },
            Action::ResetState,
            Action::LoadUserData(UserDataFragment::default()),
        ]
    }

    #[test]
    fn wire_type_matches_type_name_for_every_variant() {
        let samples = samples();
        assert_eq!(samples.len(), Action::KNOWN_TYPES.len());

        for action in samples {
            let wire = serde_json::to_value(&action).unwrap();
            assert_eq!(wire["type"], json!(action.type_name()));
            assert!(Action::KNOWN_TYPES.contains(&action.type_name()));
        }
    }

    #[test]
    fn decode_unknown_type_is_a_noop() {
        let decoded = Action::decode(json!({ "type": "SET_THEME_COLOR", "payload": "red" })).unwrap();
        assert!(decoded.is_none());
    }

    #[test]
    fn decode_unit_variant_without_payload() {
        let decoded = Action::decode(json!({ "type": "START_MEETING" })).unwrap();
        assert_eq!(decoded, Some(Action::StartMeeting));
    }

    #[test]
    fn decode_rejects_bad_payload_for_known_type() {
        let error = Action::decode(json!({ "type": "DELETE_DOCUMENT", "payload": 7 })).unwrap_err();
        assert!(matches!(
            error,
            ActionDecodeError::InvalidPayload { ref action_type, .. } if action_type == "DELETE_DOCUMENT"
        ));
    }

    #[test]
    fn decode_requires_type() {
        let error = Action::decode(json!({ "payload": [] })).unwrap_err();
        assert!(matches!(error, ActionDecodeError::MissingType));
    }

    #[test]
    fn decode_struct_payload() {
        let decoded = Action::decode(json!({
            "type": "SET_LOADING",
            "payload": { "slice": "advisors", "loading": false }
        }))
        .unwrap();

        assert_eq!(
            decoded,
            Some(Action::SetLoading {
                slice: LoadingSlice::Advisors,
                loading: false
            })
        );
    }
}
