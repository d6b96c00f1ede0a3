use std::sync::Arc;

use crate::{
    action::{Action, LoadingSlice, UserDataFragment},
    models::{Message, NewNotification, Notification},
    state::AppState,
};

/// Applies one action. Pure: no I/O, never fails, never touches `state`.
pub fn reduce(state: &AppState, action: Action) -> AppState {
    let mut next = state.clone();

    match action {
        Action::SetDocuments(documents) => {
            next.documents = Arc::new(documents);
            next.documents_loading = false;
            if let Some(selected) = next.selected_document.as_deref() {
                if next.document(selected).is_none() {
                    next.selected_document = None;
                }
            }
        }
        Action::AddDocument(document) => {
            let documents = Arc::make_mut(&mut next.documents);
            match documents.iter_mut().find(|item| item.id == document.id) {
                Some(existing) => *existing = document,
                None => documents.push(document),
            }
        }
        Action::UpdateDocument(patch) => {
            if let Some(index) = next.documents.iter().position(|item| item.id == patch.id) {
                Arc::make_mut(&mut next.documents)[index].apply(&patch);
            }
        }
        Action::DeleteDocument(id) => {
            if next.documents.iter().any(|item| item.id == id) {
                Arc::make_mut(&mut next.documents).retain(|item| item.id != id);
            }
            if next.selected_document.as_deref() == Some(id.as_str()) {
                next.selected_document = None;
            }
            if next.meeting_document_ids.contains(&id) {
                Arc::make_mut(&mut next.meeting_document_ids).retain(|item| *item != id);
            }
        }
        Action::SelectDocument(id) => {
            next.selected_document = id;
        }

        Action::SetAdvisors(advisors) => {
            next.advisors = Arc::new(advisors);
            next.advisors_loading = false;
            prune_selection(&mut next);
        }
        Action::AddAdvisor(advisor) => {
            let advisors = Arc::make_mut(&mut next.advisors);
            match advisors.iter_mut().find(|item| item.id == advisor.id) {
                Some(existing) => *existing = advisor,
                None => advisors.push(advisor),
            }
        }
        Action::UpdateAdvisor(patch) => {
            if let Some(index) = next.advisors.iter().position(|item| item.id == patch.id) {
                Arc::make_mut(&mut next.advisors)[index].apply(&patch);
            }
        }
        Action::DeleteAdvisor(id) => {
            if next.advisors.iter().any(|item| item.id == id) {
                Arc::make_mut(&mut next.advisors).retain(|item| item.id != id);
            }
            if next.selected_advisor_ids.contains(&id) {
                Arc::make_mut(&mut next.selected_advisor_ids).retain(|item| *item != id);
            }
        }
        Action::SelectAdvisors(advisors) => {
            let mut ids: Vec<String> = Vec::with_capacity(advisors.len());
            for advisor in advisors {
                if !ids.contains(&advisor.id) {
                    ids.push(advisor.id);
                }
            }
            next.selected_advisor_ids = Arc::new(ids);
        }

        Action::SetConversations(conversations) => {
            next.conversations = Arc::new(conversations);
            next.conversations_loading = false;
            resolve_active_conversation(&mut next);
        }
        Action::AddConversation(conversation) => {
            let conversations = Arc::make_mut(&mut next.conversations);
            match conversations
                .iter_mut()
                .find(|item| item.id == conversation.id)
            {
                Some(existing) => *existing = conversation,
                None => conversations.push(conversation),
            }
            sync_active_messages(&mut next);
        }
        Action::UpdateConversation(patch) => {
            if let Some(index) = next.conversations.iter().position(|item| item.id == patch.id) {
                Arc::make_mut(&mut next.conversations)[index].apply(&patch);
                sync_active_messages(&mut next);
            }
        }
        Action::DeleteConversation(id) => {
            if next.conversations.iter().any(|item| item.id == id) {
                Arc::make_mut(&mut next.conversations).retain(|item| item.id != id);
            }
            if next.active_conversation_id.as_deref() == Some(id.as_str()) {
                next.active_conversation_id = None;
                next.conversation_messages = Arc::default();
            }
        }
        Action::SetActiveConversation(id) => {
            next.conversation_messages = match id.as_deref().and_then(|id| next.conversation(id)) {
                Some(conversation) => Arc::new(conversation.messages.clone()),
                None => Arc::default(),
            };
            next.active_conversation_id = id;
        }
        Action::AddMessage(message) => add_message(&mut next, message),

        Action::StartMeeting => {
            next.is_meeting_active = true;
        }
        Action::EndMeeting => {
            next.is_meeting_active = false;
            next.meeting_messages = Arc::default();
            next.meeting_document_ids = Arc::default();
        }
        Action::AddMeetingMessage(message) => {
            if !next.meeting_messages.iter().any(|item| item.id == message.id) {
                Arc::make_mut(&mut next.meeting_messages).push(message);
            }
        }
        Action::AttachMeetingDocument(id) => {
            if !next.meeting_document_ids.contains(&id) {
                Arc::make_mut(&mut next.meeting_document_ids).push(id);
            }
        }
        Action::DetachMeetingDocument(id) => {
            if next.meeting_document_ids.contains(&id) {
                Arc::make_mut(&mut next.meeting_document_ids).retain(|item| *item != id);
            }
        }

        Action::AddNotification(notification) => add_notification(&mut next, notification),
        Action::RemoveNotification(id) => {
            if next.notifications.iter().any(|item| item.id == id) {
                Arc::make_mut(&mut next.notifications).retain(|item| item.id != id);
            }
        }
        Action::ExpireNotifications(cutoff_ms) => {
            if next
                .notifications
                .iter()
                .any(|item| item.created_at_ms < cutoff_ms)
            {
                Arc::make_mut(&mut next.notifications).retain(|item| item.created_at_ms >= cutoff_ms);
            }
        }

        Action::UpdateSettings(patch) => {
            Arc::make_mut(&mut next.settings).merge(&patch);
        }
        Action::SetFeaturePreference {
            feature,
            key,
            value,
        } => {
            Arc::make_mut(&mut next.feature_preferences)
                .entry(feature)
                .or_default()
                .insert(key, value);
        }
        Action::SetUsage(usage) => {
            next.usage = Arc::new(usage);
        }
        Action::SetLoading { slice, loading } => match slice {
            LoadingSlice::Documents => next.documents_loading = loading,
            LoadingSlice::Advisors => next.advisors_loading = loading,
            LoadingSlice::Conversations => next.conversations_loading = loading,
        },

        Action::ResetState => return AppState::initial(),
        Action::LoadUserData(fragment) => load_user_data(&mut next, fragment),
    }

    next
}

/// Re-copies the active conversation's messages when they drifted.
fn sync_active_messages(state: &mut AppState) {
    let Some(active) = state.active_conversation() else {
        return;
    };
    if active.messages != *state.conversation_messages {
        state.conversation_messages = Arc::new(active.messages.clone());
    }
}

/// Clears the active conversation when it is no longer in the collection,
/// otherwise re-syncs the mirror.
fn resolve_active_conversation(state: &mut AppState) {
    let dangling = state
        .active_conversation_id
        .as_deref()
        .is_some_and(|id| state.conversation(id).is_none());
    if dangling {
        state.active_conversation_id = None;
        state.conversation_messages = Arc::default();
    } else {
        sync_active_messages(state);
    }
}

/// Drops selected ids that are no longer on the roster.
fn prune_selection(state: &mut AppState) {
    let stale = state
        .selected_advisor_ids
        .iter()
        .any(|id| state.advisor(id).is_none());
    if stale {
        let advisors = Arc::clone(&state.advisors);
        Arc::make_mut(&mut state.selected_advisor_ids)
            .retain(|id| advisors.iter().any(|advisor| advisor.id == *id));
    }
}

fn add_message(state: &mut AppState, message: Message) {
    let target = message
        .conversation_id
        .clone()
        .or_else(|| state.active_conversation_id.clone());
    let is_active = target.is_some() && target == state.active_conversation_id;

    if let Some(target) = target.as_deref() {
        if let Some(index) = state.conversations.iter().position(|item| item.id == target) {
            if state.conversations[index]
                .messages
                .iter()
                .any(|item| item.id == message.id)
            {
                return;
            }
            let conversation = &mut Arc::make_mut(&mut state.conversations)[index];
            conversation.messages.push(message.clone());
            if message.created_at.is_some() {
                conversation.updated_at = message.created_at.clone();
            }
        } else if !is_active {
            return;
        }
    }

    if (is_active || target.is_none())
        && !state
            .conversation_messages
            .iter()
            .any(|item| item.id == message.id)
    {
        Arc::make_mut(&mut state.conversation_messages).push(message);
    }
}

fn add_notification(state: &mut AppState, notification: NewNotification) {
    let stamp = u64::try_from(notification.created_at_ms).unwrap_or(0);
    let id = stamp.max(state.last_notification_id + 1);
    state.last_notification_id = id;
    Arc::make_mut(&mut state.notifications).push(Notification {
        id,
        message: notification.message,
        kind: notification.kind,
        created_at_ms: notification.created_at_ms,
    });
}

fn load_user_data(state: &mut AppState, fragment: UserDataFragment) {
    if let Some(documents) = fragment.documents {
        state.documents = Arc::new(documents);
    }
    if let Some(advisors) = fragment.advisors {
        state.advisors = Arc::new(advisors);
        prune_selection(state);
    }
    if let Some(conversations) = fragment.conversations {
        state.conversations = Arc::new(conversations);
    }
    if let Some(active) = fragment.active_conversation_id {
        state.conversation_messages = Arc::default();
        state.active_conversation_id = Some(active);
    }
    if let Some(settings) = fragment.settings {
        state.settings = Arc::new(settings);
    }
    if let Some(preferences) = fragment.feature_preferences {
        state.feature_preferences = Arc::new(preferences);
    }
    if let Some(usage) = fragment.usage {
        state.usage = Arc::new(usage);
    }

    state.documents_loading = false;
    state.advisors_loading = false;
    state.conversations_loading = false;
    resolve_active_conversation(state);
}
