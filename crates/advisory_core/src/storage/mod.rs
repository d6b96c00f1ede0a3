use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::{action::UserDataFragment, state::AppState};

pub mod json_repo;
pub mod schema;

pub use json_repo::{JsonDirStore, MemoryStore};
pub use schema::Slice;

/// String-keyed durable storage (the client's "local storage").
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedSlices {
    pub fragment: UserDataFragment,
    pub restored: Vec<Slice>,
}

/// Mirrors selected state slices to a `KeyValueStore`, one JSON blob per slice.
#[derive(Clone)]
pub struct PersistenceBridge {
    store: Arc<dyn KeyValueStore>,
}

impl PersistenceBridge {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Reads every slice independently. Missing or unreadable slices are
    /// left out of the fragment so the initial value stays in place.
    pub fn load(&self) -> LoadedSlices {
        let mut loaded = LoadedSlices::default();
        for slice in Slice::ALL {
            if self.load_into(slice, &mut loaded.fragment) {
                loaded.restored.push(slice);
            }
        }
        loaded
    }

    /// Reads one slice as a `LOAD_USER_DATA` fragment.
    pub fn load_slice(&self, slice: Slice) -> Option<UserDataFragment> {
        let mut fragment = UserDataFragment::default();
        self.load_into(slice, &mut fragment).then_some(fragment)
    }

    fn load_into(&self, slice: Slice, fragment: &mut UserDataFragment) -> bool {
        match slice {
            Slice::Documents => {
                fragment.documents = self.read(slice);
                fragment.documents.is_some()
            }
            Slice::Conversations => {
                fragment.conversations = self.read(slice);
                fragment.conversations.is_some()
            }
            Slice::Settings => {
                fragment.settings = self.read(slice);
                fragment.settings.is_some()
            }
            Slice::Preferences => {
                fragment.feature_preferences = self.read(slice);
                fragment.feature_preferences.is_some()
            }
        }
    }

    fn read<T: DeserializeOwned>(&self, slice: Slice) -> Option<T> {
        let raw = match self.store.get(slice.key()) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(error) => {
                warn!(slice = %slice, error = %error, "failed to read persisted slice");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(error) => {
                warn!(slice = %slice, error = %error, "discarding unparsable persisted slice");
                None
            }
        }
    }

    pub fn persist(&self, slice: Slice, state: &AppState) -> Result<()> {
        match slice {
            Slice::Documents => self.write(slice, &*state.documents),
            Slice::Conversations => self.write(slice, &*state.conversations),
            Slice::Settings => self.write(slice, &*state.settings),
            Slice::Preferences => self.write(slice, &*state.feature_preferences),
        }
    }

    /// Writes only the slices whose contents were replaced between `prev` and
    /// `next`. Failures are logged per slice and do not stop the others.
    pub fn persist_changed(&self, prev: &AppState, next: &AppState) -> Vec<Slice> {
        let mut written = Vec::new();
        for slice in changed_slices(prev, next) {
            match self.persist(slice, next) {
                Ok(()) => {
                    debug!(slice = %slice, "persisted slice");
                    written.push(slice);
                }
                Err(error) => warn!(slice = %slice, error = %error, "failed to persist slice"),
            }
        }
        written
    }

    fn write<T: Serialize + ?Sized>(&self, slice: Slice, value: &T) -> Result<()> {
        let serialized = serde_json::to_string(value)
            .with_context(|| format!("failed to serialize {slice}"))?;
        self.store.set(slice.key(), &serialized)
    }
}

pub fn changed_slices(prev: &AppState, next: &AppState) -> Vec<Slice> {
    let mut changed = Vec::new();
    if !Arc::ptr_eq(&prev.documents, &next.documents) {
        changed.push(Slice::Documents);
    }
    if !Arc::ptr_eq(&prev.conversations, &next.conversations) {
        changed.push(Slice::Conversations);
    }
    if !Arc::ptr_eq(&prev.settings, &next.settings) {
        changed.push(Slice::Settings);
    }
    if !Arc::ptr_eq(&prev.feature_preferences, &next.feature_preferences) {
        changed.push(Slice::Preferences);
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        action::Action,
        models::{Conversation, Document, DocumentStatus, Message, MessageRole, SettingsPatch, Theme},
        reducer::reduce,
    };

    fn bridge() -> (PersistenceBridge, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (PersistenceBridge::new(store.clone()), store)
    }

    #[test]
    fn round_trip_reproduces_equal_slices() {
        let (bridge, _) = bridge();
        let mut conversation = Conversation::new("c1", "Fundraising");
        conversation
            .messages
            .push(Message::new("m1", MessageRole::User, "seed or series A?"));

        let state = [
            Action::SetDocuments(vec![Document::new("d1", "cap-table.xlsx", DocumentStatus::Ready)]),
            Action::SetConversations(vec![conversation]),
            Action::UpdateSettings(SettingsPatch {
                theme: Some(Theme::Light),
                ..SettingsPatch::default()
            }),
        ]
        .into_iter()
        .fold(AppState::initial(), |state, action| reduce(&state, action));

        for slice in Slice::ALL {
            bridge.persist(slice, &state).unwrap();
        }

        let loaded = bridge.load();
        assert_eq!(loaded.restored, Slice::ALL.to_vec());
        let fresh = reduce(&AppState::initial(), Action::LoadUserData(loaded.fragment));

        assert_eq!(fresh.documents, state.documents);
        assert_eq!(fresh.conversations, state.conversations);
        assert_eq!(fresh.settings, state.settings);
    }

    #[test]
    fn corrupt_slice_does_not_block_others() {
        let (bridge, store) = bridge();
        store.set("documents", "{not json").unwrap();
        store.set("settings", r#"{"theme":"dark","voiceEnabled":true}"#).unwrap();

        let loaded = bridge.load();
        assert_eq!(loaded.restored, vec![Slice::Settings]);
        assert!(loaded.fragment.documents.is_none());
        assert_eq!(loaded.fragment.settings.unwrap().theme, Theme::Dark);
    }

    #[test]
    fn only_changed_slices_are_written() {
        let (bridge, store) = bridge();
        let prev = AppState::initial();
        let next = reduce(&prev, Action::StartMeeting);
        assert!(bridge.persist_changed(&prev, &next).is_empty());

        let next = reduce(
            &prev,
            Action::AddDocument(Document::new("d1", "memo.txt", DocumentStatus::Uploading)),
        );
        assert_eq!(bridge.persist_changed(&prev, &next), vec![Slice::Documents]);
        assert!(store.get("documents").unwrap().is_some());
        assert!(store.get("settings").unwrap().is_none());
    }
}
