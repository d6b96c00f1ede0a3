use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, Weak,
    },
};

use chrono::{SecondsFormat, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    action::Action,
    config::StoreConfig,
    error::{StoreError, StoreResult},
    models::{
        Advisor, Conversation, Document, DocumentPatch, DocumentStatus, Message, MessageRole,
        NewNotification, NotificationKind,
    },
    reducer::reduce,
    roster::RosterSource,
    state::AppState,
    storage::{PersistenceBridge, Slice},
};

type Listener = Arc<dyn Fn(&AppState) + Send + Sync>;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct ListenerId(u64);

pub(crate) struct StoreInner {
    state: Mutex<Arc<AppState>>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener_id: AtomicU64,
    /// States awaiting publication, in the order the reducer produced them.
    unpublished: Mutex<VecDeque<Arc<AppState>>>,
    publishing: AtomicBool,
    pub(crate) persistence: Option<PersistenceBridge>,
    pub(crate) roster: Arc<dyn RosterSource>,
    pub(crate) config: StoreConfig,
    pub(crate) shutdown: watch::Sender<bool>,
}

impl StoreInner {
    fn current(&self) -> Arc<AppState> {
        lock(&self.state).clone()
    }

    fn dispatch(&self, action: Action) -> Arc<AppState> {
        let action_type = action.type_name();
        let next = {
            let mut guard = lock(&self.state);
            let prev = guard.clone();
            let next = Arc::new(reduce(&prev, action));
            *guard = next.clone();

            if let Some(persistence) = &self.persistence {
                persistence.persist_changed(&prev, &next);
            }
            lock(&self.unpublished).push_back(next.clone());
            next
        };
        debug!(action = action_type, "dispatched");

        self.publish();
        next
    }

    /// Delivers queued states to listeners strictly in reducer order. Only one
    /// thread publishes at a time; a dispatch that finds another publisher
    /// active (including a listener dispatching re-entrantly) leaves its state
    /// in the queue for that publisher.
    fn publish(&self) {
        loop {
            if self
                .publishing
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            {
                let _publishing = PublishingFlag(&self.publishing);
                while let Some(state) = self.next_unpublished() {
                    let listeners: Vec<Listener> = lock(&self.listeners)
                        .iter()
                        .map(|(_, listener)| listener.clone())
                        .collect();
                    for listener in listeners {
                        listener(&state);
                    }
                }
            }

            if !self.has_unpublished() {
                return;
            }
        }
    }

    fn next_unpublished(&self) -> Option<Arc<AppState>> {
        lock(&self.unpublished).pop_front()
    }

    fn has_unpublished(&self) -> bool {
        !lock(&self.unpublished).is_empty()
    }
}

/// Releases the publisher role even if a listener panics.
struct PublishingFlag<'a>(&'a AtomicBool);

impl Drop for PublishingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Anything that accepts actions: the store itself, a handle to it, or a test double.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, action: Action) -> StoreResult<Arc<AppState>>;

    fn state(&self) -> StoreResult<Arc<AppState>>;
}

/// The process-wide state container. Owns the only reducer instance; consumers
/// receive `StoreHandle`s that stop working once the store is disposed.
pub struct Store {
    pub(crate) inner: Arc<StoreInner>,
}

impl Store {
    pub fn create(
        config: StoreConfig,
        persistence: Option<PersistenceBridge>,
        roster: Arc<dyn RosterSource>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let persistence = if config.persist { persistence } else { None };
        info!(persist = persistence.is_some(), "store created");

        Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(Arc::new(AppState::initial())),
                listeners: Mutex::new(Vec::new()),
                next_listener_id: AtomicU64::new(1),
                unpublished: Mutex::new(VecDeque::new()),
                publishing: AtomicBool::new(false),
                persistence,
                roster,
                config,
                shutdown,
            }),
        }
    }

    pub fn state(&self) -> Arc<AppState> {
        self.inner.current()
    }

    pub fn dispatch(&self, action: Action) -> Arc<AppState> {
        self.inner.dispatch(action)
    }

    pub fn handle(&self) -> StoreHandle {
        StoreHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn actions(&self) -> StoreActions<'_, Self> {
        StoreActions { dispatcher: self }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&AppState) + Send + Sync + 'static,
    {
        let id = ListenerId(self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.inner.listeners).push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = lock(&self.inner.listeners);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Re-reads one persisted slice, e.g. after another window wrote it.
    pub fn rehydrate_slice(&self, slice: Slice) -> bool {
        let Some(persistence) = &self.inner.persistence else {
            return false;
        };
        let Some(fragment) = persistence.load_slice(slice) else {
            debug!(slice = %slice, "nothing stored for slice");
            return false;
        };
        self.dispatch(Action::LoadUserData(fragment));
        true
    }

    /// Cancels in-flight hydration and detaches every listener and handle.
    pub fn dispose(self) {
        info!("store disposed");
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        self.inner.shutdown.send_replace(true);
        lock(&self.inner.listeners).clear();
    }
}

impl Dispatcher for Store {
    fn dispatch(&self, action: Action) -> StoreResult<Arc<AppState>> {
        Ok(self.inner.dispatch(action))
    }

    fn state(&self) -> StoreResult<Arc<AppState>> {
        Ok(self.inner.current())
    }
}

/// Non-owning access to a `Store` for consumers (bindings, hooks, hosts).
#[derive(Clone)]
pub struct StoreHandle {
    inner: Weak<StoreInner>,
}

impl StoreHandle {
    fn upgrade(&self) -> StoreResult<Arc<StoreInner>> {
        self.inner.upgrade().ok_or(StoreError::OutsideProvider)
    }

    pub fn state(&self) -> StoreResult<Arc<AppState>> {
        Ok(self.upgrade()?.current())
    }

    pub fn actions(&self) -> StoreActions<'_, Self> {
        StoreActions { dispatcher: self }
    }

    pub fn is_live(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

impl Dispatcher for StoreHandle {
    fn dispatch(&self, action: Action) -> StoreResult<Arc<AppState>> {
        Ok(self.upgrade()?.dispatch(action))
    }

    fn state(&self) -> StoreResult<Arc<AppState>> {
        Ok(self.upgrade()?.current())
    }
}

/// Typed action creators. User-facing failures become notifications here
/// instead of errors.
pub struct StoreActions<'a, D: Dispatcher + ?Sized> {
    dispatcher: &'a D,
}

impl<D: Dispatcher + ?Sized> StoreActions<'_, D> {
    pub fn notify(
        &self,
        kind: NotificationKind,
        message: impl Into<String>,
    ) -> StoreResult<Arc<AppState>> {
        self.dispatcher
            .dispatch(Action::AddNotification(NewNotification::now(kind, message)))
    }

    pub fn add_document(&self, document: Document) -> StoreResult<Arc<AppState>> {
        self.dispatcher.dispatch(Action::AddDocument(document))
    }

    pub fn update_document_status(
        &self,
        id: impl Into<String>,
        status: DocumentStatus,
    ) -> StoreResult<Arc<AppState>> {
        self.dispatcher.dispatch(Action::UpdateDocument(DocumentPatch {
            id: id.into(),
            status: Some(status),
            ..DocumentPatch::default()
        }))
    }

    pub fn select_document(&self, id: Option<String>) -> StoreResult<Arc<AppState>> {
        self.dispatcher.dispatch(Action::SelectDocument(id))
    }

    pub fn select_advisors(&self, advisors: Vec<Advisor>) -> StoreResult<Arc<AppState>> {
        self.dispatcher.dispatch(Action::SelectAdvisors(advisors))
    }

    pub fn add_message(&self, message: Message) -> StoreResult<Arc<AppState>> {
        self.dispatcher.dispatch(Action::AddMessage(message))
    }

    /// Creates a conversation with a fresh id and makes it active.
    pub fn start_conversation(&self, title: impl Into<String>) -> StoreResult<(String, Arc<AppState>)> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let mut conversation = Conversation::new(id.clone(), title);
        conversation.created_at = Some(now.clone());
        conversation.updated_at = Some(now);

        self.dispatcher.dispatch(Action::AddConversation(conversation))?;
        let state = self
            .dispatcher
            .dispatch(Action::SetActiveConversation(Some(id.clone())))?;
        Ok((id, state))
    }

    /// Appends a user message to the active conversation.
    pub fn send_user_message(&self, content: impl Into<String>) -> StoreResult<Arc<AppState>> {
        let mut message = Message::new(Uuid::new_v4().to_string(), MessageRole::User, content);
        message.created_at = Some(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true));
        self.dispatcher.dispatch(Action::AddMessage(message))
    }

    pub fn start_meeting(&self) -> StoreResult<Arc<AppState>> {
        self.dispatcher.dispatch(Action::StartMeeting)
    }

    pub fn end_meeting(&self) -> StoreResult<Arc<AppState>> {
        self.dispatcher.dispatch(Action::EndMeeting)
    }

    /// Removes a custom or roster advisor. Unknown ids and the meeting host are
    /// refused with a notification.
    pub fn delete_advisor(&self, id: &str) -> StoreResult<Arc<AppState>> {
        let state = self.dispatcher.state()?;

        let Some(advisor) = state.advisor(id) else {
            warn!(advisor_id = id, "delete requested for unknown advisor");
            return self.notify(NotificationKind::Error, format!("Advisor {id} was not found"));
        };
        if advisor.is_host {
            return self.notify(
                NotificationKind::Warning,
                "The meeting host cannot be removed from the panel",
            );
        }

        let name = advisor.name.clone();
        self.dispatcher.dispatch(Action::DeleteAdvisor(id.to_string()))?;
        self.notify(NotificationKind::Success, format!("Removed {name} from the panel"))
    }

    /// Imports advisors from a JSON array, marking each as custom.
    pub fn import_advisors(&self, raw_json: &str) -> StoreResult<Arc<AppState>> {
        let advisors: Vec<Advisor> = match serde_json::from_str(raw_json) {
            Ok(advisors) => advisors,
            Err(error) => {
                warn!(error = %error, "advisor import rejected");
                return self.notify(
                    NotificationKind::Error,
                    format!("Could not import advisors: {error}"),
                );
            }
        };
        if advisors.is_empty() {
            return self.notify(NotificationKind::Info, "No advisors found to import");
        }

        let count = advisors.len();
        for mut advisor in advisors {
            advisor.is_custom = true;
            advisor.is_host = false;
            self.dispatcher.dispatch(Action::AddAdvisor(advisor))?;
        }
        self.notify(
            NotificationKind::Success,
            format!("Imported {count} advisor{}", if count == 1 { "" } else { "s" }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        roster::StaticRoster,
        storage::{KeyValueStore, MemoryStore},
    };
    use std::sync::atomic::AtomicUsize;

    fn store_with(memory: Arc<MemoryStore>) -> Store {
        Store::create(
            StoreConfig::default(),
            Some(PersistenceBridge::new(memory)),
            Arc::new(StaticRoster::default()),
        )
    }

    fn roster_advisor(id: &str, is_host: bool) -> Advisor {
        Advisor {
            id: id.to_string(),
            name: format!("Advisor {id}"),
            is_host,
            ..Advisor::default()
        }
    }

    #[test]
    fn concurrent_dispatches_reach_listeners_in_reducer_order() {
        let store = Arc::new(store_with(Arc::new(MemoryStore::new())));
        store.subscribe(|state| {
            if state.is_meeting_active {
                std::thread::sleep(std::time::Duration::from_millis(200));
            }
        });
        let last_seen = Arc::new(Mutex::new(None));
        let recorder = last_seen.clone();
        store.subscribe(move |state| {
            *recorder.lock().unwrap() = Some(state.is_meeting_active);
        });

        let starter = {
            let store = store.clone();
            std::thread::spawn(move || {
                store.dispatch(Action::StartMeeting);
            })
        };
        std::thread::sleep(std::time::Duration::from_millis(50));
        store.dispatch(Action::EndMeeting);
        starter.join().unwrap();

        assert!(!store.state().is_meeting_active);
        assert_eq!(*last_seen.lock().unwrap(), Some(false));
    }

    #[test]
    fn listener_may_dispatch_and_sees_states_in_order() {
        let store = Arc::new(store_with(Arc::new(MemoryStore::new())));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let inner = Arc::downgrade(&store);
        store.subscribe(move |state| {
            if state.is_meeting_active {
                if let Some(store) = inner.upgrade() {
                    store.dispatch(Action::EndMeeting);
                }
            }
        });
        let recorder = seen.clone();
        store.subscribe(move |state| {
            recorder.lock().unwrap().push(state.is_meeting_active);
        });

        store.dispatch(Action::StartMeeting);

        assert_eq!(*seen.lock().unwrap(), vec![true, false]);
        assert!(!store.state().is_meeting_active);
    }

    #[test]
    fn dispatch_publishes_to_listeners_until_unsubscribed() {
        let store = store_with(Arc::new(MemoryStore::new()));
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let id = store.subscribe(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        store.dispatch(Action::StartMeeting);
        assert!(store.unsubscribe(id));
        store.dispatch(Action::EndMeeting);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn ui_flag_changes_do_not_write_storage() {
        let memory = Arc::new(MemoryStore::new());
        let store = store_with(memory.clone());

        store.dispatch(Action::StartMeeting);
        assert!(memory.get("documents").unwrap().is_none());
        assert!(memory.get("settings").unwrap().is_none());

        store.dispatch(Action::AddDocument(Document::new(
            "d1",
            "notes.md",
            DocumentStatus::Uploading,
        )));
        assert!(memory.get("documents").unwrap().is_some());
        assert!(memory.get("conversations").unwrap().is_none());
    }

    #[test]
    fn persistence_disabled_by_config() {
        let memory = Arc::new(MemoryStore::new());
        let store = Store::create(
            StoreConfig {
                persist: false,
                ..StoreConfig::default()
            },
            Some(PersistenceBridge::new(memory.clone())),
            Arc::new(StaticRoster::default()),
        );

        store.dispatch(Action::SetDocuments(Vec::new()));
        assert!(memory.get("documents").unwrap().is_none());
    }

    #[test]
    fn handle_fails_outside_provider() {
        let store = store_with(Arc::new(MemoryStore::new()));
        let handle = store.handle();
        assert!(handle.dispatch(Action::StartMeeting).is_ok());

        store.dispose();
        assert!(!handle.is_live());
        assert!(matches!(
            handle.dispatch(Action::EndMeeting),
            Err(StoreError::OutsideProvider)
        ));
        assert!(matches!(handle.state(), Err(StoreError::OutsideProvider)));
    }

    #[test]
    fn delete_advisor_refuses_host_and_unknown() {
        let store = store_with(Arc::new(MemoryStore::new()));
        store.dispatch(Action::SetAdvisors(vec![
            roster_advisor("host", true),
            roster_advisor("cfo", false),
        ]));
        let actions = store.actions();

        let state = actions.delete_advisor("host").unwrap();
        assert!(state.advisor("host").is_some());
        assert_eq!(state.notifications.last().unwrap().kind, NotificationKind::Warning);

        let state = actions.delete_advisor("nobody").unwrap();
        assert_eq!(state.notifications.last().unwrap().kind, NotificationKind::Error);

        let state = actions.delete_advisor("cfo").unwrap();
        assert!(state.advisor("cfo").is_none());
        assert_eq!(state.notifications.last().unwrap().kind, NotificationKind::Success);
    }

    #[test]
    fn started_conversation_receives_user_messages() {
        let memory = Arc::new(MemoryStore::new());
        let store = store_with(memory.clone());
        let actions = store.actions();

        let (id, state) = actions.start_conversation("Hiring plan").unwrap();
        assert_eq!(state.active_conversation_id.as_deref(), Some(id.as_str()));

        let state = actions.send_user_message("Who do we hire first?").unwrap();
        assert_eq!(state.conversation_messages.len(), 1);
        assert_eq!(state.active_conversation().unwrap().messages[0].role, MessageRole::User);
        assert!(memory.get("conversations").unwrap().unwrap().contains("Who do we hire first?"));
    }

    #[test]
    fn import_advisors_reports_parse_errors_as_notifications() {
        let store = store_with(Arc::new(MemoryStore::new()));
        let actions = store.actions();

        let state = actions.import_advisors("not json").unwrap();
        assert!(state.advisors.is_empty());
        assert_eq!(state.notifications[0].kind, NotificationKind::Error);

        let state = actions
            .import_advisors(r#"[{"id":"coach","name":"Coach","isHost":true}]"#)
            .unwrap();
        let imported = state.advisor("coach").unwrap();
        assert!(imported.is_custom);
        assert!(!imported.is_host);
        assert_eq!(state.notifications.last().unwrap().message, "Imported 1 advisor");
    }
}
