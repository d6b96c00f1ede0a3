use std::sync::{Arc, Mutex};

use advisory_core::{
    models::{Advisor, Conversation, Document, DocumentStatus, NotificationKind},
    roster::StaticRoster,
    storage::{MemoryStore, PersistenceBridge},
    Action, AppState, Dispatcher, Store, StoreConfig, StoreResult,
};
use advisory_realtime::{
    bind_conversation, bind_documents, bind_usage, protocol::events, ChannelTransport, Frame,
    Identity, RealtimeManager,
};
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;

/// Forwards to a real store and keeps every action it saw.
struct RecordingDispatcher {
    store: Store,
    actions: Mutex<Vec<Action>>,
}

impl RecordingDispatcher {
    fn new() -> Arc<Self> {
        let store = Store::create(
            StoreConfig::default(),
            Some(PersistenceBridge::new(Arc::new(MemoryStore::new()))),
            Arc::new(StaticRoster::default()),
        );
        Arc::new(Self {
            store,
            actions: Mutex::new(Vec::new()),
        })
    }

    fn recorded(&self, action_type: &str) -> Vec<Action> {
        self.actions
            .lock()
            .unwrap()
            .iter()
            .filter(|action| action.type_name() == action_type)
            .cloned()
            .collect()
    }
}

impl Dispatcher for RecordingDispatcher {
    fn dispatch(&self, action: Action) -> StoreResult<Arc<AppState>> {
        self.actions.lock().unwrap().push(action.clone());
        Dispatcher::dispatch(&self.store, action)
    }

    fn state(&self) -> StoreResult<Arc<AppState>> {
        Ok(self.store.state())
    }
}

fn connected() -> (RealtimeManager, UnboundedReceiver<Frame>) {
    let (transport, outbound) = ChannelTransport::new();
    (
        RealtimeManager::new(Arc::new(transport), Identity::new("user-1")),
        outbound,
    )
}

fn row_change(topic: &str, kind: &str, table: &str, row: Value) -> Frame {
    let (record, old_record) = if kind == "DELETE" {
        (Value::Null, row)
    } else {
        (row, Value::Null)
    };
    Frame::new(
        topic,
        events::POSTGRES_CHANGES,
        json!({
            "data": {
                "type": kind,
                "table": table,
                "schema": "public",
                "record": record,
                "old_record": old_record,
                "commit_timestamp": "2026-03-01T10:00:00Z"
            }
        }),
    )
}

#[test]
fn scenario_c_row_insert_dispatches_one_add_message() {
    let dispatcher = RecordingDispatcher::new();
    dispatcher.store.dispatch(Action::AddConversation(Conversation::new("c1", "Pricing")));
    dispatcher
        .store
        .dispatch(Action::SetActiveConversation(Some("c1".to_string())));
    let (manager, _outbound) = connected();

    let _subscription = bind_conversation(&manager, dispatcher.clone(), "c1").unwrap();
    manager.handle_frame(row_change(
        "realtime:conversation:c1",
        "INSERT",
        "messages",
        json!({
            "id": "m1",
            "conversation_id": "c1",
            "role": "advisor",
            "advisor_id": "cfo",
            "content": "Raise prices 10%"
        }),
    ));

    let added = dispatcher.recorded("ADD_MESSAGE");
    assert_eq!(added.len(), 1);
    let Action::AddMessage(message) = &added[0] else {
        panic!("expected ADD_MESSAGE");
    };
    assert_eq!(message.id, "m1");
    assert_eq!(message.content, "Raise prices 10%");

    let state = dispatcher.store.state();
    assert_eq!(state.conversation_messages.len(), 1);
    assert_eq!(state.conversation("c1").unwrap().messages.len(), 1);
}

#[test]
fn duplicate_subscribe_delivers_each_event_once() {
    let dispatcher = RecordingDispatcher::new();
    let (manager, mut outbound) = connected();

    let _first = bind_conversation(&manager, dispatcher.clone(), "c1").unwrap();
    let _second = bind_conversation(&manager, dispatcher.clone(), "c1").unwrap();
    assert_eq!(manager.channel_count(), 1);

    manager.handle_frame(row_change(
        "realtime:conversation:c1",
        "INSERT",
        "messages",
        json!({ "id": "m1", "conversation_id": "c1", "content": "hello" }),
    ));

    assert_eq!(dispatcher.recorded("ADD_MESSAGE").len(), 1);

    let mut joins = 0;
    while let Ok(frame) = outbound.try_recv() {
        if frame.event == events::JOIN {
            joins += 1;
        }
    }
    assert_eq!(joins, 2);
}

#[test]
fn scenario_a_document_processing_over_realtime() {
    let dispatcher = RecordingDispatcher::new();
    dispatcher.store.dispatch(Action::AddDocument(Document::new(
        "d1",
        "pitch.pdf",
        DocumentStatus::Uploading,
    )));
    let (manager, _outbound) = connected();
    let _subscription = bind_documents(&manager, dispatcher.clone(), "user-1").unwrap();
    let topic = "realtime:documents:user-1";

    manager.handle_frame(row_change(
        topic,
        "UPDATE",
        "documents",
        json!({ "id": "d1", "status": "ready", "analysis": { "summary": "x" } }),
    ));

    let state = dispatcher.store.state();
    assert_eq!(state.documents.len(), 1);
    let document = state.document("d1").unwrap();
    assert_eq!(document.status, DocumentStatus::Ready);
    assert_eq!(document.analysis.as_ref().unwrap().summary, "x");
    assert_eq!(document.name, "pitch.pdf");

    manager.handle_frame(row_change(topic, "DELETE", "documents", json!({ "id": "d1" })));
    assert!(dispatcher.store.state().documents.is_empty());
}

#[test]
fn scenario_b_deleting_a_selected_advisor_keeps_the_rest() {
    let dispatcher = RecordingDispatcher::new();
    let advisor = |id: &str| Advisor {
        id: id.to_string(),
        name: id.to_uppercase(),
        ..Advisor::default()
    };
    let store = &dispatcher.store;
    store.dispatch(Action::SetAdvisors(vec![advisor("a"), advisor("b")]));
    store.dispatch(Action::SelectAdvisors(vec![advisor("a"), advisor("b")]));

    let state = store.actions().delete_advisor("a").unwrap();

    assert!(state.advisor("a").is_none());
    let selected: Vec<&str> = state
        .selected_advisor_ids
        .iter()
        .map(String::as_str)
        .collect();
    assert_eq!(selected, vec!["b"]);
}

#[test]
fn usage_warning_fires_once_past_threshold() {
    let dispatcher = RecordingDispatcher::new();
    let (manager, _outbound) = connected();
    let _subscription = bind_usage(&manager, dispatcher.clone(), "user-1").unwrap();
    let topic = "realtime:usage:user-1";

    for tokens in [500, 850, 900] {
        manager.handle_frame(row_change(
            topic,
            "INSERT",
            "usage_events",
            json!({ "tokens_used": tokens, "request_count": 1, "token_limit": 1000 }),
        ));
    }

    let state = dispatcher.store.state();
    assert_eq!(state.usage.tokens_used, 900);
    let warnings: Vec<_> = state
        .notifications
        .iter()
        .filter(|notification| notification.kind == NotificationKind::Warning)
        .collect();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].message, "You have used 85% of your token limit");
}

#[test]
fn usage_warning_rearms_after_dropping_below_threshold() {
    let dispatcher = RecordingDispatcher::new();
    let (manager, _outbound) = connected();
    let _subscription = bind_usage(&manager, dispatcher.clone(), "user-1").unwrap();
    let topic = "realtime:usage:user-1";

    for tokens in [850, 900, 100, 950] {
        manager.handle_frame(row_change(
            topic,
            "INSERT",
            "usage_events",
            json!({ "tokens_used": tokens, "request_count": 1, "token_limit": 1000 }),
        ));
    }

    let messages: Vec<String> = dispatcher
        .store
        .state()
        .notifications
        .iter()
        .filter(|notification| notification.kind == NotificationKind::Warning)
        .map(|notification| notification.message.clone())
        .collect();
    assert_eq!(
        messages,
        vec![
            "You have used 85% of your token limit",
            "You have used 95% of your token limit",
        ]
    );
}

#[test]
fn channel_failures_and_bad_rows_become_notifications() {
    let dispatcher = RecordingDispatcher::new();
    let (manager, _outbound) = connected();
    let _subscription = bind_conversation(&manager, dispatcher.clone(), "c1").unwrap();
    let topic = "realtime:conversation:c1";

    manager.handle_frame(row_change(topic, "INSERT", "messages", json!({ "content": "no id" })));
    manager.handle_frame(Frame::new(topic, events::ERROR, json!({})));

    assert!(dispatcher.recorded("ADD_MESSAGE").is_empty());
    let state = dispatcher.store.state();
    assert_eq!(state.notifications.len(), 2);
    assert!(state
        .notifications
        .iter()
        .all(|notification| notification.kind == NotificationKind::Error));
}

#[test]
fn events_after_the_store_is_gone_are_dropped_quietly() {
    let store = Store::create(StoreConfig::default(), None, Arc::new(StaticRoster::default()));
    let handle: Arc<dyn Dispatcher> = Arc::new(store.handle());
    let (manager, _outbound) = connected();
    let _subscription = bind_conversation(&manager, handle.clone(), "c1").unwrap();

    store.dispose();
    manager.handle_frame(row_change(
        "realtime:conversation:c1",
        "INSERT",
        "messages",
        json!({ "id": "m1", "content": "late" }),
    ));

    assert!(handle.state().is_err());
}
