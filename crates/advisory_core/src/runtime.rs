use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::{
    action::Action,
    config::StoreConfig,
    hydration::HydrationReport,
    logging::init_logging,
    roster::{RestRosterClient, RosterSource, UnconfiguredRoster},
    state::AppState,
    storage::{JsonDirStore, KeyValueStore, MemoryStore, PersistenceBridge, Slice},
    store::Store,
};

type SharedCallback = Arc<dyn Fn(&str, &Value) + Send + Sync>;

pub const STATE_EVENT: &str = "store://state";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeRequest {
    pub command: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeError {
    pub code: String,
    pub message: String,
}

impl InvokeError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<InvokeError>,
}

impl InvokeResponse {
    pub fn from_result(result: Result<Value, InvokeError>) -> Self {
        match result {
            Ok(data) => Self {
                ok: true,
                data: Some(data),
                error: None,
            },
            Err(error) => Self {
                ok: false,
                data: None,
                error: Some(error),
            },
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"ok":false,"error":{"code":"serialization_failure","message":"failed to serialize response"}}"#
                .to_string()
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SlicePayload {
    slice: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdvisorIdPayload {
    id: String,
}

/// Host-facing runtime: one store, one tokio runtime, a JSON command surface
/// and a single event callback that receives every new state snapshot.
pub struct StoreRuntime {
    store: Store,
    callback: Arc<Mutex<Option<SharedCallback>>>,
    runtime: tokio::runtime::Runtime,
}

impl StoreRuntime {
    pub fn new(config_json: &str) -> anyhow::Result<Self> {
        let config = StoreConfig::from_json(config_json)?;
        init_logging(&config.log_filter);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("advisory-store")
            .enable_all()
            .build()
            .context("failed to start store runtime")?;

        let persistence = config.persist.then(|| PersistenceBridge::new(open_storage(&config)));
        let roster = build_roster(&config)?;
        let store = Store::create(config, persistence, roster);

        let callback: Arc<Mutex<Option<SharedCallback>>> = Arc::new(Mutex::new(None));
        let listener_callback = callback.clone();
        store.subscribe(move |state| emit_state(&listener_callback, state));

        info!("store runtime ready");
        Ok(Self {
            store,
            callback,
            runtime,
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn set_event_callback<F>(&self, callback: F)
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        let mut guard = self.callback.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Some(Arc::new(callback));
    }

    pub fn clear_event_callback(&self) {
        let mut guard = self.callback.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = None;
    }

    pub fn invoke_json(&self, request_json: &str) -> String {
        let parsed = serde_json::from_str::<InvokeRequest>(request_json);
        let response = match parsed {
            Ok(request) => self.dispatch(request),
            Err(error) => Err(InvokeError {
                code: "invalid_request".to_string(),
                message: format!("invalid request JSON: {error}"),
            }),
        };

        InvokeResponse::from_result(response).to_json()
    }

    /// Decodes and applies one `{type, payload}` action. Unknown action types
    /// leave the state untouched and report `applied: false`.
    pub fn dispatch_action(&self, action: Value) -> Result<Value, InvokeError> {
        match Action::decode(action) {
            Ok(Some(action)) => {
                let state = self.store.dispatch(action);
                Ok(json!({ "applied": true, "state": snapshot_value(&state) }))
            }
            Ok(None) => Ok(json!({
                "applied": false,
                "state": snapshot_value(&self.store.state()),
            })),
            Err(error) => Err(InvokeError::new("invalid_action", error.to_string())),
        }
    }

    /// Another window wrote `slice_key`; reloads it. Returns whether anything
    /// was stored for it.
    pub fn storage_event(&self, slice_key: &str) -> Result<bool, InvokeError> {
        let slice = Slice::from_key(slice_key).ok_or_else(|| {
            InvokeError::new("invalid_payload", format!("unknown slice: {slice_key}"))
        })?;
        Ok(self.store.rehydrate_slice(slice))
    }

    pub fn hydrate(&self) -> HydrationReport {
        self.runtime.block_on(self.store.hydrate())
    }

    fn dispatch(&self, request: InvokeRequest) -> Result<Value, InvokeError> {
        match request.command.as_str() {
            "get_state" => Ok(snapshot_value(&self.store.state())),
            "dispatch" => self.dispatch_action(request.payload),
            "hydrate" => Ok(serde_json::to_value(self.hydrate()).unwrap_or_else(|_| json!({}))),
            "rehydrate_slice" => self.rehydrate_slice(request.payload),
            "reset" => {
                let state = self.store.dispatch(Action::ResetState);
                Ok(snapshot_value(&state))
            }
            "import_advisors" => {
                let raw = match &request.payload {
                    Value::String(raw) => raw.clone(),
                    other => other.to_string(),
                };
                let state = self.store.actions().import_advisors(&raw).map_err(store_error)?;
                Ok(snapshot_value(&state))
            }
            "delete_advisor" => {
                let payload: AdvisorIdPayload =
                    serde_json::from_value(request.payload).map_err(invalid_payload)?;
                let state = self.store.actions().delete_advisor(&payload.id).map_err(store_error)?;
                Ok(snapshot_value(&state))
            }
            _ => Err(InvokeError {
                code: "unknown_command".to_string(),
                message: format!("unsupported command: {}", request.command),
            }),
        }
    }

    fn rehydrate_slice(&self, payload: Value) -> Result<Value, InvokeError> {
        let payload: SlicePayload = serde_json::from_value(payload).map_err(invalid_payload)?;
        Ok(json!({ "reloaded": self.storage_event(&payload.slice)? }))
    }
}

fn open_storage(config: &StoreConfig) -> Arc<dyn KeyValueStore> {
    match config.resolve_data_dir() {
        Ok(dir) => {
            info!(data_dir = %dir.display(), "persisting to data directory");
            Arc::new(JsonDirStore::new(dir))
        }
        Err(error) => {
            warn!(error = %error, "no data directory, keeping state in memory");
            Arc::new(MemoryStore::new())
        }
    }
}

fn build_roster(config: &StoreConfig) -> anyhow::Result<Arc<dyn RosterSource>> {
    let (Some(base_url), Some(anon_key)) = (&config.backend_url, &config.anon_key) else {
        return Ok(Arc::new(UnconfiguredRoster));
    };

    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .build()
        .context("failed to build HTTP client")?;
    let client = RestRosterClient::with_config(http_client, base_url.clone(), anon_key.clone());
    Ok(Arc::new(match &config.access_token {
        Some(token) => client.with_access_token(token.clone()),
        None => client,
    }))
}

fn emit_state(callback: &Mutex<Option<SharedCallback>>, state: &AppState) {
    let callback = {
        let guard = callback.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.clone()
    };
    if let Some(callback) = callback {
        let event_payload = json!({
            "event": STATE_EVENT,
            "payload": snapshot_value(state),
        });
        callback(STATE_EVENT, &event_payload);
    }
}

fn snapshot_value(state: &AppState) -> Value {
    serde_json::to_value(state.snapshot()).unwrap_or_else(|_| json!({}))
}

fn invalid_payload(error: serde_json::Error) -> InvokeError {
    InvokeError {
        code: "invalid_payload".to_string(),
        message: error.to_string(),
    }
}

fn store_error(error: crate::error::StoreError) -> InvokeError {
    InvokeError {
        code: "store_error".to_string(),
        message: error.to_string(),
    }
}
