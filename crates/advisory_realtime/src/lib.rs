//! Realtime subscriptions for the advisory board client: one named channel per
//! scope, row changes routed to callbacks, presence, and broadcast.

pub mod bindings;
pub mod error;
pub mod manager;
pub mod presence;
pub mod protocol;
pub mod scope;
pub mod transport;

use std::sync::Arc;

use advisory_core::StoreConfig;
use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::info;

pub use bindings::{bind_conversation, bind_documents, bind_meeting, bind_usage};
pub use error::RealtimeError;
pub use manager::{ChannelCallbacks, Identity, RealtimeManager, Subscription};
pub use presence::{PresenceEntry, PresenceSet};
pub use protocol::Frame;
pub use scope::Scope;
pub use transport::{ChannelTransport, Transport, WebSocketTransport};

/// A live websocket connection with its manager and inbound pump.
pub struct RealtimeConnection {
    pub manager: RealtimeManager,
    transport: Arc<WebSocketTransport>,
    pump: JoinHandle<()>,
}

impl RealtimeConnection {
    /// Opens the socket named by the store config and starts routing frames.
    pub async fn open(config: &StoreConfig, identity: Identity) -> Result<Self> {
        let url = config
            .resolve_realtime_url()
            .context("no realtime URL configured (set realtimeUrl or backendUrl)")?;
        let (transport, inbound) = WebSocketTransport::connect(&url)
            .await
            .context("failed to open realtime connection")?;

        let transport = Arc::new(transport);
        let manager = RealtimeManager::new(transport.clone(), identity);
        if let Some(token) = &config.access_token {
            manager.set_access_token(token.clone());
        }
        let pump = manager.spawn_pump(inbound);
        info!(user_id = %manager.identity().user_id, "realtime connection open");

        Ok(Self {
            manager,
            transport,
            pump,
        })
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    /// Leaves every channel and closes the socket (sign-out).
    pub async fn close(self) {
        let closed = self.manager.unsubscribe_all();
        self.transport.close();
        if let Err(error) = self.pump.await {
            tracing::warn!(error = %error, "realtime pump ended abnormally");
        }
        info!(channels = closed, "realtime connection closed");
    }
}
