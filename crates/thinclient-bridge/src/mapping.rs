//! Key and action mapping.
//!
//! Surfaces may trigger mapped keys and actions and ask for their icons.
//! [`ServerMapping`] resolves all of that against the backend.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use thinclient_core::envelope::kinds;
use thinclient_core::messages::IconRequest;
use thinclient_core::{Envelope, EventMode, SERVER_APP};
use thinclient_settings::ConnectionConfig;
use thinclient_transport::Transport;
use tokio::sync::watch;
use tracing::debug;

use crate::errors::BridgeError;

/// Executes mappings on behalf of surfaces.
#[async_trait]
pub trait MappingService: Send + Sync {
    /// Icon URL for a key, if one can be derived.
    fn key_url(&self, request: &IconRequest) -> Option<String>;

    /// Icon URL for an action, if one can be derived.
    fn action_url(&self, request: &IconRequest) -> Option<String>;

    /// Trigger the mapping bound to key `id`.
    async fn execute_key(&self, id: &str, mode: EventMode) -> Result<(), BridgeError>;

    /// Run an action. `action["source"]` names the requesting app.
    async fn execute_action(&self, action: Map<String, Value>) -> Result<(), BridgeError>;
}

/// Mapping backed by the server: executions are relayed, icons are served
/// from the backend's HTTP origin.
pub struct ServerMapping {
    transport: Arc<dyn Transport>,
    connection: watch::Receiver<ConnectionConfig>,
}

impl ServerMapping {
    /// Create a mapping that follows the configured backend address.
    pub fn new(transport: Arc<dyn Transport>, connection: watch::Receiver<ConnectionConfig>) -> Self {
        Self {
            transport,
            connection,
        }
    }

    fn icon_url(&self, path: &str) -> Option<String> {
        let origin = self.connection.borrow().origin()?;
        Some(format!("{origin}/icons/{path}.svg"))
    }
}

#[async_trait]
impl MappingService for ServerMapping {
    fn key_url(&self, request: &IconRequest) -> Option<String> {
        self.icon_url(&format!("keys/{}", request.id))
    }

    fn action_url(&self, request: &IconRequest) -> Option<String> {
        let source = request.source.as_deref().unwrap_or(SERVER_APP);
        self.icon_url(&format!("{source}/{}", request.id))
    }

    async fn execute_key(&self, id: &str, mode: EventMode) -> Result<(), BridgeError> {
        debug!(key = id, ?mode, "triggering key mapping");
        let envelope = Envelope::new(kinds::KEY, SERVER_APP)
            .with_request("trigger")
            .with_payload(json!({ "id": id, "mode": mode }));
        Ok(self.transport.send(envelope).await?)
    }

    async fn execute_action(&self, action: Map<String, Value>) -> Result<(), BridgeError> {
        let envelope = Envelope::new(kinds::ACTION, SERVER_APP)
            .with_request("run")
            .with_payload(Value::Object(action));
        Ok(self.transport.send(envelope).await?)
    }
}
