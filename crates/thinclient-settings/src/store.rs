//! Runtime settings store.
//!
//! Holds the loaded [`ThinClientSettings`] and publishes the two values the
//! connection follows: the backend address and the client identity.
//! Publishing is edge-triggered: writing an unchanged value wakes nobody.

use parking_lot::RwLock;
use thinclient_core::ClientId;
use tokio::sync::watch;
use tracing::info;

use crate::types::ThinClientSettings;

/// Backend address as currently known.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Host name or IP.
    pub host: Option<String>,
    /// TCP port.
    pub port: Option<u16>,
}

impl ConnectionConfig {
    /// Config with both halves present.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: Some(host.into()),
            port: Some(port),
        }
    }

    /// Whether a URL can be derived.
    pub fn is_complete(&self) -> bool {
        self.parts().is_some()
    }

    /// `ws://{host}:{port}`, or `None` while incomplete.
    pub fn url(&self) -> Option<String> {
        self.parts().map(|(host, port)| format!("ws://{host}:{port}"))
    }

    /// `http://{host}:{port}`: the origin sandboxed surfaces are served from.
    pub fn origin(&self) -> Option<String> {
        self.parts().map(|(host, port)| format!("http://{host}:{port}"))
    }

    fn parts(&self) -> Option<(&str, u16)> {
        let host = self.host.as_deref().filter(|h| !h.is_empty())?;
        Some((host, self.port?))
    }
}

/// Shared, observable settings.
pub struct SettingsStore {
    settings: RwLock<ThinClientSettings>,
    connection: watch::Sender<ConnectionConfig>,
    client_id: watch::Sender<ClientId>,
}

impl SettingsStore {
    /// Build a store seeded from loaded settings.
    pub fn new(settings: ThinClientSettings) -> Self {
        let connection = ConnectionConfig {
            host: settings.server.host.clone(),
            port: settings.server.port,
        };
        let client_id = settings
            .client
            .client_id
            .as_deref()
            .map(ClientId::from_raw)
            .unwrap_or_default();
        Self {
            settings: RwLock::new(settings),
            connection: watch::Sender::new(connection),
            client_id: watch::Sender::new(client_id),
        }
    }

    /// Copy of the current settings.
    pub fn snapshot(&self) -> ThinClientSettings {
        self.settings.read().clone()
    }

    /// Current backend address.
    pub fn connection(&self) -> ConnectionConfig {
        self.connection.borrow().clone()
    }

    /// Watch the backend address.
    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionConfig> {
        self.connection.subscribe()
    }

    /// Replace the backend address. Returns whether it changed.
    pub fn set_connection(&self, config: ConnectionConfig) -> bool {
        {
            let mut settings = self.settings.write();
            settings.server.host.clone_from(&config.host);
            settings.server.port = config.port;
        }
        let changed = self.connection.send_if_modified(|current| {
            if *current == config {
                return false;
            }
            *current = config;
            true
        });
        if changed {
            info!(url = ?self.connection.borrow().url(), "backend address updated");
        }
        changed
    }

    /// Current client identity.
    pub fn client_id(&self) -> ClientId {
        self.client_id.borrow().clone()
    }

    /// Watch the client identity.
    pub fn subscribe_client_id(&self) -> watch::Receiver<ClientId> {
        self.client_id.subscribe()
    }

    /// Replace the client identity. Returns whether it changed.
    pub fn set_client_id(&self, id: ClientId) -> bool {
        self.settings.write().client.client_id = Some(id.as_str().to_owned());
        self.client_id.send_if_modified(|current| {
            if *current == id {
                return false;
            }
            info!(client_id = %id, "client id updated");
            *current = id;
            true
        })
    }
}
