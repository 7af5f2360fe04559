//! The JSON envelope exchanged with the backend and with surfaces.
//!
//! Wire shape: `{ "type": string, "request"?: string, "app": string, "payload"?: any }`.
//! Outbound envelopes additionally carry `clientId`, stamped by the
//! connection at serialization time via [`to_wire`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::EnvelopeError;
use crate::ids::ClientId;

/// `app` value meaning "handle on the device, not in a sandbox".
pub const CLIENT_APP: &str = "client";
/// `app` value addressing the backend itself.
pub const SERVER_APP: &str = "server";
/// `source` tag added to every message pushed into a surface.
pub const SURFACE_SOURCE: &str = "deskthing";

/// Well-known envelope `type` values.
pub mod kinds {
    /// Current track snapshot.
    pub const MUSIC: &str = "music";
    /// Per-app settings.
    pub const SETTINGS: &str = "settings";
    /// App catalog.
    pub const APPS: &str = "apps";
    /// Wall-clock time.
    pub const TIME: &str = "time";
    /// Device manifest.
    pub const MANIFEST: &str = "manifest";
    /// Surface asks the device for cached state.
    pub const GET: &str = "get";
    /// Surface triggers a key mapping.
    pub const KEY: &str = "key";
    /// Surface triggers an action.
    pub const ACTION: &str = "action";
    /// Surface log line.
    pub const LOG: &str = "log";
    /// Surface payload relayed to its backend app.
    pub const APP_PAYLOAD: &str = "app_payload";
    /// View change notification.
    pub const VIEW: &str = "view";
    /// Voice capture control.
    pub const AUDIO: &str = "audio";
    /// Voice agent traffic from the backend.
    pub const AGENT: &str = "agent";
    /// Binary payload wrapper used on the surface channel.
    pub const IFRAME_BINARY: &str = "IFRAME_BINARY";
    /// Action envelope wrapper used on the surface channel.
    pub const IFRAME_ACTION: &str = "IFRAME_ACTION";
}

/// A single structured message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Coarse verb or noun (`"music"`, `"get"`, `"app_payload"`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Optional refinement of `kind`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<String>,
    /// Destination or origin mini-app, or [`CLIENT_APP`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    /// Opaque body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Envelope {
    /// Create an envelope with no request and no payload.
    pub fn new(kind: impl Into<String>, app: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            request: None,
            app: Some(app.into()),
            payload: None,
        }
    }

    /// Set the `request` field.
    #[must_use]
    pub fn with_request(mut self, request: impl Into<String>) -> Self {
        self.request = Some(request.into());
        self
    }

    /// Set the `payload` field.
    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Parse an envelope from JSON text.
    pub fn from_json(text: &str) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Parse an envelope from an already-decoded JSON value.
    pub fn from_value(value: Value) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_value(value)?)
    }

    /// The `app` field, or `""` when absent.
    pub fn app_str(&self) -> &str {
        self.app.as_deref().unwrap_or_default()
    }

    /// Whether this envelope is addressed to the device itself.
    pub fn is_local(&self) -> bool {
        self.app.as_deref() == Some(CLIENT_APP)
    }

    /// Whether this envelope belongs to the named app.
    pub fn is_for(&self, app: &str) -> bool {
        self.app.as_deref() == Some(app)
    }

    /// The payload, or `null` when absent.
    pub fn payload_or_null(&self) -> &Value {
        self.payload.as_ref().unwrap_or(&Value::Null)
    }

    /// JSON value with the surface `source` tag merged in.
    pub fn to_surface_value(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut value {
            let _ = map.insert("source".to_owned(), Value::String(SURFACE_SOURCE.to_owned()));
        }
        value
    }
}

#[derive(Serialize)]
struct OutboundEnvelope<'a> {
    #[serde(flatten)]
    envelope: &'a Envelope,
    #[serde(rename = "clientId")]
    client_id: &'a ClientId,
}

/// Serialize an outbound envelope stamped with the given client id.
pub fn to_wire(envelope: &Envelope, client_id: &ClientId) -> serde_json::Result<String> {
    serde_json::to_string(&OutboundEnvelope {
        envelope,
        client_id,
    })
}

/// Correlation filter used by one-shot listeners.
///
/// Absent fields are wildcards.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MatchCriteria {
    /// Required `type`.
    pub kind: Option<String>,
    /// Required `request`.
    pub request: Option<String>,
    /// Required `app`.
    pub app: Option<String>,
}

impl MatchCriteria {
    /// Match on `type` only.
    pub fn kind(kind: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.into()),
            ..Self::default()
        }
    }

    /// Also require `request`.
    #[must_use]
    pub fn with_request(mut self, request: impl Into<String>) -> Self {
        self.request = Some(request.into());
        self
    }

    /// Also require `app`.
    #[must_use]
    pub fn with_app(mut self, app: impl Into<String>) -> Self {
        self.app = Some(app.into());
        self
    }

    /// Whether the envelope satisfies every present field.
    pub fn matches(&self, envelope: &Envelope) -> bool {
        self.kind.as_ref().is_none_or(|k| *k == envelope.kind)
            && self
                .request
                .as_ref()
                .is_none_or(|r| envelope.request.as_ref() == Some(r))
            && self
                .app
                .as_ref()
                .is_none_or(|a| envelope.app.as_ref() == Some(a))
    }
}
