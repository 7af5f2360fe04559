//! The sandboxed surface channel.
//!
//! A surface is whatever hosts a mini-app: a web view, an embedded
//! renderer, or a log sink in headless mode. It hands the bridge
//! [`SurfaceEvent`]s and receives [`SurfaceMessage`]s.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Value, json};
use thinclient_core::envelope::kinds;
use thinclient_core::{Envelope, SURFACE_SOURCE};

use crate::errors::BridgeError;

/// Lazily readable binary data posted by a surface.
#[async_trait]
pub trait BlobSource: Send + Sync {
    /// Read the whole blob.
    async fn read(&self) -> Result<Bytes, BridgeError>;
}

/// Body of a surface message.
pub enum SurfaceData {
    /// Nothing usable was posted.
    Null,
    /// Raw bytes.
    Bytes(Bytes),
    /// A blob that still has to be read.
    Blob(Box<dyn BlobSource>),
    /// A structured message.
    Json(Value),
}

impl std::fmt::Debug for SurfaceData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Self::Blob(_) => f.write_str("Blob"),
            Self::Json(v) => f.debug_tuple("Json").field(v).finish(),
        }
    }
}

/// One message from a surface, tagged with the origin it came from.
#[derive(Debug)]
pub struct SurfaceEvent {
    /// Origin the surface content was loaded from.
    pub origin: String,
    /// Message body.
    pub data: SurfaceData,
}

impl SurfaceEvent {
    /// Event carrying a JSON body.
    pub fn json(origin: impl Into<String>, value: Value) -> Self {
        Self {
            origin: origin.into(),
            data: SurfaceData::Json(value),
        }
    }

    /// Event carrying raw bytes.
    pub fn bytes(origin: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            origin: origin.into(),
            data: SurfaceData::Bytes(bytes.into()),
        }
    }
}

/// Something the device pushes into a surface.
#[derive(Clone, Debug, PartialEq)]
pub enum SurfaceMessage {
    /// Posted as `{...envelope, source: "deskthing"}`.
    Envelope(Envelope),
    /// Posted as `{type: "IFRAME_BINARY", payload, source: "deskthing"}`.
    Binary(Bytes),
}

impl SurfaceMessage {
    /// JSON form, with binary payloads as byte arrays.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Envelope(envelope) => envelope.to_surface_value(),
            Self::Binary(payload) => json!({
                "type": kinds::IFRAME_BINARY,
                "payload": payload.as_ref(),
                "source": SURFACE_SOURCE,
            }),
        }
    }
}

/// Receives messages pushed by a bridge.
pub trait Surface: Send + Sync {
    /// Deliver one message.
    fn post(&self, message: SurfaceMessage);
}

/// Read a JSON byte array (`[0, 255, ...]`).
pub(crate) fn bytes_from_json(value: &Value) -> Option<Bytes> {
    let items = value.as_array()?;
    items
        .iter()
        .map(|v| v.as_u64().and_then(|n| u8::try_from(n).ok()))
        .collect::<Option<Vec<u8>>>()
        .map(Bytes::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use thinclient_core::CLIENT_APP;

    #[test]
    fn envelope_message_carries_source() {
        let msg = SurfaceMessage::Envelope(Envelope::new("music", CLIENT_APP));
        let value = msg.to_value();
        assert_eq!(value["type"], "music");
        assert_eq!(value["source"], "deskthing");
    }

    #[test]
    fn binary_message_shape() {
        let value = SurfaceMessage::Binary(Bytes::from_static(&[1, 2])).to_value();
        assert_eq!(value, json!({"type": "IFRAME_BINARY", "payload": [1, 2], "source": "deskthing"}));
    }

    #[test]
    fn byte_arrays() {
        assert_eq!(bytes_from_json(&json!([0, 255])), Some(Bytes::from_static(&[0, 255])));
        assert_eq!(bytes_from_json(&json!([])), Some(Bytes::new()));
        assert!(bytes_from_json(&json!([256])).is_none());
        assert!(bytes_from_json(&json!("abc")).is_none());
        assert!(bytes_from_json(&json!([-1])).is_none());
    }
}
