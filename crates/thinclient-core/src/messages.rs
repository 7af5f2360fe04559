//! Closed classifications of envelopes by `(app, type, request)`.
//!
//! Two directions are modelled:
//! - [`SandboxAction`]: what a sandboxed surface asks the device to do
//! - [`DeviceMessage`]: what the backend tells the device itself (`app: "client"`)
//!
//! Each falls back to a typed unknown variant instead of an untyped value.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::envelope::{Envelope, kinds};
use crate::logging::LogLevel;

/// Input event mode, numbered as on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum EventMode {
    /// Key released.
    KeyUp,
    /// Key pressed.
    KeyDown,
    /// Scroll up.
    ScrollUp,
    /// Scroll down.
    ScrollDown,
    /// Scroll left.
    ScrollLeft,
    /// Scroll right.
    ScrollRight,
    /// Swipe up.
    SwipeUp,
    /// Swipe down.
    SwipeDown,
    /// Swipe left.
    SwipeLeft,
    /// Swipe right.
    SwipeRight,
    /// Press released before the long-press threshold.
    PressShort,
    /// Press held past the long-press threshold.
    PressLong,
}

impl TryFrom<u8> for EventMode {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::KeyUp,
            1 => Self::KeyDown,
            2 => Self::ScrollUp,
            3 => Self::ScrollDown,
            4 => Self::ScrollLeft,
            5 => Self::ScrollRight,
            6 => Self::SwipeUp,
            7 => Self::SwipeDown,
            8 => Self::SwipeLeft,
            9 => Self::SwipeRight,
            10 => Self::PressShort,
            11 => Self::PressLong,
            other => return Err(format!("unknown event mode {other}")),
        })
    }
}

impl From<EventMode> for u8 {
    fn from(mode: EventMode) -> Self {
        match mode {
            EventMode::KeyUp => 0,
            EventMode::KeyDown => 1,
            EventMode::ScrollUp => 2,
            EventMode::ScrollDown => 3,
            EventMode::ScrollLeft => 4,
            EventMode::ScrollRight => 5,
            EventMode::SwipeUp => 6,
            EventMode::SwipeDown => 7,
            EventMode::SwipeLeft => 8,
            EventMode::SwipeRight => 9,
            EventMode::PressShort => 10,
            EventMode::PressLong => 11,
        }
    }
}

/// Request for the icon URL of a key or action.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IconRequest {
    /// Key or action id.
    pub id: String,
    /// Owning app for actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Request to run a key mapping.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRequest {
    /// Key id.
    pub id: String,
    /// How the key was triggered.
    pub mode: EventMode,
}

/// A log line emitted by a surface.
#[derive(Clone, Debug, PartialEq)]
pub struct LogRequest {
    /// Requested severity.
    pub level: LogLevel,
    /// Main message.
    pub message: String,
    /// Extra values attached by the surface.
    pub data: Vec<Value>,
}

#[derive(Deserialize)]
struct LogPayload {
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Vec<Value>,
}

/// A `get` request answered from cached local state.
#[derive(Clone, Debug, PartialEq)]
pub enum GetRequest {
    /// Current track.
    Music,
    /// The requesting app's settings.
    Settings,
    /// App catalog.
    Apps,
    /// Icon URL for a key.
    KeyIcon(IconRequest),
    /// Icon URL for an action.
    ActionIcon(IconRequest),
    /// Device manifest.
    Manifest,
    /// A request name the device does not serve.
    Unknown(String),
}

/// What a surface's action envelope asks for.
#[derive(Clone, Debug, PartialEq)]
pub enum SandboxAction {
    /// Answer from local state.
    Get(GetRequest),
    /// Run a key mapping locally.
    Key(KeyRequest),
    /// Run an action locally; the payload is the action object.
    Action(Map<String, Value>),
    /// Forward to the diagnostic logger.
    Log(LogRequest),
    /// Relay to the backend; not addressed to the device.
    Forward(Envelope),
    /// Addressed to the device with a verb it does not know.
    Unknown(Envelope),
    /// Known verb, unusable payload.
    Malformed {
        /// Envelope type.
        kind: String,
        /// Why the payload was rejected.
        reason: String,
    },
}

impl SandboxAction {
    /// Classify the inner envelope of an `IFRAME_ACTION` message.
    pub fn classify(envelope: Envelope) -> Self {
        if !envelope.is_local() {
            return Self::Forward(envelope);
        }
        match envelope.kind.as_str() {
            kinds::GET => Self::classify_get(envelope),
            kinds::KEY => match parse_payload::<KeyRequest>(&envelope) {
                Ok(key) => Self::Key(key),
                Err(reason) => Self::malformed(&envelope, reason),
            },
            kinds::ACTION => match envelope.payload {
                Some(Value::Object(action)) => Self::Action(action),
                _ => Self::malformed(&envelope, "action payload must be an object".into()),
            },
            kinds::LOG => {
                let level = LogLevel::parse(envelope.request.as_deref().unwrap_or("log"));
                match parse_payload::<LogPayload>(&envelope) {
                    Ok(p) => Self::Log(LogRequest {
                        level,
                        message: p.message,
                        data: p.data,
                    }),
                    Err(reason) => Self::malformed(&envelope, reason),
                }
            }
            _ => Self::Unknown(envelope),
        }
    }

    fn classify_get(envelope: Envelope) -> Self {
        let request = envelope.request.clone().unwrap_or_default();
        let get = match request.as_str() {
            kinds::MUSIC => GetRequest::Music,
            kinds::SETTINGS => GetRequest::Settings,
            kinds::APPS => GetRequest::Apps,
            kinds::MANIFEST => GetRequest::Manifest,
            kinds::KEY | kinds::ACTION => match parse_payload::<IconRequest>(&envelope) {
                Ok(icon) if request == kinds::KEY => GetRequest::KeyIcon(icon),
                Ok(icon) => GetRequest::ActionIcon(icon),
                Err(reason) => return Self::malformed(&envelope, reason),
            },
            _ => GetRequest::Unknown(request),
        };
        Self::Get(get)
    }

    fn malformed(envelope: &Envelope, reason: String) -> Self {
        Self::Malformed {
            kind: envelope.kind.clone(),
            reason,
        }
    }
}

fn parse_payload<T: serde::de::DeserializeOwned>(envelope: &Envelope) -> Result<T, String> {
    serde_json::from_value(envelope.payload_or_null().clone()).map_err(|e| e.to_string())
}

/// Track snapshot as sent by the backend.
///
/// Only the fields the device reasons about are typed; the rest is kept
/// verbatim for surfaces.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SongData {
    /// Track title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_name: Option<String>,
    /// Whether playback is running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_playing: Option<bool>,
    /// Remaining fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An entry in the app catalog.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppInfo {
    /// Unique app name; also the sandbox key.
    pub name: String,
    /// Remaining fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Backend traffic addressed to the device itself.
#[derive(Clone, Debug, PartialEq)]
pub enum DeviceMessage {
    /// New track snapshot.
    Music(SongData),
    /// Per-app settings, keyed by app name.
    Settings(Map<String, Value>),
    /// Replacement app catalog.
    Apps(Vec<AppInfo>),
    /// Replacement device manifest.
    Manifest(Value),
    /// Voice agent traffic.
    Agent {
        /// `response`, `context`, `token`, `disconnect`, ...
        request: String,
        /// Body.
        payload: Value,
    },
    /// Known kind whose payload could not be read.
    Malformed {
        /// Envelope type.
        kind: String,
        /// Why the payload was rejected.
        reason: String,
    },
    /// Anything else addressed to the device.
    Other(Envelope),
}

impl DeviceMessage {
    /// Classify an envelope; `None` when it is not addressed to the device.
    pub fn classify(envelope: &Envelope) -> Option<Self> {
        if !envelope.is_local() {
            return None;
        }
        let message = match envelope.kind.as_str() {
            kinds::MUSIC => parse_payload(envelope).map(Self::Music),
            kinds::SETTINGS => parse_payload(envelope).map(Self::Settings),
            kinds::APPS => parse_payload(envelope).map(Self::Apps),
            kinds::MANIFEST => Ok(Self::Manifest(envelope.payload_or_null().clone())),
            kinds::AGENT => Ok(Self::Agent {
                request: envelope.request.clone().unwrap_or_default(),
                payload: envelope.payload_or_null().clone(),
            }),
            _ => Ok(Self::Other(envelope.clone())),
        };
        Some(message.unwrap_or_else(|reason| Self::Malformed {
            kind: envelope.kind.clone(),
            reason,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::CLIENT_APP;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn local(kind: &str) -> Envelope {
        Envelope::new(kind, CLIENT_APP)
    }

    #[test]
    fn event_mode_wire_numbers() {
        assert_eq!(serde_json::to_value(EventMode::PressLong).unwrap(), json!(11));
        let mode: EventMode = serde_json::from_value(json!(10)).unwrap();
        assert_eq!(mode, EventMode::PressShort);
        assert!(serde_json::from_value::<EventMode>(json!(42)).is_err());
    }

    #[test]
    fn get_music() {
        let action = SandboxAction::classify(local("get").with_request("music"));
        assert_eq!(action, SandboxAction::Get(GetRequest::Music));
    }

    #[test]
    fn get_key_icon_requires_id() {
        let ok = SandboxAction::classify(
            local("get").with_request("key").with_payload(json!({"id": "DynamicAction1"})),
        );
        assert_matches!(ok, SandboxAction::Get(GetRequest::KeyIcon(IconRequest { ref id, .. })) if id == "DynamicAction1");

        let bad = SandboxAction::classify(local("get").with_request("action"));
        assert_matches!(bad, SandboxAction::Malformed { ref kind, .. } if kind == "get");
    }

    #[test]
    fn get_unknown_request() {
        let action = SandboxAction::classify(local("get").with_request("weather"));
        assert_eq!(action, SandboxAction::Get(GetRequest::Unknown("weather".into())));
    }

    #[test]
    fn key_action_and_log() {
        let key = SandboxAction::classify(
            local("key").with_payload(json!({"id": "Scroll", "mode": 10})),
        );
        assert_matches!(key, SandboxAction::Key(KeyRequest { mode: EventMode::PressShort, .. }));

        let action = SandboxAction::classify(local("action").with_payload(json!({"id": "skip"})));
        assert_matches!(action, SandboxAction::Action(ref map) if map["id"] == "skip");

        let log = SandboxAction::classify(
            local("log")
                .with_request("error")
                .with_payload(json!({"message": "boom", "data": [1, 2]})),
        );
        assert_matches!(log, SandboxAction::Log(LogRequest { level: LogLevel::Error, ref message, ref data }) if message == "boom" && data.len() == 2);
    }

    #[test]
    fn other_app_is_forwarded() {
        let env = Envelope::new("get", "weather").with_request("forecast");
        assert_eq!(SandboxAction::classify(env.clone()), SandboxAction::Forward(env));
    }

    #[test]
    fn missing_app_is_forwarded() {
        let env = Envelope {
            app: None,
            ..Envelope::new("anything", "x")
        };
        assert_matches!(SandboxAction::classify(env), SandboxAction::Forward(_));
    }

    #[test]
    fn unknown_local_verb() {
        assert_matches!(SandboxAction::classify(local("dance")), SandboxAction::Unknown(_));
    }

    #[test]
    fn device_music_keeps_extra_fields() {
        let env = local("music").with_payload(json!({"track_name": "Song", "artist": "A"}));
        let msg = DeviceMessage::classify(&env).unwrap();
        assert_matches!(msg, DeviceMessage::Music(ref song) if song.track_name.as_deref() == Some("Song") && song.extra["artist"] == "A");
    }

    #[test]
    fn device_apps_and_agent() {
        let apps = local("apps").with_payload(json!([{"name": "weather"}, {"name": "spotify"}]));
        assert_matches!(DeviceMessage::classify(&apps), Some(DeviceMessage::Apps(ref list)) if list.len() == 2);

        let agent = local("agent").with_request("token").with_payload(json!({"messageId": "m"}));
        assert_matches!(DeviceMessage::classify(&agent), Some(DeviceMessage::Agent { ref request, .. }) if request == "token");
    }

    #[test]
    fn device_malformed_and_foreign() {
        let bad = local("apps").with_payload(json!("nope"));
        assert_matches!(DeviceMessage::classify(&bad), Some(DeviceMessage::Malformed { .. }));
        assert!(DeviceMessage::classify(&Envelope::new("music", "spotify")).is_none());
    }
}
