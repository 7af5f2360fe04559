//! Capture backend seam and its notifications.
//!
//! The microphone itself lives outside this crate. A backend implementation
//! is driven through [`CaptureBackend`] and reports back through a channel of
//! [`CaptureEvent`]s handed to the session at construction.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thinclient_settings::MicConfig;

use crate::errors::VoiceError;

/// Capture lifecycle status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioStatus {
    /// No backend selected yet.
    #[default]
    Unset,
    /// Backend starting up.
    Connecting,
    /// Backend ready, microphone closed.
    Connected,
    /// Microphone open and streaming.
    Listening,
    /// Backend failed.
    Error,
}

impl AudioStatus {
    /// Whether `self → next` is a legal transition.
    ///
    /// `error` is reachable from anywhere; retrying leaves it for
    /// `connected`, `unset` or `connecting`.
    pub fn can_transition_to(self, next: Self) -> bool {
        use AudioStatus::{Connected, Connecting, Error, Listening, Unset};
        matches!(
            (self, next),
            (_, Error)
                | (Unset | Connected | Error, Connecting)
                | (Connecting | Listening | Error, Connected)
                | (Connected, Listening)
                | (Connecting | Connected | Error, Unset)
        )
    }

    /// Lowercase name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unset => "unset",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Listening => "listening",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for AudioStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State report from the capture backend.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MicState {
    /// Backend implementation in use.
    pub backend: Option<String>,
    /// Backend status.
    pub status: AudioStatus,
    /// Chunks captured so far.
    pub audio_chunks: u64,
    /// Bytes captured so far.
    pub bytes_received: u64,
    /// Effective capture format, when the backend reports it.
    pub config: Option<MicConfig>,
    /// Failure description accompanying an `error` status.
    pub error: Option<String>,
}

/// Something the capture backend wants the session to know.
#[derive(Clone, Debug, PartialEq)]
pub enum CaptureEvent {
    /// A captured audio chunk, possibly WAV-wrapped.
    Packet(Bytes),
    /// A state change.
    State(MicState),
}

/// Device microphone driver.
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// (Re)establish the backend. Must not close an open microphone.
    async fn retry(&self) -> Result<(), VoiceError>;

    /// Apply a capture format.
    async fn configure(&self, config: MicConfig) -> Result<(), VoiceError>;

    /// Start capturing.
    async fn open_mic(&self) -> Result<(), VoiceError>;

    /// Stop capturing.
    async fn close_mic(&self) -> Result<(), VoiceError>;
}
