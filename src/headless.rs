//! Headless stand-ins for the display and the microphone, and the line
//! commands that drive the device from stdin.

use async_trait::async_trait;
use serde_json::Value;
use thinclient_bridge::{Surface, SurfaceMessage};
use thinclient_settings::MicConfig;
use thinclient_voice::{AudioStatus, CaptureBackend, CaptureEvent, MicState, VoiceError};
use tokio::sync::mpsc;
use tracing::info;

/// Surface that logs whatever a bridge pushes into it.
pub struct LogSurface {
    app: String,
}

impl LogSurface {
    /// Surface for `app`.
    pub fn new(app: impl Into<String>) -> Self {
        Self { app: app.into() }
    }
}

impl Surface for LogSurface {
    fn post(&self, message: SurfaceMessage) {
        match &message {
            SurfaceMessage::Envelope(envelope) => {
                info!(app = %self.app, kind = %envelope.kind, payload = %envelope.payload_or_null(), "surface <- envelope");
            }
            SurfaceMessage::Binary(payload) => {
                info!(app = %self.app, len = payload.len(), "surface <- binary");
            }
        }
    }
}

/// Capture backend without a microphone. It walks the status machine and
/// reports through the event channel, but never produces audio.
pub struct SilentCapture {
    events: mpsc::Sender<CaptureEvent>,
}

impl SilentCapture {
    /// Backend plus the receiver the audio session drains.
    pub fn new() -> (Self, mpsc::Receiver<CaptureEvent>) {
        let (events, rx) = mpsc::channel(32);
        (Self { events }, rx)
    }

    async fn report(&self, status: AudioStatus, config: Option<MicConfig>) -> Result<(), VoiceError> {
        let state = MicState {
            backend: Some("silent".into()),
            status,
            config,
            ..MicState::default()
        };
        self.events
            .send(CaptureEvent::State(state))
            .await
            .map_err(|_| VoiceError::Backend("audio session gone".into()))
    }
}

#[async_trait]
impl CaptureBackend for SilentCapture {
    async fn retry(&self) -> Result<(), VoiceError> {
        self.report(AudioStatus::Connecting, None).await?;
        self.report(AudioStatus::Connected, None).await
    }

    async fn configure(&self, config: MicConfig) -> Result<(), VoiceError> {
        self.report(AudioStatus::Connected, Some(config)).await
    }

    async fn open_mic(&self) -> Result<(), VoiceError> {
        self.report(AudioStatus::Listening, None).await
    }

    async fn close_mic(&self) -> Result<(), VoiceError> {
        self.report(AudioStatus::Connected, None).await
    }
}

/// Voice control verbs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoiceVerb {
    /// Open the microphone.
    Start,
    /// Close the microphone.
    Stop,
    /// Start or stop depending on state.
    Toggle,
    /// Stop and hide.
    Close,
}

/// One stdin command.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// `view <name>`
    View(String),
    /// `press <code>`: key down then up.
    Press(String),
    /// `down <code>` / `up <code>`
    Key {
        /// Key code.
        code: String,
        /// Down when true.
        down: bool,
    },
    /// `wheel <dx> <dy>`
    Wheel(f64, f64),
    /// `voice start|stop|toggle|close`
    Voice(VoiceVerb),
    /// `post <json>`: a message from the current surface.
    Post(Value),
    /// `reconnect`
    Reconnect,
    /// `status`
    Status,
    /// `quit`
    Quit,
}

impl Command {
    /// Parse one line. Blank lines parse to `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();
        let arg = |name: &str| {
            if rest.is_empty() {
                Err(format!("{verb}: missing {name}"))
            } else {
                Ok(rest.to_owned())
            }
        };
        let command = match verb {
            "view" => Self::View(arg("view name")?),
            "press" => Self::Press(arg("key code")?),
            "down" | "up" => Self::Key {
                code: arg("key code")?,
                down: verb == "down",
            },
            "wheel" => {
                let mut parts = rest.split_whitespace().map(str::parse::<f64>);
                match (parts.next(), parts.next()) {
                    (Some(Ok(dx)), Some(Ok(dy))) => Self::Wheel(dx, dy),
                    _ => return Err("wheel: expected two numbers".into()),
                }
            }
            "voice" => Self::Voice(match rest {
                "start" => VoiceVerb::Start,
                "stop" => VoiceVerb::Stop,
                "toggle" => VoiceVerb::Toggle,
                "close" => VoiceVerb::Close,
                other => return Err(format!("voice: unknown verb {other:?}")),
            }),
            "post" => Self::Post(serde_json::from_str(rest).map_err(|e| format!("post: {e}"))?),
            "reconnect" => Self::Reconnect,
            "status" => Self::Status,
            "quit" | "exit" => Self::Quit,
            other => return Err(format!("unknown command {other:?}")),
        };
        Ok(Some(command))
    }
}
