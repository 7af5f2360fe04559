//! Audio session.
//!
//! Owns the capture backend. Control calls (`start`, `stop`, ...) drive the
//! backend and announce themselves to the server; the backend reports back
//! through a [`CaptureEvent`] channel drained by one task per session.
//! Captured chunks go out as binary frames exactly as captured.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use thinclient_core::envelope::kinds;
use thinclient_core::{DeviceMessage, Envelope, SERVER_APP};
use thinclient_settings::MicConfig;
use thinclient_transport::{Subscription, Transport};
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::backend::{AudioStatus, CaptureBackend, CaptureEvent, MicState};
use crate::conversation::{AgentMessage, Conversation};
use crate::errors::VoiceError;
use crate::meter::LevelMeter;

/// Observable session state.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AudioSnapshot {
    /// Backend implementation reported by the capture side.
    pub backend_kind: Option<String>,
    /// Capture status.
    pub status: AudioStatus,
    /// Chunks captured.
    pub chunk_count: u64,
    /// Bytes captured.
    pub byte_count: u64,
    /// Capture format.
    pub mic_config: MicConfig,
    /// Level of the latest chunk, in `[0, 1]`.
    pub current_level: f64,
    /// Description attached to the latest `error` report.
    pub last_error: Option<String>,
    /// Whether the voice overlay is shown.
    pub agent_visible: bool,
}

struct Inner {
    transport: Arc<dyn Transport>,
    backend: Arc<dyn CaptureBackend>,
    events: Mutex<Option<mpsc::Receiver<CaptureEvent>>>,
    snapshot: watch::Sender<AudioSnapshot>,
    meter: Mutex<LevelMeter>,
    conversation: Conversation,
    initialized: AtomicBool,
    reconfigure_pending: AtomicBool,
    listener: Mutex<Option<Subscription>>,
    pump: Mutex<Option<AbortHandle>>,
}

/// Voice capture state machine. Cheap to clone.
#[derive(Clone)]
pub struct AudioSession {
    inner: Arc<Inner>,
}

impl AudioSession {
    /// Create a session. `events` is the backend's notification channel.
    pub fn new(
        transport: Arc<dyn Transport>,
        backend: Arc<dyn CaptureBackend>,
        events: mpsc::Receiver<CaptureEvent>,
        mic_config: MicConfig,
    ) -> Self {
        let snapshot = AudioSnapshot {
            mic_config,
            ..AudioSnapshot::default()
        };
        Self {
            inner: Arc::new(Inner {
                transport,
                backend,
                events: Mutex::new(Some(events)),
                snapshot: watch::Sender::new(snapshot),
                meter: Mutex::new(LevelMeter::new()),
                conversation: Conversation::new(),
                initialized: AtomicBool::new(false),
                reconfigure_pending: AtomicBool::new(false),
                listener: Mutex::new(None),
                pump: Mutex::new(None),
            }),
        }
    }

    /// Wire up agent messages and backend events, fetch the conversation,
    /// then bring the backend up. Later calls do nothing.
    pub async fn init(&self) -> Result<(), VoiceError> {
        if self.inner.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let weak = Arc::downgrade(&self.inner);
        let subscription = self.inner.transport.registry().add_listener(move |envelope| {
            if let Some(inner) = weak.upgrade() {
                inner.on_envelope(envelope);
            }
        });
        *self.inner.listener.lock() = Some(subscription);

        let fetch = Envelope::new(kinds::AUDIO, SERVER_APP).with_request("fetch");
        if let Err(err) = self.inner.transport.send(fetch).await {
            warn!(error = %err, "could not request audio state");
        }

        if let Some(events) = self.inner.events.lock().take() {
            let task = tokio::spawn(pump(Arc::downgrade(&self.inner), events));
            *self.inner.pump.lock() = Some(task.abort_handle());
        }

        self.inner.backend.retry().await?;
        let config = self.inner.snapshot.borrow().mic_config;
        self.inner.backend.configure(config).await
    }

    /// Open the microphone and show the overlay.
    pub async fn start(&self) -> Result<(), VoiceError> {
        self.inner.start().await
    }

    /// Close the microphone. The overlay stays up.
    pub async fn stop(&self) -> Result<(), VoiceError> {
        self.inner.stop().await
    }

    /// Stop, then hide the overlay.
    pub async fn close(&self) -> Result<(), VoiceError> {
        let result = self.inner.stop().await;
        let _ = self.inner.snapshot.send_if_modified(|s| {
            let was = s.agent_visible;
            s.agent_visible = false;
            was
        });
        result
    }

    /// Stop when listening, start otherwise.
    pub async fn toggle(&self) -> Result<(), VoiceError> {
        if self.status() == AudioStatus::Listening {
            self.inner.stop().await
        } else {
            self.inner.start().await
        }
    }

    /// Re-establish the backend unless a capture is in progress.
    pub async fn retry_backend(&self) -> Result<(), VoiceError> {
        if self.status() == AudioStatus::Listening {
            debug!("backend retry skipped while listening");
            return Ok(());
        }
        self.inner.backend.retry().await
    }

    /// Apply `config` (or re-apply the current one).
    ///
    /// While listening the new format is stored and applied once the
    /// microphone closes.
    pub async fn reconfigure(&self, config: Option<MicConfig>) -> Result<(), VoiceError> {
        if let Some(config) = config {
            let _ = self.inner.snapshot.send_if_modified(|s| {
                let changed = s.mic_config != config;
                s.mic_config = config;
                changed
            });
        }
        if self.status() == AudioStatus::Listening {
            debug!("mic reconfiguration deferred until capture stops");
            self.inner.reconfigure_pending.store(true, Ordering::SeqCst);
            return Ok(());
        }
        self.inner.reconfigure_pending.store(false, Ordering::SeqCst);
        let config = self.inner.snapshot.borrow().mic_config;
        self.inner.backend.configure(config).await
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> AudioSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    /// Watch the session state.
    pub fn subscribe(&self) -> watch::Receiver<AudioSnapshot> {
        self.inner.snapshot.subscribe()
    }

    /// Current capture status.
    pub fn status(&self) -> AudioStatus {
        self.inner.snapshot.borrow().status
    }

    /// Agent conversation fed by this session's listener.
    pub fn conversation(&self) -> &Conversation {
        &self.inner.conversation
    }

    /// Remove the agent listener and stop draining backend events.
    pub fn shutdown(&self) {
        if let Some(subscription) = self.inner.listener.lock().take() {
            subscription.remove();
        }
        if let Some(pump) = self.inner.pump.lock().take() {
            pump.abort();
        }
    }
}

impl Inner {
    async fn start(&self) -> Result<(), VoiceError> {
        self.backend.open_mic().await?;
        let announced = self
            .transport
            .send(Envelope::new(kinds::AUDIO, SERVER_APP).with_request("start"))
            .await;
        if let Err(err) = announced {
            if let Err(close) = self.backend.close_mic().await {
                warn!(error = %close, "could not close mic after failed start");
            }
            return Err(err.into());
        }
        let _ = self.snapshot.send_if_modified(|s| {
            let was = s.agent_visible;
            s.agent_visible = true;
            !was
        });
        info!("voice capture started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), VoiceError> {
        self.backend.close_mic().await?;
        if self.reconfigure_pending.swap(false, Ordering::SeqCst) {
            let config = self.snapshot.borrow().mic_config;
            self.backend.configure(config).await?;
        }
        self.transport
            .send(Envelope::new(kinds::AUDIO, SERVER_APP).with_request("end"))
            .await?;
        info!("voice capture stopped");
        Ok(())
    }

    fn on_envelope(self: Arc<Self>, envelope: &Envelope) {
        let Some(DeviceMessage::Agent { request, payload }) = DeviceMessage::classify(envelope)
        else {
            return;
        };
        match request.as_str() {
            "response" => match AgentMessage::from_value(payload) {
                Ok(message) => self.conversation.add(message),
                Err(err) => warn!(error = %err, "malformed agent response"),
            },
            "context" => match payload {
                Value::Array(items) => {
                    let messages = items
                        .into_iter()
                        .filter_map(|item| AgentMessage::from_value(item).ok())
                        .collect();
                    self.conversation.set_context(messages);
                }
                _ => warn!("agent context is not a list"),
            },
            "token" => {
                let id = payload.get("messageId").and_then(Value::as_str);
                let token = payload.get("token").and_then(Value::as_str);
                if let (Some(id), Some(token)) = (id, token) {
                    self.conversation.add_token(id, token);
                }
            }
            "disconnect" => {
                drop(tokio::spawn(async move {
                    if let Err(err) = self.stop().await {
                        warn!(error = %err, "stop after agent disconnect failed");
                    }
                }));
            }
            other => debug!(request = other, "unhandled agent request"),
        }
    }

    fn on_packet(&self, chunk: &[u8]) {
        let level = self.meter.lock().analyze_chunk(chunk);
        self.snapshot.send_modify(|s| s.current_level = level);
    }

    fn on_state(&self, state: MicState) {
        let _ = self.snapshot.send_if_modified(|s| {
            if state.status != s.status && !s.status.can_transition_to(state.status) {
                warn!(from = %s.status, to = %state.status, "ignoring invalid capture transition");
                return false;
            }
            s.status = state.status;
            s.backend_kind = state.backend;
            s.chunk_count = state.audio_chunks;
            s.byte_count = state.bytes_received;
            if let Some(config) = state.config {
                s.mic_config = config;
            }
            if state.status == AudioStatus::Error {
                warn!(error = state.error.as_deref().unwrap_or("unknown"), "capture backend error");
                s.last_error = state.error;
            }
            true
        });
    }
}

async fn pump(inner: Weak<Inner>, mut events: mpsc::Receiver<CaptureEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        match event {
            CaptureEvent::Packet(chunk) => {
                inner.on_packet(&chunk);
                if let Err(err) = inner.transport.send_binary(chunk).await {
                    debug!(error = %err, "audio chunk dropped");
                }
            }
            CaptureEvent::State(state) => inner.on_state(state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use bytes::Bytes;
    use serde_json::json;
    use thinclient_core::CLIENT_APP;
    use thinclient_transport::testing::RecordingTransport;

    #[derive(Default)]
    struct FakeBackend {
        calls: Mutex<Vec<String>>,
        fail_open: AtomicBool,
    }

    impl FakeBackend {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl CaptureBackend for FakeBackend {
        async fn retry(&self) -> Result<(), VoiceError> {
            self.calls.lock().push("retry".into());
            Ok(())
        }
        async fn configure(&self, config: MicConfig) -> Result<(), VoiceError> {
            self.calls.lock().push(format!("configure:{}", config.sample_rate));
            Ok(())
        }
        async fn open_mic(&self) -> Result<(), VoiceError> {
            if self.fail_open.load(Ordering::SeqCst) {
                return Err(VoiceError::Backend("no mic".into()));
            }
            self.calls.lock().push("open".into());
            Ok(())
        }
        async fn close_mic(&self) -> Result<(), VoiceError> {
            self.calls.lock().push("close".into());
            Ok(())
        }
    }

    struct Harness {
        session: AudioSession,
        transport: Arc<RecordingTransport>,
        backend: Arc<FakeBackend>,
        events: mpsc::Sender<CaptureEvent>,
    }

    fn harness() -> Harness {
        let transport = Arc::new(RecordingTransport::new());
        let backend = Arc::new(FakeBackend::default());
        let (tx, rx) = mpsc::channel(16);
        let session = AudioSession::new(
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::clone(&backend) as Arc<dyn CaptureBackend>,
            rx,
            MicConfig::default(),
        );
        Harness {
            session,
            transport,
            backend,
            events: tx,
        }
    }

    fn state(status: AudioStatus) -> CaptureEvent {
        CaptureEvent::State(MicState {
            backend: Some("native".into()),
            status,
            ..MicState::default()
        })
    }

    async fn settle(session: &AudioSession, want: impl Fn(&AudioSnapshot) -> bool) {
        let mut rx = session.subscribe();
        let _ = rx.wait_for(|s| want(s)).await.unwrap();
    }

    fn requests(transport: &RecordingTransport) -> Vec<String> {
        transport
            .sent()
            .into_iter()
            .filter(|e| e.kind == kinds::AUDIO)
            .filter_map(|e| e.request)
            .collect()
    }

    #[tokio::test]
    async fn init_fetches_then_brings_backend_up_once() {
        let h = harness();
        h.session.init().await.unwrap();
        h.session.init().await.unwrap();
        assert_eq!(requests(&h.transport), vec!["fetch"]);
        assert_eq!(h.backend.calls(), vec!["retry", "configure:16000"]);
        assert_eq!(h.transport.registry().listener_count(), 1);
    }

    #[tokio::test]
    async fn start_stop_close_cycle() {
        let h = harness();
        h.session.init().await.unwrap();

        h.session.start().await.unwrap();
        assert!(h.session.snapshot().agent_visible);
        h.session.stop().await.unwrap();
        assert!(h.session.snapshot().agent_visible);
        h.session.close().await.unwrap();
        assert!(!h.session.snapshot().agent_visible);

        assert_eq!(requests(&h.transport), vec!["fetch", "start", "end", "end"]);
    }

    #[tokio::test]
    async fn failed_open_sends_nothing() {
        let h = harness();
        h.backend.fail_open.store(true, Ordering::SeqCst);
        assert_matches!(h.session.start().await, Err(VoiceError::Backend(_)));
        assert!(requests(&h.transport).is_empty());
        assert!(!h.session.snapshot().agent_visible);
    }

    #[tokio::test]
    async fn send_without_connection_is_reported() {
        let h = harness();
        h.transport.set_connected(false);
        assert_matches!(h.session.start().await, Err(VoiceError::Transport(_)));
        assert_eq!(h.backend.calls(), vec!["open", "close"]);
        assert!(!h.session.snapshot().agent_visible);
    }

    #[tokio::test]
    async fn backend_states_drive_status() {
        let h = harness();
        h.session.init().await.unwrap();
        for status in [AudioStatus::Connecting, AudioStatus::Connected, AudioStatus::Listening] {
            h.events.send(state(status)).await.unwrap();
        }
        settle(&h.session, |s| s.status == AudioStatus::Listening).await;
        assert_eq!(h.session.snapshot().backend_kind.as_deref(), Some("native"));

        h.session.toggle().await.unwrap();
        assert_eq!(h.backend.calls().last().map(String::as_str), Some("close"));
    }

    #[tokio::test]
    async fn invalid_transition_is_ignored() {
        let h = harness();
        h.session.init().await.unwrap();
        h.events.send(state(AudioStatus::Listening)).await.unwrap();
        h.events.send(state(AudioStatus::Connecting)).await.unwrap();
        settle(&h.session, |s| s.status == AudioStatus::Connecting).await;
        assert!(h.session.snapshot().backend_kind.is_some());
    }

    #[tokio::test]
    async fn error_report_records_last_error() {
        let h = harness();
        h.session.init().await.unwrap();
        h.events
            .send(CaptureEvent::State(MicState {
                status: AudioStatus::Error,
                error: Some("permission denied".into()),
                ..MicState::default()
            }))
            .await
            .unwrap();
        settle(&h.session, |s| s.status == AudioStatus::Error).await;
        assert_eq!(h.session.snapshot().last_error.as_deref(), Some("permission denied"));
    }

    #[tokio::test]
    async fn packets_are_sent_unmodified_and_metered() {
        let h = harness();
        h.session.init().await.unwrap();
        let chunk: Vec<u8> = [4_000_i16; 32].iter().flat_map(|s| s.to_le_bytes()).collect();
        let quiet: Vec<u8> = [10_i16; 32].iter().flat_map(|s| s.to_le_bytes()).collect();
        h.events.send(CaptureEvent::Packet(Bytes::from(quiet.clone()))).await.unwrap();
        h.events.send(CaptureEvent::Packet(Bytes::from(chunk.clone()))).await.unwrap();
        settle(&h.session, |s| s.current_level > 0.5).await;
        while h.transport.binaries().len() < 2 {
            tokio::task::yield_now().await;
        }
        assert_eq!(h.transport.binaries(), vec![Bytes::from(quiet), Bytes::from(chunk)]);
    }

    #[tokio::test]
    async fn listening_session_survives_retry_and_reconfigure() {
        let h = harness();
        h.session.init().await.unwrap();
        for status in [AudioStatus::Connecting, AudioStatus::Connected, AudioStatus::Listening] {
            h.events.send(state(status)).await.unwrap();
        }
        settle(&h.session, |s| s.status == AudioStatus::Listening).await;
        let before = h.backend.calls().len();

        h.session.retry_backend().await.unwrap();
        let config = MicConfig {
            sample_rate: 48_000,
            ..MicConfig::default()
        };
        h.session.reconfigure(Some(config)).await.unwrap();
        assert_eq!(h.backend.calls().len(), before);
        assert_eq!(h.session.snapshot().mic_config.sample_rate, 48_000);

        h.session.stop().await.unwrap();
        assert_eq!(
            h.backend.calls()[before..],
            ["close".to_owned(), "configure:48000".to_owned()]
        );
    }

    #[tokio::test]
    async fn agent_messages_feed_conversation() {
        let h = harness();
        h.session.init().await.unwrap();
        let registry = h.transport.registry();
        registry.emit(
            &Envelope::new(kinds::AGENT, CLIENT_APP)
                .with_request("response")
                .with_payload(json!({"type": "text", "messageId": "m1", "message": "Hi"})),
        );
        registry.emit(
            &Envelope::new(kinds::AGENT, CLIENT_APP)
                .with_request("token")
                .with_payload(json!({"messageId": "m1", "token": " there"})),
        );
        registry.emit(
            &Envelope::new(kinds::AGENT, "weather")
                .with_request("response")
                .with_payload(json!({"type": "text", "message": "ignored"})),
        );
        let log = h.session.conversation().snapshot();
        assert_eq!(log.responses.len(), 1);
        assert_eq!(log.responses[0].message, "Hi there");

        registry.emit(
            &Envelope::new(kinds::AGENT, CLIENT_APP)
                .with_request("context")
                .with_payload(json!([
                    {"type": "text", "message": "a"},
                    {"type": "status", "message": "b"}
                ])),
        );
        assert_eq!(h.session.conversation().snapshot().responses.len(), 1);
        assert_eq!(h.session.conversation().snapshot().responses[0].message, "a");
    }

    #[tokio::test]
    async fn agent_disconnect_stops_capture() {
        let h = harness();
        h.session.init().await.unwrap();
        h.transport
            .registry()
            .emit(&Envelope::new(kinds::AGENT, CLIENT_APP).with_request("disconnect"));
        while !requests(&h.transport).contains(&"end".to_owned()) {
            tokio::task::yield_now().await;
        }
        assert!(h.backend.calls().contains(&"close".to_owned()));
    }

    #[tokio::test]
    async fn shutdown_detaches_listener() {
        let h = harness();
        h.session.init().await.unwrap();
        h.session.shutdown();
        assert_eq!(h.transport.registry().listener_count(), 0);
    }
}
