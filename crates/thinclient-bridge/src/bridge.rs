//! Per-sandbox bridge.
//!
//! A mounted bridge ties one surface to the device:
//!
//! - surface → device: origin check, then classification of the message
//!   into binary data, a local request, or a payload relayed to the backend
//! - device → surface: state changes, backend envelopes addressed to this
//!   app, and binary frames tagged with this app's id
//!
//! Unmounting flips a liveness flag, cancels the push task and drops every
//! listener the bridge registered. The flag is re-checked after each await,
//! so nothing is sent or posted once the bridge is gone.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value;
use thinclient_core::envelope::kinds;
use thinclient_core::logging::LogLevel;
use thinclient_core::messages::LogRequest;
use thinclient_core::{CLIENT_APP, Envelope, GetRequest, SandboxAction, frame};
use thinclient_settings::{BridgeSettings, ConnectionConfig};
use thinclient_transport::{SubscriptionGuard, Transport};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::errors::BridgeError;
use crate::mapping::MappingService;
use crate::state::{LocalState, LocalStateStore};
use crate::surface::{Surface, SurfaceData, SurfaceEvent, SurfaceMessage, bytes_from_json};

/// Bridge timing.
#[derive(Clone, Debug)]
pub struct BridgeOptions {
    /// Delay after mount before the initial state snapshot is pushed.
    pub initial_snapshot_delay: Duration,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            initial_snapshot_delay: Duration::from_secs(1),
        }
    }
}

impl From<&BridgeSettings> for BridgeOptions {
    fn from(settings: &BridgeSettings) -> Self {
        Self {
            initial_snapshot_delay: Duration::from_millis(settings.initial_snapshot_delay_ms),
        }
    }
}

/// Collaborators shared by every bridge.
#[derive(Clone)]
pub struct BridgeContext {
    /// Backend connection.
    pub transport: Arc<dyn Transport>,
    /// Cached device state.
    pub state: Arc<LocalStateStore>,
    /// Key and action execution.
    pub mapping: Arc<dyn MappingService>,
    /// Backend address; surfaces must come from its HTTP origin.
    pub connection: watch::Receiver<ConnectionConfig>,
    /// Timing.
    pub options: BridgeOptions,
}

struct Inner {
    app: String,
    surface: Arc<dyn Surface>,
    ctx: BridgeContext,
    alive: AtomicBool,
    cancel: CancellationToken,
    guards: Mutex<Vec<SubscriptionGuard>>,
}

/// Bridge between one sandboxed surface and the device. Cheap to clone.
#[derive(Clone)]
pub struct SandboxBridge {
    inner: Arc<Inner>,
}

impl SandboxBridge {
    /// Mount a bridge for `app`. Must be called within a Tokio runtime.
    pub fn mount(app: impl Into<String>, surface: Arc<dyn Surface>, ctx: BridgeContext) -> Self {
        let inner = Arc::new(Inner {
            app: app.into(),
            surface,
            ctx,
            alive: AtomicBool::new(true),
            cancel: CancellationToken::new(),
            guards: Mutex::new(Vec::new()),
        });

        let registry = inner.ctx.transport.registry();
        let weak = Arc::downgrade(&inner);
        let envelopes = registry.add_listener(move |envelope| {
            if let Some(inner) = weak.upgrade() {
                if envelope.is_for(&inner.app) {
                    inner.post(SurfaceMessage::Envelope(envelope.clone()));
                }
            }
        });
        let weak = Arc::downgrade(&inner);
        let frames = registry.add_binary_listener(inner.app.clone(), move |payload| {
            if let Some(inner) = weak.upgrade() {
                inner.post(SurfaceMessage::Binary(payload.clone()));
            }
        });
        inner.guards.lock().extend([envelopes.guard(), frames.guard()]);

        drop(tokio::spawn(push_state(Arc::downgrade(&inner), inner.cancel.clone())));
        info!(app = %inner.app, "bridge mounted");
        Self { inner }
    }

    /// App this bridge serves.
    pub fn app(&self) -> &str {
        &self.inner.app
    }

    /// Whether the bridge is still mounted.
    pub fn is_mounted(&self) -> bool {
        self.inner.is_alive()
    }

    /// Tear down. Idempotent.
    pub fn unmount(&self) {
        if !self.inner.alive.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.cancel.cancel();
        self.inner.guards.lock().clear();
        info!(app = %self.inner.app, "bridge unmounted");
    }

    /// Handle one message from the surface.
    ///
    /// Protocol faults are logged and dropped; only relay failures are
    /// returned.
    pub async fn handle_event(&self, event: SurfaceEvent) -> Result<(), BridgeError> {
        let inner = &self.inner;
        if !inner.is_alive() {
            return Ok(());
        }
        let expected = inner.ctx.connection.borrow().origin();
        if expected.as_deref() != Some(event.origin.as_str()) {
            warn!(app = %inner.app, origin = %event.origin, "discarding message from unexpected origin");
            return Ok(());
        }

        match event.data {
            SurfaceData::Null => {
                warn!(app = %inner.app, "discarding empty surface message");
                Ok(())
            }
            SurfaceData::Bytes(bytes) => inner.send_binary(&bytes).await,
            SurfaceData::Blob(blob) => {
                let bytes = blob.read().await?;
                inner.send_binary(&bytes).await
            }
            SurfaceData::Json(value) => inner.handle_json(value).await,
        }
    }
}

impl Inner {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn post(&self, message: SurfaceMessage) {
        if self.is_alive() {
            self.surface.post(message);
        }
    }

    async fn send_binary(&self, bytes: &Bytes) -> Result<(), BridgeError> {
        if !self.is_alive() {
            debug!(app = %self.app, "bridge gone, dropping binary data");
            return Ok(());
        }
        let frame = frame::encode(&self.app, bytes)?;
        trace!(app = %self.app, len = bytes.len(), "relaying binary data");
        self.ctx.transport.send_binary(frame).await?;
        Ok(())
    }

    async fn handle_json(&self, value: Value) -> Result<(), BridgeError> {
        let kind = value.get("type").and_then(Value::as_str).unwrap_or_default();
        match kind {
            kinds::IFRAME_BINARY => match value.get("payload").and_then(bytes_from_json) {
                Some(bytes) => self.send_binary(&bytes).await,
                None => {
                    warn!(app = %self.app, kind, "binary message without byte payload");
                    Ok(())
                }
            },
            kinds::IFRAME_ACTION => {
                let payload = value.get("payload").cloned().unwrap_or(Value::Null);
                match Envelope::from_value(payload) {
                    Ok(envelope) => self.handle_action(SandboxAction::classify(envelope)).await,
                    Err(err) => {
                        warn!(app = %self.app, kind, error = %err, "discarding malformed action");
                        Ok(())
                    }
                }
            }
            _ => {
                warn!(app = %self.app, kind, "discarding surface message of unknown shape");
                Ok(())
            }
        }
    }

    async fn handle_action(&self, action: SandboxAction) -> Result<(), BridgeError> {
        match action {
            SandboxAction::Get(request) => {
                self.answer(request);
                Ok(())
            }
            SandboxAction::Key(key) => self.ctx.mapping.execute_key(&key.id, key.mode).await,
            SandboxAction::Action(mut action) => {
                // A surface may only act as itself.
                let _ = action.insert("source".into(), Value::String(self.app.clone()));
                self.ctx.mapping.execute_action(action).await
            }
            SandboxAction::Log(request) => {
                self.log(&request);
                Ok(())
            }
            SandboxAction::Forward(inner) => {
                let target = inner.app.clone().unwrap_or_else(|| self.app.clone());
                let payload = serde_json::to_value(&inner).unwrap_or(Value::Null);
                let envelope = Envelope::new(kinds::APP_PAYLOAD, target).with_payload(payload);
                if !self.is_alive() {
                    return Ok(());
                }
                self.ctx.transport.send(envelope).await?;
                Ok(())
            }
            SandboxAction::Unknown(envelope) => {
                warn!(app = %self.app, kind = %envelope.kind, "unknown local request");
                Ok(())
            }
            SandboxAction::Malformed { kind, reason } => {
                warn!(app = %self.app, kind, reason, "discarding malformed local request");
                Ok(())
            }
        }
    }

    fn answer(&self, request: GetRequest) {
        let state = self.ctx.state.snapshot();
        let reply = match request {
            GetRequest::Music => music(&state),
            GetRequest::Settings => Envelope::new(kinds::SETTINGS, CLIENT_APP)
                .with_payload(state.settings_for(&self.app).cloned().unwrap_or(Value::Null)),
            GetRequest::Apps => apps(&state),
            GetRequest::Manifest => {
                Envelope::new(kinds::MANIFEST, CLIENT_APP).with_payload(state.manifest.clone())
            }
            GetRequest::KeyIcon(icon) => {
                let url = self.ctx.mapping.key_url(&icon);
                icon_reply(&icon.id, url)
            }
            GetRequest::ActionIcon(icon) => {
                let url = self.ctx.mapping.action_url(&icon);
                icon_reply(&icon.id, url)
            }
            GetRequest::Unknown(name) => {
                error!(app = %self.app, request = %name, "unknown get request");
                return;
            }
        };
        self.post(SurfaceMessage::Envelope(reply));
    }

    fn log(&self, request: &LogRequest) {
        let data = Value::Array(request.data.clone());
        let (app, message) = (self.app.as_str(), request.message.as_str());
        match request.level {
            LogLevel::Error => error!(target: "surface", app, %data, "{message}"),
            LogLevel::Warn => warn!(target: "surface", app, %data, "{message}"),
            LogLevel::Info => info!(target: "surface", app, %data, "{message}"),
            LogLevel::Debug => debug!(target: "surface", app, %data, "{message}"),
            LogLevel::Trace => trace!(target: "surface", app, %data, "{message}"),
        }
    }

    fn push_initial(&self, state: &LocalState) {
        self.post(SurfaceMessage::Envelope(music(state)));
        if let Some(settings) = state.settings_for(&self.app) {
            self.post(SurfaceMessage::Envelope(settings_push(settings)));
        }
        if !state.time.is_empty() {
            self.post(SurfaceMessage::Envelope(time(state)));
        }
    }

    fn push_changes(&self, before: &LocalState, after: &LocalState) {
        if before.song != after.song && after.song.is_some() {
            self.post(SurfaceMessage::Envelope(music(after)));
        }
        if before.apps != after.apps {
            self.post(SurfaceMessage::Envelope(apps(after)));
        }
        let settings = after.settings_for(&self.app);
        if let Some(settings) = settings.filter(|s| before.settings_for(&self.app) != Some(*s)) {
            self.post(SurfaceMessage::Envelope(settings_push(settings)));
        }
        if before.time != after.time && !after.time.is_empty() {
            self.post(SurfaceMessage::Envelope(time(after)));
        }
    }
}

async fn push_state(inner: Weak<Inner>, cancel: CancellationToken) {
    let (delay, mut updates) = match inner.upgrade() {
        Some(inner) => (
            inner.ctx.options.initial_snapshot_delay,
            inner.ctx.state.subscribe(),
        ),
        None => return,
    };
    let mut last = updates.borrow_and_update().clone();
    let initial = tokio::time::sleep(delay);
    tokio::pin!(initial);
    let mut initial_done = false;

    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            () = &mut initial, if !initial_done => {
                initial_done = true;
                let Some(inner) = inner.upgrade() else { return };
                let current = updates.borrow().clone();
                inner.push_initial(&current);
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    return;
                }
                let Some(inner) = inner.upgrade() else { return };
                let current = updates.borrow_and_update().clone();
                inner.push_changes(&last, &current);
                last = current;
            }
        }
    }
}

fn music(state: &LocalState) -> Envelope {
    let payload = state
        .song
        .as_ref()
        .and_then(|s| serde_json::to_value(s).ok())
        .unwrap_or(Value::Null);
    Envelope::new(kinds::MUSIC, CLIENT_APP).with_payload(payload)
}

fn apps(state: &LocalState) -> Envelope {
    let payload = serde_json::to_value(&state.apps).unwrap_or(Value::Null);
    Envelope::new(kinds::APPS, CLIENT_APP).with_payload(payload)
}

fn settings_push(settings: &Value) -> Envelope {
    Envelope::new(kinds::SETTINGS, CLIENT_APP).with_payload(settings.clone())
}

fn time(state: &LocalState) -> Envelope {
    Envelope::new(kinds::TIME, CLIENT_APP)
        .with_request("set")
        .with_payload(Value::String(state.time.clone()))
}

fn icon_reply(id: &str, url: Option<String>) -> Envelope {
    Envelope::new(id, CLIENT_APP)
        .with_request("set")
        .with_payload(url.map_or(Value::Null, Value::String))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{Map, json};
    use thinclient_core::logging::capture_logs;
    use thinclient_core::messages::IconRequest;
    use thinclient_core::{BinaryFrame, DeviceMessage, EventMode, SongData};
    use thinclient_transport::testing::RecordingTransport;
    use tracing::Level;

    use crate::surface::BlobSource;

    const ORIGIN: &str = "http://10.0.0.2:8891";

    #[derive(Default)]
    struct RecordingSurface(Mutex<Vec<SurfaceMessage>>);

    impl RecordingSurface {
        fn posted(&self) -> Vec<SurfaceMessage> {
            self.0.lock().clone()
        }

        fn kinds(&self) -> Vec<String> {
            self.posted()
                .into_iter()
                .filter_map(|m| match m {
                    SurfaceMessage::Envelope(e) => Some(e.kind),
                    SurfaceMessage::Binary(_) => None,
                })
                .collect()
        }
    }

    impl Surface for RecordingSurface {
        fn post(&self, message: SurfaceMessage) {
            self.0.lock().push(message);
        }
    }

    #[derive(Default)]
    struct RecordingMapping(Mutex<Vec<String>>);

    #[async_trait]
    impl MappingService for RecordingMapping {
        fn key_url(&self, request: &IconRequest) -> Option<String> {
            Some(format!("icon://key/{}", request.id))
        }
        fn action_url(&self, _request: &IconRequest) -> Option<String> {
            None
        }
        async fn execute_key(&self, id: &str, mode: EventMode) -> Result<(), BridgeError> {
            self.0.lock().push(format!("key:{id}:{}", u8::from(mode)));
            Ok(())
        }
        async fn execute_action(&self, action: Map<String, Value>) -> Result<(), BridgeError> {
            self.0.lock().push(format!("action:{}", Value::Object(action)));
            Ok(())
        }
    }

    struct SlowBlob {
        gate: Arc<tokio::sync::Notify>,
    }

    #[async_trait]
    impl BlobSource for SlowBlob {
        async fn read(&self) -> Result<Bytes, BridgeError> {
            self.gate.notified().await;
            Ok(Bytes::from_static(b"late"))
        }
    }

    struct Harness {
        bridge: SandboxBridge,
        surface: Arc<RecordingSurface>,
        transport: Arc<RecordingTransport>,
        state: Arc<LocalStateStore>,
        mapping: Arc<RecordingMapping>,
    }

    fn mount(app: &str) -> Harness {
        let transport = Arc::new(RecordingTransport::new());
        let state = Arc::new(LocalStateStore::new());
        let mapping = Arc::new(RecordingMapping::default());
        let surface = Arc::new(RecordingSurface::default());
        let connection = watch::channel(ConnectionConfig::new("10.0.0.2", 8891)).1;
        let ctx = BridgeContext {
            transport: Arc::clone(&transport) as Arc<dyn Transport>,
            state: Arc::clone(&state),
            mapping: Arc::clone(&mapping) as Arc<dyn MappingService>,
            connection,
            options: BridgeOptions::default(),
        };
        let bridge = SandboxBridge::mount(app, Arc::clone(&surface) as Arc<dyn Surface>, ctx);
        Harness {
            bridge,
            surface,
            transport,
            state,
            mapping,
        }
    }

    fn action(inner: Value) -> SurfaceEvent {
        SurfaceEvent::json(ORIGIN, json!({"type": "IFRAME_ACTION", "payload": inner}))
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn foreign_origin_is_discarded() {
        let (logs, _guard) = capture_logs();
        let h = mount("weather");
        h.bridge
            .handle_event(SurfaceEvent::bytes("http://evil:1", vec![1_u8]))
            .await
            .unwrap();
        assert!(h.transport.binaries().is_empty());
        assert!(logs.has_event(Level::WARN, "unexpected origin"));
    }

    #[tokio::test]
    async fn raw_bytes_are_framed_with_app_id() {
        let h = mount("weather");
        h.bridge.handle_event(SurfaceEvent::bytes(ORIGIN, vec![9_u8, 8])).await.unwrap();
        h.bridge
            .handle_event(SurfaceEvent::json(ORIGIN, json!({"type": "IFRAME_BINARY", "payload": [7]})))
            .await
            .unwrap();

        let frames: Vec<BinaryFrame> = h
            .transport
            .binaries()
            .into_iter()
            .map(|b| frame::decode(b).unwrap())
            .collect();
        assert_eq!(frames[0], BinaryFrame::new("weather", vec![9_u8, 8]));
        assert_eq!(frames[1], BinaryFrame::new("weather", vec![7_u8]));
    }

    #[tokio::test]
    async fn null_and_unknown_shapes_are_discarded() {
        let (logs, _guard) = capture_logs();
        let h = mount("weather");
        h.bridge
            .handle_event(SurfaceEvent {
                origin: ORIGIN.into(),
                data: SurfaceData::Null,
            })
            .await
            .unwrap();
        h.bridge.handle_event(SurfaceEvent::json(ORIGIN, json!({"hello": 1}))).await.unwrap();
        h.bridge.handle_event(action(json!("not an envelope"))).await.unwrap();
        assert!(h.transport.sent().is_empty());
        assert!(h.transport.binaries().is_empty());
        assert_eq!(logs.count_at_level(Level::WARN), 3);
    }

    #[tokio::test]
    async fn get_requests_answer_from_local_state() {
        let h = mount("weather");
        let mut settings = Map::new();
        let _ = settings.insert("weather".into(), json!({"units": "c"}));
        let _ = h.state.apply(DeviceMessage::Settings(settings));
        h.surface.0.lock().clear();

        for request in ["music", "settings", "apps", "manifest"] {
            h.bridge
                .handle_event(action(json!({"type": "get", "app": "client", "request": request})))
                .await
                .unwrap();
        }
        h.bridge
            .handle_event(action(
                json!({"type": "get", "app": "client", "request": "key", "payload": {"id": "Enter"}}),
            ))
            .await
            .unwrap();

        let posted = h.surface.posted();
        let kinds: Vec<_> = h.surface.kinds();
        assert_eq!(kinds, vec!["music", "settings", "apps", "manifest", "Enter"]);
        assert_matches::assert_matches!(
            &posted[1],
            SurfaceMessage::Envelope(e) if e.payload == Some(json!({"units": "c"}))
        );
        assert_matches::assert_matches!(
            &posted[4],
            SurfaceMessage::Envelope(e) if e.payload == Some(json!("icon://key/Enter"))
                && e.request.as_deref() == Some("set")
        );
        assert!(h.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn unknown_get_is_logged_as_error() {
        let (logs, _guard) = capture_logs();
        let h = mount("weather");
        h.bridge
            .handle_event(action(json!({"type": "get", "app": "client", "request": "weather"})))
            .await
            .unwrap();
        assert!(logs.has_event(Level::ERROR, "unknown get request"));
        assert!(h.surface.posted().is_empty());
    }

    #[tokio::test]
    async fn key_and_action_go_to_mapping() {
        let h = mount("weather");
        h.bridge
            .handle_event(action(
                json!({"type": "key", "app": "client", "payload": {"id": "Enter", "mode": 10}}),
            ))
            .await
            .unwrap();
        h.bridge
            .handle_event(action(
                json!({"type": "action", "app": "client", "payload": {"id": "skip", "source": "spoof"}}),
            ))
            .await
            .unwrap();
        let calls = h.mapping.0.lock().clone();
        assert_eq!(calls[0], "key:Enter:10");
        assert!(calls[1].contains(r#""source":"weather""#), "{}", calls[1]);
    }

    #[tokio::test]
    async fn log_requests_reach_tracing() {
        let (logs, _guard) = capture_logs();
        let h = mount("weather");
        h.bridge
            .handle_event(action(json!({
                "type": "log", "app": "client", "request": "warn",
                "payload": {"message": "low battery", "data": [12]}
            })))
            .await
            .unwrap();
        let event = logs
            .events()
            .into_iter()
            .find(|e| e.message.contains("low battery"))
            .unwrap();
        assert_eq!(event.level, Level::WARN);
        assert_eq!(event.field("app"), Some("weather"));
    }

    #[tokio::test]
    async fn other_apps_are_wrapped_as_app_payload() {
        let h = mount("weather");
        h.bridge
            .handle_event(action(json!({"type": "refresh", "app": "spotify"})))
            .await
            .unwrap();
        h.bridge.handle_event(action(json!({"type": "refresh"}))).await.unwrap();

        let sent = h.transport.sent();
        assert_eq!(sent[0].kind, "app_payload");
        assert_eq!(sent[0].app.as_deref(), Some("spotify"));
        assert_eq!(sent[0].payload.as_ref().unwrap()["type"], "refresh");
        assert_eq!(sent[1].app.as_deref(), Some("weather"));
    }

    #[tokio::test]
    async fn backend_traffic_for_this_app_is_forwarded() {
        let h = mount("weather");
        let registry = h.transport.registry();
        registry.emit(&Envelope::new("forecast", "weather").with_payload(json!({"t": 20})));
        registry.emit(&Envelope::new("forecast", "spotify"));
        registry.emit_binary(&BinaryFrame::new("weather", vec![1_u8, 2]));
        registry.emit_binary(&BinaryFrame::new("spotify", vec![3_u8]));

        let posted = h.surface.posted();
        assert_eq!(posted.len(), 2);
        assert_matches::assert_matches!(&posted[0], SurfaceMessage::Envelope(e) if e.kind == "forecast");
        assert_eq!(posted[1], SurfaceMessage::Binary(Bytes::from_static(&[1, 2])));
    }

    #[tokio::test(start_paused = true)]
    async fn pushes_initial_snapshot_after_delay_then_changes() {
        let h = mount("weather");
        settle().await;
        h.state.set_time("3:07 PM".into());
        settle().await;
        assert_eq!(h.surface.kinds(), vec!["time"]);

        tokio::time::sleep(Duration::from_millis(1_001)).await;
        settle().await;
        assert_eq!(h.surface.kinds(), vec!["time", "music", "time"]);

        let _ = h.state.apply(DeviceMessage::Music(SongData {
            track_name: Some("A".into()),
            ..SongData::default()
        }));
        let _ = h.state.apply(DeviceMessage::Apps(vec![]));
        settle().await;
        assert_eq!(h.surface.kinds().last().map(String::as_str), Some("music"));
    }

    #[tokio::test]
    async fn unmount_detaches_everything() {
        let h = mount("weather");
        assert_eq!(h.transport.registry().listener_count(), 1);
        h.bridge.unmount();
        h.bridge.unmount();
        assert!(!h.bridge.is_mounted());
        assert_eq!(h.transport.registry().listener_count(), 0);

        h.transport.registry().emit(&Envelope::new("forecast", "weather"));
        h.state.set_time("12:00".into());
        settle().await;
        h.bridge.handle_event(SurfaceEvent::bytes(ORIGIN, vec![1_u8])).await.unwrap();
        assert!(h.surface.posted().is_empty());
        assert!(h.transport.binaries().is_empty());
    }

    #[tokio::test]
    async fn unmount_during_dispatch_suppresses_delivery() {
        let transport = Arc::new(RecordingTransport::new());
        let slot: Arc<Mutex<Option<SandboxBridge>>> = Arc::new(Mutex::new(None));
        let killer = Arc::clone(&slot);
        let _sub = transport.registry().add_listener(move |_| {
            if let Some(bridge) = killer.lock().as_ref() {
                bridge.unmount();
            }
        });
        let surface = Arc::new(RecordingSurface::default());
        let (_tx, connection) = watch::channel(ConnectionConfig::new("10.0.0.2", 8891));
        let bridge = SandboxBridge::mount(
            "weather",
            Arc::clone(&surface) as Arc<dyn Surface>,
            BridgeContext {
                transport: Arc::clone(&transport) as Arc<dyn Transport>,
                state: Arc::new(LocalStateStore::new()),
                mapping: Arc::new(RecordingMapping::default()),
                connection,
                options: BridgeOptions::default(),
            },
        );
        *slot.lock() = Some(bridge);

        transport.registry().emit(&Envelope::new("forecast", "weather"));
        assert!(surface.posted().is_empty());
    }

    #[tokio::test]
    async fn blob_completing_after_unmount_sends_nothing() {
        let h = mount("weather");
        let gate = Arc::new(tokio::sync::Notify::new());
        let blob = SlowBlob {
            gate: Arc::clone(&gate),
        };

        let bridge = h.bridge.clone();
        let pending = tokio::spawn(async move {
            bridge
                .handle_event(SurfaceEvent {
                    origin: ORIGIN.into(),
                    data: SurfaceData::Blob(Box::new(blob)),
                })
                .await
        });
        settle().await;
        h.bridge.unmount();
        gate.notify_one();
        pending.await.unwrap().unwrap();
        assert!(h.transport.binaries().is_empty());
    }
}
