//! Service wiring.
//!
//! Every long-lived service is built here once and handed to the others
//! explicitly. Configuration flows one way: the settings store publishes the
//! backend address and client id, and the connection follows them.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thinclient_bridge::{
    BridgeContext, BridgeOptions, LocalStateStore, MappingService, SandboxBridge, ServerMapping,
    SurfaceEvent,
};
use thinclient_input::{ButtonTracker, KeyRegistry, Navigator};
use thinclient_settings::{SettingsStore, ThinClientSettings};
use thinclient_transport::{
    BackoffPolicy, ConnectionManager, ConnectionOptions, SubscriptionGuard, Transport,
};
use thinclient_voice::AudioSession;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::headless::{Command, LogSurface, SilentCapture, VoiceVerb};
use crate::view::{BUILTIN_VIEWS, DASHBOARD, ViewTracker};

/// All services of one running device.
pub struct AppContext {
    /// Settings and the values the connection follows.
    pub settings: Arc<SettingsStore>,
    /// Backend connection.
    pub connection: ConnectionManager,
    /// Cached device state.
    pub state: Arc<LocalStateStore>,
    /// Key handlers and the default mapping.
    pub keys: Arc<KeyRegistry>,
    /// Long-press detection.
    pub buttons: ButtonTracker,
    /// Current view.
    pub views: Arc<ViewTracker>,
    /// Voice capture.
    pub audio: AudioSession,
    bridge_ctx: BridgeContext,
    bridge: Mutex<Option<SandboxBridge>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    guards: Mutex<Vec<SubscriptionGuard>>,
}

impl AppContext {
    /// Build every service from loaded settings. Nothing runs yet.
    pub fn new(settings: ThinClientSettings) -> Arc<Self> {
        let store = Arc::new(SettingsStore::new(settings.clone()));
        let connection = ConnectionManager::new(
            store.client_id(),
            ConnectionOptions {
                backoff: BackoffPolicy::from(&settings.reconnect),
                ..ConnectionOptions::default()
            },
        );
        let transport: Arc<dyn Transport> = Arc::new(connection.clone());

        let views = Arc::new(ViewTracker::new(Arc::clone(&transport)));
        let keys = Arc::new(KeyRegistry::new(Arc::clone(&views) as Arc<dyn Navigator>));
        let buttons = ButtonTracker::new(
            Arc::clone(&keys),
            Duration::from_millis(settings.input.long_press_ms),
        );

        let (capture, capture_events) = SilentCapture::new();
        let audio = AudioSession::new(
            Arc::clone(&transport),
            Arc::new(capture),
            capture_events,
            settings.audio,
        );

        let state = Arc::new(LocalStateStore::new());
        let mapping: Arc<dyn MappingService> = Arc::new(ServerMapping::new(
            Arc::clone(&transport),
            store.subscribe_connection(),
        ));
        let bridge_ctx = BridgeContext {
            transport,
            state: Arc::clone(&state),
            mapping,
            connection: store.subscribe_connection(),
            options: BridgeOptions::from(&settings.bridge),
        };

        Arc::new(Self {
            settings: store,
            connection,
            state,
            keys,
            buttons,
            views,
            audio,
            bridge_ctx,
            bridge: Mutex::new(None),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            guards: Mutex::new(Vec::new()),
        })
    }

    /// Start the background services and show the dashboard.
    pub async fn start(self: &Arc<Self>) {
        let settings = self.settings.snapshot();
        let transport: Arc<dyn Transport> = Arc::new(self.connection.clone());

        let state_feed = self.state.attach(transport);
        let state = Arc::clone(&self.state);
        let status_feed = self
            .connection
            .add_status_listener(move |status| state.on_connection_status(*status));
        self.guards
            .lock()
            .extend([state_feed.guard(), status_feed.guard()]);

        let tasks = [
            self.connection.follow_config(self.settings.subscribe_connection()),
            self.connection.follow_client_id(self.settings.subscribe_client_id()),
            self.state.spawn_clock(
                Duration::from_millis(settings.bridge.clock_interval_ms),
                settings.bridge.use_24_hour_clock,
                self.cancel.clone(),
            ),
            tokio::spawn(Arc::clone(self).follow_views()),
            self.spawn_status_log(),
        ];
        self.tasks.lock().extend(tasks);

        if let Err(err) = self.audio.init().await {
            warn!(error = %err, "voice capture unavailable");
        }
        self.views.navigate(DASHBOARD);
    }

    fn spawn_status_log(&self) -> JoinHandle<()> {
        let mut status = self.connection.subscribe_status();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    changed = status.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        info!(status = %*status.borrow_and_update(), "connection status");
                    }
                }
            }
        })
    }

    async fn follow_views(self: Arc<Self>) {
        let mut views = self.views.subscribe();
        loop {
            let current = views.borrow_and_update().current.clone();
            self.mount_for(current.as_deref());
            tokio::select! {
                () = self.cancel.cancelled() => return,
                changed = views.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }

    fn mount_for(&self, view: Option<&str>) {
        let mut slot = self.bridge.lock();
        if slot.as_ref().map(SandboxBridge::app) == view {
            return;
        }
        if let Some(previous) = slot.take() {
            previous.unmount();
        }
        let Some(app) = view.filter(|v| !BUILTIN_VIEWS.contains(v)) else {
            return;
        };
        let surface = Arc::new(LogSurface::new(app));
        *slot = Some(SandboxBridge::mount(app, surface, self.bridge_ctx.clone()));
    }

    /// Apply one stdin command. Returns `false` when the device should exit.
    pub async fn execute(&self, command: Command) -> bool {
        match command {
            Command::View(name) => self.views.navigate(&name),
            Command::Press(code) => {
                self.buttons.key_down(&code);
                self.buttons.key_up(&code);
            }
            Command::Key { code, down: true } => self.buttons.key_down(&code),
            Command::Key { code, down: false } => self.buttons.key_up(&code),
            Command::Wheel(dx, dy) => {
                self.buttons.wheel(dx, dy);
                info!(position = self.keys.wheel_position(), "wheel");
            }
            Command::Voice(verb) => {
                let result = match verb {
                    VoiceVerb::Start => self.audio.start().await,
                    VoiceVerb::Stop => self.audio.stop().await,
                    VoiceVerb::Toggle => self.audio.toggle().await,
                    VoiceVerb::Close => self.audio.close().await,
                };
                if let Err(err) = result {
                    warn!(error = %err, ?verb, "voice command failed");
                }
            }
            Command::Post(value) => self.post_from_surface(value).await,
            Command::Reconnect => self.connection.reconnect().await,
            Command::Status => {
                let audio = self.audio.snapshot();
                let view = self.views.current();
                info!(
                    connection = %self.connection.status(),
                    view = view.as_deref().unwrap_or("-"),
                    audio = %audio.status,
                    level = audio.current_level,
                    "status"
                );
            }
            Command::Quit => return false,
        }
        true
    }

    async fn post_from_surface(&self, value: serde_json::Value) {
        let bridge = self.bridge.lock().clone();
        let Some(bridge) = bridge else {
            warn!("no app surface is mounted");
            return;
        };
        let Some(origin) = self.settings.connection().origin() else {
            warn!("backend address unknown; surface origin cannot be derived");
            return;
        };
        if let Err(err) = bridge.handle_event(SurfaceEvent::json(origin, value)).await {
            warn!(app = bridge.app(), error = %err, "surface message not relayed");
        }
    }

    /// Stop every service.
    pub async fn shutdown(&self) {
        info!("shutting down");
        self.cancel.cancel();
        if let Some(bridge) = self.bridge.lock().take() {
            bridge.unmount();
        }
        if let Err(err) = self.audio.close().await {
            debug!(error = %err, "voice close during shutdown");
        }
        self.audio.shutdown();
        self.guards.lock().clear();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.connection.disconnect().await;
    }
}
