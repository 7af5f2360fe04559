//! Cached device state.
//!
//! Backend envelopes addressed to the device update one [`LocalState`]
//! published through a `watch` channel. Bridges subscribe and push the parts
//! their surface cares about.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, TimeZone};
use serde_json::{Map, Value};
use thinclient_core::envelope::kinds;
use thinclient_core::messages::AppInfo;
use thinclient_core::{DeviceMessage, Envelope, SERVER_APP, SongData};
use thinclient_transport::{ConnectionStatus, Subscription, Transport};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Everything the device caches for its surfaces.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LocalState {
    /// Current track.
    pub song: Option<SongData>,
    /// Settings keyed by app name.
    pub app_settings: Map<String, Value>,
    /// Installed apps.
    pub apps: Vec<AppInfo>,
    /// Device manifest.
    pub manifest: Value,
    /// Formatted wall-clock time; empty until the clock first ticks.
    pub time: String,
}

impl LocalState {
    /// Settings of one app.
    pub fn settings_for(&self, app: &str) -> Option<&Value> {
        self.app_settings.get(app)
    }
}

/// Format `now` the way surfaces display it.
pub fn format_clock<Tz: TimeZone>(now: &DateTime<Tz>, twenty_four_hour: bool) -> String
where
    Tz::Offset: std::fmt::Display,
{
    if twenty_four_hour {
        now.format("%H:%M").to_string()
    } else {
        now.format("%-I:%M %p").to_string()
    }
}

/// Observable [`LocalState`].
pub struct LocalStateStore {
    state: watch::Sender<LocalState>,
}

impl Default for LocalStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalStateStore {
    /// Empty store.
    pub fn new() -> Self {
        Self {
            state: watch::Sender::new(LocalState::default()),
        }
    }

    /// Current state.
    pub fn snapshot(&self) -> LocalState {
        self.state.borrow().clone()
    }

    /// Watch for changes.
    pub fn subscribe(&self) -> watch::Receiver<LocalState> {
        self.state.subscribe()
    }

    /// Apply one device message.
    ///
    /// Returns a request to send upstream when the track changed.
    pub fn apply(&self, message: DeviceMessage) -> Option<Envelope> {
        match message {
            DeviceMessage::Music(song) => {
                let mut refresh = false;
                let _ = self.state.send_if_modified(|s| {
                    let previous = s.song.as_ref().and_then(|p| p.track_name.clone());
                    refresh = previous != song.track_name;
                    let changed = s.song.as_ref() != Some(&song);
                    s.song = Some(song);
                    changed
                });
                refresh.then(|| Envelope::new(kinds::MUSIC, SERVER_APP).with_request("refresh"))
            }
            DeviceMessage::Settings(settings) => {
                let _ = self.state.send_if_modified(|s| {
                    let mut changed = false;
                    for (app, value) in settings {
                        if s.app_settings.get(&app) != Some(&value) {
                            let _ = s.app_settings.insert(app, value);
                            changed = true;
                        }
                    }
                    changed
                });
                None
            }
            DeviceMessage::Apps(apps) => {
                let _ = self.state.send_if_modified(|s| replace(&mut s.apps, apps));
                None
            }
            DeviceMessage::Manifest(manifest) => {
                let _ = self.state.send_if_modified(|s| replace(&mut s.manifest, manifest));
                None
            }
            DeviceMessage::Malformed { kind, reason } => {
                warn!(kind, reason, "discarding malformed device message");
                None
            }
            DeviceMessage::Agent { .. } | DeviceMessage::Other(_) => None,
        }
    }

    /// React to connection status: a reconnecting link pauses playback.
    pub fn on_connection_status(&self, status: ConnectionStatus) {
        if status != ConnectionStatus::Reconnecting {
            return;
        }
        let _ = self.state.send_if_modified(|s| match s.song.as_mut() {
            Some(song) if song.is_playing == Some(true) => {
                song.is_playing = Some(false);
                true
            }
            _ => false,
        });
    }

    /// Set the formatted time.
    pub fn set_time(&self, time: String) {
        let _ = self.state.send_if_modified(|s| replace(&mut s.time, time));
    }

    /// Feed the store from `transport` and send the refresh requests it asks for.
    pub fn attach(self: &Arc<Self>, transport: Arc<dyn Transport>) -> Subscription {
        let store = Arc::downgrade(self);
        let sender = Arc::clone(&transport);
        transport.registry().add_listener(move |envelope| {
            let Some(store) = store.upgrade() else {
                return;
            };
            let Some(message) = DeviceMessage::classify(envelope) else {
                return;
            };
            if let Some(request) = store.apply(message) {
                let sender = Arc::clone(&sender);
                drop(tokio::spawn(async move {
                    if let Err(err) = sender.send(request).await {
                        debug!(error = %err, "track refresh not sent");
                    }
                }));
            }
        })
    }

    /// Refresh the time every `period` until `cancel` fires.
    pub fn spawn_clock(
        self: &Arc<Self>,
        period: Duration,
        twenty_four_hour: bool,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(period);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    _ = ticks.tick() => store.set_time(format_clock(&Local::now(), twenty_four_hour)),
                }
            }
        })
    }
}

fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use thinclient_core::CLIENT_APP;
    use thinclient_transport::testing::RecordingTransport;

    fn song(name: &str, playing: bool) -> SongData {
        SongData {
            track_name: Some(name.into()),
            is_playing: Some(playing),
            extra: Map::new(),
        }
    }

    #[test]
    fn new_track_requests_refresh() {
        let store = LocalStateStore::new();
        let first = store.apply(DeviceMessage::Music(song("A", true)));
        assert_eq!(first.unwrap().request.as_deref(), Some("refresh"));
        assert!(store.apply(DeviceMessage::Music(song("A", false))).is_none());
        let changed = store.apply(DeviceMessage::Music(song("B", true))).unwrap();
        assert_eq!(changed.kind, "music");
        assert_eq!(changed.app.as_deref(), Some("server"));
        assert_eq!(store.snapshot().song.unwrap().track_name.as_deref(), Some("B"));
    }

    #[test]
    fn settings_merge_per_app() {
        let store = LocalStateStore::new();
        let mut first = Map::new();
        let _ = first.insert("weather".into(), json!({"units": "c"}));
        let _ = first.insert("spotify".into(), json!({"volume": 3}));
        let _ = store.apply(DeviceMessage::Settings(first));
        let mut second = Map::new();
        let _ = second.insert("weather".into(), json!({"units": "f"}));
        let _ = store.apply(DeviceMessage::Settings(second));

        let state = store.snapshot();
        assert_eq!(state.settings_for("weather"), Some(&json!({"units": "f"})));
        assert_eq!(state.settings_for("spotify"), Some(&json!({"volume": 3})));
    }

    #[test]
    fn unchanged_values_do_not_notify() {
        let store = LocalStateStore::new();
        let mut rx = store.subscribe();
        let _ = store.apply(DeviceMessage::Manifest(json!({"name": "car"})));
        assert!(rx.has_changed().unwrap());
        let _ = rx.borrow_and_update();
        let _ = store.apply(DeviceMessage::Manifest(json!({"name": "car"})));
        store.set_time(String::new());
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn reconnecting_pauses_playback() {
        let store = LocalStateStore::new();
        let _ = store.apply(DeviceMessage::Music(song("A", true)));
        store.on_connection_status(ConnectionStatus::Connected);
        assert_eq!(store.snapshot().song.unwrap().is_playing, Some(true));
        store.on_connection_status(ConnectionStatus::Reconnecting);
        assert_eq!(store.snapshot().song.unwrap().is_playing, Some(false));
    }

    #[test]
    fn clock_formats() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 15, 7, 0).unwrap();
        assert_eq!(format_clock(&at, true), "15:07");
        assert_eq!(format_clock(&at, false), "3:07 PM");
    }

    #[tokio::test]
    async fn attached_store_follows_backend() {
        let transport = Arc::new(RecordingTransport::new());
        let store = Arc::new(LocalStateStore::new());
        let _sub = store.attach(Arc::clone(&transport) as Arc<dyn Transport>);

        transport.registry().emit(
            &Envelope::new(kinds::APPS, CLIENT_APP).with_payload(json!([{"name": "weather"}])),
        );
        transport.registry().emit(
            &Envelope::new(kinds::MUSIC, CLIENT_APP).with_payload(json!({"track_name": "A"})),
        );
        transport
            .registry()
            .emit(&Envelope::new(kinds::APPS, "weather").with_payload(json!([])));

        assert_eq!(store.snapshot().apps.len(), 1);
        while transport.sent().is_empty() {
            tokio::task::yield_now().await;
        }
        assert_eq!(transport.sent()[0].request.as_deref(), Some("refresh"));
    }

    #[tokio::test(start_paused = true)]
    async fn clock_ticks_until_cancelled() {
        let store = Arc::new(LocalStateStore::new());
        let cancel = CancellationToken::new();
        let task = store.spawn_clock(Duration::from_secs(1), true, cancel.clone());
        let mut rx = store.subscribe();
        let _ = rx.wait_for(|s| !s.time.is_empty()).await.unwrap();
        cancel.cancel();
        task.await.unwrap();
    }
}
