//! Current view tracking.

use std::sync::Arc;

use serde_json::json;
use thinclient_core::envelope::kinds;
use thinclient_core::{Envelope, SERVER_APP};
use thinclient_input::Navigator;
use thinclient_transport::Transport;
use tokio::sync::watch;
use tracing::{debug, info};

/// View the device starts on and returns to.
pub const DASHBOARD: &str = "dashboard";

/// Views rendered by the device itself rather than a sandboxed app.
pub const BUILTIN_VIEWS: &[&str] = &[DASHBOARD, "clock", "settings", "dev"];

/// Which view is showing, and which was before it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ViewState {
    /// Showing now.
    pub current: Option<String>,
    /// Showing before the last change.
    pub previous: Option<String>,
}

/// Tracks view changes and announces them to the backend.
pub struct ViewTracker {
    transport: Arc<dyn Transport>,
    state: watch::Sender<ViewState>,
}

impl ViewTracker {
    /// Tracker with no view yet.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            state: watch::Sender::new(ViewState::default()),
        }
    }

    /// Switch to `name`.
    ///
    /// Returns the announcement to send, if any. The very first switch to
    /// the dashboard is not announced.
    pub fn set_view(&self, name: &str) -> Option<Envelope> {
        let mut announce = None;
        self.state.send_modify(|state| {
            let previous = state.current.take();
            if previous.is_some() || name != DASHBOARD {
                announce = Some(
                    Envelope::new(kinds::VIEW, SERVER_APP)
                        .with_request("change")
                        .with_payload(json!({ "currentApp": name, "previousApp": previous })),
                );
            }
            state.previous = previous;
            state.current = Some(name.to_owned());
        });
        info!(view = name, "view changed");
        announce
    }

    /// Current view.
    pub fn current(&self) -> Option<String> {
        self.state.borrow().current.clone()
    }

    /// Watch view changes.
    pub fn subscribe(&self) -> watch::Receiver<ViewState> {
        self.state.subscribe()
    }
}

impl Navigator for ViewTracker {
    fn navigate(&self, view: &str) {
        let Some(envelope) = self.set_view(view) else {
            return;
        };
        let transport = Arc::clone(&self.transport);
        drop(tokio::spawn(async move {
            if let Err(err) = transport.send(envelope).await {
                debug!(error = %err, "view change not announced");
            }
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use thinclient_transport::testing::RecordingTransport;

    fn tracker() -> (ViewTracker, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::new());
        (ViewTracker::new(Arc::clone(&transport) as Arc<dyn Transport>), transport)
    }

    #[test]
    fn first_dashboard_is_silent() {
        let (views, _) = tracker();
        assert!(views.set_view(DASHBOARD).is_none());
        assert_eq!(views.current().as_deref(), Some(DASHBOARD));

        let change = views.set_view("weather").unwrap();
        assert_eq!(change.kind, "view");
        assert_eq!(change.request.as_deref(), Some("change"));
        assert_eq!(
            change.payload,
            Some(json!({"currentApp": "weather", "previousApp": "dashboard"}))
        );

        let back = views.set_view(DASHBOARD).unwrap();
        assert_eq!(back.payload.unwrap()["previousApp"], "weather");
    }

    #[test]
    fn first_non_dashboard_view_is_announced() {
        let (views, _) = tracker();
        let change = views.set_view("clock").unwrap();
        assert_eq!(change.payload, Some(json!({"currentApp": "clock", "previousApp": null})));
    }

    #[tokio::test]
    async fn navigate_sends_announcement() {
        let (views, transport) = tracker();
        views.navigate(DASHBOARD);
        views.navigate("spotify");
        while transport.sent().is_empty() {
            tokio::task::yield_now().await;
        }
        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].app.as_deref(), Some("server"));
        assert_eq!(views.subscribe().borrow().previous.as_deref(), Some(DASHBOARD));
    }
}
