//! Connection status state machine.
//!
//! ```text
//! disconnected ──► connecting ──► connected ──► reconnecting
//!      ▲               │              │   ▲          │
//!      └───────────────┴──────────────┘   └──────────┘
//! ```
//!
//! `connected` is only entered after a socket opened. `disconnected` is only
//! entered through an explicit disconnect (which also ends every other state).

use std::fmt;

use serde::Serialize;

/// The single current status of the connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// No socket and no attempts in progress.
    #[default]
    Disconnected,
    /// Attempting the first open since the last explicit connect.
    Connecting,
    /// A socket is open.
    Connected,
    /// The socket was lost; attempts continue with backoff.
    Reconnecting,
}

impl ConnectionStatus {
    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionStatus::{Connected, Connecting, Disconnected, Reconnecting};
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting | Connected | Reconnecting, Disconnected)
                | (Connecting | Reconnecting, Connected)
                | (Connected, Reconnecting)
        )
    }

    /// Whether a socket is open.
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }

    /// Lowercase name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
