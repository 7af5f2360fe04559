//! Transport error types.
//!
//! Socket faults never surface here: they become status changes. These
//! errors only describe why a single send was refused.

use thinclient_core::FrameError;
use thiserror::Error;

/// Why a send or wait did not complete.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No socket is open.
    #[error("not connected")]
    NotConnected,
    /// The socket did not accept the message in time.
    #[error("send timed out after {timeout_ms}ms")]
    Timeout {
        /// Configured bound.
        timeout_ms: u64,
    },
    /// The registry backing a wait was dropped.
    #[error("dispatch registry closed")]
    Closed,
    /// The envelope could not be serialized.
    #[error("failed to serialize envelope: {0}")]
    Serialize(#[from] serde_json::Error),
    /// A binary frame could not be built.
    #[error(transparent)]
    Frame(#[from] FrameError),
}
