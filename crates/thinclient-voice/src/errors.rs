//! Voice error types.

use thinclient_transport::TransportError;
use thiserror::Error;

/// Failures surfaced by the audio session.
#[derive(Debug, Error)]
pub enum VoiceError {
    /// The capture backend refused an operation.
    #[error("capture backend error: {0}")]
    Backend(String),
    /// A control envelope could not be sent.
    #[error(transparent)]
    Transport(#[from] TransportError),
}
