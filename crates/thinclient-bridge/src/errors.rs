//! Bridge error types.

use thinclient_core::FrameError;
use thinclient_transport::TransportError;
use thiserror::Error;

/// Failures while relaying surface traffic.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The connection refused the message.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Outgoing data could not be framed.
    #[error("framing failed: {0}")]
    Frame(#[from] FrameError),
    /// A blob could not be read.
    #[error("blob read failed: {0}")]
    Blob(String),
    /// The mapping collaborator failed.
    #[error("mapping failed: {0}")]
    Mapping(String),
}
