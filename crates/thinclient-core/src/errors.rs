//! Error types shared by the codec and envelope layers.

use thiserror::Error;

/// Failures decoding or encoding a binary frame.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The buffer cannot even hold the 4-byte header length.
    #[error("frame too short: {len} bytes, need at least 4")]
    TooShort {
        /// Actual buffer length.
        len: usize,
    },
    /// The declared header length runs past the end of the buffer.
    #[error("declared header length {declared} exceeds available {available} bytes")]
    HeaderOverrun {
        /// Header length read from the prefix.
        declared: usize,
        /// Bytes remaining after the prefix.
        available: usize,
    },
    /// The app id header is not valid UTF-8.
    #[error("app id header is not valid UTF-8")]
    InvalidAppId,
    /// The app id does not fit in a `u32` length prefix.
    #[error("app id too long: {0} bytes")]
    AppIdTooLong(usize),
}

/// Failures turning raw JSON into an envelope.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The text was not valid JSON or did not have the envelope shape.
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
    /// A typed payload could not be extracted.
    #[error("invalid {kind} payload: {reason}")]
    InvalidPayload {
        /// Envelope type the payload belonged to.
        kind: String,
        /// Why extraction failed.
        reason: String,
    },
}
