//! # thinclient-core
//!
//! Shared vocabulary for the thin client crates:
//!
//! - **Envelopes**: the `{type, request?, app, payload?}` JSON unit exchanged
//!   with the backend and with sandboxed surfaces
//! - **Messages**: closed enums classifying envelopes by `(app, type, request)`
//! - **Frames**: the length-prefixed binary frame used for audio streaming
//! - **Branded IDs**: `ClientId`, `MessageId`
//! - **Logging**: `tracing` subscriber setup and a capture utility for tests

#![deny(unsafe_code)]

pub mod envelope;
pub mod errors;
pub mod frame;
pub mod ids;
pub mod logging;
pub mod messages;

pub use envelope::{CLIENT_APP, Envelope, MatchCriteria, SERVER_APP, SURFACE_SOURCE};
pub use errors::{EnvelopeError, FrameError};
pub use frame::BinaryFrame;
pub use ids::{ClientId, MessageId};
pub use messages::{DeviceMessage, EventMode, GetRequest, SandboxAction, SongData};
