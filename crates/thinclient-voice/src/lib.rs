//! # thinclient-voice
//!
//! Voice capture for the agent overlay.
//!
//! - [`AudioSession`]: drives a [`CaptureBackend`] through
//!   `unset → connecting → connected → listening`, streams every captured
//!   chunk to the backend unmodified and meters its level
//! - [`LevelMeter`]: adaptive, panic-free audio level estimation
//! - [`Conversation`]: agent responses, status and errors streamed back

#![deny(unsafe_code)]

pub mod backend;
pub mod conversation;
pub mod errors;
pub mod meter;
pub mod session;

pub use backend::{AudioStatus, CaptureBackend, CaptureEvent, MicState};
pub use conversation::{AgentMessage, AgentMessageKind, Conversation, ConversationLog};
pub use errors::VoiceError;
pub use meter::{LevelMeter, strip_wav_header};
pub use session::{AudioSession, AudioSnapshot};
