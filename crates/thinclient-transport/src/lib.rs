//! # thinclient-transport
//!
//! The device's only link to the backend.
//!
//! - [`ConnectionManager`] owns one WebSocket at a time, reconnects with
//!   capped exponential backoff and stamps the client id onto every
//!   outbound envelope at serialization time
//! - [`DispatchRegistry`] fans inbound envelopes out to durable listeners and
//!   resolves one-shot correlated listeners; binary frames are routed by app id
//! - [`Transport`] is the seam bridges and the audio session depend on

#![deny(unsafe_code)]

pub mod backoff;
pub mod connection;
pub mod dispatch;
pub mod errors;
pub mod listeners;
pub mod status;
pub mod testing;

pub use backoff::BackoffPolicy;
pub use connection::{ConnectionManager, ConnectionOptions, Transport};
pub use dispatch::DispatchRegistry;
pub use errors::TransportError;
pub use listeners::{ListenerSet, Subscription, SubscriptionGuard};
pub use status::ConnectionStatus;
