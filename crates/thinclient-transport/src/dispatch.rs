//! Inbound message dispatch.
//!
//! Envelopes fan out to every durable listener in registration order.
//! One-shot listeners correlate on any subset of `{type, request, app}` and
//! wait indefinitely; callers that need a bound wrap [`DispatchRegistry::wait_for`]
//! in `tokio::time::timeout`. Binary frames are routed by app id.

use bytes::Bytes;
use thinclient_core::{BinaryFrame, Envelope, MatchCriteria};
use tokio::sync::oneshot;
use tracing::trace;

use crate::errors::TransportError;
use crate::listeners::{ListenerSet, Subscription};

/// Fan-out registry for envelopes and binary frames.
pub struct DispatchRegistry {
    envelopes: ListenerSet<Envelope>,
    frames: ListenerSet<BinaryFrame>,
}

impl Default for DispatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            envelopes: ListenerSet::new("envelopes"),
            frames: ListenerSet::new("frames"),
        }
    }

    /// Receive every inbound envelope until removed.
    pub fn add_listener(&self, listener: impl Fn(&Envelope) + Send + Sync + 'static) -> Subscription {
        self.envelopes.add(listener)
    }

    /// Remove a listener registered on this registry.
    pub fn remove_listener(&self, subscription: &Subscription) {
        subscription.remove();
    }

    /// Run `callback` on the first envelope matching `criteria`, then forget it.
    pub fn once(
        &self,
        criteria: MatchCriteria,
        callback: impl FnOnce(&Envelope) + Send + 'static,
    ) -> Subscription {
        self.envelopes
            .add_once(move |envelope| criteria.matches(envelope), callback)
    }

    /// Resolve with the first envelope matching `criteria`.
    ///
    /// Dropping the future deregisters the wait.
    pub async fn wait_for(&self, criteria: MatchCriteria) -> Result<Envelope, TransportError> {
        let (tx, rx) = oneshot::channel();
        let _guard = self
            .once(criteria, move |envelope| {
                let _ = tx.send(envelope.clone());
            })
            .guard();
        rx.await.map_err(|_| TransportError::Closed)
    }

    /// Deliver an inbound envelope.
    pub fn emit(&self, envelope: &Envelope) {
        trace!(kind = %envelope.kind, app = envelope.app_str(), "dispatching envelope");
        self.envelopes.emit(envelope);
    }

    /// Receive the payload of every inbound frame tagged with `app_id`.
    pub fn add_binary_listener(
        &self,
        app_id: impl Into<String>,
        listener: impl Fn(&Bytes) + Send + Sync + 'static,
    ) -> Subscription {
        let app_id = app_id.into();
        self.frames.add(move |frame: &BinaryFrame| {
            if frame.app_id == app_id {
                listener(&frame.payload);
            }
        })
    }

    /// Deliver an inbound, already decoded binary frame.
    pub fn emit_binary(&self, frame: &BinaryFrame) {
        trace!(app = %frame.app_id, len = frame.payload.len(), "routing binary frame");
        self.frames.emit(frame);
    }

    /// Registered envelope listeners, one-shot ones included.
    pub fn listener_count(&self) -> usize {
        self.envelopes.len()
    }
}
