//! In-memory [`Transport`] for exercising consumers without a socket.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use thinclient_core::Envelope;

use crate::connection::Transport;
use crate::dispatch::DispatchRegistry;
use crate::errors::TransportError;
use crate::status::ConnectionStatus;

/// Records every send; inbound traffic is injected through [`registry`](Transport::registry).
pub struct RecordingTransport {
    registry: DispatchRegistry,
    connected: AtomicBool,
    sent: Mutex<Vec<Envelope>>,
    binary: Mutex<Vec<Bytes>>,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingTransport {
    /// A connected transport with nothing recorded.
    pub fn new() -> Self {
        Self {
            registry: DispatchRegistry::new(),
            connected: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
            binary: Mutex::new(Vec::new()),
        }
    }

    /// Make sends succeed or fail with [`TransportError::NotConnected`].
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Envelopes sent so far.
    pub fn sent(&self) -> Vec<Envelope> {
        self.sent.lock().clone()
    }

    /// Binary frames sent so far.
    pub fn binaries(&self) -> Vec<Bytes> {
        self.binary.lock().clone()
    }

    /// Forget everything recorded.
    pub fn clear(&self) {
        self.sent.lock().clear();
        self.binary.lock().clear();
    }

    fn check(&self) -> Result<(), TransportError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        self.check()?;
        self.sent.lock().push(envelope);
        Ok(())
    }

    async fn send_binary(&self, frame: Bytes) -> Result<(), TransportError> {
        self.check()?;
        self.binary.lock().push(frame);
        Ok(())
    }

    fn registry(&self) -> &DispatchRegistry {
        &self.registry
    }

    fn status(&self) -> ConnectionStatus {
        if self.connected.load(Ordering::SeqCst) {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Disconnected
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_and_refuses_when_disconnected() {
        let transport = RecordingTransport::new();
        transport.send(Envelope::new("a", "server")).await.unwrap();
        transport.send_binary(Bytes::from_static(b"x")).await.unwrap();
        transport.set_connected(false);
        assert!(transport.send(Envelope::new("b", "server")).await.is_err());
        assert_eq!(transport.sent().len(), 1);
        assert_eq!(transport.binaries().len(), 1);
        assert_eq!(transport.status(), ConnectionStatus::Disconnected);
    }
}
