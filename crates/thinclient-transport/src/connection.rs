//! Connection manager.
//!
//! One socket task per connection epoch. The task owns the WebSocket:
//! it opens it, drains the bounded outbound queue into the sink, dispatches
//! inbound traffic in receive order, and on loss sleeps with backoff before
//! the next attempt. Every sleep and socket operation races a
//! `CancellationToken`, so an explicit disconnect ends the epoch promptly.
//!
//! Outbound envelopes are serialized inside the socket task, which is where
//! the current client id gets stamped on. An id change therefore applies to
//! everything not yet written, including messages already queued.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use thinclient_core::envelope::to_wire;
use thinclient_core::{ClientId, Envelope, frame};
use thinclient_settings::ConnectionConfig;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::BackoffPolicy;
use crate::dispatch::DispatchRegistry;
use crate::errors::TransportError;
use crate::listeners::{ListenerSet, Subscription};
use crate::status::ConnectionStatus;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Ack = oneshot::Sender<Result<(), TransportError>>;

/// What the rest of the device needs from the connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Queue an envelope; resolves once it was handed to the socket.
    async fn send(&self, envelope: Envelope) -> Result<(), TransportError>;

    /// Queue a pre-framed binary message, passed through unmodified.
    async fn send_binary(&self, frame: Bytes) -> Result<(), TransportError>;

    /// Inbound dispatch.
    fn registry(&self) -> &DispatchRegistry;

    /// Current status.
    fn status(&self) -> ConnectionStatus;
}

/// Tunables for [`ConnectionManager`].
#[derive(Clone, Debug)]
pub struct ConnectionOptions {
    /// Delay schedule between attempts.
    pub backoff: BackoffPolicy,
    /// Outbound queue capacity per socket.
    pub queue_capacity: usize,
    /// Bound on how long a single send may wait for the socket.
    pub send_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            queue_capacity: 256,
            send_timeout: Duration::from_secs(10),
        }
    }
}

enum Outbound {
    Envelope { envelope: Envelope, ack: Ack },
    Binary { frame: Bytes, ack: Ack },
}

impl Outbound {
    fn fail(self, err: TransportError) {
        let (Self::Envelope { ack, .. } | Self::Binary { ack, .. }) = self;
        let _ = ack.send(Err(err));
    }
}

/// A running socket task and the means to stop it.
struct Epoch {
    url: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

enum SocketEnd {
    Cancelled,
    Lost,
}

struct Inner {
    options: ConnectionOptions,
    status: watch::Sender<ConnectionStatus>,
    status_listeners: ListenerSet<ConnectionStatus>,
    registry: DispatchRegistry,
    client_id: RwLock<ClientId>,
    outbound: RwLock<Option<mpsc::Sender<Outbound>>>,
    epoch: tokio::sync::Mutex<Option<Epoch>>,
    last_url: Mutex<Option<String>>,
}

/// Owner of the single backend socket.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create an idle manager.
    pub fn new(client_id: ClientId, options: ConnectionOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                options,
                status: watch::Sender::new(ConnectionStatus::Disconnected),
                status_listeners: ListenerSet::new("status"),
                registry: DispatchRegistry::new(),
                client_id: RwLock::new(client_id),
                outbound: RwLock::new(None),
                epoch: tokio::sync::Mutex::new(None),
                last_url: Mutex::new(None),
            }),
        }
    }

    /// Open a socket to `url`, tearing down any existing one first.
    pub async fn connect(&self, url: impl Into<String>) {
        let url = url.into();
        let mut epoch = self.inner.epoch.lock().await;
        if let Some(previous) = epoch.take() {
            debug!(url = %previous.url, "replacing existing connection");
            self.inner.stop(previous).await;
            self.inner.set_status(ConnectionStatus::Disconnected);
        }
        *self.inner.last_url.lock() = Some(url.clone());
        self.inner.set_status(ConnectionStatus::Connecting);
        info!(%url, "connecting");
        *epoch = Some(self.inner.spawn_epoch(url));
    }

    /// Close the socket and stop retrying.
    pub async fn disconnect(&self) {
        let mut epoch = self.inner.epoch.lock().await;
        if let Some(previous) = epoch.take() {
            info!(url = %previous.url, "disconnecting");
            self.inner.stop(previous).await;
        }
        self.inner.set_status(ConnectionStatus::Disconnected);
    }

    /// Drop the current socket and retry immediately against the same URL.
    ///
    /// Backoff restarts from the first step. Configuration is left untouched.
    /// Without a known URL this is a no-op.
    pub async fn reconnect(&self) {
        let url = self.inner.last_url.lock().clone();
        let Some(url) = url else {
            debug!("reconnect requested with no known url");
            return;
        };
        let mut epoch = self.inner.epoch.lock().await;
        match epoch.take() {
            None => {
                self.inner.set_status(ConnectionStatus::Connecting);
            }
            Some(previous) => {
                self.inner.stop(previous).await;
                if self.status() == ConnectionStatus::Connected {
                    self.inner.set_status(ConnectionStatus::Reconnecting);
                }
            }
        }
        info!(%url, "reconnecting");
        *epoch = Some(self.inner.spawn_epoch(url));
    }

    /// Keep the connection pointed at the configured backend.
    ///
    /// Incomplete configuration leaves the manager as it is, with no attempts
    /// and no error. A complete configuration whose URL differs from the
    /// current target triggers a fresh connect.
    pub fn follow_config(&self, mut config: watch::Receiver<ConnectionConfig>) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                let url = config.borrow_and_update().url();
                match url {
                    Some(url) if manager.url().as_deref() != Some(url.as_str()) => {
                        manager.connect(url).await;
                    }
                    Some(_) => {}
                    None => debug!("backend address incomplete, staying idle"),
                }
                if config.changed().await.is_err() {
                    return;
                }
            }
        })
    }

    /// Keep the stamped client id in sync with `ids`.
    pub fn follow_client_id(&self, mut ids: watch::Receiver<ClientId>) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                let id = ids.borrow_and_update().clone();
                manager.set_client_id(id);
                if ids.changed().await.is_err() {
                    return;
                }
            }
        })
    }

    /// Replace the identity stamped on envelopes not yet serialized.
    pub fn set_client_id(&self, id: ClientId) {
        let mut current = self.inner.client_id.write();
        if *current != id {
            debug!(client_id = %id, "client id changed");
            *current = id;
        }
    }

    /// Identity currently stamped on outbound envelopes.
    pub fn client_id(&self) -> ClientId {
        self.inner.client_id.read().clone()
    }

    /// URL of the most recent connect.
    pub fn url(&self) -> Option<String> {
        self.inner.last_url.lock().clone()
    }

    /// Current status.
    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status.borrow()
    }

    /// Watch status changes.
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    /// Call `listener` on every status change.
    pub fn add_status_listener(
        &self,
        listener: impl Fn(&ConnectionStatus) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.status_listeners.add(listener)
    }

    /// Receive every inbound envelope until removed.
    pub fn add_listener(
        &self,
        listener: impl Fn(&Envelope) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.registry.add_listener(listener)
    }

    /// Inbound dispatch.
    pub fn registry(&self) -> &DispatchRegistry {
        &self.inner.registry
    }

    /// Send an envelope stamped with the current client id.
    pub async fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        self.enqueue(|ack| Outbound::Envelope { envelope, ack }).await
    }

    /// Send a binary frame unmodified.
    pub async fn send_binary(&self, frame: Bytes) -> Result<(), TransportError> {
        self.enqueue(|ack| Outbound::Binary { frame, ack }).await
    }

    async fn enqueue(&self, build: impl FnOnce(Ack) -> Outbound) -> Result<(), TransportError> {
        let tx = self
            .inner
            .outbound
            .read()
            .clone()
            .ok_or(TransportError::NotConnected)?;
        let (ack, done) = oneshot::channel();
        let timeout = self.inner.options.send_timeout;
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);

        let delivered = async {
            tx.send(build(ack))
                .await
                .map_err(|_| TransportError::NotConnected)?;
            done.await.map_err(|_| TransportError::NotConnected)?
        };
        tokio::time::timeout(timeout, delivered)
            .await
            .map_err(|_| TransportError::Timeout { timeout_ms })?
    }
}

#[async_trait]
impl Transport for ConnectionManager {
    async fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        ConnectionManager::send(self, envelope).await
    }

    async fn send_binary(&self, frame: Bytes) -> Result<(), TransportError> {
        ConnectionManager::send_binary(self, frame).await
    }

    fn registry(&self) -> &DispatchRegistry {
        &self.inner.registry
    }

    fn status(&self) -> ConnectionStatus {
        ConnectionManager::status(self)
    }
}

impl Inner {
    fn set_status(&self, next: ConnectionStatus) {
        let mut previous = next;
        let changed = self.status.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            if !current.can_transition_to(next) {
                warn!(from = %current, to = %next, "ignoring illegal status transition");
                return false;
            }
            previous = *current;
            *current = next;
            true
        });
        if changed {
            info!(from = %previous, to = %next, "connection status changed");
            self.status_listeners.emit(&next);
        }
    }

    fn spawn_epoch(self: &Arc<Self>, url: String) -> Epoch {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(self).run(url.clone(), cancel.clone()));
        Epoch { url, cancel, task }
    }

    async fn stop(&self, epoch: Epoch) {
        epoch.cancel.cancel();
        if let Err(err) = epoch.task.await {
            warn!(url = %epoch.url, error = %err, "socket task ended abnormally");
        }
        *self.outbound.write() = None;
    }

    async fn run(self: Arc<Self>, url: String, cancel: CancellationToken) {
        let mut attempt: u32 = 0;
        loop {
            let opened = tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                result = connect_async(url.as_str()) => result,
            };

            match opened {
                Ok((ws, _response)) => {
                    attempt = 0;
                    let (tx, rx) = mpsc::channel(self.options.queue_capacity);
                    *self.outbound.write() = Some(tx);
                    self.set_status(ConnectionStatus::Connected);

                    let end = self.pump(ws, rx, &cancel).await;
                    *self.outbound.write() = None;
                    match end {
                        SocketEnd::Cancelled => return,
                        SocketEnd::Lost => self.set_status(ConnectionStatus::Reconnecting),
                    }
                }
                Err(err) => {
                    warn!(%url, attempt, error = %err, "connection attempt failed");
                }
            }

            let delay = self.options.backoff.delay(attempt);
            attempt = attempt.saturating_add(1);
            debug!(%url, delay_ms = delay.as_millis(), "waiting before next attempt");
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn pump(
        &self,
        ws: WsStream,
        mut rx: mpsc::Receiver<Outbound>,
        cancel: &CancellationToken,
    ) -> SocketEnd {
        let (mut sink, mut stream) = ws.split();
        let end = loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    break SocketEnd::Cancelled;
                }
                Some(outbound) = rx.recv() => {
                    let (message, ack) = match outbound {
                        Outbound::Envelope { envelope, ack } => {
                            let client_id = self.client_id.read().clone();
                            match to_wire(&envelope, &client_id) {
                                Ok(text) => (Message::text(text), ack),
                                Err(err) => {
                                    let _ = ack.send(Err(err.into()));
                                    continue;
                                }
                            }
                        }
                        Outbound::Binary { frame, ack } => (Message::Binary(frame), ack),
                    };
                    if let Err(err) = sink.send(message).await {
                        warn!(error = %err, "socket write failed");
                        let _ = ack.send(Err(TransportError::NotConnected));
                        break SocketEnd::Lost;
                    }
                    let _ = ack.send(Ok(()));
                }
                incoming = stream.next() => match incoming {
                    Some(Ok(Message::Text(text))) => self.handle_text(text.as_str()),
                    Some(Ok(Message::Binary(data))) => self.handle_binary(data),
                    Some(Ok(Message::Close(frame))) => {
                        info!(?frame, "backend closed the connection");
                        break SocketEnd::Lost;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(error = %err, "socket read failed");
                        break SocketEnd::Lost;
                    }
                    None => break SocketEnd::Lost,
                },
            }
        };

        rx.close();
        while let Ok(pending) = rx.try_recv() {
            pending.fail(TransportError::NotConnected);
        }
        end
    }

    fn handle_text(&self, text: &str) {
        match Envelope::from_json(text) {
            Ok(envelope) => self.registry.emit(&envelope),
            Err(err) => warn!(error = %err, len = text.len(), "dropping malformed envelope"),
        }
    }

    fn handle_binary(&self, data: Bytes) {
        match frame::decode(data) {
            Ok(frame) => self.registry.emit_binary(&frame),
            Err(err) => warn!(error = %err, "dropping undecodable binary frame"),
        }
    }
}
