//! WebSocket control channel
//!
//! One task drives the connection through
//! `Connecting → Open → (Closing | Closed)`, with `Closed → Connecting`
//! as the reconnect edge after a remote close.
//!
//! - Candidates are tried in order, each bounded by `connect_timeout`.
//!   If all fail the loop ends with [`Error::AllCandidatesFailed`].
//! - Registration is sent as soon as an identity is known, either on open
//!   or the moment the identity watch publishes one.
//! - Pushed operations addressed to another identity, or arriving while no
//!   identity is registered, are dropped.

use super::protocol::{InboundMessage, OutboundMessage, PushOperation};
use crate::config::ControlConfig;
use crate::document::{DocumentBridge, DocumentCommand};
use crate::error::{CandidateFailure, Error, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Receives document commands pushed over the control channel
#[async_trait]
pub trait OperationDispatcher: Send + Sync {
    async fn dispatch(&self, command: DocumentCommand) -> Result<()>;
}

#[async_trait]
impl OperationDispatcher for DocumentBridge {
    async fn dispatch(&self, command: DocumentCommand) -> Result<()> {
        self.execute(command).map(|_| ())
    }
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Observable view of the control connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlSnapshot {
    pub state: ConnectionState,
    pub candidate_urls: Vec<String>,
    /// Candidate being tried or connected, if any
    pub candidate_index: Option<usize>,
    /// Identity registered on the current connection
    pub registered_id: Option<String>,
}

/// How one open connection ended
enum ConnectionEnd {
    /// `close()` was called
    Shutdown,
    /// The server closed it or the transport failed
    Remote,
}

/// Registering, reconnecting WebSocket client
pub struct ControlChannel {
    config: ControlConfig,
    identity: watch::Receiver<Option<String>>,
    dispatcher: Arc<dyn OperationDispatcher>,
    snapshot: RwLock<ControlSnapshot>,
    shutdown: CancellationToken,
}

impl ControlChannel {
    pub fn new(
        config: ControlConfig,
        identity: watch::Receiver<Option<String>>,
        dispatcher: Arc<dyn OperationDispatcher>,
    ) -> Self {
        let snapshot = ControlSnapshot {
            state: ConnectionState::Closed,
            candidate_urls: config.candidate_urls.clone(),
            candidate_index: None,
            registered_id: None,
        };
        Self {
            config,
            identity,
            dispatcher,
            snapshot: RwLock::new(snapshot),
            shutdown: CancellationToken::new(),
        }
    }

    pub async fn snapshot(&self) -> ControlSnapshot {
        self.snapshot.read().await.clone()
    }

    /// Ask the loop to close the connection and stop
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// Run the loop on its own task
    pub fn spawn(self: Arc<Self>) -> JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }

    /// Drive the connection until `close()` or until every candidate fails
    pub async fn run(&self) -> Result<()> {
        loop {
            if self.shutdown.is_cancelled() {
                self.set_state(ConnectionState::Closed).await;
                return Ok(());
            }
            self.update(|s| {
                s.state = ConnectionState::Connecting;
                s.candidate_index = None;
                s.registered_id = None;
            })
            .await;

            let ws = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    self.set_state(ConnectionState::Closed).await;
                    return Ok(());
                }
                result = self.connect_any() => match result {
                    Ok(ws) => ws,
                    Err(e) => {
                        tracing::error!(error = %e, "Control channel giving up");
                        self.set_state(ConnectionState::Closed).await;
                        return Err(e);
                    }
                },
            };

            self.set_state(ConnectionState::Open).await;

            match self.serve(ws).await {
                ConnectionEnd::Shutdown => {
                    self.set_state(ConnectionState::Closed).await;
                    tracing::info!("Control channel closed");
                    return Ok(());
                }
                ConnectionEnd::Remote => {
                    self.update(|s| {
                        s.state = ConnectionState::Closed;
                        s.registered_id = None;
                    })
                    .await;
                    tracing::info!(
                        delay_ms = self.config.reconnect_delay_ms,
                        "Control connection lost, reconnecting"
                    );
                    tokio::select! {
                        _ = self.shutdown.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(self.config.reconnect_delay()) => {}
                    }
                }
            }
        }
    }

    async fn connect_any(&self) -> Result<WsStream> {
        let mut failures = Vec::new();

        for (index, url) in self.config.candidate_urls.iter().enumerate() {
            self.update(|s| s.candidate_index = Some(index)).await;
            tracing::debug!(url = %url, "Connecting control channel");

            match tokio::time::timeout(self.config.connect_timeout(), connect_async(url.as_str())).await
            {
                Ok(Ok((ws, _))) => {
                    tracing::info!(url = %url, "Control channel connected");
                    return Ok(ws);
                }
                Ok(Err(e)) => {
                    tracing::warn!(url = %url, error = %e, "Control candidate failed");
                    failures.push(CandidateFailure {
                        url: url.clone(),
                        reason: e.to_string(),
                    });
                }
                Err(_) => {
                    tracing::warn!(url = %url, "Control candidate timed out");
                    failures.push(CandidateFailure {
                        url: url.clone(),
                        reason: format!(
                            "timed out after {}ms",
                            self.config.connect_timeout_ms
                        ),
                    });
                }
            }
        }

        Err(Error::AllCandidatesFailed { failures })
    }

    async fn serve(&self, ws: WsStream) -> ConnectionEnd {
        let (mut sink, mut stream) = ws.split();
        let mut identity = self.identity.clone();
        let mut identity_open = true;
        let mut registered: Option<String> = None;

        let current = identity.borrow_and_update().clone();
        if let Some(id) = current {
            if self.register(&mut sink, &id).await.is_err() {
                return ConnectionEnd::Remote;
            }
            registered = Some(id);
        }

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    self.set_state(ConnectionState::Closing).await;
                    let _ = sink.send(Message::Close(None)).await;
                    return ConnectionEnd::Shutdown;
                }
                changed = identity.changed(), if identity_open => {
                    if changed.is_err() {
                        identity_open = false;
                        continue;
                    }
                    let current = identity.borrow_and_update().clone();
                    match current {
                        Some(id) if registered.as_deref() != Some(id.as_str()) => {
                            if self.register(&mut sink, &id).await.is_err() {
                                return ConnectionEnd::Remote;
                            }
                            registered = Some(id);
                        }
                        Some(_) => {}
                        None if registered.is_some() => {
                            // Session discarded; stop accepting its pushes
                            tracing::info!(id = ?registered, "Identity cleared, ignoring pushes");
                            registered = None;
                            self.update(|s| s.registered_id = None).await;
                        }
                        None => {}
                    }
                }
                message = stream.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        self.handle_text(&text, registered.as_deref()).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::debug!(?frame, "Server closed control connection");
                        return ConnectionEnd::Remote;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Control connection error");
                        return ConnectionEnd::Remote;
                    }
                    None => return ConnectionEnd::Remote,
                },
            }
        }
    }

    async fn register<S>(&self, sink: &mut S, id: &str) -> Result<()>
    where
        S: futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    {
        let message = OutboundMessage::Register { id: id.to_string() }.to_json()?;
        sink.send(Message::Text(message)).await.map_err(|e| {
            tracing::warn!(error = %e, "Failed to send registration");
            Error::from(e)
        })?;
        self.update(|s| s.registered_id = Some(id.to_string())).await;
        tracing::info!(id, "Registration sent");
        Ok(())
    }

    async fn handle_text(&self, text: &str, registered: Option<&str>) {
        match InboundMessage::parse(text) {
            Ok(InboundMessage::RegisterSuccess) => {
                tracing::info!(id = ?registered, "Registration acknowledged");
            }
            Ok(InboundMessage::PushOperation(op)) => self.handle_push(op, registered).await,
            Ok(InboundMessage::Unknown) => {
                tracing::debug!(message = %text, "Ignoring unknown control message");
            }
            Err(e) => tracing::warn!(error = %e, "Dropping control message"),
        }
    }

    async fn handle_push(&self, op: PushOperation, registered: Option<&str>) {
        if registered.is_none() || op.target_id.as_deref() != registered {
            tracing::trace!(target_id = ?op.target_id, "Push operation for another identity");
            return;
        }

        let command = match DocumentCommand::from_operation(&op.operation_kind, &op.data) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!(kind = %op.operation_kind, error = %e, "Dropping push operation");
                return;
            }
        };

        tracing::debug!(kind = %op.operation_kind, "Dispatching push operation");
        if let Err(e) = self.dispatcher.dispatch(command).await {
            tracing::warn!(kind = %op.operation_kind, error = %e, "Push operation failed");
        }
    }

    async fn set_state(&self, state: ConnectionState) {
        self.update(|s| s.state = state).await;
    }

    async fn update<F: FnOnce(&mut ControlSnapshot)>(&self, f: F) {
        f(&mut *self.snapshot.write().await);
    }
}
