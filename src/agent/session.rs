//! Agent session orchestration
//!
//! `AgentSession` owns at most one live backend session, the channel
//! listeners opened for it and the optional status poller. Channel data
//! is fed into a shared [`StreamRouter`].
//!
//! ## Channel dedup
//!
//! Listeners are keyed by `(stream_id, channel)`. A key already present is
//! never opened again. A listener that fails releases its key so a later
//! query can reopen the channel; a listener the backend closed cleanly
//! keeps it for the rest of the session.

use super::client::AgentClient;
use super::poller::StatusPoller;
use super::router::{StreamRouter, TurnId};
use super::types::{AgentStatus, ChannelName, Session, StreamHandle};
use crate::config::{BridgeConfig, PollingConfig, SessionConfig};
use crate::error::{Error, Result};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;

type ChannelKey = (String, ChannelName);

struct Listener {
    token: u64,
    handle: JoinHandle<()>,
}

type ListenerMap = Arc<RwLock<HashMap<ChannelKey, Listener>>>;

/// Session-scoped multi-channel stream client
pub struct AgentSession {
    client: Arc<AgentClient>,
    config: SessionConfig,
    polling: PollingConfig,
    router: Arc<StreamRouter>,
    session: RwLock<Option<Session>>,
    listeners: ListenerMap,
    next_token: AtomicU64,
    poller: Mutex<Option<StatusPoller>>,
    identity: watch::Sender<Option<String>>,
}

impl AgentSession {
    /// Create from the full bridge configuration
    pub fn new(config: &BridgeConfig) -> Result<Self> {
        let client = AgentClient::new(&config.backend)?;
        Ok(Self::with_client(
            Arc::new(client),
            config.session.clone(),
            config.polling.clone(),
        ))
    }

    pub fn with_client(client: Arc<AgentClient>, config: SessionConfig, polling: PollingConfig) -> Self {
        let (identity, _) = watch::channel(None);
        Self {
            client,
            config,
            polling,
            router: Arc::new(StreamRouter::new()),
            session: RwLock::new(None),
            listeners: Arc::new(RwLock::new(HashMap::new())),
            next_token: AtomicU64::new(0),
            poller: Mutex::new(None),
            identity,
        }
    }

    pub fn router(&self) -> Arc<StreamRouter> {
        self.router.clone()
    }

    /// Session id as seen by the control channel, `None` while no session
    /// is live
    pub fn identity(&self) -> watch::Receiver<Option<String>> {
        self.identity.subscribe()
    }

    pub async fn session_id(&self) -> Option<String> {
        self.session.read().await.as_ref().map(|s| s.id.clone())
    }

    pub async fn is_initialized(&self) -> bool {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.initialized)
            .unwrap_or(false)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start a fresh backend session, replacing any live one
    pub async fn initialize(&self) -> Result<String> {
        let mut session = self.session.write().await;
        if session.take().is_some() {
            self.release_session_resources().await;
        }
        self.initialize_locked(&mut session).await
    }

    /// Initialize only if no session is live
    pub async fn ensure_session(&self) -> Result<String> {
        let mut session = self.session.write().await;
        if let Some(live) = session.as_ref() {
            return Ok(live.id.clone());
        }
        self.initialize_locked(&mut session).await
    }

    async fn initialize_locked(&self, slot: &mut Option<Session>) -> Result<String> {
        match self.client.initialize(&self.config).await {
            Ok(id) => {
                *slot = Some(Session {
                    id: id.clone(),
                    initialized: true,
                    config: self.config.clone(),
                });
                self.identity.send_replace(Some(id.clone()));
                Ok(id)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Session initialization failed");
                *slot = None;
                self.identity.send_replace(None);
                Err(e)
            }
        }
    }

    /// Drop the live session and everything attached to it
    pub async fn reset(&self) {
        let previous = self.session.write().await.take();
        self.release_session_resources().await;
        if let Some(session) = previous {
            tracing::info!(session_id = %session.id, "Session reset");
        }
    }

    async fn release_session_resources(&self) {
        if let Some(poller) = self.poller.lock().await.take() {
            poller.stop();
        }
        let listeners: Vec<Listener> = self.listeners.write().await.drain().map(|(_, l)| l).collect();
        for listener in listeners {
            listener.handle.abort();
        }
        self.identity.send_replace(None);
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Start a new turn; subsequent channel data lands in it
    pub async fn begin_turn(&self) -> TurnId {
        self.router.begin_turn().await
    }

    /// Query the live session and attach its channels.
    ///
    /// A session the backend no longer knows is reset and
    /// [`Error::SessionInvalid`] is returned; the query is not retried.
    pub async fn query(
        &self,
        text: &str,
        context: Option<serde_json::Value>,
    ) -> Result<StreamHandle> {
        let session_id = self.session_id().await.ok_or(Error::NoSession)?;

        match self.client.query(&session_id, text, context).await {
            Ok(handle) => {
                tracing::info!(
                    session_id = %session_id,
                    stream_id = %handle.stream_id,
                    channels = handle.channels.len(),
                    "Query accepted"
                );
                self.attach_channels(&handle).await;
                Ok(handle)
            }
            Err(e @ Error::SessionInvalid { .. }) => {
                tracing::warn!(session_id = %session_id, "Backend lost the session, resetting");
                self.reset().await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// New turn, session if needed, then query
    pub async fn ask(
        &self,
        text: &str,
        context: Option<serde_json::Value>,
    ) -> Result<(TurnId, StreamHandle)> {
        let turn = self.begin_turn().await;
        self.ensure_session().await?;
        let handle = self.query(text, context).await?;
        Ok((turn, handle))
    }

    /// Open a listener for every channel of `handle` not already open.
    ///
    /// Returns how many listeners were started.
    pub async fn attach_channels(&self, handle: &StreamHandle) -> usize {
        let mut listeners = self.listeners.write().await;
        let mut opened = 0;

        for channel in &handle.channels {
            let key = (handle.stream_id.clone(), channel.clone());
            if listeners.contains_key(&key) {
                tracing::debug!(stream_id = %handle.stream_id, channel = %channel, "Channel already open");
                continue;
            }

            let token = self.next_token.fetch_add(1, Ordering::Relaxed);
            let task = tokio::spawn(listen(
                self.client.clone(),
                self.router.clone(),
                self.listeners.clone(),
                key.clone(),
                token,
            ));
            listeners.insert(key, Listener { token, handle: task });
            opened += 1;
        }
        opened
    }

    /// Number of `(stream, channel)` keys currently held
    pub async fn open_channel_count(&self) -> usize {
        self.listeners.read().await.len()
    }

    /// Whether every listener has ended
    pub async fn channels_idle(&self) -> bool {
        self.listeners
            .read()
            .await
            .values()
            .all(|l| l.handle.is_finished())
    }

    // =========================================================================
    // Agent mode
    // =========================================================================

    /// Start periodic status polling of the live session
    pub async fn start_agent_mode(&self) -> Result<watch::Receiver<Option<AgentStatus>>> {
        let session_id = self.session_id().await.ok_or(Error::NoSession)?;
        let mut slot = self.poller.lock().await;
        if let Some(existing) = slot.as_ref() {
            if existing.is_running() {
                return Ok(existing.status());
            }
        }
        let poller = StatusPoller::start(self.client.clone(), session_id, self.polling.interval());
        let status = poller.status();
        *slot = Some(poller);
        Ok(status)
    }

    /// Stop status polling. Channel listeners keep running.
    pub async fn stop_agent_mode(&self) {
        if let Some(poller) = self.poller.lock().await.take() {
            poller.stop();
        }
    }

    pub async fn agent_mode_active(&self) -> bool {
        self.poller
            .lock()
            .await
            .as_ref()
            .map(StatusPoller::is_running)
            .unwrap_or(false)
    }
}

async fn listen(
    client: Arc<AgentClient>,
    router: Arc<StreamRouter>,
    listeners: ListenerMap,
    key: ChannelKey,
    token: u64,
) {
    let (stream_id, channel) = &key;
    let result: Result<()> = async {
        let mut stream = client.open_channel(stream_id, channel).await?;
        while let Some(fragment) = stream.next().await {
            router.append(channel, &fragment?).await;
        }
        Ok(())
    }
    .await;

    match result {
        Ok(()) => {
            tracing::debug!(stream_id = %stream_id, channel = %channel, "Channel closed by backend");
        }
        Err(e) => {
            tracing::warn!(stream_id = %stream_id, channel = %channel, error = %e, "Channel failed");
            let mut listeners = listeners.write().await;
            if listeners.get(&key).map(|l| l.token) == Some(token) {
                listeners.remove(&key);
            }
        }
    }
}
