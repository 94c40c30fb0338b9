//! Stream router
//!
//! Routes fragments from every channel listener into the buffer of the
//! active turn. The active pointer and all buffers sit behind one lock so
//! a turn switch can never interleave with an append.

use super::types::ChannelName;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::BroadcastStream;

const UPDATE_CAPACITY: usize = 1024;

/// Identifier of one conversational turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TurnId(pub u64);

impl std::fmt::Display for TurnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "turn-{}", self.0)
    }
}

/// Append-only per-channel text of one turn
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TurnBuffer {
    channels: BTreeMap<String, String>,
}

impl TurnBuffer {
    /// Accumulated text of a channel
    pub fn get(&self, channel: &ChannelName) -> Option<&str> {
        self.channels.get(channel.as_str()).map(String::as_str)
    }

    /// Channels that received data, with their text
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.channels.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    fn append(&mut self, channel: &ChannelName, fragment: &str) {
        self.channels
            .entry(channel.as_str().to_string())
            .or_default()
            .push_str(fragment);
    }
}

/// Broadcast for every routed fragment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterUpdate {
    pub turn: TurnId,
    pub channel: ChannelName,
    pub fragment: String,
}

#[derive(Debug, Default)]
struct RouterState {
    next_turn: u64,
    active: Option<TurnId>,
    turns: HashMap<TurnId, TurnBuffer>,
}

impl RouterState {
    fn open_turn(&mut self) -> TurnId {
        self.next_turn += 1;
        let id = TurnId(self.next_turn);
        self.turns.insert(id, TurnBuffer::default());
        self.active = Some(id);
        id
    }
}

/// Routes channel data to the active turn
pub struct StreamRouter {
    state: RwLock<RouterState>,
    updates: broadcast::Sender<RouterUpdate>,
}

impl Default for StreamRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamRouter {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CAPACITY);
        Self {
            state: RwLock::new(RouterState::default()),
            updates,
        }
    }

    /// Start a new turn and make it active. Earlier turns stay untouched.
    pub async fn begin_turn(&self) -> TurnId {
        let id = self.state.write().await.open_turn();
        tracing::debug!(turn = %id, "Turn started");
        id
    }

    /// Append a fragment to `channel` of the active turn.
    ///
    /// Data arriving while no turn is active opens one.
    pub async fn append(&self, channel: &ChannelName, fragment: &str) -> TurnId {
        let turn = {
            let mut state = self.state.write().await;
            let turn = match state.active {
                Some(id) => id,
                None => {
                    let id = state.open_turn();
                    tracing::debug!(turn = %id, channel = %channel, "Implicit turn opened");
                    id
                }
            };
            state
                .turns
                .entry(turn)
                .or_default()
                .append(channel, fragment);
            turn
        };

        // No subscribers is fine
        let _ = self.updates.send(RouterUpdate {
            turn,
            channel: channel.clone(),
            fragment: fragment.to_string(),
        });
        turn
    }

    pub async fn active_turn(&self) -> Option<TurnId> {
        self.state.read().await.active
    }

    /// Snapshot of a turn's buffers
    pub async fn turn(&self, id: TurnId) -> Option<TurnBuffer> {
        self.state.read().await.turns.get(&id).cloned()
    }

    /// Accumulated text of one channel of one turn
    pub async fn channel_text(&self, id: TurnId, channel: &ChannelName) -> Option<String> {
        self.state
            .read()
            .await
            .turns
            .get(&id)
            .and_then(|buffer| buffer.get(channel))
            .map(str::to_string)
    }

    /// Live feed of routed fragments
    pub fn subscribe(&self) -> BroadcastStream<RouterUpdate> {
        BroadcastStream::new(self.updates.subscribe())
    }
}
