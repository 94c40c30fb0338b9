//! Single-flight status poller ("agent mode")
//!
//! A timer fires every `interval`. Each tick starts one status request
//! unless the previous one is still in flight, in which case the tick is
//! skipped rather than queued.

use super::client::AgentClient;
use super::types::AgentStatus;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Anything that can report whether a session finished its work
#[async_trait]
pub trait StatusSource: Send + Sync + 'static {
    async fn poll_status(&self, session_id: &str) -> Result<AgentStatus>;
}

#[async_trait]
impl StatusSource for AgentClient {
    async fn poll_status(&self, session_id: &str) -> Result<AgentStatus> {
        AgentClient::poll_status(self, session_id).await
    }
}

/// Periodic status poller bound to one session
pub struct StatusPoller {
    cancel: CancellationToken,
    status: watch::Receiver<Option<AgentStatus>>,
    handle: JoinHandle<()>,
}

impl StatusPoller {
    /// Start polling `session_id` every `interval`.
    ///
    /// Polling stops on [`stop`](Self::stop), once the backend reports
    /// `finished`, or when the session turns out to be invalid.
    pub fn start<S: StatusSource>(source: Arc<S>, session_id: String, interval: Duration) -> Self {
        let cancel = CancellationToken::new();
        let (status_tx, status) = watch::channel(None);
        let handle = tokio::spawn(run(source, session_id, interval, cancel.clone(), status_tx));
        Self {
            cancel,
            status,
            handle,
        }
    }

    /// Cancel the poll timer. An in-flight request is abandoned.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Latest status, `None` until the first poll completes
    pub fn status(&self) -> watch::Receiver<Option<AgentStatus>> {
        self.status.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run<S: StatusSource>(
    source: Arc<S>,
    session_id: String,
    interval: Duration,
    cancel: CancellationToken,
    status_tx: watch::Sender<Option<AgentStatus>>,
) {
    let status_tx = Arc::new(status_tx);
    let in_flight = Arc::new(AtomicBool::new(false));
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(session_id = %session_id, ?interval, "Agent mode started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if in_flight.swap(true, Ordering::AcqRel) {
                    tracing::trace!(session_id = %session_id, "Status poll in flight, skipping tick");
                    continue;
                }
                tokio::spawn(poll_once(
                    source.clone(),
                    session_id.clone(),
                    in_flight.clone(),
                    cancel.clone(),
                    status_tx.clone(),
                ));
            }
        }
    }

    tracing::info!(session_id = %session_id, "Agent mode stopped");
}

async fn poll_once<S: StatusSource>(
    source: Arc<S>,
    session_id: String,
    in_flight: Arc<AtomicBool>,
    cancel: CancellationToken,
    status_tx: Arc<watch::Sender<Option<AgentStatus>>>,
) {
    let result = tokio::select! {
        _ = cancel.cancelled() => None,
        result = source.poll_status(&session_id) => Some(result),
    };

    match result {
        Some(Ok(status)) => {
            status_tx.send_replace(Some(status));
            if status.finished {
                tracing::info!(session_id = %session_id, "Agent reported finished");
                cancel.cancel();
            }
        }
        Some(Err(e)) if e.requires_reinitialize() => {
            tracing::warn!(session_id = %session_id, error = %e, "Stopping status poll");
            cancel.cancel();
        }
        Some(Err(e)) => {
            tracing::warn!(session_id = %session_id, error = %e, "Status poll failed");
        }
        None => {}
    }
    // Released last so no tick can start a poll after a finishing one
    in_flight.store(false, Ordering::Release);
}
