//! Document command bridge
//!
//! Translates [`DocumentCommand`]s into engine envelopes and posts them
//! through an [`EngineSink`]. Commands issued before the engine reports
//! readiness are parked with their own retry timer.
//!
//! ## Readiness
//!
//! Readiness is monotone. It is set by any of:
//! - `App_LoadingStatus` with `Status = Document_Loaded`
//! - `Doc_ModifiedStatus`
//! - `View_Added`

use super::command::DocumentCommand;
use super::envelope::{inbound, Envelope};
use crate::config::{DocumentConfig, ExhaustedAction};
use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

const EVENT_CAPACITY: usize = 256;

// =============================================================================
// Engine sink
// =============================================================================

/// Where envelopes for the engine go
pub trait EngineSink: Send + Sync {
    fn post(&self, envelope: &Envelope) -> Result<()>;
}

/// Sink backed by an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EngineSink for ChannelSink {
    fn post(&self, envelope: &Envelope) -> Result<()> {
        self.tx
            .send(envelope.clone())
            .map_err(|_| Error::Internal("Engine sink closed".to_string()))
    }
}

// =============================================================================
// Retry policy
// =============================================================================

/// Upper bound on a single retry delay
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(300);

/// How commands issued before readiness are retried
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub delay: Duration,
    /// Number of readiness re-checks
    pub max_retries: u32,
    /// Multiplier applied to the delay after each retry
    pub backoff_factor: f64,
    /// What happens when retries run out
    pub on_exhausted: ExhaustedAction,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&DocumentConfig::default())
    }
}

impl From<&DocumentConfig> for RetryPolicy {
    fn from(config: &DocumentConfig) -> Self {
        Self {
            delay: Duration::from_millis(config.retry_delay_ms),
            max_retries: config.max_retries,
            backoff_factor: config.backoff_factor,
            on_exhausted: config.on_exhausted,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), capped at [`MAX_RETRY_DELAY`]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if self.delay.is_zero() {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = if self.backoff_factor >= 1.0 {
            self.backoff_factor
        } else {
            1.0
        };
        let secs = self.delay.as_secs_f64() * factor.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .map(|delay| delay.min(MAX_RETRY_DELAY))
            .unwrap_or(MAX_RETRY_DELAY)
    }
}

// =============================================================================
// Bridge
// =============================================================================

/// A command waiting for the engine
#[derive(Debug, Clone)]
pub struct PendingCommand {
    pub operation_kind: &'static str,
    pub envelopes: Vec<Envelope>,
    pub enqueued_at: Instant,
}

/// Notable inbound engine traffic
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// The engine became ready
    Ready,
    /// Result of a remote script call
    ScriptResult(serde_json::Value),
    /// The engine reported an error
    EngineError(serde_json::Value),
}

/// What `execute` did with a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Posted immediately
    Sent,
    /// Parked until readiness or retry exhaustion
    Deferred,
}

struct BridgeInner {
    sink: Arc<dyn EngineSink>,
    ready: AtomicBool,
    pending: AtomicUsize,
    policy: RetryPolicy,
    script_file: String,
    events: broadcast::Sender<EngineEvent>,
}

/// Operation-to-envelope bridge with readiness gate and bounded retry
#[derive(Clone)]
pub struct DocumentBridge {
    inner: Arc<BridgeInner>,
}

impl DocumentBridge {
    pub fn new(sink: Arc<dyn EngineSink>, config: &DocumentConfig) -> Self {
        Self::with_policy(sink, RetryPolicy::from(config), config.script_file.clone())
    }

    pub fn with_policy(sink: Arc<dyn EngineSink>, policy: RetryPolicy, script_file: String) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(BridgeInner {
                sink,
                ready: AtomicBool::new(false),
                pending: AtomicUsize::new(0),
                policy,
                script_file,
                events,
            }),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Acquire)
    }

    /// Mark the engine ready. Has no effect once set.
    pub fn mark_ready(&self) {
        if !self.inner.ready.swap(true, Ordering::AcqRel) {
            tracing::info!("Document engine ready");
            let _ = self.inner.events.send(EngineEvent::Ready);
        }
    }

    /// Commands currently parked
    pub fn pending_count(&self) -> usize {
        self.inner.pending.load(Ordering::Acquire)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    /// Translate and post a command, or park it if the engine is not ready
    pub fn execute(&self, command: DocumentCommand) -> Result<Dispatch> {
        let kind = command.kind();
        let envelopes = command.to_envelopes(&self.inner.script_file)?;

        if self.is_ready() {
            self.inner.post_all(kind, &envelopes)?;
            return Ok(Dispatch::Sent);
        }

        tracing::debug!(kind, "Engine not ready, deferring command");
        let pending = PendingCommand {
            operation_kind: kind,
            envelopes,
            enqueued_at: Instant::now(),
        };
        self.inner.pending.fetch_add(1, Ordering::AcqRel);
        tokio::spawn(retry(self.inner.clone(), pending));
        Ok(Dispatch::Deferred)
    }

    /// Handle one raw inbound message from the engine.
    ///
    /// Malformed envelopes are logged and ignored.
    pub fn handle_inbound(&self, text: &str) {
        match Envelope::parse(text) {
            Ok(envelope) => self.handle_envelope(&envelope),
            Err(e) => tracing::warn!(error = %e, "Ignoring inbound engine message"),
        }
    }

    pub fn handle_envelope(&self, envelope: &Envelope) {
        match envelope.message_id.as_str() {
            inbound::APP_LOADING_STATUS => {
                if envelope.value_str("Status") == Some(inbound::DOCUMENT_LOADED) {
                    self.mark_ready();
                }
            }
            inbound::DOC_MODIFIED_STATUS | inbound::VIEW_ADDED => self.mark_ready(),
            inbound::SCRIPT_RESULT => {
                let _ = self
                    .inner
                    .events
                    .send(EngineEvent::ScriptResult(envelope.values.clone()));
            }
            inbound::ERROR => {
                tracing::warn!(values = %envelope.values, "Engine reported an error");
                let _ = self
                    .inner
                    .events
                    .send(EngineEvent::EngineError(envelope.values.clone()));
            }
            other => tracing::trace!(message_id = other, "Unhandled engine message"),
        }
    }
}

impl BridgeInner {
    fn post_all(&self, kind: &str, envelopes: &[Envelope]) -> Result<()> {
        for envelope in envelopes {
            self.sink.post(envelope)?;
        }
        tracing::debug!(kind, count = envelopes.len(), "Posted envelopes to engine");
        Ok(())
    }
}

async fn retry(inner: Arc<BridgeInner>, pending: PendingCommand) {
    let kind = pending.operation_kind;
    let mut delivered = false;

    for attempt in 1..=inner.policy.max_retries {
        tokio::time::sleep(inner.policy.delay_for(attempt)).await;
        if inner.ready.load(Ordering::Acquire) {
            if let Err(e) = inner.post_all(kind, &pending.envelopes) {
                tracing::warn!(kind, error = %e, "Failed to post deferred command");
            }
            delivered = true;
            break;
        }
        tracing::debug!(kind, attempt, "Engine still not ready");
    }

    if !delivered {
        let waited = pending.enqueued_at.elapsed();
        match inner.policy.on_exhausted {
            ExhaustedAction::SendAnyway => {
                tracing::warn!(kind, ?waited, "Engine not ready after retries, sending anyway");
                if let Err(e) = inner.post_all(kind, &pending.envelopes) {
                    tracing::warn!(kind, error = %e, "Failed to post deferred command");
                }
            }
            ExhaustedAction::Drop => {
                tracing::warn!(kind, ?waited, "Engine not ready after retries, dropping command");
            }
        }
    }

    inner.pending.fetch_sub(1, Ordering::AcqRel);
}
