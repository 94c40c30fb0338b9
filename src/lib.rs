//! Office Bridge - multi-agent backend to embedded document engine bridge
//!
//! Office Bridge keeps a long-lived session with a remote multi-agent
//! backend, streams the session's output channels, and turns the document
//! operations the agents push into command envelopes for an embedded
//! document-editing engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                        Multi-Agent Backend                         │
//! │   start-session · query-session · get-status · stream/{id}/{ch}    │
//! └──────────────┬───────────────────────────────┬────────────────────┘
//!                │ HTTP + SSE                     │ WebSocket
//! ┌──────────────▼───────────────┐  ┌────────────▼─────────────────────┐
//! │        AgentSession           │  │        ControlChannel            │
//! │  ┌────────────────────────┐   │  │  - candidate URLs, timeouts      │
//! │  │ AgentClient + SSE parser│  │  │  - register {id} once known      │
//! │  └───────────┬────────────┘   │  │  - reconnect after remote close  │
//! │              │ per channel    │  └────────────┬─────────────────────┘
//! │  ┌───────────▼────────────┐   │               │ push_operation
//! │  │     StreamRouter        │  │  ┌────────────▼─────────────────────┐
//! │  │  active turn buffers    │  │  │        DocumentBridge            │
//! │  └────────────────────────┘   │  │  - operation → envelopes         │
//! │  StatusPoller (agent mode)    │  │  - readiness gate, bounded retry │
//! └──────────────┬───────────────┘  └────────────┬─────────────────────┘
//!                │ identity (session id)          │ envelopes
//!                └──────────► ControlChannel      ▼
//!                                      Embedded Document Engine
//! ```
//!
//! ## Modules
//!
//! - [`sse`]: incremental Server-Sent Events parser
//! - [`agent`]: backend client, session orchestration, stream router, status poller
//! - [`control`]: WebSocket control channel
//! - [`document`]: command translation, readiness gate and retry
//! - [`config`]: configuration management
//! - [`error`]: error types

pub mod agent;
pub mod config;
pub mod control;
pub mod document;
pub mod error;
pub mod sse;

#[cfg(test)]
pub(crate) mod testing;

pub use config::BridgeConfig;
pub use error::{Error, Result};
