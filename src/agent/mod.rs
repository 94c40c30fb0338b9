//! Agent module: multi-agent backend session and stream handling
//!
//! ## Architecture
//!
//! ```text
//!                     POST /start-session, /query-session, /get-status
//! AgentSession ──────► AgentClient ──────────────────────────────► backend
//!   │   │                   ▲
//!   │   │ one listener      │ GET /stream/{id}/{channel} (SSE)
//!   │   └─ per channel ─────┘
//!   │         │
//!   │         ▼
//!   │    StreamRouter ──► active turn buffer, RouterUpdate broadcast
//!   │
//!   └─ StatusPoller (agent mode, single-flight)
//! ```

pub mod client;
pub mod poller;
pub mod router;
pub mod session;
pub mod types;

pub use client::{AgentClient, ChannelStream};
pub use poller::{StatusPoller, StatusSource};
pub use router::{RouterUpdate, StreamRouter, TurnBuffer, TurnId};
pub use session::AgentSession;
pub use types::{AgentStatus, ChannelName, Session, StreamHandle};
