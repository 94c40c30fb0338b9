//! Document command bridge
//!
//! Turns high-level document operations into the command envelopes of
//! the embedded engine.
//!
//! ```text
//! DocumentCommand ──► to_envelopes() ──► readiness gate ──► EngineSink
//!                                            │ not ready
//!                                            ▼
//!                                     PendingCommand + retry timer
//! ```

pub mod bridge;
pub mod color;
pub mod command;
pub mod envelope;
pub mod value;

pub use bridge::{
    ChannelSink, Dispatch, DocumentBridge, EngineEvent, EngineSink, PendingCommand, RetryPolicy,
};
pub use color::{engine_color, Rgb};
pub use command::{DocumentCommand, FormatOptions};
pub use envelope::Envelope;
pub use value::{TaggedValue, ValueKind};
