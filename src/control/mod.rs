//! Control channel: WebSocket registration and push-operation dispatch
//!
//! ```text
//! identity watch ──► ControlChannel ◄──── ws(s)://candidate[0..n]
//!                        │  register {id}       push_operation {targetId}
//!                        ▼
//!                 OperationDispatcher (DocumentBridge)
//! ```

pub mod channel;
pub mod protocol;

pub use channel::{ConnectionState, ControlChannel, ControlSnapshot, OperationDispatcher};
pub use protocol::{InboundMessage, OutboundMessage, PushOperation};
