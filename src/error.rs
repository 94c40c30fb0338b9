//! Office Bridge error types

use thiserror::Error;

/// A single failed control-channel candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFailure {
    /// Candidate URL that was attempted
    pub url: String,
    /// Why the attempt failed
    pub reason: String,
}

impl std::fmt::Display for CandidateFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.url, self.reason)
    }
}

fn join_failures(failures: &[CandidateFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Office Bridge error type
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection refused, reset or timed out
    #[error("Network error: {0}")]
    Network(String),

    /// Malformed record, message or envelope
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The backend rejected session initialization
    #[error("Session initialization failed: {status} - {body}")]
    Initialization { status: u16, body: String },

    /// The backend rejected a query
    #[error("Query failed: {message}")]
    Query { status: Option<u16>, message: String },

    /// The backend no longer knows this session (e.g. after a restart)
    #[error("Session {session_id} is no longer valid on the backend")]
    SessionInvalid { session_id: String },

    /// No live session
    #[error("No live session, initialize first")]
    NoSession,

    /// The document engine has not reported readiness yet
    #[error("Document engine not ready")]
    NotReady,

    /// Every control-channel candidate failed
    #[error("All control channel candidates failed: {}", join_failures(.failures))]
    AllCandidatesFailed { failures: Vec<CandidateFailure> },

    /// Push operation kind not recognised
    #[error("Unknown operation kind: {0}")]
    UnknownOperation(String),

    /// Invalid command argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the caller must re-initialize the session before retrying
    pub fn requires_reinitialize(&self) -> bool {
        matches!(self, Error::SessionInvalid { .. } | Error::NoSession)
    }
}

/// Result type alias for Office Bridge operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_candidates_failed_names_every_url() {
        let err = Error::AllCandidatesFailed {
            failures: vec![
                CandidateFailure {
                    url: "wss://a:5112".to_string(),
                    reason: "refused".to_string(),
                },
                CandidateFailure {
                    url: "ws://b:5112".to_string(),
                    reason: "timed out".to_string(),
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("wss://a:5112 (refused)"));
        assert!(msg.contains("ws://b:5112 (timed out)"));
    }

    #[test]
    fn test_requires_reinitialize() {
        assert!(Error::SessionInvalid {
            session_id: "abc".to_string()
        }
        .requires_reinitialize());
        assert!(Error::NoSession.requires_reinitialize());
        assert!(!Error::Network("down".to_string()).requires_reinitialize());
    }
}
