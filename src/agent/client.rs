//! HTTP client for the multi-agent backend
//!
//! Stateless: every method is one request. Session bookkeeping lives in
//! [`AgentSession`](super::AgentSession).

use super::types::{
    session_id_from_response, AgentStatus, ChannelName, QueryRequest, StartSessionRequest,
    StatusRequest, StreamHandle,
};
use crate::config::{BackendConfig, SessionConfig};
use crate::error::{Error, Result};
use crate::sse::sse_events;
use futures::stream::BoxStream;
use futures::StreamExt;
use regex::Regex;
use std::time::Duration;

const START_SESSION_PATH: &str = "/start-session";
const QUERY_SESSION_PATH: &str = "/query-session";
const STATUS_PATH: &str = "/get-status";

/// Stream of data fragments from one SSE channel
pub type ChannelStream = BoxStream<'static, Result<String>>;

/// Thin client over the backend's HTTP endpoints
#[derive(Debug, Clone)]
pub struct AgentClient {
    http: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
    session_invalid: Regex,
}

impl AgentClient {
    /// Build a client from backend configuration
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let session_invalid = Regex::new(&config.session_invalid_pattern)
            .map_err(|e| Error::Config(format!("Invalid session_invalid_pattern: {}", e)))?;

        // No client-wide timeout: it would also cut long-lived SSE bodies
        let http = reqwest::Client::builder()
            .connect_timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            request_timeout: config.request_timeout(),
            session_invalid,
        })
    }

    /// Base URL requests are sent to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Whether a backend error body means the session is gone
    pub fn is_session_invalid(&self, body: &str) -> bool {
        self.session_invalid.is_match(body)
    }

    /// Start a new agent system on the backend and return its session id
    pub async fn initialize(&self, config: &SessionConfig) -> Result<String> {
        let body = StartSessionRequest::from(config);
        let response = self
            .http
            .post(self.endpoint(START_SESSION_PATH))
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Start session request failed: {}", e)))?;

        let status = response.status();
        let text = read_body(response, "start session").await?;
        if !status.is_success() {
            return Err(Error::Initialization {
                status: status.as_u16(),
                body: text,
            });
        }

        let value: serde_json::Value = serde_json::from_str(&text)
            .unwrap_or_else(|_| serde_json::Value::String(text.trim().to_string()));
        let session_id = session_id_from_response(&value).ok_or_else(|| Error::Initialization {
            status: status.as_u16(),
            body: format!("Response carries no session id: {}", text),
        })?;

        tracing::info!(session_id = %session_id, "Backend session started");
        Ok(session_id)
    }

    /// Submit a query on a live session
    pub async fn query(
        &self,
        session_id: &str,
        text: &str,
        context: Option<serde_json::Value>,
    ) -> Result<StreamHandle> {
        let body = QueryRequest {
            session_id,
            query: text,
            context: context.unwrap_or(serde_json::Value::Null),
        };
        let response = self
            .http
            .post(self.endpoint(QUERY_SESSION_PATH))
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Query {
                status: None,
                message: e.to_string(),
            })?;

        let status = response.status();
        let body = read_body(response, "query").await?;

        if !status.is_success() {
            return Err(self.query_error(session_id, Some(status.as_u16()), body));
        }

        serde_json::from_str::<StreamHandle>(&body)
            .map_err(|_| self.query_error(session_id, Some(status.as_u16()), body))
    }

    fn query_error(&self, session_id: &str, status: Option<u16>, body: String) -> Error {
        if self.is_session_invalid(&body) {
            Error::SessionInvalid {
                session_id: session_id.to_string(),
            }
        } else {
            Error::Query {
                status,
                message: body,
            }
        }
    }

    /// Open one SSE channel of a stream and yield each record's data
    pub async fn open_channel(
        &self,
        stream_id: &str,
        channel: &ChannelName,
    ) -> Result<ChannelStream> {
        let url = self.endpoint(&format!("/stream/{}/{}", stream_id, channel));
        let response = self
            .http
            .get(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to open {}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Network(format!(
                "Channel {} of stream {} returned {}",
                channel, stream_id, status
            )));
        }

        tracing::debug!(stream_id, channel = %channel, "SSE channel opened");
        Ok(sse_events(response.bytes_stream())
            .map(|event| event.map(|e| e.data))
            .boxed())
    }

    /// Poll whether the agent system finished its current work
    pub async fn poll_status(&self, session_id: &str) -> Result<AgentStatus> {
        let response = self
            .http
            .post(self.endpoint(STATUS_PATH))
            .timeout(self.request_timeout)
            .json(&StatusRequest { session_id })
            .send()
            .await
            .map_err(|e| Error::Network(format!("Status request failed: {}", e)))?;

        let status = response.status();
        let body = read_body(response, "status").await?;
        if !status.is_success() {
            if self.is_session_invalid(&body) {
                return Err(Error::SessionInvalid {
                    session_id: session_id.to_string(),
                });
            }
            return Err(Error::Network(format!(
                "Status request returned {}: {}",
                status, body
            )));
        }

        serde_json::from_str(&body)
            .map_err(|e| Error::Protocol(format!("Malformed status response: {}", e)))
    }
}

async fn read_body(response: reqwest::Response, what: &str) -> Result<String> {
    response
        .text()
        .await
        .map_err(|e| Error::Network(format!("Failed to read {} response: {}", what, e)))
}
