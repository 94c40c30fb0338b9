//! Wire and domain types for the multi-agent backend
//!
//! Covers the session start request, query/stream handles, channel names
//! and status polling payloads.

use crate::config::{resolve_api_key, AgentModelConfig, SessionConfig, SubAgentConfig};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Channel names
// =============================================================================

/// Logical output channel of a streamed query
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ChannelName {
    /// Primary output text
    Output,
    /// Reasoning trace
    Thinking,
    /// Final answer of the upper agent
    FinalAnswer,
    /// Backend log lines
    Log,
    /// Tool result payloads
    ToolReturnData,
    /// Any channel name this crate does not know about
    Other(String),
}

impl ChannelName {
    /// Wire name used in stream URLs and query responses
    pub fn as_str(&self) -> &str {
        match self {
            ChannelName::Output => "output",
            ChannelName::Thinking => "thinking",
            ChannelName::FinalAnswer => "final_answer",
            ChannelName::Log => "log",
            ChannelName::ToolReturnData => "tool_rtn_data",
            ChannelName::Other(name) => name,
        }
    }
}

impl From<&str> for ChannelName {
    fn from(name: &str) -> Self {
        match name {
            "output" => ChannelName::Output,
            "thinking" => ChannelName::Thinking,
            "final_answer" => ChannelName::FinalAnswer,
            "log" => ChannelName::Log,
            "tool_rtn_data" => ChannelName::ToolReturnData,
            other => ChannelName::Other(other.to_string()),
        }
    }
}

impl From<String> for ChannelName {
    fn from(name: String) -> Self {
        ChannelName::from(name.as_str())
    }
}

impl From<ChannelName> for String {
    fn from(name: ChannelName) -> Self {
        name.as_str().to_string()
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Session
// =============================================================================

/// A live backend session
#[derive(Debug, Clone)]
pub struct Session {
    /// Identifier issued by the backend
    pub id: String,
    /// Whether initialization completed
    pub initialized: bool,
    /// Configuration the session was started with
    pub config: SessionConfig,
}

/// Handle returned once per query: which channels to open for which stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamHandle {
    #[serde(rename = "streamId", alias = "id")]
    pub stream_id: String,
    #[serde(alias = "streams", default)]
    pub channels: Vec<ChannelName>,
}

/// Result of one status poll
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStatus {
    #[serde(default)]
    pub finished: bool,
}

// =============================================================================
// Request bodies
// =============================================================================

/// Model configuration as the backend expects it
#[derive(Debug, Clone, Serialize)]
pub struct AgentConfigBody {
    pub tool_names: Vec<String>,
    pub exp_json_path: String,
    pub base_url: String,
    pub api_key: String,
    pub llm_model_id: String,
    pub temperature: f64,
}

impl From<&AgentModelConfig> for AgentConfigBody {
    fn from(model: &AgentModelConfig) -> Self {
        Self {
            tool_names: model.tool_names.clone(),
            exp_json_path: model.exp_json_path.clone(),
            base_url: model.base_url.clone(),
            api_key: resolve_api_key(&model.api_key_env),
            llm_model_id: model.model_id.clone(),
            temperature: model.temperature,
        }
    }
}

/// Lower agent exposed to the upper agent as a tool
#[derive(Debug, Clone, Serialize)]
pub struct LowerAgentConfigBody {
    #[serde(flatten)]
    pub model: AgentConfigBody,
    pub as_tool_name: String,
    pub as_tool_description: String,
}

impl From<&SubAgentConfig> for LowerAgentConfigBody {
    fn from(agent: &SubAgentConfig) -> Self {
        Self {
            model: AgentConfigBody::from(&agent.model),
            as_tool_name: agent.as_tool_name.clone(),
            as_tool_description: agent.as_tool_description.clone(),
        }
    }
}

/// Body of the start-session request
#[derive(Debug, Clone, Serialize)]
pub struct StartSessionRequest {
    pub remote_tools: Vec<serde_json::Value>,
    pub upper_agent_config: AgentConfigBody,
    pub lower_agents_config: Vec<LowerAgentConfigBody>,
}

impl From<&SessionConfig> for StartSessionRequest {
    fn from(config: &SessionConfig) -> Self {
        Self {
            remote_tools: config.remote_tools.clone(),
            upper_agent_config: AgentConfigBody::from(&config.upper_agent),
            lower_agents_config: config
                .lower_agents
                .iter()
                .map(LowerAgentConfigBody::from)
                .collect(),
        }
    }
}

/// Body of the query request
#[derive(Debug, Clone, Serialize)]
pub struct QueryRequest<'a> {
    #[serde(rename = "sessionId")]
    pub session_id: &'a str,
    pub query: &'a str,
    pub context: serde_json::Value,
}

/// Body of the status request
#[derive(Debug, Clone, Serialize)]
pub struct StatusRequest<'a> {
    #[serde(rename = "sessionId")]
    pub session_id: &'a str,
}

/// Extract the session id from a start-session response.
///
/// Accepts a bare JSON string or an object carrying `sessionId`,
/// `agent_id` or `id`.
pub fn session_id_from_response(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(id) if !id.is_empty() => Some(id.clone()),
        serde_json::Value::Object(map) => ["sessionId", "session_id", "agent_id", "id"]
            .iter()
            .find_map(|key| map.get(*key).and_then(|v| v.as_str()))
            .filter(|id| !id.is_empty())
            .map(str::to_string),
        _ => None,
    }
}
