//! Office Bridge configuration management

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main Office Bridge configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Agent backend configuration
    #[serde(default)]
    pub backend: BackendConfig,

    /// Agent system configuration sent on session start
    #[serde(default)]
    pub session: SessionConfig,

    /// WebSocket control channel configuration
    #[serde(default)]
    pub control: ControlConfig,

    /// Document command bridge configuration
    #[serde(default)]
    pub document: DocumentConfig,

    /// Status polling configuration
    #[serde(default)]
    pub polling: PollingConfig,
}

impl BridgeConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Load the configuration file at `path`, or the default location if it
    /// exists, or fall back to defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match default_config_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Render as pretty TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to render config: {}", e)))
    }

    /// Check invariants that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.backend.base_url.trim().is_empty() {
            return Err(Error::Config("backend.base_url must not be empty".to_string()));
        }
        if self.control.candidate_urls.is_empty() {
            return Err(Error::Config(
                "control.candidate_urls needs at least one URL".to_string(),
            ));
        }
        if let Some(bad) = self
            .control
            .candidate_urls
            .iter()
            .find(|u| !(u.starts_with("ws://") || u.starts_with("wss://")))
        {
            return Err(Error::Config(format!(
                "control candidate {} is not a ws:// or wss:// URL",
                bad
            )));
        }
        if self.polling.interval_ms == 0 {
            return Err(Error::Config("polling.interval_ms must be > 0".to_string()));
        }
        let factor = self.document.backoff_factor;
        if !factor.is_finite() || factor < 1.0 {
            return Err(Error::Config(
                "document.backoff_factor must be a finite number >= 1.0".to_string(),
            ));
        }
        regex::Regex::new(&self.backend.session_invalid_pattern).map_err(|e| {
            Error::Config(format!("backend.session_invalid_pattern: {}", e))
        })?;
        Ok(())
    }
}

/// Agent backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the agent backend
    pub base_url: String,

    /// Timeout for non-streaming requests in seconds
    pub request_timeout_secs: u64,

    /// Regex matched against query error bodies to detect a session the
    /// backend no longer knows
    pub session_invalid_pattern: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5110".to_string(),
            request_timeout_secs: 30,
            session_invalid_pattern: default_session_invalid_pattern(),
        }
    }
}

fn default_session_invalid_pattern() -> String {
    r"(?i)(session|agent)[^\n]*not found|unknown (session|agent)".to_string()
}

impl BackendConfig {
    /// Request timeout as a `Duration`
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Model configuration for one agent of the backend system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentModelConfig {
    /// Tools the agent may call
    pub tool_names: Vec<String>,

    /// Experience file on the backend (empty = none)
    #[serde(default)]
    pub exp_json_path: String,

    /// LLM endpoint
    pub base_url: String,

    /// Environment variable holding the API key
    pub api_key_env: String,

    /// Model identifier
    pub model_id: String,

    /// Sampling temperature
    pub temperature: f64,
}

impl Default for AgentModelConfig {
    fn default() -> Self {
        Self {
            tool_names: vec!["Office_Tool".to_string()],
            exp_json_path: String::new(),
            base_url: "https://api.deepseek.com/v1".to_string(),
            api_key_env: "OFFICE_BRIDGE_LLM_API_KEY".to_string(),
            model_id: "deepseek-chat".to_string(),
            temperature: 0.65,
        }
    }
}

/// A lower-level agent exposed to the upper agent as a tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubAgentConfig {
    /// Name of the agent-as-tool
    pub as_tool_name: String,

    /// Description shown to the upper agent
    pub as_tool_description: String,

    /// Model configuration
    #[serde(flatten)]
    pub model: AgentModelConfig,
}

/// Agent system configuration sent on session start
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Remote tool descriptors forwarded verbatim
    #[serde(default)]
    pub remote_tools: Vec<serde_json::Value>,

    /// Top-level agent
    pub upper_agent: AgentModelConfig,

    /// Agents exposed as tools to the top-level agent
    #[serde(default)]
    pub lower_agents: Vec<SubAgentConfig>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            remote_tools: Vec::new(),
            upper_agent: AgentModelConfig::default(),
            lower_agents: vec![SubAgentConfig {
                as_tool_name: "Office_Agent_As_Tool".to_string(),
                as_tool_description: "Reads and writes office documents".to_string(),
                model: AgentModelConfig {
                    temperature: 0.70,
                    ..AgentModelConfig::default()
                },
            }],
        }
    }
}

/// Resolve an API key from the environment.
///
/// Tries the exact variable name first, then its UPPER_CASE form. Missing
/// keys resolve to an empty string; the backend decides whether that is
/// acceptable.
pub fn resolve_api_key(env_name: &str) -> String {
    std::env::var(env_name)
        .or_else(|_| std::env::var(env_name.to_uppercase()))
        .unwrap_or_default()
}

/// WebSocket control channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Candidate URLs, tried in order
    pub candidate_urls: Vec<String>,

    /// Per-attempt connect timeout in milliseconds
    pub connect_timeout_ms: u64,

    /// Delay before reconnecting after a remote close, in milliseconds
    pub reconnect_delay_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            candidate_urls: vec![
                "wss://127.0.0.1:5112".to_string(),
                "ws://127.0.0.1:5112".to_string(),
            ],
            connect_timeout_ms: 5000,
            reconnect_delay_ms: 3000,
        }
    }
}

impl ControlConfig {
    /// Connect timeout as a `Duration`
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Reconnect delay as a `Duration`
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// What to do with a command whose retries ran out while the engine is
/// still not ready
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustedAction {
    /// Post the command anyway (best effort)
    #[default]
    SendAnyway,
    /// Drop the command with a warning
    Drop,
}

/// Document command bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentConfig {
    /// Delay before the first not-ready retry, in milliseconds
    pub retry_delay_ms: u64,

    /// Number of not-ready retries per command
    pub max_retries: u32,

    /// Multiplier applied to the delay after each retry
    pub backoff_factor: f64,

    /// Action once retries are exhausted
    #[serde(default)]
    pub on_exhausted: ExhaustedAction,

    /// Default script file for remote-script invocations
    pub script_file: String,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: 1000,
            max_retries: 1,
            backoff_factor: 1.0,
            on_exhausted: ExhaustedAction::SendAnyway,
            script_file: "office_api.py".to_string(),
        }
    }
}

/// Status polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Poll interval in milliseconds
    pub interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { interval_ms: 2000 }
    }
}

impl PollingConfig {
    /// Poll interval as a `Duration`
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Default configuration file location (`<config dir>/office-bridge/config.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join("office-bridge").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.control.candidate_urls.len(), 2);
        assert_eq!(config.document.max_retries, 1);
        assert_eq!(config.document.on_exhausted, ExhaustedAction::SendAnyway);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = BridgeConfig::from_toml_str(
            r#"
            [backend]
            base_url = "http://agents.local:9000"
            request_timeout_secs = 5
            session_invalid_pattern = "gone"

            [polling]
            interval_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.backend.base_url, "http://agents.local:9000");
        assert_eq!(config.polling.interval(), Duration::from_millis(250));
        assert_eq!(config.control.reconnect_delay_ms, 3000);
    }

    #[test]
    fn test_rejects_non_websocket_candidate() {
        let err = BridgeConfig::from_toml_str(
            r#"
            [control]
            candidate_urls = ["http://nope:5112"]
            connect_timeout_ms = 100
            reconnect_delay_ms = 100
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_rejects_unbounded_backoff_factor() {
        for factor in ["inf", "nan", "0.5"] {
            let err = BridgeConfig::from_toml_str(&format!(
                "[document]\nretry_delay_ms = 100\nmax_retries = 3\nbackoff_factor = {}\nscript_file = \"office_api.py\"\n",
                factor
            ))
            .unwrap_err();
            assert!(matches!(err, Error::Config(_)), "accepted {}", factor);
        }

        let mut config = BridgeConfig::default();
        config.document.backoff_factor = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_session_pattern() {
        let mut config = BridgeConfig::default();
        config.backend.session_invalid_pattern = "(".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [document]
            retry_delay_ms = 50
            max_retries = 3
            backoff_factor = 2.0
            on_exhausted = "drop"
            script_file = "tools.py"
            "#
        )
        .unwrap();

        let config = BridgeConfig::load(file.path()).unwrap();
        assert_eq!(config.document.max_retries, 3);
        assert_eq!(config.document.on_exhausted, ExhaustedAction::Drop);
        assert_eq!(config.document.script_file, "tools.py");
    }

    #[test]
    fn test_toml_round_trip_keeps_lower_agents() {
        let config = BridgeConfig::default();
        let text = config.to_toml_string().unwrap();
        let parsed = BridgeConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed.session.lower_agents.len(), 1);
        assert_eq!(
            parsed.session.lower_agents[0].as_tool_name,
            "Office_Agent_As_Tool"
        );
    }

    #[test]
    fn test_resolve_api_key_uppercase_fallback() {
        std::env::set_var("OFFICE_BRIDGE_TEST_KEY_X", "sk-test");
        assert_eq!(resolve_api_key("office_bridge_test_key_x"), "sk-test");
        assert_eq!(resolve_api_key("OFFICE_BRIDGE_TEST_MISSING"), "");
        std::env::remove_var("OFFICE_BRIDGE_TEST_KEY_X");
    }
}
