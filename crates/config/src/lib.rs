//! Configuration loading, validation, and management for agentloom.
//!
//! The configuration is a plain value object: it is built once (from TOML,
//! defaults, and environment overrides) and then handed by reference to each
//! component constructor. Nothing reads configuration from global state.

pub mod logging;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub use logging::LoggingConfig;

/// The root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// LLM backend settings
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Security gate settings
    #[serde(default)]
    pub security: SecurityConfig,

    /// Conversation memory settings
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Orchestrator settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_name")]
    pub name: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Per-request HTTP timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_provider_name() -> String {
    "openai".into()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_timeout_secs() -> u64 {
    120
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .field("retry", &self.retry)
            .finish()
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: default_provider_name(),
            base_url: default_base_url(),
            api_key: None,
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: None,
            timeout_secs: default_timeout_secs(),
            retry: RetryConfig::default(),
        }
    }
}

/// Backend retry/backoff policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total send attempts, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay for 5xx backoff (`base × attempt`)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Delay used on 429 when the response has no Retry-After header
    #[serde(default = "default_rate_limit_delay_ms")]
    pub rate_limit_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_rate_limit_delay_ms() -> u64 {
    5000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            rate_limit_delay_ms: default_rate_limit_delay_ms(),
        }
    }
}

/// What to do when input matches a prompt-injection pattern.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectionAction {
    /// Reject the message
    #[default]
    Block,
    /// Log and let it through
    Warn,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default = "default_max_input_length")]
    pub max_input_length: usize,

    #[serde(default)]
    pub injection_action: InjectionAction,

    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls_per_request: u32,

    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    #[serde(default = "default_true")]
    pub confirm_destructive: bool,

    #[serde(default = "default_true")]
    pub sanitize_output: bool,

    /// Additional case-insensitive regexes treated as injection attempts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_injection_patterns: Vec<String>,

    /// Additional verbs that mark a tool as destructive
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_destructive_verbs: Vec<String>,
}

fn default_max_input_length() -> usize {
    10_000
}
fn default_max_tool_calls() -> u32 {
    25
}
fn default_max_iterations() -> u32 {
    10
}
fn default_true() -> bool {
    true
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_input_length: default_max_input_length(),
            injection_action: InjectionAction::default(),
            max_tool_calls_per_request: default_max_tool_calls(),
            max_iterations: default_max_iterations(),
            confirm_destructive: true,
            sanitize_output: true,
            extra_injection_patterns: Vec::new(),
            extra_destructive_verbs: Vec::new(),
        }
    }
}

/// Which memory store backs conversations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryBackendKind {
    /// In-process, lives as long as the store value
    #[default]
    Session,
    /// One JSON file per conversation under `path`
    File,
    /// Remember nothing
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default)]
    pub backend: MemoryBackendKind,

    /// Directory for the file backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Maximum messages returned by recall
    #[serde(default = "default_recall_limit")]
    pub recall_limit: usize,

    /// Unsummarized messages tolerated before summarizing
    #[serde(default = "default_summarize_after")]
    pub summarize_after: usize,

    /// Messages always kept verbatim at the tail
    #[serde(default = "default_recent_messages")]
    pub recent_messages: usize,

    #[serde(default = "default_summary_max_chars")]
    pub summary_max_chars: usize,
}

fn default_recall_limit() -> usize {
    50
}
fn default_summarize_after() -> usize {
    20
}
fn default_recent_messages() -> usize {
    10
}
fn default_summary_max_chars() -> usize {
    2000
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: MemoryBackendKind::default(),
            path: None,
            recall_limit: default_recall_limit(),
            summarize_after: default_summarize_after(),
            recent_messages: default_recent_messages(),
            summary_max_chars: default_summary_max_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent name used for tool scoping
    #[serde(default = "default_agent_name")]
    pub name: String,

    /// Caller-supplied instructions placed first in the system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Absolute loop ceiling; exceeding it is a fatal error
    #[serde(default = "default_hard_cap")]
    pub hard_iteration_cap: u32,

    /// Include the smart-resolution instructions in the system prompt
    #[serde(default)]
    pub smart_resolution: bool,

    /// Message sent to the model after tool results are appended
    #[serde(default = "default_continuation_prompt")]
    pub continuation_prompt: String,
}

fn default_agent_name() -> String {
    "assistant".into()
}
fn default_hard_cap() -> u32 {
    25
}
fn default_continuation_prompt() -> String {
    "Continue with the tool results above. Call another tool if needed, otherwise answer the user.".into()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            system_prompt: None,
            hard_iteration_cap: default_hard_cap(),
            smart_resolution: false,
            continuation_prompt: default_continuation_prompt(),
        }
    }
}

impl AppConfig {
    /// Load from the default location with environment overrides applied.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit path. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<inline>"),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Environment variables take precedence over file values.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("AGENTLOOM_API_KEY") {
            self.provider.api_key = Some(key);
        } else if self.provider.api_key.is_none() {
            self.provider.api_key = std::env::var("OPENAI_API_KEY").ok();
        }

        if let Ok(model) = std::env::var("AGENTLOOM_MODEL") {
            self.provider.model = model;
        }

        if let Ok(url) = std::env::var("AGENTLOOM_BASE_URL") {
            self.provider.base_url = url;
        }
    }

    /// Get the config directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".agentloom")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.temperature < 0.0 || self.provider.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "provider.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.provider.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "provider.retry.max_attempts must be at least 1".into(),
            ));
        }

        if self.security.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "security.max_iterations must be at least 1".into(),
            ));
        }

        if self.memory.recent_messages >= self.memory.summarize_after {
            return Err(ConfigError::ValidationError(
                "memory.recent_messages must be smaller than memory.summarize_after".into(),
            ));
        }

        if self.agent.hard_iteration_cap < self.security.max_iterations {
            tracing::warn!(
                hard_cap = self.agent.hard_iteration_cap,
                max_iterations = self.security.max_iterations,
                "Hard iteration cap is below the security limit; long turns will fail instead of stopping gracefully"
            );
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.provider.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.provider.retry.max_attempts, 3);
        assert_eq!(config.security.max_iterations, 10);
        assert_eq!(config.memory.summary_max_chars, 2000);
        assert_eq!(config.memory.backend, MemoryBackendKind::Session);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed = AppConfig::from_toml_str(&toml_str).unwrap();
        assert_eq!(parsed.provider.model, config.provider.model);
        assert_eq!(parsed.agent.name, "assistant");
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            [security]
            max_iterations = 4
            injection_action = "warn"

            [memory]
            backend = "none"
            "#,
        )
        .unwrap();
        assert_eq!(config.security.max_iterations, 4);
        assert_eq!(config.security.injection_action, InjectionAction::Warn);
        assert_eq!(config.memory.backend, MemoryBackendKind::None);
        assert_eq!(config.provider.retry.base_delay_ms, 1000);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let err = AppConfig::from_toml_str("[provider]\ntemperature = 3.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn recent_window_must_fit_inside_threshold() {
        let err = AppConfig::from_toml_str(
            "[memory]\nsummarize_after = 4\nrecent_messages = 4\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("recent_messages"));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.provider.name, "openai");
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[agent]\nname = \"support\"\n").unwrap();
        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.agent.name, "support");
    }

    #[test]
    fn debug_redacts_api_key() {
        let mut config = AppConfig::default();
        config.provider.api_key = Some("sk-supersecretvalue".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("supersecret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
