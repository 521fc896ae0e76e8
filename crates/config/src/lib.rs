//! Configuration loading, validation, and management for CarePilot.
//!
//! Loads configuration from `~/.carepilot/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.carepilot/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Language-model service settings
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Reasoning loop settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Short-term memory bounds and long-term persistence
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Session lifetime and capacity
    #[serde(default)]
    pub sessions: SessionConfig,

    /// Post-answer grounding verification
    #[serde(default)]
    pub grounding: GroundingConfig,

    /// Telemetry and cost tracking
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Background evaluation queue
    #[serde(default)]
    pub evaluation: EvaluationConfig,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// OpenAI-compatible base URL
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_api_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_model() -> String {
    "anthropic/claude-sonnet-4".into()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    2048
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_api_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Replaces the built-in system instructions when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

fn default_max_iterations() -> usize {
    10
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            instructions: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Conversation turns kept before compression
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Oldest turns folded into one summary on overflow
    #[serde(default = "default_history_compress_batch")]
    pub history_compress_batch: usize,

    #[serde(default = "default_trace_limit")]
    pub trace_limit: usize,

    /// Most recent trace entries kept when the limit is exceeded
    #[serde(default = "default_trace_keep")]
    pub trace_keep: usize,

    /// JSON file for long-term assessment history (in-memory only when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assessment_store: Option<PathBuf>,
}

fn default_history_limit() -> usize {
    50
}
fn default_history_compress_batch() -> usize {
    10
}
fn default_trace_limit() -> usize {
    100
}
fn default_trace_keep() -> usize {
    50
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            history_compress_batch: default_history_compress_batch(),
            trace_limit: default_trace_limit(),
            trace_keep: default_trace_keep(),
            assessment_store: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_ttl_minutes")]
    pub ttl_minutes: u64,

    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    #[serde(default = "default_eviction_interval")]
    pub eviction_interval_minutes: u64,
}

fn default_ttl_minutes() -> u64 {
    30
}
fn default_max_sessions() -> usize {
    30
}
fn default_eviction_interval() -> u64 {
    5
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: default_ttl_minutes(),
            max_sessions: default_max_sessions(),
            eviction_interval_minutes: default_eviction_interval(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroundingMode {
    #[default]
    Fast,
    Thorough,
}

impl GroundingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            GroundingMode::Fast => "fast",
            GroundingMode::Thorough => "thorough",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroundingConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub mode: GroundingMode,
}

/// Telemetry and cost tracking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Whether telemetry is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Custom model pricing overrides (model name → pricing)
    #[serde(default)]
    pub custom_pricing: HashMap<String, PricingOverrideConfig>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            custom_pricing: HashMap::new(),
        }
    }
}

/// Custom per-million-token pricing for a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingOverrideConfig {
    /// Price per 1M input tokens in USD
    pub input_per_m: f64,
    /// Price per 1M output tokens in USD
    pub output_per_m: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Jobs buffered before new submissions are dropped
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_queue_capacity() -> usize {
    256
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.carepilot/config.toml).
    ///
    /// Also checks environment variables:
    /// - `CAREPILOT_API_KEY` (highest priority), then `OPENROUTER_API_KEY`,
    ///   then `OPENAI_API_KEY`
    /// - `CAREPILOT_MODEL`
    /// - `CAREPILOT_API_URL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
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

    /// Apply environment overrides through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.provider.api_key.is_none() {
            self.provider.api_key = lookup("CAREPILOT_API_KEY")
                .or_else(|| lookup("OPENROUTER_API_KEY"))
                .or_else(|| lookup("OPENAI_API_KEY"));
        }

        if let Some(model) = lookup("CAREPILOT_MODEL") {
            self.provider.model = model;
        }

        if let Some(url) = lookup("CAREPILOT_API_URL") {
            self.provider.api_url = url;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".carepilot")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.provider.temperature) {
            return Err(ConfigError::ValidationError(
                "provider.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be at least 1".into(),
            ));
        }

        let m = &self.memory;
        if m.history_compress_batch == 0 || m.history_compress_batch > m.history_limit {
            return Err(ConfigError::ValidationError(
                "memory.history_compress_batch must be between 1 and history_limit".into(),
            ));
        }
        if m.trace_keep == 0 || m.trace_keep >= m.trace_limit {
            return Err(ConfigError::ValidationError(
                "memory.trace_keep must be at least 1 and below trace_limit".into(),
            ));
        }

        if self.sessions.max_sessions == 0 || self.sessions.ttl_minutes == 0 {
            return Err(ConfigError::ValidationError(
                "sessions.max_sessions and sessions.ttl_minutes must be positive".into(),
            ));
        }

        if self.evaluation.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "evaluation.queue_capacity must be positive".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.provider.api_key.is_some()
    }

    /// Generate a default config TOML string (for `init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
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

impl From<ConfigError> for carepilot_core::Error {
    fn from(e: ConfigError) -> Self {
        carepilot_core::Error::Config {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.agent.max_iterations, 10);
        assert_eq!(config.sessions.ttl_minutes, 30);
        assert_eq!(config.sessions.max_sessions, 30);
        assert_eq!(config.memory.history_limit, 50);
        assert_eq!(config.grounding.mode, GroundingMode::Fast);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.provider.model, config.provider.model);
        assert_eq!(parsed.evaluation.queue_capacity, 256);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = AppConfig::default();
        config.provider.temperature = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn trace_keep_must_be_below_limit() {
        let mut config = AppConfig::default();
        config.memory.trace_keep = 100;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("trace_keep"));
    }

    #[test]
    fn zero_iterations_rejected() {
        let mut config = AppConfig::default();
        config.agent.max_iterations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.provider.api_url, "https://openrouter.ai/api/v1");
    }

    #[test]
    fn partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[agent]
max_iterations = 4

[grounding]
enabled = true
mode = "thorough"
"#
        )
        .unwrap();
        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.agent.max_iterations, 4);
        assert!(config.grounding.enabled);
        assert_eq!(config.grounding.mode, GroundingMode::Thorough);
        assert_eq!(config.sessions.eviction_interval_minutes, 5);
    }

    #[test]
    fn env_overrides_apply_in_priority_order() {
        let mut config = AppConfig::default();
        config.apply_env(|key| match key {
            "OPENROUTER_API_KEY" => Some("or-key".into()),
            "OPENAI_API_KEY" => Some("oa-key".into()),
            "CAREPILOT_MODEL" => Some("openai/gpt-4o".into()),
            _ => None,
        });
        assert_eq!(config.provider.api_key.as_deref(), Some("or-key"));
        assert_eq!(config.provider.model, "openai/gpt-4o");
    }

    #[test]
    fn debug_redacts_api_key() {
        let mut config = AppConfig::default();
        config.provider.api_key = Some("sk-secret".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("openrouter"));
        assert!(toml_str.contains("max_iterations"));
    }
}
