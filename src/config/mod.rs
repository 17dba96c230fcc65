pub mod validation;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use self::validation::validate_config;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Reasoning effort hint forwarded to the backend when thinking is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    #[default]
    Medium,
    High,
}

impl ReasoningEffort {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
        }
    }
}

impl fmt::Display for ReasoningEffort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Leave embedded tool-call markup as literal text for every request.
    #[serde(default)]
    pub passthrough: bool,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            passthrough: false,
        }
    }
}

/// Request/response translation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationConfig {
    /// Backend endpoint name forwarded verbatim in every request.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_tool_description_max_chars")]
    pub tool_description_max_chars: usize,
    #[serde(default = "default_max_pending_buffer_bytes")]
    pub max_pending_buffer_bytes: usize,
    #[serde(default)]
    pub reasoning_effort: ReasoningEffort,
    #[serde(default = "default_reasoning_summary")]
    pub reasoning_summary: String,
}

fn default_endpoint() -> String {
    "agents".to_string()
}
fn default_tool_description_max_chars() -> usize {
    512
}
fn default_max_pending_buffer_bytes() -> usize {
    512 * 1024
}
fn default_reasoning_summary() -> String {
    "auto".to_string()
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            tool_description_max_chars: default_tool_description_max_chars(),
            max_pending_buffer_bytes: default_max_pending_buffer_bytes(),
            reasoning_effort: ReasoningEffort::default(),
            reasoning_summary: default_reasoning_summary(),
        }
    }
}

/// Conversation threading store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    #[serde(default = "default_session_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_session_ttl_secs() -> u64 {
    6 * 60 * 60
}

impl SessionsConfig {
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl_secs(),
        }
    }
}

/// Continuity signature cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignaturesConfig {
    #[serde(default = "default_signature_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_signature_min_length")]
    pub min_length: usize,
    #[serde(default = "default_tool_cache_limit")]
    pub tool_cache_limit: usize,
    #[serde(default = "default_family_cache_limit")]
    pub family_cache_limit: usize,
}

fn default_signature_ttl_secs() -> u64 {
    2 * 60 * 60
}
fn default_signature_min_length() -> usize {
    50
}
fn default_tool_cache_limit() -> usize {
    500
}
fn default_family_cache_limit() -> usize {
    200
}

impl SignaturesConfig {
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for SignaturesConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_signature_ttl_secs(),
            min_length: default_signature_min_length(),
            tool_cache_limit: default_tool_cache_limit(),
            family_cache_limit: default_family_cache_limit(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub features: FeaturesConfig,
    #[serde(default)]
    pub translation: TranslationConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub signatures: SignaturesConfig,
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Parse and validate configuration from YAML text.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] when parsing fails or
/// [`ConfigError::Validation`] when semantic validation fails.
pub fn parse_config(contents: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = serde_yaml::from_str(contents)?;
    validate_config(&config)?;
    Ok(config)
}
