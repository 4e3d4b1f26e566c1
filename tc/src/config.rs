//! thinkchat configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::prompts::embedded;

/// Main thinkchat configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// LLM provider configuration
    pub llm: LlmConfig,

    /// Session memory configuration
    pub session: SessionConfig,

    /// Streaming output configuration
    pub stream: StreamConfig,

    /// Transport configuration
    pub server: ServerConfig,

    /// Prompt templates
    pub prompt: PromptConfig,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Call this early in startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<()> {
        if self.session.history_bound == 0 {
            return Err(eyre::eyre!("session.history-bound must be at least 1"));
        }
        if self.session.max_input_chars == 0 {
            return Err(eyre::eyre!("session.max-input-chars must be at least 1"));
        }
        if self.stream.chunk_buffer == 0 {
            return Err(eyre::eyre!("stream.chunk-buffer must be at least 1"));
        }
        Ok(())
    }

    /// Validate that the LLM API key is available
    ///
    /// Only the commands that talk to a model need this.
    pub fn validate_llm(&self) -> Result<()> {
        if std::env::var(&self.llm.api_key_env).is_err() {
            return Err(eyre::eyre!(
                "LLM API key not found. Set the {} environment variable.",
                self.llm.api_key_env
            ));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .thinkchat.yml
        let local_config = PathBuf::from(".thinkchat.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/thinkchat/thinkchat.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("thinkchat").join("thinkchat.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name ("anthropic" or "openai")
    pub provider: String,

    /// Model identifier
    pub model: String,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// API base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Maximum tokens per response
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Connection attempts after the first failure; 0 means failures are final
    #[serde(rename = "max-retries")]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            max_tokens: 2048,
            timeout_ms: 120_000,
            max_retries: 0,
        }
    }
}

impl LlmConfig {
    /// Read the API key from the configured environment variable
    pub fn get_api_key(&self) -> Result<String> {
        std::env::var(&self.api_key_env)
            .map_err(|_| eyre::eyre!("Environment variable {} is not set", self.api_key_env))
    }
}

/// Session memory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Turns retained per session before FIFO eviction
    #[serde(rename = "history-bound")]
    pub history_bound: usize,

    /// Sessions untouched for this long are dropped; 0 disables expiry
    #[serde(rename = "idle-ttl-secs")]
    pub idle_ttl_secs: u64,

    /// How often the idle sweep runs
    #[serde(rename = "reap-interval-secs")]
    pub reap_interval_secs: u64,

    /// Longest accepted user message, in characters
    #[serde(rename = "max-input-chars")]
    pub max_input_chars: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_bound: sessionstore::DEFAULT_MAX_TURNS,
            idle_ttl_secs: 3600,
            reap_interval_secs: 60,
            max_input_chars: 2000,
        }
    }
}

impl SessionConfig {
    pub fn idle_ttl(&self) -> Option<Duration> {
        (self.idle_ttl_secs > 0).then(|| Duration::from_secs(self.idle_ttl_secs))
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs.max(1))
    }
}

/// Streaming output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Delay before each envelope is released to the client
    #[serde(rename = "pacing-ms")]
    pub pacing_ms: u64,

    /// Buffered fragments between the LLM client and the composer
    #[serde(rename = "chunk-buffer")]
    pub chunk_buffer: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            pacing_ms: 50,
            chunk_buffer: 64,
        }
    }
}

impl StreamConfig {
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }
}

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the NDJSON listener binds to
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7878".to_string(),
        }
    }
}

/// Prompt templates
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Handlebars template for the system prompt
    pub system: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system: embedded::SYSTEM.to_string(),
        }
    }
}
