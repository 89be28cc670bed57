//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/habitstats/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/habitstats/` (~/.config/habitstats/)
//! - Data: `$XDG_DATA_HOME/habitstats/` (~/.local/share/habitstats/)
//! - State/Logs: `$XDG_STATE_HOME/habitstats/` (~/.local/state/habitstats/)

use crate::analytics::{DEFAULT_TOP_HABITS, DEFAULT_TRAILING_DAYS};
use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Database location override
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Stats computation settings
    #[serde(default)]
    pub analytics: AnalyticsConfig,

    /// LLM configuration for narrated reports (optional)
    #[serde(default)]
    pub llm: Option<LlmConfig>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database configuration
#[derive(Debug, Deserialize, Default)]
pub struct DatabaseConfig {
    /// Path to the SQLite file; defaults to [`Config::database_path`]
    pub path: Option<PathBuf>,
}

/// Stats computation settings
#[derive(Debug, Deserialize, Clone)]
pub struct AnalyticsConfig {
    /// Days in the trailing completion window used when no time range is given
    #[serde(default = "default_trailing_days")]
    pub trailing_days: u32,

    /// Number of habits listed in the summary report
    #[serde(default = "default_top_habits")]
    pub top_habits: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            trailing_days: default_trailing_days(),
            top_habits: default_top_habits(),
        }
    }
}

/// Upper bound for `[analytics] trailing_days`, roughly a century
pub const MAX_TRAILING_DAYS: u32 = 36_500;

impl AnalyticsConfig {
    /// Reject trailing windows that are empty or reach past the calendar
    pub fn validate(&self) -> Result<()> {
        if self.trailing_days == 0 || self.trailing_days > MAX_TRAILING_DAYS {
            return Err(Error::Config(format!(
                "analytics.trailing_days must be between 1 and {}, got {}",
                MAX_TRAILING_DAYS, self.trailing_days
            )));
        }
        Ok(())
    }
}

fn default_trailing_days() -> u32 {
    DEFAULT_TRAILING_DAYS
}

fn default_top_habits() -> usize {
    DEFAULT_TOP_HABITS
}

/// LLM provider configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// Provider type
    pub provider: LlmProvider,
    /// Model to use
    pub model: String,
    /// API endpoint (optional, uses default for provider)
    pub endpoint: Option<String>,
    /// API key (can also use env var)
    pub api_key: Option<String>,
    /// HTTP timeout for one completion request
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

/// Supported LLM providers
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Ollama,
    Claude,
    OpenAI,
}

impl LlmProvider {
    /// Returns the default endpoint for this provider
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            LlmProvider::Ollama => "http://localhost:11434",
            LlmProvider::Claude => "https://api.anthropic.com",
            LlmProvider::OpenAI => "https://api.openai.com",
        }
    }

    /// Environment variable holding the API key, for hosted providers
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            LlmProvider::Ollama => None,
            LlmProvider::Claude => Some("ANTHROPIC_API_KEY"),
            LlmProvider::OpenAI => Some("OPENAI_API_KEY"),
        }
    }
}

fn default_llm_timeout() -> u64 {
    30
}

fn default_max_tokens() -> u32 {
    1500
}

fn default_temperature() -> f32 {
    0.5
}

impl LlmConfig {
    /// OpenAI-compatible config from `OPENAI_API_KEY`, `OPENAI_MODEL` and
    /// optionally `OPENAI_URL`. Returns `None` unless key and model are set.
    pub fn from_env_vars(get: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let api_key = get("OPENAI_API_KEY").filter(|v| !v.is_empty())?;
        let model = get("OPENAI_MODEL").filter(|v| !v.is_empty())?;
        Some(Self {
            provider: LlmProvider::OpenAI,
            model,
            endpoint: get("OPENAI_URL").filter(|v| !v.is_empty()),
            api_key: Some(api_key),
            timeout_secs: default_llm_timeout(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        })
    }

    /// Endpoint from config or the provider default, without trailing slash
    pub fn endpoint(&self) -> String {
        self.endpoint
            .as_deref()
            .unwrap_or_else(|| self.provider.default_endpoint())
            .trim_end_matches('/')
            .to_string()
    }

    /// API key from config, falling back to the provider's env var
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key.clone().or_else(|| {
            self.provider
                .api_key_env()
                .and_then(|var| std::env::var(var).ok())
                .filter(|v| !v.is_empty())
        })
    }

    /// Check that hosted providers have credentials and the model is set
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(Error::Config("llm.model must not be empty".to_string()));
        }
        if let Some(var) = self.provider.api_key_env() {
            if self.resolved_api_key().is_none() {
                return Err(Error::Config(format!(
                    "llm.api_key or {} is required for this provider",
                    var
                )));
            }
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config(
                "llm.timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;
        config.analytics.validate()?;

        Ok(config)
    }

    /// LLM config from the file, or from the OpenAI env vars if absent
    pub fn resolve_llm(&self) -> Option<LlmConfig> {
        self.llm
            .clone()
            .or_else(|| LlmConfig::from_env_vars(|var| std::env::var(var).ok()))
    }

    /// Database path from config, or the XDG default
    pub fn resolved_database_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(Self::database_path)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/habitstats/config.toml` (~/.config/habitstats/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("habitstats").join("config.toml")
    }

    /// Returns the data directory path (for SQLite database)
    ///
    /// `$XDG_DATA_HOME/habitstats/` (~/.local/share/habitstats/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("habitstats")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/habitstats/` (~/.local/state/habitstats/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("habitstats")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/habitstats/data.db` (~/.local/share/habitstats/data.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("data.db")
    }
}
