//! TOML Configuration File Support
//!
//! Configuration loading for the relay daemon, supporting a TOML file at
//! `~/.config/vidchat/relay.toml`.
//!
//! # Configuration Priority
//!
//! Values are resolved with the following priority (highest first):
//! 1. CLI arguments (passed in as [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 3000
//!
//! [ollama]
//! url = "http://localhost:11434"
//! default_model = "llama3.2"
//! connect_timeout_secs = 10
//!
//! [video]
//! enabled = true
//! url = "http://ai.connected-in.co.kr:8000/"
//! timeout_secs = 60
//! max_frame_bytes = 67108864
//! # fixed_text = "Hello"
//!
//! [relay]
//! channel_capacity = 64
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::DEFAULT_OLLAMA_URL;
use crate::protocol::MAX_FRAME_SIZE;
use crate::relay::{RelayConfig, DEFAULT_CHANNEL_CAPACITY};
use crate::video::{DEFAULT_VIDEO_TIMEOUT, DEFAULT_VIDEO_URL};

/// Default listen host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default listen port
pub const DEFAULT_PORT: u16 = 3000;

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "VIDCHAT_CONFIG";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where the highest-priority configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[server]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerToml {
    /// Listen host
    pub host: Option<String>,
    /// Listen port
    pub port: Option<u16>,
}

/// `[ollama]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaToml {
    /// Ollama base URL
    pub url: Option<String>,
    /// Model used when a request names none
    pub default_model: Option<String>,
    /// Connect timeout in seconds
    pub connect_timeout_secs: Option<u64>,
}

/// `[video]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoToml {
    /// Whether to request videos at all
    pub enabled: Option<bool>,
    /// Video service URL
    pub url: Option<String>,
    /// Render timeout in seconds
    pub timeout_secs: Option<u64>,
    /// Largest encoded video frame the relay will send
    pub max_frame_bytes: Option<usize>,
    /// Fixed text sent instead of the user's prompt
    pub fixed_text: Option<String>,
}

/// `[relay]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayToml {
    /// Outbound frame channel capacity
    pub channel_capacity: Option<usize>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VidchatToml {
    /// Server section
    pub server: ServerToml,
    /// Ollama section
    pub ollama: OllamaToml,
    /// Video section
    pub video: VideoToml,
    /// Relay section
    pub relay: RelayToml,
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Resolved video backend settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoSettings {
    /// Whether to request videos
    pub enabled: bool,
    /// Video service URL
    pub url: String,
    /// Render timeout
    pub timeout: Duration,
    /// Largest encoded video frame, newline included
    pub max_frame_bytes: usize,
    /// Fixed text sent instead of the user's prompt
    pub fixed_text: Option<String>,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            url: DEFAULT_VIDEO_URL.to_string(),
            timeout: DEFAULT_VIDEO_TIMEOUT,
            max_frame_bytes: MAX_FRAME_SIZE,
            fixed_text: None,
        }
    }
}

/// Resolved relay daemon configuration
///
/// Use [`load_config`] to build one with proper priority handling.
#[derive(Clone, Debug)]
pub struct RelaySettings {
    /// Listen host
    pub host: String,
    /// Listen port
    pub port: u16,
    /// Ollama base URL
    pub ollama_url: String,
    /// Model used when a request names none
    pub default_model: Option<String>,
    /// Ollama connect timeout
    pub connect_timeout: Duration,
    /// Video backend settings
    pub video: VideoSettings,
    /// Outbound frame channel capacity
    pub channel_capacity: usize,
    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,
    source: ConfigSource,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            ollama_url: DEFAULT_OLLAMA_URL.to_string(),
            default_model: None,
            connect_timeout: Duration::from_secs(10),
            video: VideoSettings::default(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl RelaySettings {
    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// `host:port` to bind
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Per-request relay settings
    #[must_use]
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            default_model: self.default_model.clone(),
            channel_capacity: self.channel_capacity,
            video_timeout: self.video.timeout,
            max_video_frame: self.video.max_frame_bytes,
            video_fixed_text: self.video.fixed_text.clone(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "server.host must not be empty".to_string(),
            ));
        }
        check_url("ollama.url", &self.ollama_url)?;
        if self.video.enabled {
            check_url("video.url", &self.video.url)?;
        }
        if self.video.timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "video.timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.video.max_frame_bytes == 0 || self.video.max_frame_bytes > MAX_FRAME_SIZE {
            return Err(ConfigError::ValidationError(format!(
                "video.max_frame_bytes must be between 1 and {MAX_FRAME_SIZE}"
            )));
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "ollama.connect_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "relay.channel_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn check_url(field: &str, url: &str) -> Result<(), ConfigError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(format!(
            "{field} must be an http(s) URL, got '{url}'"
        )))
    }
}

/// Values given on the command line
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Explicit config file
    pub config_path: Option<PathBuf>,
    /// Listen host
    pub host: Option<String>,
    /// Listen port
    pub port: Option<u16>,
    /// Ollama base URL
    pub ollama_url: Option<String>,
    /// Default model
    pub default_model: Option<String>,
    /// Video service URL
    pub video_url: Option<String>,
    /// Force video generation on or off
    pub video_enabled: Option<bool>,
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/vidchat/relay.toml` or
/// `~/.config/vidchat/relay.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("vidchat").join("relay.toml"))
}

/// Load configuration from all sources with proper priority
///
/// The file is `overrides.config_path`, else `$VIDCHAT_CONFIG`, else
/// [`default_config_path`].
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if a
/// resolved value is invalid. A missing config file is not an error.
pub fn load_config(overrides: &ConfigOverrides) -> Result<RelaySettings, ConfigError> {
    let path = overrides
        .config_path
        .clone()
        .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from))
        .or_else(default_config_path);
    load_config_from_path(path, overrides)
}

/// Load configuration from a specific path
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed,
/// or if a resolved value is invalid.
pub fn load_config_from_path(
    path: Option<PathBuf>,
    overrides: &ConfigOverrides,
) -> Result<RelaySettings, ConfigError> {
    load_with_env(path, overrides, |key| std::env::var(key).ok())
}

fn load_with_env(
    path: Option<PathBuf>,
    overrides: &ConfigOverrides,
    env: impl Fn(&str) -> Option<String>,
) -> Result<RelaySettings, ConfigError> {
    // Start with defaults
    let mut config = RelaySettings::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: VidchatToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, &env)?;
    apply_overrides(&mut config, overrides);
    config.validate()?;

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut RelaySettings, toml: VidchatToml) {
    if let Some(host) = toml.server.host {
        config.host = host;
    }
    if let Some(port) = toml.server.port {
        config.port = port;
    }

    if let Some(url) = toml.ollama.url {
        config.ollama_url = url;
    }
    if toml.ollama.default_model.is_some() {
        config.default_model = toml.ollama.default_model;
    }
    if let Some(secs) = toml.ollama.connect_timeout_secs {
        config.connect_timeout = Duration::from_secs(secs);
    }

    if let Some(enabled) = toml.video.enabled {
        config.video.enabled = enabled;
    }
    if let Some(url) = toml.video.url {
        config.video.url = url;
    }
    if let Some(secs) = toml.video.timeout_secs {
        config.video.timeout = Duration::from_secs(secs);
    }
    if let Some(max) = toml.video.max_frame_bytes {
        config.video.max_frame_bytes = max;
    }
    if toml.video.fixed_text.is_some() {
        config.video.fixed_text = toml.video.fixed_text;
    }

    if let Some(capacity) = toml.relay.channel_capacity {
        config.channel_capacity = capacity;
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| {
        ConfigError::ValidationError(format!("{key} has an invalid value '{value}'"))
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::ValidationError(format!(
            "{key} has an invalid value '{value}'"
        ))),
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config(
    config: &mut RelaySettings,
    env: &impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(url) = env("OLLAMA_URL") {
        config.ollama_url = url;
        config.source = ConfigSource::Env;
    }
    if let Some(host) = env("VIDCHAT_HOST") {
        config.host = host;
        config.source = ConfigSource::Env;
    }
    if let Some(port) = env("VIDCHAT_PORT") {
        config.port = parse_env("VIDCHAT_PORT", &port)?;
        config.source = ConfigSource::Env;
    }
    if let Some(model) = env("VIDCHAT_MODEL") {
        config.default_model = Some(model);
        config.source = ConfigSource::Env;
    }
    if let Some(url) = env("VIDCHAT_VIDEO_URL") {
        config.video.url = url;
        config.source = ConfigSource::Env;
    }
    if let Some(enabled) = env("VIDCHAT_VIDEO_ENABLED") {
        config.video.enabled = parse_bool("VIDCHAT_VIDEO_ENABLED", &enabled)?;
        config.source = ConfigSource::Env;
    }
    if let Some(secs) = env("VIDCHAT_VIDEO_TIMEOUT_SECS") {
        config.video.timeout = Duration::from_secs(parse_env("VIDCHAT_VIDEO_TIMEOUT_SECS", &secs)?);
        config.source = ConfigSource::Env;
    }
    Ok(())
}

/// Apply CLI overrides (highest priority)
fn apply_overrides(config: &mut RelaySettings, overrides: &ConfigOverrides) {
    let mut touched = false;
    if let Some(host) = &overrides.host {
        config.host.clone_from(host);
        touched = true;
    }
    if let Some(port) = overrides.port {
        config.port = port;
        touched = true;
    }
    if let Some(url) = &overrides.ollama_url {
        config.ollama_url.clone_from(url);
        touched = true;
    }
    if let Some(model) = &overrides.default_model {
        config.default_model = Some(model.clone());
        touched = true;
    }
    if let Some(url) = &overrides.video_url {
        config.video.url.clone_from(url);
        touched = true;
    }
    if let Some(enabled) = overrides.video_enabled {
        config.video.enabled = enabled;
        touched = true;
    }
    if touched {
        config.source = ConfigSource::Cli;
    }
}
