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

/// How the UI animates streamed text.
///
/// The controller never changes rendering itself; the value is carried so
/// that every view attached to a controller agrees on one preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AnimationMode {
    #[default]
    Typewriter,
    Fade,
    Instant,
}

impl fmt::Display for AnimationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnimationMode::Typewriter => write!(f, "typewriter"),
            AnimationMode::Fade => write!(f, "fade"),
            AnimationMode::Instant => write!(f, "instant"),
        }
    }
}

/// Turn endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub url: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Static bearer token. Takes precedence over `token_env`.
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default)]
    pub use_env_proxy: bool,
}

fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_token_env() -> String {
    "TURNSTREAM_TOKEN".to_string()
}

/// Turn lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnConfig {
    /// Hard upper bound for one turn, after which it is force-cancelled.
    #[serde(default = "default_turn_timeout_secs")]
    pub timeout_secs: u64,
    /// Pause between cancelling a superseded turn and opening the next one.
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
    /// Tool round ceiling assumed until the pipeline reports its own.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,
    #[serde(default)]
    pub model: Option<String>,
}

fn default_turn_timeout_secs() -> u64 {
    300
}
fn default_cancel_grace_ms() -> u64 {
    50
}
fn default_max_tool_rounds() -> u32 {
    10
}

impl TurnConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    #[must_use]
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_turn_timeout_secs(),
            cancel_grace_ms: default_cancel_grace_ms(),
            max_tool_rounds: default_max_tool_rounds(),
            model: None,
        }
    }
}

/// Display preferences injected into the turn controller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DisplayConfig {
    #[serde(default)]
    pub animation: AnimationMode,
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub turn: TurnConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

impl AppConfig {
    /// Minimal config pointing at `url` with every other setting defaulted.
    #[must_use]
    pub fn for_endpoint(url: impl Into<String>) -> Self {
        Self {
            endpoint: EndpointConfig {
                url: url.into(),
                connect_timeout_secs: default_connect_timeout_secs(),
                api_token: None,
                token_env: default_token_env(),
                proxy: None,
                use_env_proxy: false,
            },
            turn: TurnConfig::default(),
            display: DisplayConfig::default(),
            features: FeaturesConfig::default(),
        }
    }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_example_config() {
        let config = load_config("config.example.yaml");
        assert!(
            config.is_ok(),
            "Failed to load example config: {:?}",
            config.err()
        );
        let config = config.unwrap();
        assert_eq!(config.turn.timeout_secs, 300);
        assert_eq!(config.turn.cancel_grace_ms, 50);
        assert_eq!(config.display.animation, AnimationMode::Typewriter);
        assert_eq!(config.endpoint.token_env, "TURNSTREAM_TOKEN");
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config = parse_config("endpoint:\n  url: http://127.0.0.1:9000/api/chat/stream\n")
            .expect("minimal config");
        assert_eq!(config.endpoint.connect_timeout_secs, 10);
        assert_eq!(config.turn.max_tool_rounds, 10);
        assert_eq!(config.features.log_level, "INFO");
        assert!(config.endpoint.api_token.is_none());
    }

    #[test]
    fn test_animation_mode_serde() {
        let json = serde_json::to_string(&AnimationMode::Instant).unwrap();
        assert_eq!(json, "\"instant\"");
        let mode: AnimationMode = serde_json::from_str("\"fade\"").unwrap();
        assert_eq!(mode, AnimationMode::Fade);
    }
}
