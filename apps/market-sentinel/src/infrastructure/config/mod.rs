//! Configuration Module
//!
//! YAML configuration with environment variable interpolation, serde
//! defaults for every field, a small set of environment overrides and
//! startup validation.
//!
//! # Usage
//!
//! ```rust,ignore
//! use market_sentinel::infrastructure::config::load_config;
//!
//! // SENTINEL_CONFIG, else configs/app.yaml
//! let config = load_config(None)?;
//! println!("listening on {}", config.server.port);
//! ```
//!
//! # Environment Overrides
//!
//! - `PORT`: replaces `server.port`
//! - `DINGTALK_WEBHOOK`: replaces `push.webhook`

mod advisor;
mod alert;
mod market;
mod observability;
mod push;
mod server;
mod store;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use advisor::RiskAgentConfig;
pub use alert::{AlertConfig, DigestConfig, RateLimitConfig, WindowConfig};
pub use market::{MarketConfig, QuoteProviderConfig};
pub use observability::LogConfig;
pub use push::PushConfig;
pub use server::ServerConfig;
pub use store::{SqliteConfig, StoreConfig};

use crate::domain::rules::RuleConfig;

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "SENTINEL_CONFIG";

/// Config file used when neither an explicit path nor the env var is set.
pub const DEFAULT_CONFIG_PATH: &str = "configs/app.yaml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("Failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),

    /// An environment override holds an unusable value.
    #[error("Invalid environment variable {name}: {value:?}")]
    InvalidEnvVar {
        /// Variable name.
        name: String,
        /// Offending value.
        value: String,
    },

    /// Configuration validation failed.
    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server.
    #[serde(default)]
    pub server: ServerConfig,
    /// Logging.
    #[serde(default)]
    pub log: LogConfig,
    /// Notification channel.
    #[serde(default)]
    pub push: PushConfig,
    /// Alert pipeline.
    #[serde(default)]
    pub alert: AlertConfig,
    /// Durable store.
    #[serde(default)]
    pub store: StoreConfig,
    /// Market polling.
    #[serde(default)]
    pub market: MarketConfig,
    /// Rule engine.
    #[serde(default)]
    pub engine: RuleConfig,
    /// Risk advisor.
    #[serde(default)]
    pub risk_agent: RiskAgentConfig,
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Resolve the config file path: explicit, then `SENTINEL_CONFIG`, then
/// `configs/app.yaml`.
#[must_use]
pub fn resolve_config_path(explicit: Option<&str>) -> String {
    explicit
        .map(str::to_string)
        .or_else(|| std::env::var(CONFIG_PATH_ENV).ok().filter(|p| !p.trim().is_empty()))
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
}

/// Load configuration from a YAML file, apply env overrides and validate.
///
/// # Errors
///
/// Returns a `ConfigError` if the file cannot be read, parsed, or validated.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let path = resolve_config_path(path);
    let contents = std::fs::read_to_string(&path).map_err(|e| ConfigError::ReadError {
        path: path.clone(),
        source: e,
    })?;
    let mut config = parse_config(&contents)?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    validate_config(&config)?;
    Ok(config)
}

/// Load configuration from a YAML string without env overrides.
///
/// # Errors
///
/// Returns a `ConfigError` if the YAML cannot be parsed or validated.
pub fn load_config_from_string(yaml: &str) -> Result<Config, ConfigError> {
    let config = parse_config(yaml)?;
    validate_config(&config)?;
    Ok(config)
}

fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    let interpolated = interpolate_env_vars(yaml);
    if interpolated.trim().is_empty() {
        return Ok(Config::default());
    }
    Ok(serde_yaml_bw::from_str(&interpolated)?)
}

/// Apply `PORT` and `DINGTALK_WEBHOOK` through `lookup`.
///
/// Empty values are ignored.
///
/// # Errors
///
/// Returns `ConfigError::InvalidEnvVar` when `PORT` is not in `1..=65535`.
pub fn apply_env_overrides(
    config: &mut Config,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(raw) = lookup("PORT").filter(|v| !v.is_empty()) {
        let port = raw
            .trim()
            .parse::<u16>()
            .ok()
            .filter(|p| *p > 0)
            .ok_or_else(|| ConfigError::InvalidEnvVar {
                name: "PORT".to_string(),
                value: raw.clone(),
            })?;
        config.server.port = port;
    }
    if let Some(webhook) = lookup("DINGTALK_WEBHOOK").filter(|v| !v.is_empty()) {
        config.push.webhook = webhook;
    }
    Ok(())
}

/// Interpolate environment variables in a string.
///
/// Supports both `${VAR}` and `${VAR:-default}` syntax.
#[allow(clippy::expect_used)] // static pattern
fn interpolate_env_vars(input: &str) -> String {
    use std::sync::OnceLock;

    static ENV_VAR_REGEX: OnceLock<regex::Regex> = OnceLock::new();

    let re = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("env var regex is valid")
    });

    re.replace_all(input, |cap: &regex::Captures<'_>| {
        let default_value = cap.get(2).map_or("", |m| m.as_str());
        match std::env::var(&cap[1]) {
            Ok(v) if !v.is_empty() => v,
            _ => default_value.to_string(),
        }
    })
    .into_owned()
}

/// Validate configuration values.
fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port must be between 1 and 65535".to_string(),
        ));
    }

    let engine = &config.engine;
    for (name, med, high) in [
        ("index_risk", engine.index_risk.med_pct, engine.index_risk.high_pct),
        ("panic_drop", engine.panic_drop.med_pct, engine.panic_drop.high_pct),
    ] {
        if med < 0.0 || high < 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "engine.{name} thresholds must not be negative"
            )));
        }
        if med > high {
            return Err(ConfigError::ValidationError(format!(
                "engine.{name}.med_pct must not exceed high_pct"
            )));
        }
    }

    if engine.volume_spike.ratio < 0.0 {
        return Err(ConfigError::ValidationError(
            "engine.volume_spike.ratio must be positive".to_string(),
        ));
    }

    if let Some((symbol, _)) = engine.key_break_down.levels.iter().find(|(_, v)| **v <= 0.0) {
        return Err(ConfigError::ValidationError(format!(
            "engine.key_break_down.levels.{symbol} must be positive"
        )));
    }

    if let Some(p) = config
        .market
        .providers
        .iter()
        .find(|p| p.url.trim().is_empty())
    {
        return Err(ConfigError::ValidationError(format!(
            "market.providers.{} has an empty url",
            p.name
        )));
    }

    Ok(())
}
