//! Alert pipeline configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::application::services::AlertServiceConfig;

/// Alert pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Token bucket for outbound notifications.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Dedup window.
    #[serde(default)]
    pub dedup: WindowConfig,
    /// Merge window.
    #[serde(default = "default_merge")]
    pub merge: WindowConfig,
    /// Low-priority digest.
    #[serde(default)]
    pub digest: DigestConfig,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitConfig::default(),
            dedup: WindowConfig::default(),
            merge: default_merge(),
            digest: DigestConfig::default(),
        }
    }
}

/// Token bucket settings. Non-positive `per_minute` disables limiting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Tokens per minute.
    #[serde(default = "default_per_minute")]
    pub per_minute: i64,
    /// Bucket capacity.
    #[serde(default = "default_burst")]
    pub burst: i64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_minute: default_per_minute(),
            burst: default_burst(),
        }
    }
}

/// A time window in seconds. Non-positive disables the stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Window length.
    #[serde(default = "default_dedup_sec")]
    pub window_sec: i64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            window_sec: default_dedup_sec(),
        }
    }
}

/// Digest settings. Non-positive interval drops low-priority alerts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestConfig {
    /// Flush period.
    #[serde(default = "default_digest_sec")]
    pub low_interval_sec: i64,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            low_interval_sec: default_digest_sec(),
        }
    }
}

impl AlertConfig {
    /// Settings for the alert service.
    #[must_use]
    pub fn to_service_config(&self) -> AlertServiceConfig {
        AlertServiceConfig {
            rate_per_minute: self.rate_limit.per_minute,
            burst: self.rate_limit.burst,
            dedup_window: secs(self.dedup.window_sec),
            merge_window: secs(self.merge.window_sec),
            digest_interval: secs(self.digest.low_interval_sec),
            ..AlertServiceConfig::default()
        }
    }
}

fn secs(value: i64) -> Duration {
    u64::try_from(value).map_or(Duration::ZERO, Duration::from_secs)
}

fn default_merge() -> WindowConfig {
    WindowConfig {
        window_sec: default_merge_sec(),
    }
}

const fn default_per_minute() -> i64 {
    60
}

const fn default_burst() -> i64 {
    10
}

const fn default_dedup_sec() -> i64 {
    60
}

const fn default_merge_sec() -> i64 {
    30
}

const fn default_digest_sec() -> i64 {
    60
}
