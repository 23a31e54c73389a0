//! Notification channel configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Webhook push configuration. An empty webhook disables delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    /// Robot webhook URL.
    #[serde(default)]
    pub webhook: String,
    /// Request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            webhook: String::new(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl PushConfig {
    /// Whether a webhook is configured.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.webhook.trim().is_empty()
    }

    /// Request timeout; zero falls back to the default.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        if self.timeout_ms == 0 {
            Duration::from_millis(default_timeout_ms())
        } else {
            Duration::from_millis(self.timeout_ms)
        }
    }
}

const fn default_timeout_ms() -> u64 {
    5000
}
