//! Risk advisor configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// OpenAI-compatible risk advisor settings.
///
/// Empty `api_key`, `model` and `base_url` fall back to `OPENAI_API_KEY`,
/// `OPENAI_MODEL` and `OPENAI_BASE_URL`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAgentConfig {
    /// Use the model; otherwise the fallback answers.
    #[serde(default)]
    pub enabled: bool,
    /// Model name.
    #[serde(default = "default_model")]
    pub model: String,
    /// API key.
    #[serde(default)]
    pub api_key: String,
    /// API base URL, e.g. `https://api.openai.com/v1`.
    #[serde(default)]
    pub base_url: String,
    /// Request timeout in milliseconds; zero means 10 seconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RiskAgentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model: default_model(),
            api_key: String::new(),
            base_url: String::new(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl RiskAgentConfig {
    /// Request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        if self.timeout_ms == 0 {
            Duration::from_millis(default_timeout_ms())
        } else {
            Duration::from_millis(self.timeout_ms)
        }
    }

    /// Fill empty credentials from `lookup` (normally the process env).
    #[must_use]
    pub fn with_env_fallbacks(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let fill = |field: &mut String, var: &str| {
            if field.trim().is_empty()
                && let Some(v) = lookup(var).filter(|v| !v.trim().is_empty())
            {
                *field = v.trim().to_string();
            }
        };
        fill(&mut self.api_key, "OPENAI_API_KEY");
        fill(&mut self.model, "OPENAI_MODEL");
        fill(&mut self.base_url, "OPENAI_BASE_URL");
        self
    }
}

fn default_model() -> String {
    "gpt-4.1-mini".to_string()
}

const fn default_timeout_ms() -> u64 {
    10_000
}
