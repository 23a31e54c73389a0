//! Market data configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Market polling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Symbols polled and used as the default quote set.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
    /// Poll period in seconds; non-positive means 3 seconds.
    #[serde(default = "default_poll_interval_sec")]
    pub poll_interval_sec: i64,
    /// Minimum gap between upstream fetches in milliseconds.
    #[serde(default = "default_min_request_interval_ms")]
    pub min_request_interval_ms: i64,
    /// Quote endpoints, tried in order.
    #[serde(default)]
    pub providers: Vec<QuoteProviderConfig>,
}

/// One HTTP quote endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteProviderConfig {
    /// Source name reported with the quotes.
    pub name: String,
    /// Endpoint URL; symbols are passed as `?symbols=a,b`.
    pub url: String,
    /// Request timeout in milliseconds.
    #[serde(default = "default_provider_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            poll_interval_sec: default_poll_interval_sec(),
            min_request_interval_ms: default_min_request_interval_ms(),
            providers: Vec::new(),
        }
    }
}

impl MarketConfig {
    /// Poll period; zero lets the poller pick its default.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        u64::try_from(self.poll_interval_sec).map_or(Duration::ZERO, Duration::from_secs)
    }

    /// Minimum request interval; non-positive disables throttling.
    #[must_use]
    pub fn min_request_interval(&self) -> Duration {
        u64::try_from(self.min_request_interval_ms).map_or(Duration::ZERO, Duration::from_millis)
    }

    /// Configured symbols, trimmed and lowercased, empties dropped.
    #[must_use]
    pub fn normalized_symbols(&self) -> Vec<String> {
        self.symbols
            .iter()
            .filter_map(|s| crate::domain::market::normalize_symbol(s))
            .collect()
    }
}

fn default_symbols() -> Vec<String> {
    vec![
        "sh000001".to_string(),
        "sh600000".to_string(),
        "sz000001".to_string(),
    ]
}

const fn default_poll_interval_sec() -> i64 {
    30
}

const fn default_min_request_interval_ms() -> i64 {
    1000
}

const fn default_provider_timeout_ms() -> u64 {
    5000
}
