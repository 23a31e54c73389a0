//! Market Provider Port (Driven Port)
//!
//! Fetches quotes for a set of symbols. Returns the quotes together with
//! the name of the source that served them.

use async_trait::async_trait;

use crate::domain::market::Quote;

/// Market data error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MarketError {
    /// No provider configured.
    #[error("market provider not configured")]
    NotConfigured,

    /// Empty symbol list.
    #[error("symbols is empty")]
    NoSymbols,

    /// Upstream request failed.
    #[error("{source_name} request failed: {message}")]
    Request { source_name: String, message: String },

    /// Upstream payload could not be decoded.
    #[error("{source_name} decode failed: {message}")]
    Decode { source_name: String, message: String },

    /// A requested symbol is absent from the cache.
    #[error("cache miss for symbol: {symbol}")]
    CacheMiss { symbol: String },

    /// Every provider in a chain failed without an error of its own.
    #[error("all providers failed")]
    AllProvidersFailed,
}

/// Quotes and the source that produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteBatch {
    /// Quotes, in provider order.
    pub quotes: Vec<Quote>,
    /// Source name, e.g. `http` or `cache`.
    pub source: String,
}

/// Port for quote retrieval.
#[async_trait]
pub trait MarketProviderPort: Send + Sync {
    /// Source name.
    fn name(&self) -> &str;

    /// Fetch quotes for `symbols`.
    async fn get_quotes(&self, symbols: &[String]) -> Result<QuoteBatch, MarketError>;
}
