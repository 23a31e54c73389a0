//! Generic HTTP quote provider.
//!
//! `GET {url}?symbols=a,b` answering with a JSON array of quotes.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::application::ports::{MarketError, MarketProviderPort, QuoteBatch};
use crate::domain::market::Quote;
use crate::infrastructure::config::QuoteProviderConfig;

/// Quote provider over plain HTTP.
#[derive(Debug, Clone)]
pub struct HttpQuoteProvider {
    client: Client,
    name: String,
    url: String,
}

impl HttpQuoteProvider {
    /// Create a provider.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::Request`] if the HTTP client cannot be built.
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, MarketError> {
        let name = name.into();
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MarketError::Request {
                source_name: name.clone(),
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            name,
            url: url.into(),
        })
    }

    /// Create a provider from its config entry.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::Request`] if the HTTP client cannot be built.
    pub fn from_config(config: &QuoteProviderConfig) -> Result<Self, MarketError> {
        let name = if config.name.trim().is_empty() {
            "http"
        } else {
            config.name.trim()
        };
        Self::new(name, config.url.trim(), Duration::from_millis(config.timeout_ms))
    }

    fn request_error(&self, message: impl Into<String>) -> MarketError {
        MarketError::Request {
            source_name: self.name.clone(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl MarketProviderPort for HttpQuoteProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_quotes(&self, symbols: &[String]) -> Result<QuoteBatch, MarketError> {
        if symbols.is_empty() {
            return Err(MarketError::NoSymbols);
        }

        let response = self
            .client
            .get(&self.url)
            .query(&[("symbols", symbols.join(","))])
            .send()
            .await
            .map_err(|e| self.request_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.request_error(format!("http status {}", status.as_u16())));
        }

        let items: Vec<serde_json::Value> =
            response.json().await.map_err(|e| MarketError::Decode {
                source_name: self.name.clone(),
                message: e.to_string(),
            })?;

        let mut quotes = Vec::with_capacity(items.len());
        for item in items {
            let raw = item.to_string();
            let mut quote: Quote =
                serde_json::from_value(item).map_err(|e| MarketError::Decode {
                    source_name: self.name.clone(),
                    message: e.to_string(),
                })?;
            if quote.raw.is_empty() {
                quote.raw = raw;
            }
            quotes.push(quote);
        }

        tracing::debug!(source = %self.name, count = quotes.len(), "Fetched quotes");
        Ok(QuoteBatch {
            quotes,
            source: self.name.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> HttpQuoteProvider {
        HttpQuoteProvider::from_config(&QuoteProviderConfig {
            name: "primary".to_string(),
            url: format!("{}/quotes", server.uri()),
            timeout_ms: 1000,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn fetches_quotes_with_symbol_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/quotes"))
            .and(query_param("symbols", "sh000001,sz000001"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"symbol": "sh000001", "name": "SSE", "price": 3010.5, "change_pct": -1.2, "volume": 1.0e9, "ts": 1_700_000_000},
                {"symbol": "sz000001", "price": 10.2, "ts": 1_700_000_000}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let batch = provider(&server)
            .get_quotes(&["sh000001".to_string(), "sz000001".to_string()])
            .await
            .unwrap();
        assert_eq!(batch.source, "primary");
        assert_eq!(batch.quotes.len(), 2);
        assert_eq!(batch.quotes[0].name, "SSE");
        assert!((batch.quotes[1].change_pct).abs() < f64::EPSILON);
        assert!(batch.quotes[1].raw.contains("sz000001"));
    }

    #[tokio::test]
    async fn http_failure_is_request_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = provider(&server)
            .get_quotes(&["sh000001".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::Request { .. }));
        assert!(err.to_string().starts_with("primary"));
    }

    #[tokio::test]
    async fn malformed_payload_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})))
            .mount(&server)
            .await;

        let err = provider(&server)
            .get_quotes(&["sh000001".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::Decode { .. }));
    }

    #[tokio::test]
    async fn empty_symbols_rejected_without_request() {
        let server = MockServer::start().await;
        let err = provider(&server).get_quotes(&[]).await.unwrap_err();
        assert!(matches!(err, MarketError::NoSymbols));
    }
}
