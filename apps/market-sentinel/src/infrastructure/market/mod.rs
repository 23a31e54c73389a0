//! Market data adapters.

mod http;

use std::sync::Arc;

pub use http::HttpQuoteProvider;

use crate::application::ports::{MarketError, MarketProviderPort};
use crate::application::services::MultiProvider;
use crate::infrastructure::config::MarketConfig;

/// Build the provider chain from `market.providers`.
///
/// Returns `None` when no provider is configured.
///
/// # Errors
///
/// Returns a [`MarketError`] if a provider's HTTP client cannot be built.
pub fn build_provider(
    config: &MarketConfig,
) -> Result<Option<Arc<dyn MarketProviderPort>>, MarketError> {
    let providers = config
        .providers
        .iter()
        .map(|p| HttpQuoteProvider::from_config(p).map(|p| Arc::new(p) as Arc<dyn MarketProviderPort>))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(match providers.len() {
        0 => None,
        1 => providers.into_iter().next(),
        _ => Some(Arc::new(MultiProvider::new(providers))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::QuoteProviderConfig;

    fn entry(name: &str) -> QuoteProviderConfig {
        QuoteProviderConfig {
            name: name.to_string(),
            url: format!("http://127.0.0.1:9/{name}"),
            timeout_ms: 100,
        }
    }

    #[test]
    fn no_providers_configured() {
        assert!(build_provider(&MarketConfig::default()).unwrap().is_none());
    }

    #[test]
    fn single_provider_is_used_directly() {
        let config = MarketConfig {
            providers: vec![entry("primary")],
            ..MarketConfig::default()
        };
        let provider = build_provider(&config).unwrap().unwrap();
        assert_eq!(provider.name(), "primary");
    }

    #[test]
    fn several_providers_are_chained() {
        let config = MarketConfig {
            providers: vec![entry("primary"), entry("backup")],
            ..MarketConfig::default()
        };
        let provider = build_provider(&config).unwrap().unwrap();
        assert_eq!(provider.name(), "multi");
    }
}
