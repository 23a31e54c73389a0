//! Risk advisor adapters.

mod openai;

use std::sync::Arc;

pub use openai::{DEFAULT_BASE_URL, OpenAiAdvisor};

use crate::application::ports::{DecisionAdvisorPort, FallbackAdvisor};
use crate::infrastructure::config::RiskAgentConfig;

/// Pick the advisor for a config whose env fallbacks are already applied.
///
/// Disabled or incomplete configs yield a [`FallbackAdvisor`] whose ping
/// reports why.
#[must_use]
pub fn build_advisor(config: &RiskAgentConfig) -> Arc<dyn DecisionAdvisorPort> {
    if !config.enabled {
        return Arc::new(FallbackAdvisor::new("disabled by config"));
    }
    if config.api_key.trim().is_empty() || config.model.trim().is_empty() {
        tracing::warn!("Risk advisor disabled: missing api key or model");
        return Arc::new(FallbackAdvisor::new("api_key or model missing"));
    }
    match OpenAiAdvisor::new(config) {
        Ok(advisor) => {
            tracing::info!(model = advisor.model(), "Risk advisor enabled");
            Arc::new(advisor)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Risk advisor init failed");
            Arc::new(FallbackAdvisor::new("init failed"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::AdvisorMode;

    #[tokio::test]
    async fn disabled_config_uses_fallback() {
        let advisor = build_advisor(&RiskAgentConfig::default());
        let status = advisor.ping().await;
        assert_eq!(status.mode, AdvisorMode::Fallback);
        assert_eq!(status.reason.as_deref(), Some("disabled by config"));
    }

    #[tokio::test]
    async fn missing_key_uses_fallback() {
        let config = RiskAgentConfig {
            enabled: true,
            ..RiskAgentConfig::default()
        };
        let status = build_advisor(&config).ping().await;
        assert_eq!(status.reason.as_deref(), Some("api_key or model missing"));
    }
}
