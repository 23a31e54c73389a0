//! Decision Advisor Port (Driven Port)
//!
//! Produces a structured [`RiskDecision`] for an event. Callers fall back
//! to [`fallback_decision`] whenever the advisor errors.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::decision::{DecisionParseError, EventInput, RiskDecision, fallback_decision};

/// Advisor error.
#[derive(Debug, thiserror::Error)]
pub enum AdvisorError {
    /// Request could not be sent or timed out.
    #[error("advisor request failed: {message}")]
    Request { message: String },

    /// Upstream returned a non-success status.
    #[error("advisor returned status {status}: {message}")]
    Status { status: u16, message: String },

    /// Upstream reply carried no content.
    #[error("advisor returned an empty reply")]
    EmptyReply,

    /// Reply did not contain a decision.
    #[error(transparent)]
    Parse(#[from] DecisionParseError),
}

/// Whether decisions come from the model or the fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdvisorMode {
    /// Deterministic fallback.
    Fallback,
    /// Language model.
    Llm,
}

/// Result of an advisor health probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvisorStatus {
    /// Always true; the probe itself never fails the caller.
    pub ok: bool,
    /// Active mode.
    pub mode: AdvisorMode,
    /// Why the fallback is active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Model name in `llm` mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Probe round trip in `llm` mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl AdvisorStatus {
    /// Fallback mode with a reason.
    #[must_use]
    pub fn fallback(reason: impl Into<String>) -> Self {
        Self {
            ok: true,
            mode: AdvisorMode::Fallback,
            reason: Some(reason.into()),
            model: None,
            latency_ms: None,
        }
    }
}

/// Port for risk assessment.
#[async_trait]
pub trait DecisionAdvisorPort: Send + Sync {
    /// Assess one event.
    async fn evaluate(&self, input: &EventInput) -> Result<RiskDecision, AdvisorError>;

    /// Probe the advisor. Always yields a status; a failed probe reports
    /// fallback mode.
    async fn ping(&self) -> AdvisorStatus;
}

/// Advisor that always answers with the deterministic fallback.
#[derive(Debug, Clone)]
pub struct FallbackAdvisor {
    reason: String,
}

impl FallbackAdvisor {
    /// Create a fallback advisor reporting `reason` on ping.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl Default for FallbackAdvisor {
    fn default() -> Self {
        Self::new("not configured")
    }
}

#[async_trait]
impl DecisionAdvisorPort for FallbackAdvisor {
    async fn evaluate(&self, input: &EventInput) -> Result<RiskDecision, AdvisorError> {
        Ok(fallback_decision(input))
    }

    async fn ping(&self) -> AdvisorStatus {
        AdvisorStatus::fallback(self.reason.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rules::Severity;

    #[tokio::test]
    async fn fallback_advisor_is_deterministic() {
        let advisor = FallbackAdvisor::new("disabled by config");
        let input = EventInput {
            event_id: 0,
            event_type: "KEY_BREAK_DOWN".to_string(),
            severity: Severity::Med,
            symbol: "sh600000".to_string(),
            change_pct: 0.0,
            drawdown_pct: 0.0,
            window_sec: 0,
            threshold: 0.0,
            evidence_json: r#"{"level":10.0}"#.to_string(),
        };
        let a = advisor.evaluate(&input).await.unwrap();
        let b = advisor.evaluate(&input).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.risk_level, 3);

        let status = advisor.ping().await;
        assert_eq!(status.mode, AdvisorMode::Fallback);
        assert_eq!(status.reason.as_deref(), Some("disabled by config"));
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["mode"], "fallback");
        assert!(json.get("model").is_none());
    }
}
