//! HTTP response DTOs.

use serde::Serialize;

use crate::application::services::QuoteView;
use crate::domain::alert::{AlertResult, AlertStatus};
use crate::domain::decision::RiskDecision;
use crate::domain::plan::TradingPlan;

/// Bare `{"ok": true}`.
#[derive(Debug, Clone, Serialize)]
pub struct OkResponse {
    /// Always true.
    pub ok: bool,
}

impl OkResponse {
    /// `{"ok": true}`.
    #[must_use]
    pub const fn ok() -> Self {
        Self { ok: true }
    }
}

/// A list of rows.
#[derive(Debug, Clone, Serialize)]
pub struct ItemsResponse<T> {
    /// Always true.
    pub ok: bool,
    /// Rows, newest first.
    pub items: Vec<T>,
}

impl<T> ItemsResponse<T> {
    /// Wrap rows.
    #[must_use]
    pub const fn new(items: Vec<T>) -> Self {
        Self { ok: true, items }
    }
}

/// Result of a direct channel send.
#[derive(Debug, Clone, Serialize)]
pub struct PushResponse {
    /// Channel accepted the message.
    pub ok: bool,
    /// Channel error code.
    pub channel_errcode: i64,
    /// Channel error message.
    pub channel_errmsg: String,
}

/// Result of one alert pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct AlertResponse {
    /// No delivery error.
    pub ok: bool,
    /// Terminal status.
    pub status: AlertStatus,
    /// Delivery error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Channel error code.
    #[serde(skip_serializing_if = "is_zero")]
    pub channel_errcode: i64,
    /// Channel error message.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub channel_errmsg: String,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_zero(v: &i64) -> bool {
    *v == 0
}

impl From<AlertResult> for AlertResponse {
    fn from(r: AlertResult) -> Self {
        Self {
            ok: r.error.is_none(),
            status: r.status,
            error: r.error,
            channel_errcode: r.channel_errcode,
            channel_errmsg: r.channel_errmsg,
        }
    }
}

/// Per-status counts from the burst test.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BurstStats {
    /// Delivery attempted.
    pub sent: u32,
    /// Deduplicated or silent.
    pub suppressed: u32,
    /// Sent to the digest.
    pub queued_digest: u32,
    /// Waiting in a merge batch.
    pub merged_pending: u32,
    /// Results carrying a delivery error.
    pub error: u32,
}

impl BurstStats {
    /// Count one result.
    pub fn record(&mut self, result: &AlertResult) {
        if result.error.is_some() {
            self.error += 1;
        }
        match result.status {
            AlertStatus::Sent => self.sent += 1,
            AlertStatus::Suppressed => self.suppressed += 1,
            AlertStatus::QueuedDigest => self.queued_digest += 1,
            AlertStatus::MergedPending => self.merged_pending += 1,
        }
    }
}

/// Burst test outcome.
#[derive(Debug, Clone, Serialize)]
pub struct BurstResponse {
    /// Always true.
    pub ok: bool,
    /// Counts.
    pub stats: BurstStats,
}

/// Quotes with freshness metadata.
#[derive(Debug, Clone, Serialize)]
pub struct QuotesResponse {
    /// Always true.
    pub ok: bool,
    /// Quotes and metadata.
    #[serde(flatten)]
    pub view: QuoteView,
}

/// Risk assessment of one event.
#[derive(Debug, Clone, Serialize)]
pub struct RiskEvalResponse {
    /// Always true.
    pub ok: bool,
    /// Decision.
    pub decision: RiskDecision,
    /// Rendered notification body.
    pub markdown: String,
}

/// Result of plan generation.
#[derive(Debug, Clone, Serialize)]
pub struct PlanGenerateResponse {
    /// Always true.
    pub ok: bool,
    /// Where the plan came from.
    pub mode: &'static str,
    /// Plan content.
    pub plan: TradingPlan,
    /// Quote freshness notes.
    pub warnings: Vec<String>,
}

/// A stored plan.
#[derive(Debug, Clone, Serialize)]
pub struct PlanResponse {
    /// Always true.
    pub ok: bool,
    /// Plan content.
    pub plan: TradingPlan,
    /// Rendered markdown.
    pub content_md: String,
    /// Operator confirmation.
    pub confirmed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_response_omits_empty_channel_fields() {
        let resp = AlertResponse::from(AlertResult::with_status(AlertStatus::QueuedDigest));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["ok"], true);
        assert_eq!(json["status"], "queued_digest");
        assert!(json.get("channel_errcode").is_none());
        assert!(json.get("error").is_none());
    }

    #[test]
    fn burst_stats_count_errors_separately() {
        let mut stats = BurstStats::default();
        stats.record(&AlertResult::sent_with_error("client not configured"));
        stats.record(&AlertResult::with_status(AlertStatus::Suppressed));
        assert_eq!(stats.sent, 1);
        assert_eq!(stats.error, 1);
        assert_eq!(stats.suppressed, 1);
    }
}
