//! Prometheus Metrics Module
//!
//! Counters and gauges for the sentinel pipeline, rendered in Prometheus
//! text format at `/metrics` on the API port.
//!
//! # Metrics Categories
//!
//! - **Ingestion**: snapshots ingested, quote fetches by source and outcome
//! - **Events**: rule firings that passed cooldown, by rule and severity
//! - **Alerts**: terminal outcomes by status and priority, channel failures,
//!   digest flushes, pending merge batches
//! - **Advisor**: fallbacks taken after advisor errors

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics initialization error.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// The global recorder could not be installed.
    #[error("metrics installation error: {0}")]
    Installation(String),
}

/// Install the Prometheus recorder.
///
/// Later calls return the handle installed by the first one.
pub fn init_metrics() -> Result<PrometheusHandle, MetricsError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| MetricsError::Installation(e.to_string()))?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "sentinel_snapshots_ingested_total",
        "Snapshots accepted for rule evaluation"
    );
    describe_counter!(
        "sentinel_quote_fetches_total",
        "Quote fetches by source and outcome"
    );
    describe_counter!(
        "sentinel_events_emitted_total",
        "Rule firings that passed cooldown"
    );
    describe_counter!(
        "sentinel_alerts_total",
        "Alert pipeline outcomes by status and priority"
    );
    describe_counter!(
        "sentinel_channel_failures_total",
        "Notification deliveries that failed or were rejected"
    );
    describe_counter!(
        "sentinel_digest_items_total",
        "Low-priority alerts delivered through the digest"
    );
    describe_counter!(
        "sentinel_advisor_fallbacks_total",
        "Advisor errors answered with the fallback decision"
    );
    describe_gauge!(
        "sentinel_pending_merge_keys",
        "Merge keys with a batch waiting for its window"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record one ingested snapshot.
pub fn record_snapshot_ingested() {
    counter!("sentinel_snapshots_ingested_total").increment(1);
}

/// Record a quote fetch.
pub fn record_quote_fetch(source: &str, ok: bool) {
    counter!(
        "sentinel_quote_fetches_total",
        "source" => source.to_string(),
        "outcome" => if ok { "ok" } else { "error" }
    )
    .increment(1);
}

/// Record an emitted risk event.
pub fn record_event_emitted(rule: &'static str, severity: &'static str) {
    counter!(
        "sentinel_events_emitted_total",
        "rule" => rule,
        "severity" => severity
    )
    .increment(1);
}

/// Record the terminal outcome of one alert request.
pub fn record_alert_outcome(status: &'static str, priority: &'static str) {
    counter!(
        "sentinel_alerts_total",
        "status" => status,
        "priority" => priority
    )
    .increment(1);
}

/// Record a failed delivery. `kind` is `transport` or `errcode`.
pub fn record_channel_failure(channel: &str, kind: &'static str) {
    counter!(
        "sentinel_channel_failures_total",
        "channel" => channel.to_string(),
        "kind" => kind
    )
    .increment(1);
}

/// Record a digest flush carrying `items` alerts.
pub fn record_digest_flush(items: usize) {
    counter!("sentinel_digest_items_total").increment(items as u64);
}

/// Record an advisor fallback.
pub fn record_advisor_fallback() {
    counter!("sentinel_advisor_fallbacks_total").increment(1);
}

/// Update the number of pending merge keys.
pub fn set_pending_merges(count: usize) {
    gauge!("sentinel_pending_merge_keys").set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================
