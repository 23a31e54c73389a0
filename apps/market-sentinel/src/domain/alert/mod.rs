//! Alert Domain
//!
//! Alert requests, their terminal outcomes, and the pure helpers used by
//! the alert pipeline for merging batches and rendering digests.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::rules::Severity;

/// Group used when a request names none.
pub const DEFAULT_GROUP: &str = "default";

/// Title of the periodic low-priority digest message.
pub const DIGEST_TITLE: &str = "Low Alert Digest";

// =============================================================================
// Priority
// =============================================================================

/// Delivery priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Batched into the digest.
    Low,
    /// Sent when a token is available, otherwise digested.
    #[default]
    Med,
    /// Sent, waiting briefly for a token if needed.
    High,
}

impl Priority {
    /// Ordering weight used when merging.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::High => 3,
            Self::Med => 2,
            Self::Low => 1,
        }
    }

    /// Parse an inbound priority. Empty or unknown values mean `Med`.
    #[must_use]
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "high" => Self::High,
            "low" => Self::Low,
            _ => Self::Med,
        }
    }

    /// Lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Med => "med",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Severity> for Priority {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::High => Self::High,
            Severity::Med => Self::Med,
            Severity::Low => Self::Low,
        }
    }
}

// =============================================================================
// Request / Result
// =============================================================================

/// A request to notify.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRequest {
    /// Delivery priority.
    #[serde(default)]
    pub priority: Priority,
    /// Digest group.
    #[serde(default)]
    pub group: String,
    /// Message title.
    #[serde(default)]
    pub title: String,
    /// Markdown body.
    #[serde(default)]
    pub markdown: String,
    /// Collapses repeats inside the dedup window. Empty disables dedup.
    #[serde(default)]
    pub dedup_key: String,
    /// Batches requests inside the merge window. Empty disables merging.
    #[serde(default)]
    pub merge_key: String,
    /// Record only, never deliver.
    #[serde(default)]
    pub silent: bool,
}

impl AlertRequest {
    /// Fill the default group.
    #[must_use]
    pub fn normalize(mut self) -> Self {
        if self.group.trim().is_empty() {
            self.group = DEFAULT_GROUP.to_string();
        }
        self
    }
}

/// Terminal outcome of one `handle` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    /// Delivery was attempted. Success is carried by the error fields.
    Sent,
    /// Silent or deduplicated.
    Suppressed,
    /// Appended to the digest.
    QueuedDigest,
    /// Waiting for the merge window to close.
    MergedPending,
}

impl AlertStatus {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Suppressed => "suppressed",
            Self::QueuedDigest => "queued_digest",
            Self::MergedPending => "merged_pending",
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result returned to the caller of the alert pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertResult {
    /// Terminal status.
    pub status: AlertStatus,
    /// Delivery error, if the attempt failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Channel error code (zero on success).
    #[serde(default)]
    pub channel_errcode: i64,
    /// Channel error message.
    #[serde(default)]
    pub channel_errmsg: String,
}

impl AlertResult {
    /// A result with only a status.
    #[must_use]
    pub const fn with_status(status: AlertStatus) -> Self {
        Self {
            status,
            error: None,
            channel_errcode: 0,
            channel_errmsg: String::new(),
        }
    }

    /// A `sent` result carrying a delivery error.
    #[must_use]
    pub fn sent_with_error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::with_status(AlertStatus::Sent)
        }
    }
}

// =============================================================================
// Merge / Digest Rendering
// =============================================================================

/// Highest priority in a batch. An empty batch is `Low`.
#[must_use]
pub fn max_priority(batch: &[AlertRequest]) -> Priority {
    batch
        .iter()
        .map(|a| a.priority)
        .fold(Priority::Low, |acc, p| if p.rank() > acc.rank() { p } else { acc })
}

fn render_items(out: &mut String, items: &[AlertRequest]) {
    for item in items {
        let title = if item.title.is_empty() {
            "(no title)"
        } else {
            item.title.as_str()
        };
        out.push_str("- **");
        out.push_str(title);
        out.push_str("**");
        if !item.markdown.is_empty() {
            out.push_str("\n  ");
            out.push_str(&item.markdown);
        }
        out.push('\n');
    }
}

/// Collapse a merge batch into one synthetic request.
///
/// The first member supplies group and title; keys are cleared so the
/// result passes straight to routing. Returns `None` for an empty batch.
#[must_use]
pub fn build_merged(batch: &[AlertRequest]) -> Option<AlertRequest> {
    let first = batch.first()?;
    let title = if batch.len() == 1 {
        first.title.clone()
    } else {
        let base = if first.title.is_empty() {
            "Merged Alerts"
        } else {
            first.title.as_str()
        };
        format!("{base} (+{})", batch.len() - 1)
    };
    let mut markdown = String::new();
    render_items(&mut markdown, batch);
    Some(AlertRequest {
        priority: max_priority(batch),
        group: first.group.clone(),
        title,
        markdown,
        dedup_key: String::new(),
        merge_key: String::new(),
        silent: batch.iter().all(|a| a.silent),
    })
}

/// Render digest groups as one markdown document, groups in name order.
#[must_use]
pub fn render_digest(groups: &BTreeMap<String, Vec<AlertRequest>>) -> String {
    let mut out = String::new();
    for (group, items) in groups {
        out.push_str("### ");
        out.push_str(group);
        out.push('\n');
        render_items(&mut out, items);
        out.push('\n');
    }
    out
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn req(priority: Priority, title: &str, body: &str) -> AlertRequest {
        AlertRequest {
            priority,
            group: "risk".to_string(),
            title: title.to_string(),
            markdown: body.to_string(),
            dedup_key: "d".to_string(),
            merge_key: "m".to_string(),
            silent: false,
        }
    }

    #[test_case("", Priority::Med)]
    #[test_case("HIGH", Priority::High)]
    #[test_case("low", Priority::Low)]
    #[test_case("urgent", Priority::Med)]
    fn priority_parse_lenient(raw: &str, expected: Priority) {
        assert_eq!(Priority::parse_lenient(raw), expected);
    }

    #[test]
    fn normalize_fills_group() {
        let r = AlertRequest::default().normalize();
        assert_eq!(r.group, "default");
        assert_eq!(r.priority, Priority::Med);
    }

    #[test]
    fn request_deserializes_with_defaults() {
        let r: AlertRequest = serde_json::from_str(r#"{"title":"t","priority":"high"}"#).unwrap();
        assert_eq!(r.priority, Priority::High);
        assert!(r.merge_key.is_empty());
        assert!(!r.silent);
    }

    #[test]
    fn merged_takes_max_priority_and_counts_extras() {
        let batch = vec![
            req(Priority::Low, "a", "body a"),
            req(Priority::High, "b", ""),
            req(Priority::Med, "", "body c"),
        ];
        let merged = build_merged(&batch).unwrap();
        assert_eq!(merged.priority, Priority::High);
        assert_eq!(merged.title, "a (+2)");
        assert_eq!(
            merged.markdown,
            "- **a**\n  body a\n- **b**\n- **(no title)**\n  body c\n"
        );
        assert!(merged.dedup_key.is_empty());
        assert!(merged.merge_key.is_empty());
        assert!(!merged.silent);
    }

    #[test]
    fn merged_single_keeps_title() {
        let merged = build_merged(&[req(Priority::Med, "only", "x")]).unwrap();
        assert_eq!(merged.title, "only");
    }

    #[test]
    fn merged_empty_first_title() {
        let batch = vec![req(Priority::Med, "", ""), req(Priority::Med, "b", "")];
        assert_eq!(build_merged(&batch).unwrap().title, "Merged Alerts (+1)");
    }

    #[test]
    fn merged_silent_only_when_all_silent() {
        let mut a = req(Priority::Med, "a", "");
        let mut b = req(Priority::Med, "b", "");
        a.silent = true;
        assert!(!build_merged(&[a.clone(), b.clone()]).unwrap().silent);
        b.silent = true;
        assert!(build_merged(&[a, b]).unwrap().silent);
        assert!(build_merged(&[]).is_none());
    }

    #[test]
    fn digest_groups_sorted() {
        let mut groups = BTreeMap::new();
        groups.insert("zeta".to_string(), vec![req(Priority::Low, "z1", "")]);
        groups.insert(
            "alpha".to_string(),
            vec![req(Priority::Low, "a1", "x"), req(Priority::Low, "a2", "")],
        );
        assert_eq!(
            render_digest(&groups),
            "### alpha\n- **a1**\n  x\n- **a2**\n\n### zeta\n- **z1**\n\n"
        );
    }

    #[test]
    fn status_wire_names() {
        assert_eq!(
            serde_json::to_string(&AlertStatus::QueuedDigest).unwrap(),
            "\"queued_digest\""
        );
        assert_eq!(AlertStatus::MergedPending.to_string(), "merged_pending");
    }
}
