//! HTTP request DTOs and query parsing.

use serde::Deserialize;

use crate::application::ports::{DEFAULT_PAGE_LIMIT, EventRecord, MAX_PAGE_LIMIT};
use crate::domain::alert::{AlertRequest, Priority};

use super::error::HttpApiError;

/// Body of `POST /api/v1/test/push`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestPushRequest {
    /// Message title.
    #[serde(default)]
    pub title: String,
    /// Markdown body.
    #[serde(default)]
    pub markdown: String,
}

/// Body of `POST /api/v1/test/alert`.
///
/// Priority is parsed leniently: unknown or empty values mean `med`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestAlertRequest {
    /// `low`, `med` or `high`.
    #[serde(default)]
    pub priority: String,
    /// Digest group.
    #[serde(default)]
    pub group: String,
    /// Title.
    #[serde(default)]
    pub title: String,
    /// Markdown body.
    #[serde(default)]
    pub markdown: String,
    /// Dedup key.
    #[serde(default)]
    pub dedup_key: String,
    /// Merge key.
    #[serde(default)]
    pub merge_key: String,
    /// Record only.
    #[serde(default)]
    pub silent: bool,
}

impl From<TestAlertRequest> for AlertRequest {
    fn from(r: TestAlertRequest) -> Self {
        Self {
            priority: Priority::parse_lenient(&r.priority),
            group: r.group,
            title: r.title,
            markdown: r.markdown,
            dedup_key: r.dedup_key,
            merge_key: r.merge_key,
            silent: r.silent,
        }
    }
}

/// Body of `POST /api/v1/test/snapshot`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestSnapshotRequest {
    /// Symbol.
    #[serde(default)]
    pub symbol: String,
    /// Price, must be positive.
    #[serde(default)]
    pub price: f64,
    /// Change percent.
    #[serde(default)]
    pub change_pct: f64,
    /// Volume.
    #[serde(default)]
    pub volume: f64,
    /// Unix seconds; zero means now.
    #[serde(default)]
    pub ts: i64,
}

/// Body of `POST /api/v1/test/risk/eval`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RiskEvalRequest {
    /// Stored event to assess.
    #[serde(default)]
    pub event_id: i64,
    /// Inline event, used when `event_id` is not positive.
    #[serde(default)]
    pub event: Option<EventRecord>,
}

/// Body of `POST /api/v1/plan/confirm`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlanConfirmRequest {
    /// `YYYY-MM-DD`.
    #[serde(default)]
    pub date: String,
}

/// `GET /api/v1/alerts` query.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertsQuery {
    pub date: Option<String>,
    pub status: Option<String>,
    pub group: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

/// `GET /api/v1/events` query.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventsQuery {
    pub date: Option<String>,
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

/// `GET /api/v1/snapshots` query.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SnapshotsQuery {
    pub symbol: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

/// Queries carrying only symbols and/or a date.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SymbolsQuery {
    pub symbols: Option<String>,
    pub date: Option<String>,
}

/// Parse `limit`: empty means 200, values above 1000 are capped, anything
/// non-numeric or non-positive is rejected.
pub fn parse_limit(raw: Option<&str>) -> Result<i64, HttpApiError> {
    let raw = raw.map(str::trim).unwrap_or_default();
    if raw.is_empty() {
        return Ok(DEFAULT_PAGE_LIMIT);
    }
    match raw.parse::<i64>() {
        Ok(v) if v > 0 => Ok(v.min(MAX_PAGE_LIMIT)),
        _ => Err(HttpApiError::BadRequest("invalid limit".to_string())),
    }
}

/// Parse `offset`: empty means 0, negatives and non-numbers are rejected.
pub fn parse_offset(raw: Option<&str>) -> Result<i64, HttpApiError> {
    let raw = raw.map(str::trim).unwrap_or_default();
    if raw.is_empty() {
        return Ok(0);
    }
    match raw.parse::<i64>() {
        Ok(v) if v >= 0 => Ok(v),
        _ => Err(HttpApiError::BadRequest("invalid offset".to_string())),
    }
}

/// Split a comma list, dropping blanks. Empty input yields `defaults`.
#[must_use]
pub fn parse_symbols(raw: Option<&str>, defaults: &[String]) -> Vec<String> {
    let raw = raw.map(str::trim).unwrap_or_default();
    if raw.is_empty() {
        return defaults.to_vec();
    }
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Prepend `index` unless already present (case-insensitive).
#[must_use]
pub fn ensure_index_symbol(mut symbols: Vec<String>, index: &str) -> Vec<String> {
    if !symbols.iter().any(|s| s.eq_ignore_ascii_case(index)) {
        symbols.insert(0, index.to_string());
    }
    symbols
}

/// Event titles start with the symbol.
#[must_use]
pub fn symbol_from_title(title: &str) -> String {
    title
        .split_whitespace()
        .next()
        .map(str::to_lowercase)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(None, Some(200))]
    #[test_case(Some(""), Some(200))]
    #[test_case(Some("50"), Some(50))]
    #[test_case(Some("5000"), Some(1000))]
    #[test_case(Some("0"), None)]
    #[test_case(Some("-3"), None)]
    #[test_case(Some("ten"), None)]
    fn limit_parsing(raw: Option<&str>, want: Option<i64>) {
        assert_eq!(parse_limit(raw).ok(), want);
    }

    #[test_case(None, Some(0))]
    #[test_case(Some("7"), Some(7))]
    #[test_case(Some("-1"), None)]
    #[test_case(Some("x"), None)]
    fn offset_parsing(raw: Option<&str>, want: Option<i64>) {
        assert_eq!(parse_offset(raw).ok(), want);
    }

    #[test]
    fn symbols_default_and_split() {
        let defaults = vec!["sh000001".to_string()];
        assert_eq!(parse_symbols(None, &defaults), defaults);
        assert_eq!(
            parse_symbols(Some(" sh600000, ,sz000001 "), &defaults),
            vec!["sh600000", "sz000001"]
        );
    }

    #[test]
    fn index_symbol_is_prepended_once() {
        let out = ensure_index_symbol(vec!["sh600000".to_string()], "sh000001");
        assert_eq!(out, vec!["sh000001", "sh600000"]);
        let out = ensure_index_symbol(vec!["SH000001".to_string()], "sh000001");
        assert_eq!(out, vec!["SH000001"]);
    }

    #[test]
    fn title_symbol() {
        assert_eq!(symbol_from_title("SH600000 breaks 10.00"), "sh600000");
        assert_eq!(symbol_from_title(""), "");
    }

    #[test]
    fn alert_priority_is_lenient() {
        let req: TestAlertRequest =
            serde_json::from_str(r#"{"priority":"urgent","title":"t"}"#).unwrap();
        let alert = AlertRequest::from(req);
        assert_eq!(alert.priority, Priority::Med);
    }
}
