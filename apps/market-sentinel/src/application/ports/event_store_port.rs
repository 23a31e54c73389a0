//! Event Store Port (Driven Port)
//!
//! Durable storage for events, alert audit records, raw snapshots and
//! daily plans. Every query that takes a date interprets it as an
//! Asia/Shanghai calendar day.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{FixedOffset, NaiveDate, TimeZone};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::domain::market::Snapshot;
use crate::domain::plan::PlanRecord;

/// Default page size.
pub const DEFAULT_PAGE_LIMIT: i64 = 200;

/// Largest page size.
pub const MAX_PAGE_LIMIT: i64 = 1000;

const SHANGHAI_OFFSET_SECS: i32 = 8 * 3600;

// =============================================================================
// Errors
// =============================================================================

/// Store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Date string is not `YYYY-MM-DD`.
    #[error("invalid date: {date:?}")]
    InvalidDate { date: String },

    /// Underlying database failure.
    #[error("database error: {message}")]
    Database { message: String },

    /// Stored payload could not be decoded.
    #[error("decode error: {message}")]
    Decode { message: String },
}

// =============================================================================
// Records
// =============================================================================

/// A persisted event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Assigned by the store.
    #[serde(default)]
    pub id: i64,
    /// Unix seconds.
    #[serde(default)]
    pub ts: i64,
    /// Rule name, or `alert` for audit rows.
    #[serde(rename = "type", default)]
    pub event_type: String,
    /// `low`, `med` or `high`.
    #[serde(default)]
    pub severity: String,
    /// Group name.
    #[serde(rename = "group", default)]
    pub group_name: String,
    /// Title.
    #[serde(default)]
    pub title: String,
    /// Dedup key.
    #[serde(default)]
    pub dedup_key: String,
    /// Merge key.
    #[serde(default)]
    pub merge_key: String,
    /// Evidence JSON, empty for audit rows.
    #[serde(default)]
    pub evidence_json: String,
    /// RFC 3339 write time, filled by the store when empty.
    #[serde(default)]
    pub created_at: String,
}

/// A persisted alert outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRecord {
    /// Unix seconds.
    pub ts: i64,
    /// Priority.
    pub priority: String,
    /// Group name.
    #[serde(rename = "group")]
    pub group_name: String,
    /// Title.
    pub title: String,
    /// Dedup key.
    pub dedup_key: String,
    /// Merge key.
    pub merge_key: String,
    /// Terminal status.
    pub status: String,
    /// Notification channel name.
    pub channel: String,
    /// Channel error code.
    pub errcode: i64,
    /// Channel error message.
    pub errmsg: String,
    /// Markdown body, set only when delivery was attempted.
    pub payload_md: String,
    /// RFC 3339 write time, filled by the store when empty.
    pub created_at: String,
}

/// A persisted raw snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    /// Unix seconds.
    pub ts: i64,
    /// Symbol.
    pub symbol: String,
    /// Price.
    pub price: f64,
    /// Change percent.
    pub change_pct: f64,
    /// Volume.
    pub volume: f64,
    /// Raw provider payload.
    pub raw: String,
    /// RFC 3339 write time.
    pub created_at: String,
}

impl From<&Snapshot> for SnapshotRecord {
    fn from(s: &Snapshot) -> Self {
        Self {
            ts: s.ts,
            symbol: s.symbol.clone(),
            price: s.price,
            change_pct: s.change_pct,
            volume: s.volume,
            raw: s.raw.clone(),
            created_at: String::new(),
        }
    }
}

// =============================================================================
// Queries
// =============================================================================

/// Limit/offset paging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    /// Rows to return.
    pub limit: i64,
    /// Rows to skip.
    pub offset: i64,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

impl Page {
    /// Build a page, clamping limit into `1..=1000` (non-positive means 200)
    /// and offset to non-negative.
    #[must_use]
    pub fn new(limit: i64, offset: i64) -> Self {
        let limit = if limit <= 0 {
            DEFAULT_PAGE_LIMIT
        } else {
            limit.min(MAX_PAGE_LIMIT)
        };
        Self {
            limit,
            offset: offset.max(0),
        }
    }

    fn apply<T>(self, rows: impl Iterator<Item = T>) -> Vec<T> {
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let (offset, limit) = (self.offset as usize, self.limit as usize);
        rows.skip(offset).take(limit).collect()
    }
}

/// Alert listing filter.
#[derive(Debug, Clone, Default)]
pub struct AlertQuery {
    /// `YYYY-MM-DD`.
    pub date: String,
    /// Exact status, if any.
    pub status: Option<String>,
    /// Exact group, if any.
    pub group: Option<String>,
    /// Paging.
    pub page: Page,
}

/// Event listing filter.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    /// `YYYY-MM-DD`.
    pub date: String,
    /// Exact event type, if any.
    pub event_type: Option<String>,
    /// Paging.
    pub page: Page,
}

/// Unix-second bounds `[start, end)` of an Asia/Shanghai calendar day.
///
/// # Errors
///
/// Returns [`StoreError::InvalidDate`] when `date` is not `YYYY-MM-DD`.
pub fn date_range(date: &str) -> Result<(i64, i64), StoreError> {
    let invalid = || StoreError::InvalidDate {
        date: date.to_string(),
    };
    let day = NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| invalid())?;
    let tz = FixedOffset::east_opt(SHANGHAI_OFFSET_SECS).ok_or_else(invalid)?;
    let midnight = day.and_hms_opt(0, 0, 0).ok_or_else(invalid)?;
    let start = tz
        .from_local_datetime(&midnight)
        .single()
        .ok_or_else(invalid)?
        .timestamp();
    Ok((start, start + 24 * 3600))
}

/// Today's date in Asia/Shanghai as `YYYY-MM-DD`.
#[must_use]
pub fn shanghai_today() -> String {
    FixedOffset::east_opt(SHANGHAI_OFFSET_SECS).map_or_else(
        || chrono::Utc::now().format("%Y-%m-%d").to_string(),
        |tz| chrono::Utc::now().with_timezone(&tz).format("%Y-%m-%d").to_string(),
    )
}

/// Current time as RFC 3339, used for `created_at` columns.
#[must_use]
pub fn now_rfc3339() -> String {
    chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

// =============================================================================
// Port
// =============================================================================

/// Port for durable storage.
#[async_trait]
pub trait EventStorePort: Send + Sync {
    /// Insert an event and return its id. Ids increase monotonically.
    async fn insert_event_return_id(&self, event: &EventRecord) -> Result<i64, StoreError>;

    /// Insert an event.
    async fn insert_event(&self, event: &EventRecord) -> Result<(), StoreError> {
        self.insert_event_return_id(event).await.map(|_| ())
    }

    /// Insert an alert audit record.
    async fn insert_alert_record(&self, record: &AlertRecord) -> Result<(), StoreError>;

    /// Insert a raw snapshot.
    async fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<(), StoreError>;

    /// Alerts for a day, newest first.
    async fn query_alerts_by_date(&self, query: &AlertQuery)
    -> Result<Vec<AlertRecord>, StoreError>;

    /// All alerts with a dedup key, newest first.
    async fn query_alerts_by_dedup_key(&self, key: &str) -> Result<Vec<AlertRecord>, StoreError>;

    /// Events for a day, newest first.
    async fn query_events_by_date(&self, query: &EventQuery)
    -> Result<Vec<EventRecord>, StoreError>;

    /// One event by id.
    async fn get_event_by_id(&self, id: i64) -> Result<Option<EventRecord>, StoreError>;

    /// Snapshots for a symbol, newest first.
    async fn query_snapshots(
        &self,
        symbol: &str,
        page: Page,
    ) -> Result<Vec<SnapshotRecord>, StoreError>;

    /// Insert or replace the plan for its date.
    async fn upsert_plan(&self, plan: &PlanRecord) -> Result<(), StoreError>;

    /// Plan for a date.
    async fn get_plan(&self, date: &str) -> Result<Option<PlanRecord>, StoreError>;

    /// Mark a plan confirmed. Returns whether a plan existed.
    async fn confirm_plan(&self, date: &str) -> Result<bool, StoreError>;
}

// =============================================================================
// In-Memory Implementation
// =============================================================================

#[derive(Debug, Default)]
struct Tables {
    events: Vec<EventRecord>,
    alerts: Vec<AlertRecord>,
    snapshots: Vec<SnapshotRecord>,
    plans: Vec<PlanRecord>,
}

/// In-memory store for tests and store-less runs.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    next_id: AtomicI64,
    tables: Mutex<Tables>,
}

impl InMemoryEventStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every stored event, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<EventRecord> {
        self.tables.lock().events.clone()
    }

    /// Copy of every stored alert record, oldest first.
    #[must_use]
    pub fn alerts(&self) -> Vec<AlertRecord> {
        self.tables.lock().alerts.clone()
    }

    /// Number of stored snapshots.
    #[must_use]
    pub fn snapshot_count(&self) -> usize {
        self.tables.lock().snapshots.len()
    }
}

fn newest_first<T: Clone>(rows: &[T], ts: impl Fn(&T) -> i64) -> Vec<T> {
    let mut out = rows.to_vec();
    out.sort_by_key(|r| std::cmp::Reverse(ts(r)));
    out
}

#[async_trait]
impl EventStorePort for InMemoryEventStore {
    async fn insert_event_return_id(&self, event: &EventRecord) -> Result<i64, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut row = event.clone();
        row.id = id;
        if row.created_at.is_empty() {
            row.created_at = now_rfc3339();
        }
        self.tables.lock().events.push(row);
        Ok(id)
    }

    async fn insert_alert_record(&self, record: &AlertRecord) -> Result<(), StoreError> {
        let mut row = record.clone();
        if row.created_at.is_empty() {
            row.created_at = now_rfc3339();
        }
        self.tables.lock().alerts.push(row);
        Ok(())
    }

    async fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let mut row = SnapshotRecord::from(snapshot);
        row.created_at = now_rfc3339();
        self.tables.lock().snapshots.push(row);
        Ok(())
    }

    async fn query_alerts_by_date(
        &self,
        query: &AlertQuery,
    ) -> Result<Vec<AlertRecord>, StoreError> {
        let (start, end) = date_range(&query.date)?;
        let rows = newest_first(&self.tables.lock().alerts, |a| a.ts);
        Ok(query.page.apply(rows.into_iter().filter(|a| {
            a.ts >= start
                && a.ts < end
                && query.status.as_ref().is_none_or(|s| &a.status == s)
                && query.group.as_ref().is_none_or(|g| &a.group_name == g)
        })))
    }

    async fn query_alerts_by_dedup_key(&self, key: &str) -> Result<Vec<AlertRecord>, StoreError> {
        let rows = newest_first(&self.tables.lock().alerts, |a| a.ts);
        Ok(rows.into_iter().filter(|a| a.dedup_key == key).collect())
    }

    async fn query_events_by_date(
        &self,
        query: &EventQuery,
    ) -> Result<Vec<EventRecord>, StoreError> {
        let (start, end) = date_range(&query.date)?;
        let rows = newest_first(&self.tables.lock().events, |e| e.ts);
        Ok(query.page.apply(rows.into_iter().filter(|e| {
            e.ts >= start
                && e.ts < end
                && query.event_type.as_ref().is_none_or(|t| &e.event_type == t)
        })))
    }

    async fn get_event_by_id(&self, id: i64) -> Result<Option<EventRecord>, StoreError> {
        Ok(self.tables.lock().events.iter().find(|e| e.id == id).cloned())
    }

    async fn query_snapshots(
        &self,
        symbol: &str,
        page: Page,
    ) -> Result<Vec<SnapshotRecord>, StoreError> {
        let rows = newest_first(&self.tables.lock().snapshots, |s| s.ts);
        Ok(page.apply(rows.into_iter().filter(|s| s.symbol == symbol)))
    }

    async fn upsert_plan(&self, plan: &PlanRecord) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        tables.plans.retain(|p| p.date != plan.date);
        tables.plans.push(plan.clone());
        drop(tables);
        Ok(())
    }

    async fn get_plan(&self, date: &str) -> Result<Option<PlanRecord>, StoreError> {
        Ok(self.tables.lock().plans.iter().find(|p| p.date == date).cloned())
    }

    async fn confirm_plan(&self, date: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock();
        let Some(plan) = tables.plans.iter_mut().find(|p| p.date == date) else {
            return Ok(false);
        };
        plan.confirmed = true;
        drop(tables);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn date_range_is_shanghai_midnight() {
        // 2024-01-02 00:00 +08:00 == 2024-01-01 16:00 UTC
        let (start, end) = date_range("2024-01-02").unwrap();
        assert_eq!(start, 1_704_124_800);
        assert_eq!(end - start, 86_400);
    }

    #[test_case("2024-13-01")]
    #[test_case("20240101")]
    #[test_case("")]
    fn date_range_rejects_bad_dates(date: &str) {
        assert!(matches!(date_range(date), Err(StoreError::InvalidDate { .. })));
    }

    #[test_case(0, -5, 200, 0)]
    #[test_case(50, 10, 50, 10)]
    #[test_case(5000, 0, 1000, 0)]
    fn page_clamps(limit: i64, offset: i64, want_limit: i64, want_offset: i64) {
        assert_eq!(Page::new(limit, offset), Page { limit: want_limit, offset: want_offset });
    }

    #[tokio::test]
    async fn ids_increase_and_events_are_queryable() {
        let store = InMemoryEventStore::new();
        let (start, _) = date_range("2024-01-02").unwrap();
        let mut ev = EventRecord {
            ts: start + 10,
            event_type: "PANIC_DROP".to_string(),
            ..EventRecord::default()
        };
        let a = store.insert_event_return_id(&ev).await.unwrap();
        ev.ts = start + 20;
        ev.event_type = "alert".to_string();
        let b = store.insert_event_return_id(&ev).await.unwrap();
        assert!(b > a);

        let query = EventQuery {
            date: "2024-01-02".to_string(),
            event_type: Some("PANIC_DROP".to_string()),
            page: Page::default(),
        };
        let rows = store.query_events_by_date(&query).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, a);
        assert!(!rows[0].created_at.is_empty());
        assert!(store.get_event_by_id(b).await.unwrap().is_some());
        assert!(store.get_event_by_id(99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn confirm_missing_plan_reports_false() {
        let store = InMemoryEventStore::new();
        assert!(!store.confirm_plan("2024-01-02").await.unwrap());
    }
}
