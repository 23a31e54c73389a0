//! SQLite Event Store
//!
//! Durable [`EventStorePort`] backed by a single rusqlite connection.
//! Every call runs on the blocking pool; the connection mutex is only held
//! inside the blocking closure.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter, types::Value};

use crate::application::ports::{
    AlertQuery, AlertRecord, EventQuery, EventRecord, EventStorePort, Page, SnapshotRecord,
    StoreError, date_range, now_rfc3339,
};
use crate::domain::market::Snapshot;
use crate::domain::plan::{PlanRecord, TradingPlan};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS alerts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ts INTEGER NOT NULL,
        priority TEXT,
        group_name TEXT,
        title TEXT,
        dedup_key TEXT,
        merge_key TEXT,
        status TEXT,
        channel TEXT,
        errcode INTEGER,
        errmsg TEXT,
        payload_md TEXT,
        created_at TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_alerts_ts ON alerts(ts)",
    "CREATE INDEX IF NOT EXISTS idx_alerts_status ON alerts(status)",
    "CREATE INDEX IF NOT EXISTS idx_alerts_group ON alerts(group_name)",
    "CREATE INDEX IF NOT EXISTS idx_alerts_dedup ON alerts(dedup_key)",
    "CREATE TABLE IF NOT EXISTS events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ts INTEGER NOT NULL,
        type TEXT,
        severity TEXT,
        group_name TEXT,
        title TEXT,
        dedup_key TEXT,
        merge_key TEXT,
        evidence_json TEXT,
        created_at TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_events_ts ON events(ts)",
    "CREATE INDEX IF NOT EXISTS idx_events_group ON events(group_name)",
    "CREATE TABLE IF NOT EXISTS market_snapshot (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ts INTEGER NOT NULL,
        symbol TEXT,
        price REAL,
        change_pct REAL,
        volume REAL,
        raw TEXT,
        created_at TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_market_snapshot_ts ON market_snapshot(ts)",
    "CREATE INDEX IF NOT EXISTS idx_market_snapshot_symbol ON market_snapshot(symbol)",
    "CREATE TABLE IF NOT EXISTS plan (
        date TEXT PRIMARY KEY,
        content_json TEXT,
        content_md TEXT,
        confirmed INTEGER,
        created_at INTEGER
    )",
];

const ALERT_COLUMNS: &str = "ts, priority, group_name, title, dedup_key, merge_key, status, \
                             channel, errcode, errmsg, payload_md, created_at";

const EVENT_COLUMNS: &str =
    "id, ts, type, severity, group_name, title, dedup_key, merge_key, evidence_json, created_at";

fn db_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Database {
        message: e.to_string(),
    }
}

/// SQLite-backed store.
#[derive(Debug, Clone)]
pub struct SqliteEventStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEventStore {
    /// Open (or create) the database at `path` and apply the schema.
    ///
    /// The parent directory is created when missing. An empty path means
    /// `data/app.db`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the directory, connection,
    /// pragmas or schema fail.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let path = if path.as_os_str().is_empty() {
            Path::new("data/app.db")
        } else {
            path
        };
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Database {
                message: format!("create db dir {}: {e}", parent.display()),
            })?;
        }
        let conn = Connection::open(path).map_err(db_err)?;
        // journal_mode returns a row, so it goes through pragma_update.
        conn.pragma_update(None, "journal_mode", "WAL").map_err(db_err)?;
        conn.pragma_update(None, "busy_timeout", 3000).map_err(db_err)?;
        let store = Self::from_connection(conn)?;
        tracing::info!(path = %path.display(), "SQLite store opened");
        Ok(store)
    }

    /// In-memory database, used by tests.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the schema cannot be applied.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory().map_err(db_err)?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        for stmt in SCHEMA {
            conn.execute(stmt, []).map_err(|e| StoreError::Database {
                message: format!("migrate: {e}"),
            })?;
        }
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            op(&guard)
        })
        .await
        .map_err(|e| StoreError::Database {
            message: format!("blocking task failed: {e}"),
        })?
    }
}

fn alert_from_row(row: &Row<'_>) -> rusqlite::Result<AlertRecord> {
    Ok(AlertRecord {
        ts: row.get(0)?,
        priority: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        group_name: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        title: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        dedup_key: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        merge_key: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        status: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
        channel: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
        errcode: row.get::<_, Option<i64>>(8)?.unwrap_or_default(),
        errmsg: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
        payload_md: row.get::<_, Option<String>>(10)?.unwrap_or_default(),
        created_at: row.get::<_, Option<String>>(11)?.unwrap_or_default(),
    })
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<EventRecord> {
    Ok(EventRecord {
        id: row.get(0)?,
        ts: row.get(1)?,
        event_type: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        severity: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        group_name: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        title: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        dedup_key: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
        merge_key: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
        evidence_json: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
        created_at: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
    })
}

fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<SnapshotRecord> {
    Ok(SnapshotRecord {
        ts: row.get(0)?,
        symbol: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        price: row.get::<_, Option<f64>>(2)?.unwrap_or_default(),
        change_pct: row.get::<_, Option<f64>>(3)?.unwrap_or_default(),
        volume: row.get::<_, Option<f64>>(4)?.unwrap_or_default(),
        raw: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        created_at: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
    })
}

fn query_rows<T>(
    conn: &Connection,
    sql: &str,
    args: Vec<Value>,
    map: fn(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Vec<T>, StoreError> {
    let mut stmt = conn.prepare(sql).map_err(db_err)?;
    let rows = stmt.query_map(params_from_iter(args), map).map_err(db_err)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
}

fn push_page(sql: &mut String, args: &mut Vec<Value>, page: Page) {
    let page = Page::new(page.limit, page.offset);
    sql.push_str(" ORDER BY ts DESC LIMIT ? OFFSET ?");
    args.push(Value::Integer(page.limit));
    args.push(Value::Integer(page.offset));
}

#[async_trait]
impl EventStorePort for SqliteEventStore {
    async fn insert_event_return_id(&self, event: &EventRecord) -> Result<i64, StoreError> {
        let mut e = event.clone();
        if e.created_at.is_empty() {
            e.created_at = now_rfc3339();
        }
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO events (ts, type, severity, group_name, title, dedup_key, merge_key, evidence_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    e.ts,
                    e.event_type,
                    e.severity,
                    e.group_name,
                    e.title,
                    e.dedup_key,
                    e.merge_key,
                    e.evidence_json,
                    e.created_at,
                ],
            )
            .map_err(|err| StoreError::Database {
                message: format!("insert event: {err}"),
            })?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn insert_alert_record(&self, record: &AlertRecord) -> Result<(), StoreError> {
        let mut a = record.clone();
        if a.created_at.is_empty() {
            a.created_at = now_rfc3339();
        }
        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO alerts ({ALERT_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
                ),
                params![
                    a.ts,
                    a.priority,
                    a.group_name,
                    a.title,
                    a.dedup_key,
                    a.merge_key,
                    a.status,
                    a.channel,
                    a.errcode,
                    a.errmsg,
                    a.payload_md,
                    a.created_at,
                ],
            )
            .map_err(|err| StoreError::Database {
                message: format!("insert alert: {err}"),
            })?;
            Ok(())
        })
        .await
    }

    async fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let mut s = SnapshotRecord::from(snapshot);
        s.created_at = now_rfc3339();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO market_snapshot (ts, symbol, price, change_pct, volume, raw, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![s.ts, s.symbol, s.price, s.change_pct, s.volume, s.raw, s.created_at],
            )
            .map_err(|err| StoreError::Database {
                message: format!("insert market snapshot: {err}"),
            })?;
            Ok(())
        })
        .await
    }

    async fn query_alerts_by_date(
        &self,
        query: &AlertQuery,
    ) -> Result<Vec<AlertRecord>, StoreError> {
        let (start, end) = date_range(&query.date)?;
        let mut sql = format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE ts >= ? AND ts < ?");
        let mut args = vec![Value::Integer(start), Value::Integer(end)];
        if let Some(status) = query.status.as_ref().filter(|s| !s.is_empty()) {
            sql.push_str(" AND status = ?");
            args.push(Value::Text(status.clone()));
        }
        if let Some(group) = query.group.as_ref().filter(|g| !g.is_empty()) {
            sql.push_str(" AND group_name = ?");
            args.push(Value::Text(group.clone()));
        }
        push_page(&mut sql, &mut args, query.page);
        self.with_conn(move |conn| query_rows(conn, &sql, args, alert_from_row))
            .await
    }

    async fn query_alerts_by_dedup_key(&self, key: &str) -> Result<Vec<AlertRecord>, StoreError> {
        let sql =
            format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE dedup_key = ? ORDER BY ts DESC");
        let args = vec![Value::Text(key.to_string())];
        self.with_conn(move |conn| query_rows(conn, &sql, args, alert_from_row))
            .await
    }

    async fn query_events_by_date(
        &self,
        query: &EventQuery,
    ) -> Result<Vec<EventRecord>, StoreError> {
        let (start, end) = date_range(&query.date)?;
        let mut sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE ts >= ? AND ts < ?");
        let mut args = vec![Value::Integer(start), Value::Integer(end)];
        if let Some(kind) = query.event_type.as_ref().filter(|t| !t.is_empty()) {
            sql.push_str(" AND type = ?");
            args.push(Value::Text(kind.clone()));
        }
        push_page(&mut sql, &mut args, query.page);
        self.with_conn(move |conn| query_rows(conn, &sql, args, event_from_row))
            .await
    }

    async fn get_event_by_id(&self, id: i64) -> Result<Option<EventRecord>, StoreError> {
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"),
                params![id],
                event_from_row,
            )
            .optional()
            .map_err(db_err)
        })
        .await
    }

    async fn query_snapshots(
        &self,
        symbol: &str,
        page: Page,
    ) -> Result<Vec<SnapshotRecord>, StoreError> {
        let mut sql = "SELECT ts, symbol, price, change_pct, volume, raw, created_at \
                       FROM market_snapshot WHERE symbol = ?"
            .to_string();
        let mut args = vec![Value::Text(symbol.to_string())];
        push_page(&mut sql, &mut args, page);
        self.with_conn(move |conn| query_rows(conn, &sql, args, snapshot_from_row))
            .await
    }

    async fn upsert_plan(&self, plan: &PlanRecord) -> Result<(), StoreError> {
        let content_json = serde_json::to_string(&plan.plan).map_err(|e| StoreError::Decode {
            message: e.to_string(),
        })?;
        let rec = plan.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO plan (date, content_json, content_md, confirmed, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(date) DO UPDATE SET content_json=excluded.content_json,
                   content_md=excluded.content_md, confirmed=excluded.confirmed,
                   created_at=excluded.created_at",
                params![
                    rec.date,
                    content_json,
                    rec.content_md,
                    i64::from(rec.confirmed),
                    rec.created_at,
                ],
            )
            .map_err(|err| StoreError::Database {
                message: format!("upsert plan: {err}"),
            })?;
            Ok(())
        })
        .await
    }

    async fn get_plan(&self, date: &str) -> Result<Option<PlanRecord>, StoreError> {
        let date = date.to_string();
        let row = self
            .with_conn(move |conn| {
                conn.query_row(
                    "SELECT date, content_json, content_md, confirmed, created_at FROM plan WHERE date = ?1",
                    params![date],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                            row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                            row.get::<_, Option<i64>>(3)?.unwrap_or_default(),
                            row.get::<_, Option<i64>>(4)?.unwrap_or_default(),
                        ))
                    },
                )
                .optional()
                .map_err(db_err)
            })
            .await?;
        let Some((date, content_json, content_md, confirmed, created_at)) = row else {
            return Ok(None);
        };
        let plan: TradingPlan =
            serde_json::from_str(&content_json).map_err(|e| StoreError::Decode {
                message: format!("plan {date}: {e}"),
            })?;
        Ok(Some(PlanRecord {
            date,
            plan,
            content_md,
            confirmed: confirmed == 1,
            created_at,
        }))
    }

    async fn confirm_plan(&self, date: &str) -> Result<bool, StoreError> {
        let date = date.to_string();
        self.with_conn(move |conn| {
            let changed = conn
                .execute("UPDATE plan SET confirmed = 1 WHERE date = ?1", params![date])
                .map_err(|err| StoreError::Database {
                    message: format!("confirm plan: {err}"),
                })?;
            Ok(changed > 0)
        })
        .await
    }
}
