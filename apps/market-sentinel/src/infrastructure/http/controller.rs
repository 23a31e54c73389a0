//! HTTP Controller (Driver Adapter)
//!
//! Axum-based REST API over the alert pipeline, the event store, the
//! market service and the risk advisor. Collaborators are optional; a
//! handler whose collaborator is missing answers 500.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use chrono::NaiveDate;
use metrics_exporter_prometheus::PrometheusHandle;

use crate::application::ports::{
    AdvisorStatus, AlertQuery, AlertRecord, DecisionAdvisorPort, EventQuery, EventRecord,
    EventStorePort, NotificationChannelPort, Page, SnapshotRecord, shanghai_today,
};
use crate::application::services::{AlertService, EventEngine, MarketService};
use crate::domain::alert::{AlertRequest, Priority};
use crate::domain::decision::{EventInput, fallback_decision, format_markdown};
use crate::domain::market::Snapshot;
use crate::domain::plan::{PlanRecord, fallback_plan};
use crate::domain::rules::Severity;
use crate::infrastructure::metrics;

use super::error::HttpApiError;
use super::request::{
    AlertsQuery, EventsQuery, PlanConfirmRequest, RiskEvalRequest, SnapshotsQuery, SymbolsQuery,
    TestAlertRequest, TestPushRequest, TestSnapshotRequest, ensure_index_symbol, parse_limit,
    parse_offset, parse_symbols, symbol_from_title,
};
use super::response::{
    AlertResponse, BurstResponse, BurstStats, ItemsResponse, OkResponse, PlanGenerateResponse,
    PlanResponse, PushResponse, QuotesResponse, RiskEvalResponse,
};

const BURST_SIZE: usize = 50;

/// Application state shared across handlers.
#[derive(Clone, Default)]
pub struct AppState {
    /// Direct channel for the push test.
    pub channel: Option<Arc<dyn NotificationChannelPort>>,
    /// Alert pipeline.
    pub alerts: Option<Arc<AlertService>>,
    /// Durable store.
    pub store: Option<Arc<dyn EventStorePort>>,
    /// Quote cache and snapshot ingestion.
    pub market: Option<Arc<MarketService>>,
    /// Rule engine, used when no market service is wired.
    pub engine: Option<Arc<EventEngine>>,
    /// Risk advisor.
    pub advisor: Option<Arc<dyn DecisionAdvisorPort>>,
    /// Prometheus exporter handle.
    pub metrics: Option<PrometheusHandle>,
    /// Symbols used when a request names none.
    pub default_symbols: Vec<String>,
    /// Index symbol always included in plan quotes.
    pub index_symbol: String,
}

impl AppState {
    fn store(&self) -> Result<&Arc<dyn EventStorePort>, HttpApiError> {
        self.store
            .as_ref()
            .ok_or(HttpApiError::NotConfigured("store"))
    }

    fn alerts(&self) -> Result<&Arc<AlertService>, HttpApiError> {
        self.alerts
            .as_ref()
            .ok_or(HttpApiError::NotConfigured("alert service"))
    }
}

type ApiResult<T> = Result<Json<T>, HttpApiError>;

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, HttpApiError> {
    payload
        .map(|Json(v)| v)
        .map_err(|_| HttpApiError::BadRequest("invalid json body".to_string()))
}

fn date_or_today(raw: Option<String>) -> String {
    raw.filter(|d| !d.trim().is_empty())
        .unwrap_or_else(shanghai_today)
}

fn required_date(raw: Option<String>) -> Result<String, HttpApiError> {
    raw.map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .ok_or_else(|| HttpApiError::BadRequest("date is required (YYYY-MM-DD)".to_string()))
}

/// Create the HTTP router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/metrics", get(render_metrics))
        .route("/api/v1/test/push", post(test_push))
        .route("/api/v1/test/alert", post(test_alert))
        .route("/api/v1/test/alert-burst", post(test_alert_burst))
        .route("/api/v1/alerts", get(list_alerts))
        .route("/api/v1/alerts/dedup/{key}", get(alerts_by_dedup_key))
        .route("/api/v1/quotes", get(get_quotes))
        .route("/api/v1/snapshots", get(list_snapshots))
        .route("/api/v1/test/snapshot", post(test_snapshot))
        .route("/api/v1/events", get(list_events))
        .route("/api/v1/test/risk/eval", post(risk_eval))
        .route("/api/v1/test/risk/ping", post(risk_ping))
        .route("/api/v1/plan/generate", post(plan_generate))
        .route("/api/v1/plan/confirm", post(plan_confirm))
        .route("/api/v1/plan", get(get_plan))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> Json<OkResponse> {
    Json(OkResponse::ok())
}

/// Prometheus scrape endpoint.
async fn render_metrics(State(state): State<AppState>) -> Result<impl IntoResponse, HttpApiError> {
    let handle = state
        .metrics
        .as_ref()
        .ok_or(HttpApiError::NotConfigured("metrics"))?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    ))
}

// =============================================================================
// Alerts
// =============================================================================

async fn test_push(
    State(state): State<AppState>,
    payload: Result<Json<TestPushRequest>, JsonRejection>,
) -> ApiResult<PushResponse> {
    let channel = state
        .channel
        .as_ref()
        .ok_or(HttpApiError::NotConfigured("notification channel"))?;
    let req = body(payload)?;

    let receipt = channel.send(&req.title, &req.markdown).await.map_err(|e| {
        tracing::warn!(channel = channel.name(), error = %e, "Test push failed");
        metrics::record_channel_failure(channel.name(), "transport");
        HttpApiError::upstream(e.to_string())
    })?;

    if !receipt.is_ok() {
        metrics::record_channel_failure(channel.name(), "errcode");
        return Err(HttpApiError::Upstream {
            message: "channel returned error".to_string(),
            channel_errcode: Some(receipt.errcode),
            channel_errmsg: Some(receipt.errmsg),
        });
    }

    Ok(Json(PushResponse {
        ok: true,
        channel_errcode: receipt.errcode,
        channel_errmsg: receipt.errmsg,
    }))
}

async fn test_alert(
    State(state): State<AppState>,
    payload: Result<Json<TestAlertRequest>, JsonRejection>,
) -> ApiResult<AlertResponse> {
    let alerts = state.alerts()?;
    let req = body(payload)?;
    let result = alerts.handle(AlertRequest::from(req)).await;
    Ok(Json(AlertResponse::from(result)))
}

fn burst_request(i: usize, now: i64) -> AlertRequest {
    let priority = match i % 3 {
        0 => Priority::High,
        1 => Priority::Med,
        _ => Priority::Low,
    };
    let group = ["trade", "risk", "price", "system"][i % 4];
    AlertRequest {
        priority,
        group: group.to_string(),
        title: format!("Test Alert #{i}"),
        markdown: format!("burst test message ({now})"),
        dedup_key: if i % 10 == 0 { "dedup-key" } else { "" }.to_string(),
        merge_key: if i % 7 == 0 { "merge-key" } else { "" }.to_string(),
        silent: false,
    }
}

/// Push fifty mixed alerts through the pipeline and count outcomes.
async fn test_alert_burst(State(state): State<AppState>) -> ApiResult<BurstResponse> {
    let alerts = state.alerts()?;
    let now = chrono::Utc::now().timestamp();
    let mut stats = BurstStats::default();
    for i in 0..BURST_SIZE {
        let result = alerts.handle(burst_request(i, now)).await;
        stats.record(&result);
    }
    Ok(Json(BurstResponse { ok: true, stats }))
}

async fn list_alerts(
    State(state): State<AppState>,
    Query(q): Query<AlertsQuery>,
) -> ApiResult<ItemsResponse<AlertRecord>> {
    let store = state.store()?;
    let limit = parse_limit(q.limit.as_deref())?;
    let offset = parse_offset(q.offset.as_deref())?;
    let query = AlertQuery {
        date: date_or_today(q.date),
        status: q.status.filter(|s| !s.is_empty()),
        group: q.group.filter(|g| !g.is_empty()),
        page: Page::new(limit, offset),
    };
    let items = store.query_alerts_by_date(&query).await?;
    Ok(Json(ItemsResponse::new(items)))
}

async fn alerts_by_dedup_key(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<ItemsResponse<AlertRecord>> {
    let store = state.store()?;
    if key.trim().is_empty() {
        return Err(HttpApiError::BadRequest("dedup_key is required".to_string()));
    }
    let items = store.query_alerts_by_dedup_key(&key).await?;
    Ok(Json(ItemsResponse::new(items)))
}

// =============================================================================
// Market
// =============================================================================

async fn get_quotes(
    State(state): State<AppState>,
    Query(q): Query<SymbolsQuery>,
) -> ApiResult<QuotesResponse> {
    let market = state
        .market
        .as_ref()
        .ok_or(HttpApiError::NotConfigured("market service"))?;
    let symbols = parse_symbols(q.symbols.as_deref(), &state.default_symbols);
    if symbols.is_empty() {
        return Err(HttpApiError::BadRequest("symbols is empty".to_string()));
    }
    let view = market
        .get_quotes(&symbols)
        .await
        .map_err(|e| HttpApiError::upstream(e.to_string()))?;
    Ok(Json(QuotesResponse { ok: true, view }))
}

async fn list_snapshots(
    State(state): State<AppState>,
    Query(q): Query<SnapshotsQuery>,
) -> ApiResult<ItemsResponse<SnapshotRecord>> {
    let store = state.store()?;
    let symbol = q
        .symbol
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HttpApiError::BadRequest("symbol is required".to_string()))?;
    let limit = parse_limit(q.limit.as_deref())?;
    let offset = parse_offset(q.offset.as_deref())?;
    let items = store.query_snapshots(&symbol, Page::new(limit, offset)).await?;
    Ok(Json(ItemsResponse::new(items)))
}

/// Inject a snapshot as if it had been polled.
async fn test_snapshot(
    State(state): State<AppState>,
    payload: Result<Json<TestSnapshotRequest>, JsonRejection>,
) -> ApiResult<OkResponse> {
    let store = state.store()?;
    let req = body(payload)?;
    if req.symbol.trim().is_empty() || req.price <= 0.0 {
        return Err(HttpApiError::BadRequest(
            "symbol and price are required".to_string(),
        ));
    }
    let ts = if req.ts == 0 {
        chrono::Utc::now().timestamp()
    } else {
        req.ts
    };
    let snapshot = Snapshot::new(req.symbol, ts, req.price, req.change_pct, req.volume);

    if let Some(market) = &state.market {
        market.ingest_snapshot(snapshot).await;
    } else {
        let Some(snapshot) = snapshot.normalized(ts) else {
            return Err(HttpApiError::BadRequest(
                "symbol and price are required".to_string(),
            ));
        };
        store.insert_snapshot(&snapshot).await?;
        if let Some(engine) = &state.engine {
            engine.on_snapshot(snapshot).await;
        }
    }
    Ok(Json(OkResponse::ok()))
}

// =============================================================================
// Events / Risk
// =============================================================================

async fn list_events(
    State(state): State<AppState>,
    Query(q): Query<EventsQuery>,
) -> ApiResult<ItemsResponse<EventRecord>> {
    let store = state.store()?;
    let limit = parse_limit(q.limit.as_deref())?;
    let offset = parse_offset(q.offset.as_deref())?;
    let query = EventQuery {
        date: date_or_today(q.date),
        event_type: q.event_type.filter(|t| !t.is_empty()),
        page: Page::new(limit, offset),
    };
    let items = store.query_events_by_date(&query).await?;
    Ok(Json(ItemsResponse::new(items)))
}

/// Assess a stored or inline event.
async fn risk_eval(
    State(state): State<AppState>,
    payload: Result<Json<RiskEvalRequest>, JsonRejection>,
) -> ApiResult<RiskEvalResponse> {
    let store = state.store()?;
    let req = body(payload)?;

    let event = if req.event_id > 0 {
        store
            .get_event_by_id(req.event_id)
            .await?
            .ok_or_else(|| HttpApiError::NotFound("event not found".to_string()))?
    } else if let Some(event) = req.event {
        event
    } else {
        return Err(HttpApiError::BadRequest(
            "event_id or event is required".to_string(),
        ));
    };

    let input = EventInput {
        event_id: event.id,
        event_type: event.event_type.clone(),
        severity: Severity::parse_lenient(&event.severity),
        symbol: symbol_from_title(&event.title),
        change_pct: 0.0,
        drawdown_pct: 0.0,
        window_sec: 0,
        threshold: 0.0,
        evidence_json: String::new(),
    }
    .with_evidence_json(&event.evidence_json);

    let decision = match &state.advisor {
        Some(advisor) => match advisor.evaluate(&input).await {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(event_id = input.event_id, error = %e, "Risk eval failed, using fallback");
                metrics::record_advisor_fallback();
                fallback_decision(&input)
            }
        },
        None => fallback_decision(&input),
    };

    let markdown = format_markdown(&event.title, &decision);
    Ok(Json(RiskEvalResponse {
        ok: true,
        decision,
        markdown,
    }))
}

async fn risk_ping(State(state): State<AppState>) -> Json<AdvisorStatus> {
    match &state.advisor {
        Some(advisor) => Json(advisor.ping().await),
        None => Json(AdvisorStatus::fallback("risk agent not configured")),
    }
}

// =============================================================================
// Plans
// =============================================================================

/// Build and store the plan for a date from current quotes.
async fn plan_generate(
    State(state): State<AppState>,
    Query(q): Query<SymbolsQuery>,
) -> ApiResult<PlanGenerateResponse> {
    let (Some(store), Some(market)) = (&state.store, &state.market) else {
        return Err(HttpApiError::NotConfigured("store or market"));
    };
    let date = required_date(q.date)?;
    if NaiveDate::parse_from_str(&date, "%Y-%m-%d").is_err() {
        return Err(HttpApiError::BadRequest(
            "invalid date format (YYYY-MM-DD)".to_string(),
        ));
    }

    let symbols = ensure_index_symbol(
        parse_symbols(q.symbols.as_deref(), &state.default_symbols),
        &state.index_symbol,
    );
    let mut warnings = Vec::new();
    match market.get_quotes(&symbols).await {
        Ok(view) => {
            let stale = view.stale;
            warnings.extend(view.warnings);
            if stale {
                warnings.push(format!(
                    "quotes stale, source={} source_ts={}",
                    view.source, view.source_ts
                ));
            }
        }
        Err(e) => warnings.push(format!("quotes fetch failed: {e}")),
    }

    let plan = fallback_plan().sanitize();
    let record = PlanRecord {
        date: date.clone(),
        content_md: plan.to_markdown(&date),
        plan: plan.clone(),
        confirmed: false,
        created_at: chrono::Utc::now().timestamp(),
    };
    store.upsert_plan(&record).await?;
    tracing::info!(date = %date, warnings = warnings.len(), "Plan generated");

    Ok(Json(PlanGenerateResponse {
        ok: true,
        mode: "fallback",
        plan,
        warnings,
    }))
}

async fn plan_confirm(
    State(state): State<AppState>,
    payload: Result<Json<PlanConfirmRequest>, JsonRejection>,
) -> ApiResult<OkResponse> {
    let store = state.store()?;
    let req = body(payload)?;
    let date = required_date(Some(req.date))?;
    if !store.confirm_plan(&date).await? {
        return Err(HttpApiError::NotFound("plan not found".to_string()));
    }
    Ok(Json(OkResponse::ok()))
}

async fn get_plan(
    State(state): State<AppState>,
    Query(q): Query<SymbolsQuery>,
) -> ApiResult<PlanResponse> {
    let store = state.store()?;
    let date = required_date(q.date)?;
    let record = store
        .get_plan(&date)
        .await?
        .ok_or_else(|| HttpApiError::NotFound("plan not found".to_string()))?;
    Ok(Json(PlanResponse {
        ok: true,
        plan: record.plan,
        content_md: record.content_md,
        confirmed: record.confirmed,
    }))
}
