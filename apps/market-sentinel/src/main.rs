//! Market Sentinel Binary
//!
//! Starts the HTTP API, the alert background workers and, when quote
//! providers are configured, the market poller.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-sentinel
//! ```
//!
//! # Environment Variables
//!
//! - `SENTINEL_CONFIG`: config file path (default: configs/app.yaml)
//! - `PORT`: overrides `server.port`
//! - `DINGTALK_WEBHOOK`: overrides `push.webhook`
//! - `OPENAI_API_KEY` / `OPENAI_MODEL` / `OPENAI_BASE_URL`: advisor fallbacks
//! - `RUST_LOG`: log filter (default: `log.level` from config)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use market_sentinel::application::ports::{
    EventStorePort, InMemoryEventStore, NotificationChannelPort,
};
use market_sentinel::application::services::{
    AlertService, EventEngine, MarketService, SystemClock,
};
use market_sentinel::infrastructure::advisor::build_advisor;
use market_sentinel::infrastructure::config::{Config, load_config};
use market_sentinel::infrastructure::http::{AppState, create_router};
use market_sentinel::infrastructure::market::build_provider;
use market_sentinel::infrastructure::metrics::init_metrics;
use market_sentinel::infrastructure::persistence::SqliteEventStore;
use market_sentinel::infrastructure::push::WebhookChannel;
use market_sentinel::infrastructure::telemetry::{self, TelemetryConfig};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Upper bound on waiting for background tasks after the server stops.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv_from_ancestors();

    let cfg = load_config(None).context("load config")?;
    let _telemetry = telemetry::init(&TelemetryConfig::from_env(&cfg.log.level));

    tracing::info!(
        port = cfg.server.port,
        symbols = cfg.market.symbols.len(),
        providers = cfg.market.providers.len(),
        "Starting Market Sentinel"
    );

    let metrics = match init_metrics() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "Metrics disabled");
            None
        }
    };

    let store = open_store(&cfg);
    let channel = create_channel(&cfg);
    let advisor = build_advisor(
        &cfg.risk_agent
            .clone()
            .with_env_fallbacks(|k| std::env::var(k).ok()),
    );

    let alerts = Arc::new(AlertService::new(
        cfg.alert.to_service_config(),
        channel.clone(),
        Some(Arc::clone(&store)),
    ));
    let engine = Arc::new(EventEngine::new(
        cfg.engine.clone(),
        Some(Arc::clone(&store)),
        Some(Arc::clone(&alerts)),
        Some(Arc::clone(&advisor)),
        Arc::new(SystemClock),
    ));
    let provider = build_provider(&cfg.market).context("build quote providers")?;
    let has_provider = provider.is_some();
    let market = Arc::new(MarketService::new(
        provider,
        cfg.market.min_request_interval(),
        Some(Arc::clone(&store)),
        Some(Arc::clone(&engine)),
        Arc::new(SystemClock),
    ));

    let cancel = CancellationToken::new();
    let mut background = alerts.spawn_background(cancel.clone());
    let symbols = cfg.market.normalized_symbols();
    if has_provider && !symbols.is_empty() {
        background.push(tokio::spawn(Arc::clone(&market).poll_loop(
            symbols.clone(),
            cfg.market.poll_interval(),
            cancel.clone(),
        )));
    } else {
        tracing::info!("Market poller disabled (no providers or symbols)");
    }

    let state = AppState {
        channel,
        alerts: Some(alerts),
        store: Some(store),
        market: Some(market),
        engine: Some(engine),
        advisor: Some(advisor),
        metrics,
        default_symbols: symbols,
        index_symbol: cfg.engine.index_risk.symbol.clone(),
    };

    serve(&cfg, state).await?;

    cancel.cancel();
    await_background(background).await;
    tracing::info!("Market Sentinel stopped");
    Ok(())
}

/// Open the SQLite store, falling back to memory if it cannot be opened.
fn open_store(cfg: &Config) -> Arc<dyn EventStorePort> {
    match SqliteEventStore::open(&cfg.store.sqlite.path) {
        Ok(store) => {
            tracing::info!(path = %cfg.store.sqlite.path, "SQLite store opened");
            Arc::new(store)
        }
        Err(e) => {
            tracing::warn!(
                path = %cfg.store.sqlite.path,
                error = %e,
                "Failed to open SQLite store, records will not survive restart"
            );
            Arc::new(InMemoryEventStore::new())
        }
    }
}

fn create_channel(cfg: &Config) -> Option<Arc<dyn NotificationChannelPort>> {
    if !cfg.push.is_configured() {
        tracing::warn!("Push webhook not configured, alerts will be recorded only");
        return None;
    }
    match WebhookChannel::from_config(&cfg.push) {
        Ok(channel) => Some(Arc::new(channel)),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to build webhook channel");
            None
        }
    }
}

async fn serve(cfg: &Config, state: AppState) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", cfg.server.bind_address, cfg.server.port)
        .parse()
        .context("parse bind address")?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    tracing::info!(%addr, "HTTP server listening");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server")
}

async fn await_background(handles: Vec<JoinHandle<()>>) {
    let join_all = async {
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Background task ended abnormally");
            }
        }
    };
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, join_all).await.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Background tasks did not stop in time"
        );
    }
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv_from_ancestors() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for SIGINT or SIGTERM.
///
/// A signal handler that cannot be installed never resolves, leaving the
/// other one in charge.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C, initiating shutdown"),
        () = terminate => tracing::info!("Received SIGTERM, initiating shutdown"),
    }
}
