//! Market Service
//!
//! Quote access with a per-symbol cache in front of the provider, plus the
//! polling loop that feeds fresh quotes into the event engine.
//!
//! Cache rules:
//! - within the minimum request interval, quotes come from the cache
//! - on provider failure, quotes come from the cache if every symbol is
//!   cached, otherwise the provider error is returned
//! - every ingested snapshot with a positive price refreshes the cache

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::event_engine::{Clock, EventEngine};
use crate::application::ports::{EventStorePort, MarketError, MarketProviderPort, QuoteBatch};
use crate::domain::market::{Quote, Snapshot};
use crate::infrastructure::metrics;

/// Source name reported for cached quotes.
pub const CACHE_SOURCE: &str = "cache";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Quotes plus freshness metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuoteView {
    /// Quotes in request order (cache) or provider order.
    pub quotes: Vec<Quote>,
    /// Whether the quotes came from the cache.
    pub stale: bool,
    /// Provider name or `cache`.
    pub source: String,
    /// Fetch time, or the newest cached quote time when stale.
    pub source_ts: i64,
    /// Why the cache was used.
    pub warnings: Vec<String>,
}

#[derive(Debug, Default)]
struct CacheState {
    quotes: HashMap<String, Quote>,
    last_fetch: Option<Instant>,
    consecutive_failures: u32,
}

impl CacheState {
    fn lookup(&self, symbols: &[String]) -> Result<Vec<Quote>, MarketError> {
        symbols
            .iter()
            .map(|sym| {
                self.quotes
                    .get(&sym.to_lowercase())
                    .cloned()
                    .ok_or_else(|| MarketError::CacheMiss {
                        symbol: sym.clone(),
                    })
            })
            .collect()
    }
}

fn stale_view(quotes: Vec<Quote>, warning: String) -> QuoteView {
    let source_ts = quotes.iter().map(|q| q.ts).max().unwrap_or_default().max(0);
    QuoteView {
        quotes,
        stale: true,
        source: CACHE_SOURCE.to_string(),
        source_ts,
        warnings: vec![warning],
    }
}

/// Poll interval after a poll, given the consecutive failure count.
///
/// Doubles after three failures and quadruples after six.
#[must_use]
pub fn next_poll_interval(base: Duration, failed: bool, consecutive_failures: u32) -> Duration {
    if !failed {
        return base;
    }
    match consecutive_failures {
        n if n >= 6 => base * 4,
        n if n >= 3 => base * 2,
        _ => base,
    }
}

/// Quote cache, poller and snapshot ingestion.
pub struct MarketService {
    provider: Option<Arc<dyn MarketProviderPort>>,
    min_interval: Duration,
    store: Option<Arc<dyn EventStorePort>>,
    engine: Option<Arc<EventEngine>>,
    clock: Arc<dyn Clock>,
    state: Mutex<CacheState>,
}

impl std::fmt::Debug for MarketService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketService")
            .field("min_interval", &self.min_interval)
            .field("has_provider", &self.provider.is_some())
            .field("has_store", &self.store.is_some())
            .field("has_engine", &self.engine.is_some())
            .finish_non_exhaustive()
    }
}

impl MarketService {
    /// Create the service.
    #[must_use]
    pub fn new(
        provider: Option<Arc<dyn MarketProviderPort>>,
        min_interval: Duration,
        store: Option<Arc<dyn EventStorePort>>,
        engine: Option<Arc<EventEngine>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            provider,
            min_interval,
            store,
            engine,
            clock,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Consecutive provider failures since the last success.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.state.lock().consecutive_failures
    }

    /// Fetch quotes, falling back to the cache as described in the module docs.
    pub async fn get_quotes(&self, symbols: &[String]) -> Result<QuoteView, MarketError> {
        let Some(provider) = &self.provider else {
            return Err(MarketError::NotConfigured);
        };
        if symbols.is_empty() {
            return Err(MarketError::NoSymbols);
        }

        {
            let state = self.state.lock();
            let throttled = !self.min_interval.is_zero()
                && state
                    .last_fetch
                    .is_some_and(|t| t.elapsed() < self.min_interval);
            if throttled {
                let cached = state.lookup(symbols)?;
                return Ok(stale_view(
                    cached,
                    "requests too frequent, serving cached data".to_string(),
                ));
            }
        }

        match provider.get_quotes(symbols).await {
            Ok(QuoteBatch { quotes, source }) => {
                let mut state = self.state.lock();
                for q in &quotes {
                    state.quotes.insert(q.symbol.to_lowercase(), q.clone());
                }
                state.last_fetch = Some(Instant::now());
                state.consecutive_failures = 0;
                drop(state);
                metrics::record_quote_fetch(&source, true);
                Ok(QuoteView {
                    quotes,
                    stale: false,
                    source,
                    source_ts: self.clock.now_unix(),
                    warnings: Vec::new(),
                })
            }
            Err(err) => {
                metrics::record_quote_fetch(provider.name(), false);
                let cached = {
                    let mut state = self.state.lock();
                    state.consecutive_failures += 1;
                    state.lookup(symbols)
                };
                match cached {
                    Ok(cached) => Ok(stale_view(
                        cached,
                        format!("quote fetch failed, serving cache: {err}"),
                    )),
                    Err(_) => Err(err),
                }
            }
        }
    }

    /// Fetch quotes and ingest each one as a snapshot.
    pub async fn poll_and_ingest(&self, symbols: &[String]) -> Result<usize, MarketError> {
        let view = self.get_quotes(symbols).await.inspect_err(|e| {
            tracing::warn!(error = %e, "Market poll failed");
        })?;
        let count = view.quotes.len();
        for quote in view.quotes {
            self.ingest_snapshot(Snapshot::from(quote)).await;
        }
        Ok(count)
    }

    /// Poll until cancelled, backing off while the provider keeps failing.
    pub async fn poll_loop(
        self: Arc<Self>,
        symbols: Vec<String>,
        base_interval: Duration,
        cancel: CancellationToken,
    ) {
        let base = if base_interval.is_zero() {
            DEFAULT_POLL_INTERVAL
        } else {
            base_interval
        };
        tracing::info!(
            symbols = symbols.len(),
            interval_ms = base.as_millis() as u64,
            "Market poller started"
        );
        loop {
            let failed = self.poll_and_ingest(&symbols).await.is_err();
            let interval = next_poll_interval(base, failed, self.consecutive_failures());
            let jitter_ms = rand::rng().random_range(0..=interval.as_millis() as u64 / 20);
            tokio::select! {
                () = tokio::time::sleep(interval + Duration::from_millis(jitter_ms)) => {}
                () = cancel.cancelled() => {
                    tracing::info!("Market poller shutting down");
                    break;
                }
            }
        }
    }

    /// Persist a snapshot, run it through the engine and refresh the cache.
    ///
    /// Snapshots with an empty symbol are ignored.
    pub async fn ingest_snapshot(&self, snapshot: Snapshot) {
        let Some(snapshot) = snapshot.normalized(self.clock.now_unix()) else {
            return;
        };
        metrics::record_snapshot_ingested();

        if let Some(store) = &self.store
            && let Err(e) = store.insert_snapshot(&snapshot).await
        {
            tracing::warn!(symbol = %snapshot.symbol, error = %e, "Insert snapshot failed");
        }
        if let Some(engine) = &self.engine {
            engine.on_snapshot(snapshot.clone()).await;
        }
        if snapshot.price > 0.0 {
            self.state
                .lock()
                .quotes
                .insert(snapshot.symbol.clone(), Quote::from(&snapshot));
        }
    }
}

// =============================================================================
// Provider Chain
// =============================================================================

/// Providers tried in order until one returns quotes.
pub struct MultiProvider {
    providers: Vec<Arc<dyn MarketProviderPort>>,
}

impl MultiProvider {
    /// Chain `providers` in priority order.
    #[must_use]
    pub fn new(providers: Vec<Arc<dyn MarketProviderPort>>) -> Self {
        Self { providers }
    }

    /// Number of chained providers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether the chain is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl std::fmt::Debug for MultiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.providers.iter().map(|p| p.name()).collect();
        f.debug_struct("MultiProvider").field("providers", &names).finish()
    }
}

#[async_trait]
impl MarketProviderPort for MultiProvider {
    fn name(&self) -> &str {
        "multi"
    }

    async fn get_quotes(&self, symbols: &[String]) -> Result<QuoteBatch, MarketError> {
        if self.providers.is_empty() {
            return Err(MarketError::NotConfigured);
        }
        let mut last_err = None;
        for provider in &self.providers {
            match provider.get_quotes(symbols).await {
                Ok(batch) if !batch.quotes.is_empty() => return Ok(batch),
                Ok(_) => last_err = None,
                Err(e) => {
                    tracing::debug!(
                        provider = provider.name(),
                        error = %e,
                        "Provider failed, trying next"
                    );
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or(MarketError::AllProvidersFailed))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::application::ports::InMemoryEventStore;
    use crate::application::services::ManualClock;

    /// Provider that replays scripted results, repeating the last one.
    struct ScriptedProvider {
        name: &'static str,
        script: Mutex<VecDeque<Result<Vec<Quote>, MarketError>>>,
        calls: Mutex<usize>,
    }

    impl ScriptedProvider {
        fn new(name: &'static str, script: Vec<Result<Vec<Quote>, MarketError>>) -> Self {
            Self {
                name,
                script: Mutex::new(script.into()),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock()
        }
    }

    #[async_trait]
    impl MarketProviderPort for ScriptedProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn get_quotes(&self, _symbols: &[String]) -> Result<QuoteBatch, MarketError> {
            *self.calls.lock() += 1;
            let mut script = self.script.lock();
            let next = if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().cloned()
            };
            next.unwrap_or(Err(MarketError::AllProvidersFailed))
                .map(|quotes| QuoteBatch {
                    quotes,
                    source: self.name.to_string(),
                })
        }
    }

    fn quote(symbol: &str, price: f64, ts: i64) -> Quote {
        Quote {
            symbol: symbol.to_string(),
            name: String::new(),
            price,
            change_pct: 0.0,
            volume: 0.0,
            ts,
            raw: String::new(),
        }
    }

    fn upstream_down() -> MarketError {
        MarketError::Request {
            source_name: "http".to_string(),
            message: "timeout".to_string(),
        }
    }

    fn service(provider: Arc<ScriptedProvider>, min_interval: Duration) -> MarketService {
        MarketService::new(
            Some(provider),
            min_interval,
            None,
            None,
            Arc::new(ManualClock::new(1_700_000_000)),
        )
    }

    fn syms(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[tokio::test]
    async fn missing_provider_and_empty_symbols_are_errors() {
        let svc = MarketService::new(None, Duration::ZERO, None, None, Arc::new(ManualClock::new(0)));
        assert!(matches!(
            svc.get_quotes(&syms(&["sh600000"])).await,
            Err(MarketError::NotConfigured)
        ));

        let provider = Arc::new(ScriptedProvider::new("http", vec![Ok(vec![])]));
        let svc = service(provider, Duration::ZERO);
        assert!(matches!(svc.get_quotes(&[]).await, Err(MarketError::NoSymbols)));
    }

    #[tokio::test(start_paused = true)]
    async fn throttled_requests_are_served_from_cache() {
        let provider = Arc::new(ScriptedProvider::new(
            "http",
            vec![Ok(vec![quote("SH600000", 10.0, 100)])],
        ));
        let svc = service(provider.clone(), Duration::from_secs(1));

        let fresh = svc.get_quotes(&syms(&["sh600000"])).await.unwrap();
        assert!(!fresh.stale);
        assert_eq!(fresh.source, "http");
        assert_eq!(fresh.source_ts, 1_700_000_000);

        let cached = svc.get_quotes(&syms(&["SH600000"])).await.unwrap();
        assert!(cached.stale);
        assert_eq!(cached.source, "cache");
        assert_eq!(cached.source_ts, 100);
        assert_eq!(cached.warnings, vec!["requests too frequent, serving cached data"]);
        assert_eq!(provider.calls(), 1);

        tokio::time::advance(Duration::from_millis(1001)).await;
        assert!(!svc.get_quotes(&syms(&["sh600000"])).await.unwrap().stale);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn throttled_cache_miss_is_an_error() {
        let provider = Arc::new(ScriptedProvider::new(
            "http",
            vec![Ok(vec![quote("sh600000", 10.0, 100)])],
        ));
        let svc = service(provider, Duration::from_secs(1));
        svc.get_quotes(&syms(&["sh600000"])).await.unwrap();
        let err = svc.get_quotes(&syms(&["sz000001"])).await.unwrap_err();
        assert!(matches!(err, MarketError::CacheMiss { ref symbol } if symbol == "sz000001"));
    }

    #[tokio::test]
    async fn provider_failure_serves_cache_or_propagates() {
        let provider = Arc::new(ScriptedProvider::new(
            "http",
            vec![Ok(vec![quote("sh600000", 10.0, 100)]), Err(upstream_down())],
        ));
        let svc = service(provider, Duration::ZERO);
        svc.get_quotes(&syms(&["sh600000"])).await.unwrap();

        let view = svc.get_quotes(&syms(&["sh600000"])).await.unwrap();
        assert!(view.stale);
        assert!(view.warnings[0].starts_with("quote fetch failed, serving cache: "));
        assert_eq!(svc.consecutive_failures(), 1);

        let err = svc.get_quotes(&syms(&["sh600000", "sz000001"])).await.unwrap_err();
        assert!(matches!(err, MarketError::Request { .. }));
        assert_eq!(svc.consecutive_failures(), 2);
    }

    #[tokio::test]
    async fn ingest_stores_and_caches_positive_prices() {
        let store = Arc::new(InMemoryEventStore::new());
        let provider = Arc::new(ScriptedProvider::new("http", vec![Err(upstream_down())]));
        let svc = MarketService::new(
            Some(provider),
            Duration::ZERO,
            Some(store.clone()),
            None,
            Arc::new(ManualClock::new(1_700_000_000)),
        );

        svc.ingest_snapshot(Snapshot::new(" SZ000001 ", 0, 12.5, 1.0, 10.0)).await;
        svc.ingest_snapshot(Snapshot::new("sh600000", 0, 0.0, 0.0, 0.0)).await;
        svc.ingest_snapshot(Snapshot::new("", 0, 1.0, 0.0, 0.0)).await;
        assert_eq!(store.snapshot_count(), 2);

        let view = svc.get_quotes(&syms(&["sz000001"])).await.unwrap();
        assert!(view.stale);
        assert_eq!(view.quotes[0].price, 12.5);
        assert_eq!(view.source_ts, 1_700_000_000);
        assert!(svc.get_quotes(&syms(&["sh600000"])).await.is_err());
    }

    #[tokio::test]
    async fn poll_feeds_the_engine() {
        let provider = Arc::new(ScriptedProvider::new(
            "http",
            vec![Ok(vec![quote("sh000001", 2900.0, 1_700_000_000)])],
        ));
        let clock = Arc::new(ManualClock::new(1_700_000_000));
        let engine = Arc::new(EventEngine::new(
            crate::domain::rules::RuleConfig::default(),
            None,
            None,
            None,
            clock.clone(),
        ));
        let svc = MarketService::new(Some(provider), Duration::ZERO, None, Some(engine.clone()), clock);
        assert_eq!(svc.poll_and_ingest(&syms(&["sh000001"])).await.unwrap(), 1);
        assert_eq!(engine.window_len("sh000001"), 1);
    }

    #[test]
    fn backoff_steps_with_failures() {
        let base = Duration::from_secs(30);
        assert_eq!(next_poll_interval(base, false, 9), base);
        assert_eq!(next_poll_interval(base, true, 2), base);
        assert_eq!(next_poll_interval(base, true, 3), base * 2);
        assert_eq!(next_poll_interval(base, true, 6), base * 4);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_loop_stops_on_cancel() {
        let provider = Arc::new(ScriptedProvider::new("http", vec![Err(upstream_down())]));
        let svc = Arc::new(service(provider.clone(), Duration::ZERO));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(svc.poll_loop(
            syms(&["sh600000"]),
            Duration::from_secs(1),
            cancel.clone(),
        ));
        tokio::time::sleep(Duration::from_secs(10)).await;
        cancel.cancel();
        handle.await.unwrap();
        assert!(provider.calls() >= 3);
    }

    #[tokio::test]
    async fn multi_provider_falls_through_in_order() {
        let first = Arc::new(ScriptedProvider::new("primary", vec![Err(upstream_down())]));
        let second = Arc::new(ScriptedProvider::new(
            "backup",
            vec![Ok(vec![quote("sh600000", 10.0, 1)])],
        ));
        let chain = MultiProvider::new(vec![first.clone() as Arc<dyn MarketProviderPort>, second]);
        let batch = chain.get_quotes(&syms(&["sh600000"])).await.unwrap();
        assert_eq!(batch.source, "backup");
        assert_eq!(first.calls(), 1);
    }

    #[tokio::test]
    async fn multi_provider_reports_last_error() {
        let empty = Arc::new(ScriptedProvider::new("a", vec![Ok(vec![])]));
        let chain = MultiProvider::new(vec![empty.clone() as Arc<dyn MarketProviderPort>]);
        assert!(matches!(
            chain.get_quotes(&syms(&["x"])).await,
            Err(MarketError::AllProvidersFailed)
        ));

        let failing = Arc::new(ScriptedProvider::new("b", vec![Err(upstream_down())]));
        let chain = MultiProvider::new(vec![failing as Arc<dyn MarketProviderPort>, empty]);
        assert!(matches!(
            chain.get_quotes(&syms(&["x"])).await,
            Err(MarketError::AllProvidersFailed)
        ));

        let chain = MultiProvider::new(vec![]);
        assert!(matches!(
            chain.get_quotes(&syms(&["x"])).await,
            Err(MarketError::NotConfigured)
        ));
    }
}
