//! Event Engine
//!
//! Turns snapshots into risk events. Per call:
//!
//! 1. normalize the snapshot and append it to the symbol's window
//! 2. evaluate every rule against the updated window
//! 3. gate each firing on its `(rule, symbol, severity)` cooldown
//! 4. persist the event, ask the advisor for a decision and hand the
//!    formatted alert to the [`AlertService`]
//!
//! Store and advisor failures are logged and never abort the pipeline.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use super::alert_service::AlertService;
use crate::application::ports::{DecisionAdvisorPort, EventRecord, EventStorePort};
use crate::domain::alert::{AlertRequest, Priority};
use crate::domain::cooldown::{CooldownKey, CooldownTracker};
use crate::domain::decision::{EventInput, fallback_decision, format_markdown};
use crate::domain::market::Snapshot;
use crate::domain::rules::{RuleConfig, RuleHit, merge_key};
use crate::domain::window::WindowStore;
use crate::infrastructure::metrics;

/// Group used for every rule-generated alert.
pub const RISK_GROUP: &str = "risk";

// =============================================================================
// Clock
// =============================================================================

/// Wall-clock source for timestamps and cooldowns, in unix seconds.
pub trait Clock: Send + Sync {
    /// Current unix time.
    fn now_unix(&self) -> i64;
}

/// System time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Manually driven clock for tests and replays.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Start at `now_unix`.
    #[must_use]
    pub const fn new(now_unix: i64) -> Self {
        Self {
            now: AtomicI64::new(now_unix),
        }
    }

    /// Jump to `now_unix`.
    pub fn set(&self, now_unix: i64) {
        self.now.store(now_unix, Ordering::SeqCst);
    }

    /// Move forward by `secs`.
    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_unix(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Rule engine over per-symbol sliding windows.
pub struct EventEngine {
    rules: RuleConfig,
    windows: WindowStore,
    cooldowns: CooldownTracker,
    store: Option<Arc<dyn EventStorePort>>,
    alerts: Option<Arc<AlertService>>,
    advisor: Option<Arc<dyn DecisionAdvisorPort>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for EventEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEngine")
            .field("rules", &self.rules)
            .field("has_store", &self.store.is_some())
            .field("has_alerts", &self.alerts.is_some())
            .field("has_advisor", &self.advisor.is_some())
            .finish_non_exhaustive()
    }
}

impl EventEngine {
    /// Create an engine. Rule defaults are applied to `rules`.
    #[must_use]
    pub fn new(
        rules: RuleConfig,
        store: Option<Arc<dyn EventStorePort>>,
        alerts: Option<Arc<AlertService>>,
        advisor: Option<Arc<dyn DecisionAdvisorPort>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let rules = rules.with_defaults_applied();
        Self {
            windows: WindowStore::new(rules.window_max_keep),
            rules,
            cooldowns: CooldownTracker::new(),
            store,
            alerts,
            advisor,
            clock,
        }
    }

    /// Rules in effect, defaults applied.
    #[must_use]
    pub const fn rules(&self) -> &RuleConfig {
        &self.rules
    }

    /// Current window length for `symbol`.
    #[must_use]
    pub fn window_len(&self, symbol: &str) -> usize {
        self.windows.len_of(symbol)
    }

    /// Process one snapshot and return the firings that passed cooldown.
    ///
    /// Snapshots with an empty symbol are ignored.
    pub async fn on_snapshot(&self, snapshot: Snapshot) -> Vec<RuleHit> {
        let now = self.clock.now_unix();
        let Some(snapshot) = snapshot.normalized(now) else {
            return Vec::new();
        };
        let window = self.windows.append(snapshot.clone());

        let mut emitted = Vec::new();
        for hit in self.rules.evaluate(&snapshot, &window) {
            let key = CooldownKey::new(hit.rule, snapshot.symbol.clone(), hit.severity);
            let cooldown = self.rules.cooldown_sec.for_rule(hit.rule);
            if !self.cooldowns.try_acquire(key, now, cooldown) {
                tracing::debug!(
                    rule = %hit.rule,
                    symbol = %snapshot.symbol,
                    severity = %hit.severity,
                    "Rule firing in cooldown"
                );
                continue;
            }
            self.emit(&snapshot, &hit).await;
            emitted.push(hit);
        }
        emitted
    }

    async fn emit(&self, snapshot: &Snapshot, hit: &RuleHit) {
        let symbol = snapshot.symbol.as_str();
        let title = hit.title(snapshot);
        let dedup_key = hit.dedup_key(symbol);
        let merge_key = merge_key(symbol);
        metrics::record_event_emitted(hit.rule.as_str(), hit.severity.as_str());

        let event_id = self
            .persist_event(snapshot, hit, &title, &dedup_key, &merge_key)
            .await;
        tracing::info!(
            event_id,
            rule = %hit.rule,
            symbol,
            severity = %hit.severity,
            "Risk event emitted"
        );

        let input = EventInput::from_hit(event_id, symbol, snapshot.change_pct, hit);
        let decision = match &self.advisor {
            Some(advisor) => match advisor.evaluate(&input).await {
                Ok(decision) => decision,
                Err(e) => {
                    tracing::warn!(event_id, error = %e, "Advisor failed, using fallback");
                    metrics::record_advisor_fallback();
                    fallback_decision(&input)
                }
            },
            None => fallback_decision(&input),
        };

        let Some(alerts) = &self.alerts else {
            return;
        };
        let markdown = format_markdown(&title, &decision);
        let result = alerts
            .handle(AlertRequest {
                priority: Priority::from(decision.severity),
                group: RISK_GROUP.to_string(),
                title,
                markdown,
                dedup_key,
                merge_key,
                silent: false,
            })
            .await;
        tracing::debug!(event_id, status = %result.status, "Risk alert routed");
    }

    async fn persist_event(
        &self,
        snapshot: &Snapshot,
        hit: &RuleHit,
        title: &str,
        dedup_key: &str,
        merge_key: &str,
    ) -> i64 {
        let Some(store) = &self.store else {
            return 0;
        };
        let record = EventRecord {
            ts: snapshot.ts,
            event_type: hit.rule.to_string(),
            severity: hit.severity.to_string(),
            group_name: RISK_GROUP.to_string(),
            title: title.to_string(),
            dedup_key: dedup_key.to_string(),
            merge_key: merge_key.to_string(),
            evidence_json: hit.evidence.to_json(),
            ..EventRecord::default()
        };
        match store.insert_event_return_id(&record).await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(error = %e, rule = %hit.rule, "Insert event failed");
                0
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use mockall::mock;

    use super::*;
    use crate::application::ports::{
        AdvisorError, AdvisorStatus, InMemoryEventStore, NotificationChannelPort, RecordingChannel,
    };
    use crate::application::services::AlertServiceConfig;
    use crate::domain::decision::RiskDecision;
    use crate::domain::rules::{RuleKind, Severity};

    mock! {
        Advisor {}

        #[async_trait]
        impl DecisionAdvisorPort for Advisor {
            async fn evaluate(&self, input: &EventInput) -> Result<RiskDecision, AdvisorError>;
            async fn ping(&self) -> AdvisorStatus;
        }
    }

    const T0: i64 = 1_700_000_000;

    fn rules() -> RuleConfig {
        let mut rules = RuleConfig::default();
        rules.key_break_down.levels = HashMap::from([("sh600000".to_string(), 10.0)]);
        rules
    }

    fn bare_engine(clock: Arc<ManualClock>) -> EventEngine {
        EventEngine::new(rules(), None, None, None, clock)
    }

    #[tokio::test]
    async fn empty_symbol_is_ignored() {
        let engine = bare_engine(Arc::new(ManualClock::new(T0)));
        let hits = engine.on_snapshot(Snapshot::new("  ", T0, 1.0, -9.0, 0.0)).await;
        assert!(hits.is_empty());
        assert_eq!(engine.window_len(""), 0);
    }

    #[tokio::test]
    async fn symbol_is_normalized_before_windowing() {
        let engine = bare_engine(Arc::new(ManualClock::new(T0)));
        engine.on_snapshot(Snapshot::new(" SH600000 ", 0, 11.0, 0.0, 0.0)).await;
        assert_eq!(engine.window_len("sh600000"), 1);
    }

    #[tokio::test]
    async fn index_drop_fires_once_then_cools_down() {
        let clock = Arc::new(ManualClock::new(T0));
        let engine = bare_engine(clock.clone());

        let hits = engine.on_snapshot(Snapshot::new("sh000001", 0, 3000.0, -2.0, 0.0)).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].rule, RuleKind::IndexRisk);
        assert_eq!(hits[0].severity, Severity::Med);

        clock.advance(10);
        let again = engine.on_snapshot(Snapshot::new("sh000001", 0, 2990.0, -2.1, 0.0)).await;
        assert!(again.is_empty());

        clock.advance(600);
        let later = engine.on_snapshot(Snapshot::new("sh000001", 0, 2980.0, -2.2, 0.0)).await;
        assert_eq!(later.len(), 1);
    }

    #[tokio::test]
    async fn severity_escalation_bypasses_med_cooldown() {
        let clock = Arc::new(ManualClock::new(T0));
        let engine = bare_engine(clock.clone());
        engine.on_snapshot(Snapshot::new("sh000001", 0, 3000.0, -2.0, 0.0)).await;
        clock.advance(5);
        let hits = engine.on_snapshot(Snapshot::new("sh000001", 0, 2900.0, -3.5, 0.0)).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].severity, Severity::High);
    }

    #[tokio::test]
    async fn one_snapshot_can_fire_several_rules() {
        let engine = bare_engine(Arc::new(ManualClock::new(T0)));
        engine.on_snapshot(Snapshot::new("sh600000", T0, 10.5, 0.0, 100.0)).await;
        let hits = engine.on_snapshot(Snapshot::new("sh600000", T0 + 10, 9.5, 0.0, 0.0)).await;
        let kinds: Vec<RuleKind> = hits.iter().map(|h| h.rule).collect();
        assert_eq!(kinds, vec![RuleKind::PanicDrop, RuleKind::KeyBreakDown]);
    }

    #[tokio::test]
    async fn key_break_fires_once_per_cooldown_while_below_level() {
        let clock = Arc::new(ManualClock::new(T0));
        let engine = bare_engine(clock.clone());
        let breaks = |hits: &[RuleHit]| {
            hits.iter()
                .filter(|h| h.rule == RuleKind::KeyBreakDown)
                .count()
        };

        let mut fired = 0;
        for i in 0..3 {
            let hits = engine
                .on_snapshot(Snapshot::new("sh600000", T0 + i * 60, 9.5, 0.0, 0.0))
                .await;
            fired += breaks(&hits[..]);
            clock.advance(60);
        }
        assert_eq!(fired, 1);

        clock.advance(600);
        let hits = engine
            .on_snapshot(Snapshot::new("sh600000", T0 + 900, 9.5, 0.0, 0.0))
            .await;
        assert_eq!(breaks(&hits[..]), 1);
    }

    #[tokio::test]
    async fn volume_spike_needs_full_window_before_firing() {
        let engine = bare_engine(Arc::new(ManualClock::new(T0)));
        for i in 0..4 {
            let hits = engine
                .on_snapshot(Snapshot::new("sh600001", T0 + i, 10.0, 0.0, 100.0))
                .await;
            assert!(hits.is_empty());
        }
        let hits = engine
            .on_snapshot(Snapshot::new("sh600001", T0 + 4, 10.0, 0.0, 1000.0))
            .await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].rule, RuleKind::VolumeSpike);
        assert_eq!(hits[0].severity, Severity::Med);
    }

    #[tokio::test]
    async fn emitted_event_is_persisted_and_alerted() {
        let store = Arc::new(InMemoryEventStore::new());
        let channel = Arc::new(RecordingChannel::new());
        let alerts = Arc::new(AlertService::new(
            AlertServiceConfig {
                merge_window: std::time::Duration::ZERO,
                ..AlertServiceConfig::default()
            },
            Some(channel.clone() as Arc<dyn NotificationChannelPort>),
            Some(store.clone() as Arc<dyn EventStorePort>),
        ));
        let engine = EventEngine::new(
            rules(),
            Some(store.clone()),
            Some(alerts),
            None,
            Arc::new(ManualClock::new(T0)),
        );

        let hits = engine.on_snapshot(Snapshot::new("sh000001", T0, 2900.0, -3.2, 0.0)).await;
        assert_eq!(hits.len(), 1);

        let events = store.events();
        let risk = events.iter().find(|e| e.event_type == "INDEX_RISK").unwrap();
        assert_eq!(risk.id, 1);
        assert_eq!(risk.severity, "high");
        assert_eq!(risk.group_name, "risk");
        assert_eq!(risk.title, "sh000001 INDEX_RISK change_pct=-3.20");
        assert_eq!(risk.dedup_key, "INDEX_RISK:sh000001:thr3:high");
        assert_eq!(risk.merge_key, "risk:sh000001");

        let sent = channel.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].title, risk.title);
        assert!(sent[0].markdown.starts_with("**sh000001 INDEX_RISK"));
        assert_eq!(store.alerts()[0].priority, "high");
    }

    #[tokio::test]
    async fn advisor_receives_persisted_id_and_decides_priority() {
        let store = Arc::new(InMemoryEventStore::new());
        let channel = Arc::new(RecordingChannel::new());
        let alerts = Arc::new(AlertService::new(
            AlertServiceConfig {
                merge_window: std::time::Duration::ZERO,
                ..AlertServiceConfig::default()
            },
            Some(channel.clone() as Arc<dyn NotificationChannelPort>),
            None,
        ));

        let mut advisor = MockAdvisor::new();
        advisor
            .expect_evaluate()
            .withf(|input| input.event_id == 1 && input.event_type == "KEY_BREAK_DOWN")
            .times(1)
            .returning(|input| {
                let mut decision = fallback_decision(input);
                decision.severity = Severity::Low;
                Ok(decision)
            });

        let engine = EventEngine::new(
            rules(),
            Some(store),
            Some(alerts.clone()),
            Some(Arc::new(advisor)),
            Arc::new(ManualClock::new(T0)),
        );
        engine.on_snapshot(Snapshot::new("sh600000", T0, 9.0, 0.0, 0.0)).await;

        assert!(channel.sent().is_empty());
        assert_eq!(alerts.pending_digest_len(), 1);
    }

    #[tokio::test]
    async fn advisor_failure_falls_back() {
        let channel = Arc::new(RecordingChannel::new());
        let alerts = Arc::new(AlertService::new(
            AlertServiceConfig {
                merge_window: std::time::Duration::ZERO,
                ..AlertServiceConfig::default()
            },
            Some(channel.clone() as Arc<dyn NotificationChannelPort>),
            None,
        ));
        let mut advisor = MockAdvisor::new();
        advisor
            .expect_evaluate()
            .times(1)
            .returning(|_| Err(AdvisorError::EmptyReply));

        let engine = EventEngine::new(
            rules(),
            None,
            Some(alerts),
            Some(Arc::new(advisor)),
            Arc::new(ManualClock::new(T0)),
        );
        engine.on_snapshot(Snapshot::new("sh000001", T0, 2900.0, -3.2, 0.0)).await;

        let sent = channel.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].markdown.contains("severity=high"));
    }
}
