//! Alert Service
//!
//! The notification pipeline. Each request goes through, in order:
//!
//! 1. normalize (default group)
//! 2. silent override
//! 3. dedup window
//! 4. merge window (batch per merge key, flushed by a one-shot timer)
//! 5. priority routing through the global token bucket
//! 6. delivery or digest
//!
//! Every terminal outcome is written to the store as an alert record and
//! an `alert` event. Dedup, merge and digest state each sit behind their
//! own lock, and no lock is held across delivery or persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::rate_limiter::TokenBucket;
use crate::application::ports::{
    AlertRecord, ChannelError, EventRecord, EventStorePort, NotificationChannelPort,
};
use crate::domain::alert::{
    AlertRequest, AlertResult, AlertStatus, DIGEST_TITLE, Priority, build_merged, render_digest,
};
use crate::infrastructure::metrics;

/// Alert pipeline settings.
#[derive(Debug, Clone)]
pub struct AlertServiceConfig {
    /// Token bucket refill per minute; non-positive disables limiting.
    pub rate_per_minute: i64,
    /// Token bucket capacity; non-positive means `rate_per_minute`.
    pub burst: i64,
    /// Dedup window; zero disables dedup.
    pub dedup_window: Duration,
    /// Merge window; zero disables merging.
    pub merge_window: Duration,
    /// Digest flush period; zero drops low-priority alerts.
    pub digest_interval: Duration,
    /// How long a `high` alert waits for a token before digesting.
    pub high_priority_wait: Duration,
}

impl Default for AlertServiceConfig {
    fn default() -> Self {
        Self {
            rate_per_minute: 60,
            burst: 10,
            dedup_window: Duration::from_secs(60),
            merge_window: Duration::from_secs(30),
            digest_interval: Duration::from_secs(60),
            high_priority_wait: Duration::from_secs(2),
        }
    }
}

/// The alert pipeline.
pub struct AlertService {
    config: AlertServiceConfig,
    channel: Option<Arc<dyn NotificationChannelPort>>,
    store: Option<Arc<dyn EventStorePort>>,
    limiter: TokenBucket,
    dedup: Mutex<HashMap<String, Instant>>,
    merge: Mutex<HashMap<String, Vec<AlertRequest>>>,
    digest: Mutex<BTreeMap<String, Vec<AlertRequest>>>,
    merge_tx: mpsc::UnboundedSender<String>,
    merge_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl std::fmt::Debug for AlertService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertService")
            .field("config", &self.config)
            .field("has_channel", &self.channel.is_some())
            .field("has_store", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

impl AlertService {
    /// Create the service. Background work starts with
    /// [`spawn_background`](Self::spawn_background).
    ///
    /// With a non-zero merge window, merged batches are only delivered
    /// once `spawn_background` has run. Keys whose window expires earlier
    /// stay queued and are flushed when the worker starts.
    #[must_use]
    pub fn new(
        config: AlertServiceConfig,
        channel: Option<Arc<dyn NotificationChannelPort>>,
        store: Option<Arc<dyn EventStorePort>>,
    ) -> Self {
        let (merge_tx, merge_rx) = mpsc::unbounded_channel();
        Self {
            limiter: TokenBucket::new(config.rate_per_minute, config.burst),
            config,
            channel,
            store,
            dedup: Mutex::new(HashMap::new()),
            merge: Mutex::new(HashMap::new()),
            digest: Mutex::new(BTreeMap::new()),
            merge_tx,
            merge_rx: Mutex::new(Some(merge_rx)),
        }
    }

    /// Settings in effect.
    #[must_use]
    pub const fn config(&self) -> &AlertServiceConfig {
        &self.config
    }

    /// Run one request through the pipeline.
    pub async fn handle(&self, request: AlertRequest) -> AlertResult {
        let request = request.normalize();
        let (result, payload) = self.route(&request).await;
        metrics::record_alert_outcome(result.status.as_str(), request.priority.as_str());
        if let Some(err) = &result.error {
            tracing::warn!(
                title = %request.title,
                status = %result.status,
                error = %err,
                "Alert delivery failed"
            );
        }
        self.record(&request, &result, payload).await;
        result
    }

    async fn route<'a>(&self, request: &'a AlertRequest) -> (AlertResult, Option<&'a str>) {
        if request.silent || self.is_deduped(request) {
            return (AlertResult::with_status(AlertStatus::Suppressed), None);
        }
        if !request.merge_key.is_empty() && !self.config.merge_window.is_zero() {
            self.enqueue_merge(request.clone());
            return (AlertResult::with_status(AlertStatus::MergedPending), None);
        }
        self.send_or_digest(request).await
    }

    async fn send_or_digest<'a>(
        &self,
        request: &'a AlertRequest,
    ) -> (AlertResult, Option<&'a str>) {
        if request.priority == Priority::Low {
            self.add_digest(request.clone());
            return (AlertResult::with_status(AlertStatus::QueuedDigest), None);
        }
        if self.limiter.allow() {
            return (self.send_now(request).await, Some(request.markdown.as_str()));
        }
        if request.priority == Priority::High
            && self
                .limiter
                .wait_for_token(self.config.high_priority_wait)
                .await
        {
            return (self.send_now(request).await, Some(request.markdown.as_str()));
        }
        tracing::debug!(
            title = %request.title,
            priority = %request.priority,
            "Rate limited, alert moved to digest"
        );
        self.add_digest(request.clone());
        (AlertResult::with_status(AlertStatus::QueuedDigest), None)
    }

    async fn send_now(&self, request: &AlertRequest) -> AlertResult {
        let Some(channel) = &self.channel else {
            return AlertResult::sent_with_error(ChannelError::NotConfigured.to_string());
        };
        match channel.send(&request.title, &request.markdown).await {
            Err(e) => {
                metrics::record_channel_failure(channel.name(), "transport");
                AlertResult::sent_with_error(e.to_string())
            }
            Ok(receipt) if !receipt.is_ok() => {
                metrics::record_channel_failure(channel.name(), "errcode");
                AlertResult {
                    status: AlertStatus::Sent,
                    error: Some(format!(
                        "errcode={} errmsg={}",
                        receipt.errcode, receipt.errmsg
                    )),
                    channel_errcode: receipt.errcode,
                    channel_errmsg: receipt.errmsg,
                }
            }
            Ok(receipt) => AlertResult {
                status: AlertStatus::Sent,
                error: None,
                channel_errcode: receipt.errcode,
                channel_errmsg: receipt.errmsg,
            },
        }
    }

    // =========================================================================
    // Dedup
    // =========================================================================

    fn is_deduped(&self, request: &AlertRequest) -> bool {
        if request.dedup_key.is_empty() || self.config.dedup_window.is_zero() {
            return false;
        }
        let now = Instant::now();
        let mut seen = self.dedup.lock();
        if let Some(last) = seen.get(&request.dedup_key)
            && now.saturating_duration_since(*last) <= self.config.dedup_window
        {
            return true;
        }
        seen.insert(request.dedup_key.clone(), now);
        false
    }

    // =========================================================================
    // Merge
    // =========================================================================

    fn enqueue_merge(&self, request: AlertRequest) {
        let key = request.merge_key.clone();
        let mut pending = self.merge.lock();
        let batch = pending.entry(key.clone()).or_default();
        if batch.is_empty() {
            if self.merge_rx.lock().is_some() {
                tracing::warn!(
                    merge_key = %key,
                    "Merge enqueued before background worker started, flush deferred"
                );
            }
            let tx = self.merge_tx.clone();
            let window = self.config.merge_window;
            tokio::spawn(async move {
                tokio::time::sleep(window).await;
                let _ = tx.send(key);
            });
        }
        batch.push(request);
        let count = pending.len();
        drop(pending);
        metrics::set_pending_merges(count);
    }

    /// Number of merge keys with a pending batch.
    #[must_use]
    pub fn pending_merge_keys(&self) -> usize {
        self.merge.lock().len()
    }

    /// Collapse the pending batch for `key` and resubmit it.
    ///
    /// Returns `None` when nothing was pending or every member was silent.
    pub async fn flush_merge(&self, key: &str) -> Option<AlertResult> {
        let (batch, remaining) = {
            let mut pending = self.merge.lock();
            (pending.remove(key), pending.len())
        };
        metrics::set_pending_merges(remaining);
        let merged = build_merged(&batch?)?;
        if merged.silent {
            return None;
        }
        tracing::debug!(merge_key = %key, title = %merged.title, "Flushing merged alerts");
        Some(self.handle(merged).await)
    }

    // =========================================================================
    // Digest
    // =========================================================================

    fn add_digest(&self, request: AlertRequest) {
        if self.config.digest_interval.is_zero() {
            return;
        }
        self.digest
            .lock()
            .entry(request.group.clone())
            .or_default()
            .push(request);
    }

    /// Number of alerts waiting for the next digest.
    #[must_use]
    pub fn pending_digest_len(&self) -> usize {
        self.digest.lock().values().map(Vec::len).sum()
    }

    /// Deliver everything queued for the digest as one message.
    pub async fn flush_digest(&self) {
        let groups = std::mem::take(&mut *self.digest.lock());
        if groups.is_empty() {
            return;
        }
        let items: usize = groups.values().map(Vec::len).sum();
        metrics::record_digest_flush(items);
        let Some(channel) = &self.channel else {
            tracing::warn!(items, "Digest send skipped: client not configured");
            return;
        };
        let markdown = render_digest(&groups);
        match channel.send(DIGEST_TITLE, &markdown).await {
            Err(e) => {
                metrics::record_channel_failure(channel.name(), "transport");
                tracing::warn!(error = %e, "Digest send error");
            }
            Ok(receipt) if !receipt.is_ok() => {
                metrics::record_channel_failure(channel.name(), "errcode");
                tracing::warn!(
                    errcode = receipt.errcode,
                    errmsg = %receipt.errmsg,
                    "Digest rejected by channel"
                );
            }
            Ok(_) => tracing::info!(groups = groups.len(), items, "Digest delivered"),
        }
    }

    // =========================================================================
    // Background Tasks
    // =========================================================================

    /// Start the merge-flush worker and, if configured, the digest ticker.
    ///
    /// Each expired merge key is flushed on its own task, so a slow channel
    /// delays only that key. The worker holds only a weak reference and
    /// stops on cancellation or when the service is dropped. Calling this
    /// twice starts no second worker.
    pub fn spawn_background(self: &Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        if let Some(mut rx) = self.merge_rx.lock().take() {
            let weak = Arc::downgrade(self);
            let shutdown = cancel.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        key = rx.recv() => {
                            let Some(key) = key else { break };
                            let Some(service) = weak.upgrade() else { break };
                            tokio::spawn(async move {
                                service.flush_merge(&key).await;
                            });
                        }
                        () = shutdown.cancelled() => {
                            tracing::info!("Merge worker shutting down");
                            break;
                        }
                    }
                }
            }));
        }

        if !self.config.digest_interval.is_zero() {
            handles.push(tokio::spawn(digest_loop(
                Arc::downgrade(self),
                self.config.digest_interval,
                cancel,
            )));
        }

        handles
    }

    // =========================================================================
    // Audit
    // =========================================================================

    async fn record(&self, request: &AlertRequest, result: &AlertResult, payload: Option<&str>) {
        let Some(store) = &self.store else {
            return;
        };
        let ts = chrono::Utc::now().timestamp();
        let alert = AlertRecord {
            ts,
            priority: request.priority.to_string(),
            group_name: request.group.clone(),
            title: request.title.clone(),
            dedup_key: request.dedup_key.clone(),
            merge_key: request.merge_key.clone(),
            status: result.status.to_string(),
            channel: self
                .channel
                .as_ref()
                .map(|c| c.name().to_string())
                .unwrap_or_default(),
            errcode: result.channel_errcode,
            errmsg: result.channel_errmsg.clone(),
            payload_md: payload.unwrap_or_default().to_string(),
            created_at: String::new(),
        };
        if let Err(e) = store.insert_alert_record(&alert).await {
            tracing::warn!(error = %e, "Insert alert record failed");
        }

        let event = EventRecord {
            ts,
            event_type: "alert".to_string(),
            severity: request.priority.to_string(),
            group_name: request.group.clone(),
            title: request.title.clone(),
            dedup_key: request.dedup_key.clone(),
            merge_key: request.merge_key.clone(),
            ..EventRecord::default()
        };
        if let Err(e) = store.insert_event(&event).await {
            tracing::warn!(error = %e, "Insert alert event failed");
        }
    }
}

async fn digest_loop(service: Weak<AlertService>, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(service) = service.upgrade() else { break };
                service.flush_digest().await;
            }
            () = cancel.cancelled() => {
                tracing::info!("Digest loop shutting down");
                break;
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{InMemoryEventStore, RecordingChannel};

    struct Harness {
        service: Arc<AlertService>,
        channel: Arc<RecordingChannel>,
        store: Arc<InMemoryEventStore>,
    }

    fn harness(config: AlertServiceConfig) -> Harness {
        let channel = Arc::new(RecordingChannel::new());
        let store = Arc::new(InMemoryEventStore::new());
        let service = Arc::new(AlertService::new(
            config,
            Some(channel.clone() as Arc<dyn NotificationChannelPort>),
            Some(store.clone() as Arc<dyn EventStorePort>),
        ));
        Harness {
            service,
            channel,
            store,
        }
    }

    fn no_merge() -> AlertServiceConfig {
        AlertServiceConfig {
            merge_window: Duration::ZERO,
            ..AlertServiceConfig::default()
        }
    }

    fn request(priority: Priority, title: &str) -> AlertRequest {
        AlertRequest {
            priority,
            group: "risk".to_string(),
            title: title.to_string(),
            markdown: format!("body of {title}"),
            ..AlertRequest::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn silent_is_suppressed_but_recorded() {
        let h = harness(no_merge());
        let mut req = request(Priority::High, "quiet");
        req.silent = true;
        let res = h.service.handle(req).await;
        assert_eq!(res.status, AlertStatus::Suppressed);
        assert!(h.channel.sent().is_empty());
        let alerts = h.store.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].status, "suppressed");
        assert!(alerts[0].payload_md.is_empty());
        let events = h.store.events();
        assert_eq!(events[0].event_type, "alert");
        assert_eq!(events[0].severity, "high");
    }

    #[tokio::test(start_paused = true)]
    async fn dedup_within_window_inclusive() {
        let h = harness(no_merge());
        let mut req = request(Priority::Med, "dup");
        req.dedup_key = "k".to_string();

        assert_eq!(h.service.handle(req.clone()).await.status, AlertStatus::Sent);
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(
            h.service.handle(req.clone()).await.status,
            AlertStatus::Suppressed
        );
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(h.service.handle(req).await.status, AlertStatus::Sent);
        assert_eq!(h.channel.sent().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_dedup_key_never_suppresses() {
        let h = harness(no_merge());
        for _ in 0..3 {
            let res = h.service.handle(request(Priority::Med, "same")).await;
            assert_eq!(res.status, AlertStatus::Sent);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn low_priority_goes_to_digest() {
        let h = harness(no_merge());
        let res = h.service.handle(request(Priority::Low, "minor")).await;
        assert_eq!(res.status, AlertStatus::QueuedDigest);
        assert_eq!(h.service.pending_digest_len(), 1);
        assert!(h.channel.sent().is_empty());

        h.service.flush_digest().await;
        let sent = h.channel.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].title, "Low Alert Digest");
        assert_eq!(sent[0].markdown, "### risk\n- **minor**\n  body of minor\n\n");
        assert_eq!(h.service.pending_digest_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn digest_disabled_drops_low() {
        let h = harness(AlertServiceConfig {
            digest_interval: Duration::ZERO,
            ..no_merge()
        });
        let res = h.service.handle(request(Priority::Low, "minor")).await;
        assert_eq!(res.status, AlertStatus::QueuedDigest);
        assert_eq!(h.service.pending_digest_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn med_falls_back_to_digest_when_limited() {
        let h = harness(AlertServiceConfig {
            rate_per_minute: 60,
            burst: 1,
            ..no_merge()
        });
        assert_eq!(
            h.service.handle(request(Priority::Med, "a")).await.status,
            AlertStatus::Sent
        );
        assert_eq!(
            h.service.handle(request(Priority::Med, "b")).await.status,
            AlertStatus::QueuedDigest
        );
    }

    #[tokio::test(start_paused = true)]
    async fn high_waits_for_token() {
        let h = harness(AlertServiceConfig {
            rate_per_minute: 60,
            burst: 1,
            ..no_merge()
        });
        assert_eq!(
            h.service.handle(request(Priority::High, "a")).await.status,
            AlertStatus::Sent
        );
        let start = Instant::now();
        assert_eq!(
            h.service.handle(request(Priority::High, "b")).await.status,
            AlertStatus::Sent
        );
        assert!(start.elapsed() >= Duration::from_millis(900));
        assert_eq!(h.channel.sent().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn high_digests_when_wait_times_out() {
        let h = harness(AlertServiceConfig {
            rate_per_minute: 1,
            burst: 1,
            ..no_merge()
        });
        h.service.handle(request(Priority::High, "a")).await;
        let res = h.service.handle(request(Priority::High, "b")).await;
        assert_eq!(res.status, AlertStatus::QueuedDigest);
    }

    #[tokio::test(start_paused = true)]
    async fn channel_errcode_is_sent_with_error() {
        let h = harness(no_merge());
        h.channel.reply_with_errcode(300_001);
        let res = h.service.handle(request(Priority::Med, "x")).await;
        assert_eq!(res.status, AlertStatus::Sent);
        assert_eq!(res.channel_errcode, 300_001);
        assert_eq!(res.error.as_deref(), Some("errcode=300001 errmsg=rejected"));
        let alerts = h.store.alerts();
        assert_eq!(alerts[0].errcode, 300_001);
        assert_eq!(alerts[0].payload_md, "body of x");
        assert_eq!(alerts[0].channel, "recording");
    }

    #[tokio::test(start_paused = true)]
    async fn transport_error_is_sent_with_error() {
        let h = harness(no_merge());
        h.channel.fail_with(ChannelError::Transport {
            message: "connection reset".to_string(),
        });
        let res = h.service.handle(request(Priority::High, "x")).await;
        assert_eq!(res.status, AlertStatus::Sent);
        assert_eq!(res.channel_errcode, 0);
        assert!(res.error.unwrap().contains("connection reset"));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_channel_is_sent_with_error() {
        let service = AlertService::new(no_merge(), None, None);
        let res = service.handle(request(Priority::Med, "x")).await;
        assert_eq!(res.status, AlertStatus::Sent);
        assert_eq!(res.error.as_deref(), Some("client not configured"));
    }

    #[tokio::test(start_paused = true)]
    async fn merge_batches_and_flushes_once() {
        let h = harness(AlertServiceConfig::default());
        let mut priorities = [Priority::Low, Priority::High, Priority::Med].into_iter();
        for title in ["first", "second", "third"] {
            let mut req = request(priorities.next().unwrap(), title);
            req.merge_key = "risk:sh600000".to_string();
            let res = h.service.handle(req).await;
            assert_eq!(res.status, AlertStatus::MergedPending);
        }
        assert_eq!(h.service.pending_merge_keys(), 1);

        let res = h.service.flush_merge("risk:sh600000").await.unwrap();
        assert_eq!(res.status, AlertStatus::Sent);
        let sent = h.channel.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].title, "first (+2)");
        assert_eq!(h.service.pending_merge_keys(), 0);
        assert!(h.service.flush_merge("risk:sh600000").await.is_none());

        let merged_record = h.store.alerts().into_iter().last().unwrap();
        assert_eq!(merged_record.priority, "high");
        assert!(merged_record.merge_key.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn merge_timer_flushes_through_worker() {
        let h = harness(AlertServiceConfig::default());
        let cancel = CancellationToken::new();
        let handles = h.service.spawn_background(cancel.clone());
        assert_eq!(handles.len(), 2);

        for title in ["a", "b"] {
            let mut req = request(Priority::Med, title);
            req.merge_key = "m".to_string();
            h.service.handle(req).await;
        }
        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(h.channel.sent().is_empty());

        for _ in 0..100 {
            if !h.channel.sent().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let sent = h.channel.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].title, "a (+1)");
        cancel.cancel();
    }

    /// Channel whose every send takes five seconds.
    struct SlowChannel {
        started: Instant,
        delivered: parking_lot::Mutex<Vec<(String, u64)>>,
    }

    #[async_trait::async_trait]
    impl NotificationChannelPort for SlowChannel {
        fn name(&self) -> &str {
            "slow"
        }

        async fn send(
            &self,
            title: &str,
            _markdown: &str,
        ) -> Result<crate::application::ports::ChannelReceipt, ChannelError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            self.delivered
                .lock()
                .push((title.to_string(), self.started.elapsed().as_secs()));
            Ok(crate::application::ports::ChannelReceipt::default())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn merge_flushes_for_distinct_keys_run_concurrently() {
        let channel = Arc::new(SlowChannel {
            started: Instant::now(),
            delivered: parking_lot::Mutex::new(Vec::new()),
        });
        let service = Arc::new(AlertService::new(
            AlertServiceConfig::default(),
            Some(channel.clone() as Arc<dyn NotificationChannelPort>),
            None,
        ));
        let cancel = CancellationToken::new();
        service.spawn_background(cancel.clone());

        for i in 0..4 {
            let mut req = request(Priority::High, &format!("k{i}"));
            req.merge_key = format!("risk:k{i}");
            assert_eq!(service.handle(req).await.status, AlertStatus::MergedPending);
        }
        tokio::time::sleep(Duration::from_secs(60)).await;

        let mut delivered = channel.delivered.lock().clone();
        delivered.sort();
        assert_eq!(delivered.len(), 4);
        for (i, (title, secs)) in delivered.iter().enumerate() {
            assert_eq!(title, &format!("k{i}"));
            assert!((35..=36).contains(secs), "{title} delivered at {secs}s");
        }
        assert_eq!(service.pending_merge_keys(), 0);
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn merge_keys_expiring_before_worker_start_are_flushed_later() {
        let h = harness(AlertServiceConfig::default());
        let mut req = request(Priority::Med, "early");
        req.merge_key = "m".to_string();
        assert_eq!(h.service.handle(req).await.status, AlertStatus::MergedPending);

        tokio::time::sleep(Duration::from_secs(45)).await;
        assert!(h.channel.sent().is_empty());
        assert_eq!(h.service.pending_merge_keys(), 1);

        let cancel = CancellationToken::new();
        h.service.spawn_background(cancel.clone());
        for _ in 0..100 {
            if !h.channel.sent().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let sent = h.channel.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].title, "early");
        assert_eq!(h.service.pending_merge_keys(), 0);
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn digest_ticker_flushes_periodically() {
        let h = harness(no_merge());
        let cancel = CancellationToken::new();
        h.service.spawn_background(cancel.clone());
        h.service.handle(request(Priority::Low, "one")).await;
        h.service.handle(request(Priority::Low, "two")).await;

        for _ in 0..100 {
            if !h.channel.sent().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        let sent = h.channel.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].markdown.contains("**one**"));
        assert!(sent[0].markdown.contains("**two**"));
        cancel.cancel();
    }
}
