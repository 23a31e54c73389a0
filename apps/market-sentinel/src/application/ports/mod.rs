//! Application Ports (Driven)
//!
//! Ports define the interfaces the services use to reach external
//! systems: durable storage, notification delivery, risk assessment and
//! market data. Each port ships with an in-process implementation used
//! by tests and degraded-mode runs.

mod decision_advisor_port;
mod event_store_port;
mod market_provider_port;
mod notification_channel_port;

pub use decision_advisor_port::{
    AdvisorError, AdvisorMode, AdvisorStatus, DecisionAdvisorPort, FallbackAdvisor,
};
pub use event_store_port::{
    AlertQuery, AlertRecord, DEFAULT_PAGE_LIMIT, EventQuery, EventRecord, EventStorePort,
    InMemoryEventStore, MAX_PAGE_LIMIT, Page, SnapshotRecord, StoreError, date_range,
    now_rfc3339, shanghai_today,
};
pub use market_provider_port::{MarketError, MarketProviderPort, QuoteBatch};
pub use notification_channel_port::{
    ChannelError, ChannelReceipt, NotificationChannelPort, RecordingChannel, SentMessage,
};
