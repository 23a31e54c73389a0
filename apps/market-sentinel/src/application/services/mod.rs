//! Application Services
//!
//! Orchestration over the domain and the driven ports: the rule engine,
//! the alert pipeline with its rate limiter, and market data access.

mod alert_service;
mod event_engine;
mod market_service;
mod rate_limiter;

pub use alert_service::{AlertService, AlertServiceConfig};
pub use event_engine::{Clock, EventEngine, ManualClock, RISK_GROUP, SystemClock};
pub use market_service::{CACHE_SOURCE, MarketService, MultiProvider, QuoteView, next_poll_interval};
pub use rate_limiter::TokenBucket;
