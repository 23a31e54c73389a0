// Allow unwrap/expect in tests - tests should panic on unexpected errors
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Market Sentinel - Risk Event Engine Library
//!
//! Watches market snapshots, evaluates rules over per-symbol sliding
//! windows, and turns detections into deduplicated, merged, rate-limited
//! notifications with a periodic low-priority digest.
//!
//! # Architecture (Hexagonal)
//!
//! ## Layers (inside → outside)
//!
//! - **Domain**: pure types and rule evaluation
//!   - `market`: snapshots, quotes, symbol classification
//!   - `window` / `cooldown`: bounded history and emission suppression
//!   - `rules`: the four rule evaluators and their evidence
//!   - `alert`: requests, results, merge and digest rendering
//!   - `decision` / `plan`: advisor contract, fallbacks, markdown
//!
//! - **Application**: ports and services
//!   - `ports`: `EventStorePort`, `NotificationChannelPort`,
//!     `MarketProviderPort`, `DecisionAdvisorPort`
//!   - `services`: `AlertService`, `EventEngine`, `MarketService`
//!
//! - **Infrastructure**: adapters
//!   - `persistence`: SQLite store
//!   - `push`: webhook channel
//!   - `market`: HTTP quote providers
//!   - `advisor`: chat-completions advisor
//!   - `http`: REST API

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Layers
// =============================================================================

/// Domain layer - Core types with no I/O.
pub mod domain;

/// Application layer - Ports and services.
pub mod application;

/// Infrastructure layer - Adapters and process concerns.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

pub use application::ports::{
    DecisionAdvisorPort, EventStorePort, MarketProviderPort, NotificationChannelPort,
};
pub use application::services::{AlertService, AlertServiceConfig, EventEngine, MarketService};
pub use domain::alert::{AlertRequest, AlertResult, AlertStatus, Priority};
pub use domain::market::{Quote, Snapshot};
pub use domain::rules::{RuleConfig, RuleHit, RuleKind, Severity};
pub use infrastructure::config::{Config, ConfigError, load_config};
