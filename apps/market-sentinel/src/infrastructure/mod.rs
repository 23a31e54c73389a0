//! Infrastructure Layer
//!
//! Adapters for the ports defined in the application layer, plus the
//! cross-cutting process concerns.
//!
//! - **Driven Adapters (Outbound)**
//!   - `persistence/`: SQLite event store
//!   - `push/`: Webhook notification channel
//!   - `market/`: HTTP quote providers
//!   - `advisor/`: Chat-completions risk advisor
//!
//! - **Driver Adapters (Inbound)**
//!   - `http/`: REST API controllers
//!
//! - **Cross-cutting**
//!   - `config/`: YAML configuration with env overrides
//!   - `telemetry/`: tracing subscriber and optional OTLP export
//!   - `metrics/`: Prometheus recorder

pub mod advisor;
pub mod config;
pub mod http;
pub mod market;
pub mod metrics;
pub mod persistence;
pub mod push;
pub mod telemetry;
