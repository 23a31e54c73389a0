//! HTTP/REST API adapter.
//!
//! Inbound adapter exposing health, metrics, query and test endpoints over
//! the application services.

mod controller;
mod error;
mod request;
mod response;

pub use controller::{AppState, create_router};
pub use error::HttpApiError;
pub use request::*;
pub use response::*;
