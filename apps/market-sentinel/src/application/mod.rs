//! Application Layer
//!
//! Ports the services depend on and the services themselves. Nothing in
//! here knows about HTTP, SQLite or a particular notification vendor.

pub mod ports;
pub mod services;
