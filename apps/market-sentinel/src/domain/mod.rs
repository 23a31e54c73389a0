//! Domain Layer - Market snapshots, rule evaluation, and alert shaping.
//!
//! Everything in this layer is synchronous and free of I/O. Services in the
//! application layer own the mutable state built from these types.

/// Snapshots, quotes, and symbol classification.
pub mod market;

/// Bounded per-symbol snapshot history.
pub mod window;

/// Last-emission tracking per (rule, symbol, severity).
pub mod cooldown;

/// Rule kinds, typed evidence, and the four rule evaluators.
pub mod rules;

/// Alert requests, results, merge and digest rendering.
pub mod alert;

/// Risk decision contract, fallback, and markdown formatting.
pub mod decision;

/// Daily trading plan and its deterministic fallback.
pub mod plan;
