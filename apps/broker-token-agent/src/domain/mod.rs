//! Domain Layer - Broker credential and OAuth token types.
//!
//! This layer contains the pure types and state machines of the token
//! lifecycle: no I/O, no timers, no HTTP.

/// Broker identity, credential records and balance snapshots.
pub mod broker;

/// OAuth redirect interpretation and the typed `state` parameter.
pub mod oauth;

/// Token health monitor states and retry budget.
pub mod monitoring;

/// Session token pair.
pub mod session;
