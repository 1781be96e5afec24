//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the token lifecycle services and the port interfaces
//! through which they reach the backend, the token store and the UI.

/// Events published to UI subscribers.
pub mod events;

/// Port interfaces for external systems (backend REST, token store, events).
pub mod ports;

/// Redirect handling, token exchange, reconciliation and token monitoring.
pub mod services;
