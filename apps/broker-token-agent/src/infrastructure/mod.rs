//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the application ports, plus the process
//! plumbing around them.

/// reqwest adapter for the trading backend.
pub mod backend;

/// Broadcast channel adapter for agent events.
pub mod broadcast;

/// OAuth landing page, health and metrics HTTP server.
pub mod callback;

/// Environment configuration.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Token store adapters.
pub mod store;

/// Tracing subscriber and OpenTelemetry integration.
pub mod telemetry;
