#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Broker Token Agent - OAuth Token Lifecycle
//!
//! Handles the broker OAuth landing page (Zerodha, Upstox), exchanges the
//! returned artifact with the trading backend, keeps the agent's session
//! token fresh and watches broker tokens until they need a new login.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and rules
//!   - `broker`: Broker ids, providers, credentials, balance snapshots
//!   - `oauth`: Redirect classification, `state` encoding, URL cleaning
//!   - `monitoring`: Monitor states and the refresh retry budget
//!   - `session`: The session token pair
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Backend, token store and event publisher interfaces
//!   - `services`: Exchange, reconciliation, redirect handling, token
//!     monitoring, session refresh
//!   - `events`: Everything a user interface needs to show
//!
//! - **Infrastructure**: Adapters and process plumbing
//!   - `backend`: reqwest client for the backend REST API
//!   - `store`: In-memory and JSON file token stores
//!   - `broadcast`: Event hub over a tokio broadcast channel
//!   - `callback`: axum landing/health/metrics server
//!   - `config`, `telemetry`, `metrics`
//!
//! # Flow
//!
//! ```text
//! broker login ──► GET /?request_token=..&state=.. ──► RedirectHandler
//!                                                        │ exchange (1 call)
//!                                                        ▼
//!                  303 to cleaned URL ◄──────────── Reconciler (after delay)
//!                                                        │
//! TokenHealthMonitor ◄── ExchangeSucceeded ◄──── EventHub ◄┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Token lifecycle types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::broker::{BalanceFeed, BalanceSnapshot, BrokerCredential, BrokerId, Provider};
pub use domain::monitoring::{MonitorState, RefreshOutcome};
pub use domain::oauth::{OAuthState, RedirectKind, TokenExchangeResult};
pub use domain::session::SessionTokens;

// Application
pub use application::events::AgentEvent;
pub use application::ports::{BackendError, BackendPort, StoreError, StoreKey, TokenStore};
pub use application::services::{
    MonitorConfig, Reconciler, RedirectHandler, RedirectOutcome, SessionRefresher,
    TokenExchangeClient, TokenHealthMonitor,
};

// Infrastructure config
pub use infrastructure::config::{AgentConfig, ConfigError};

// Adapters (for integration tests)
pub use infrastructure::backend::HttpBackend;
pub use infrastructure::broadcast::{EventHub, SharedEventHub};
pub use infrastructure::callback::{CallbackServer, CallbackState, ServerError, router};
pub use infrastructure::store::{FileTokenStore, MemoryTokenStore};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
