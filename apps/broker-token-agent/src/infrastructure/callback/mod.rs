//! Callback and Health Server
//!
//! The HTTP listener a broker redirects the browser to after login, plus
//! the agent's operational endpoints.
//!
//! # Endpoints
//!
//! - `GET /` and `GET /{*path}` - OAuth landing; answers `303 See Other`
//!   to the cleaned URL once a redirect has been handled
//! - `GET /health` - JSON status with the monitor snapshot
//! - `GET /healthz` - liveness check (simple OK)
//! - `GET /metrics` - Prometheus metrics in text format
//! - `GET /oauth/state/{provider}/{broker_id}` - `state` for a new login
//! - `POST /monitor/{broker_id}` - start monitoring a broker
//! - `DELETE /monitor/{broker_id}` - stop monitoring a broker
//! - `POST /monitor/{broker_id}/reset` - clear the refresh retry counter

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::ports::TokenStore;
use crate::application::services::{MonitorSnapshot, RedirectHandler, TokenHealthMonitor};
use crate::domain::broker::{BrokerId, Provider};
use crate::domain::oauth::{RedirectKind, TokenExchangeResult};
use crate::infrastructure::metrics;

// =============================================================================
// Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// "healthy" with a session, "degraded" without one.
    pub status: HealthStatus,
    /// Agent version.
    pub version: String,
    /// Uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Whether a session token pair is stored.
    pub session_present: bool,
    /// Per-broker monitor state.
    pub monitors: Vec<MonitorSnapshot>,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Session present; backend calls are authenticated.
    Healthy,
    /// No session; every backend call will be rejected until login.
    Degraded,
}

/// Body returned from the landing endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CallbackResponse {
    /// Classification of the navigation.
    pub redirect: RedirectKind,
    /// Exchange result, when an exchange was attempted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange: Option<TokenExchangeResult>,
    /// Where the browser is sent next.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Serialize)]
struct LoginState {
    provider: Provider,
    broker_id: BrokerId,
    state: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

// =============================================================================
// Server State
// =============================================================================

/// Shared state of the callback server.
pub struct CallbackState {
    public_url: Url,
    handler: RedirectHandler,
    monitor: TokenHealthMonitor,
    store: Arc<dyn TokenStore>,
    version: String,
    started_at: Instant,
}

impl CallbackState {
    /// Create server state.
    ///
    /// `public_url` is the origin the browser sees; landing URLs are
    /// rebuilt against it.
    #[must_use]
    pub fn new(
        public_url: Url,
        handler: RedirectHandler,
        monitor: TokenHealthMonitor,
        store: Arc<dyn TokenStore>,
        version: String,
    ) -> Self {
        Self {
            public_url,
            handler,
            monitor,
            store,
            version,
            started_at: Instant::now(),
        }
    }

    fn health(&self) -> HealthResponse {
        let session_present = self.store.session().is_some();
        HealthResponse {
            status: if session_present {
                HealthStatus::Healthy
            } else {
                HealthStatus::Degraded
            },
            version: self.version.clone(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            current_time: Utc::now(),
            session_present,
            monitors: self.monitor.snapshot(),
        }
    }
}

/// Build the router over `state`.
pub fn router(state: Arc<CallbackState>) -> Router {
    Router::new()
        .route("/", get(callback_handler))
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/metrics", get(metrics_handler))
        .route("/oauth/state/{provider}/{broker_id}", get(login_state_handler))
        .route(
            "/monitor/{broker_id}",
            post(start_monitor_handler).delete(stop_monitor_handler),
        )
        .route("/monitor/{broker_id}/reset", post(reset_monitor_handler))
        .route("/{*path}", get(callback_handler))
        .with_state(state)
}

// =============================================================================
// Server
// =============================================================================

/// Callback HTTP server.
pub struct CallbackServer {
    port: u16,
    state: Arc<CallbackState>,
    cancel: CancellationToken,
}

impl CallbackServer {
    /// Create a new callback server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<CallbackState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ServerError` if binding fails or the server stops with a
    /// fatal error.
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(
            port = self.port,
            public_url = %self.state.public_url,
            "Callback server listening"
        );

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| ServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Callback server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

/// The browser-visible URL for a request target.
///
/// Only path and query come from the request; scheme, host and port are
/// always those of `public_url`, so a `//host/...` target stays on it.
fn landing_url(public_url: &Url, uri: &Uri) -> Url {
    let mut url = public_url.clone();
    url.set_path(uri.path());
    url.set_query(uri.query());
    url.set_fragment(None);
    url
}

async fn callback_handler(State(state): State<Arc<CallbackState>>, uri: Uri) -> Response {
    let url = landing_url(&state.public_url, &uri);
    let outcome = state.handler.handle(&url).await;
    metrics::record_redirect(outcome.kind.as_str());

    let body = CallbackResponse {
        redirect: outcome.kind,
        exchange: outcome.exchange,
        location: outcome.clean_url.as_ref().map(ToString::to_string),
    };

    let Some(location) = body
        .location
        .as_deref()
        .and_then(|l| HeaderValue::from_str(l).ok())
    else {
        return (StatusCode::OK, Json(body)).into_response();
    };

    tracing::info!(
        redirect = outcome.kind.as_str(),
        location = body.location.as_deref().unwrap_or_default(),
        "Redirect handled"
    );
    (StatusCode::SEE_OTHER, [(header::LOCATION, location)], Json(body)).into_response()
}

async fn health_handler(State(state): State<Arc<CallbackState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.health()))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn metrics_handler(State(state): State<Arc<CallbackState>>) -> impl IntoResponse {
    metrics::set_monitored_brokers(state.monitor.active_monitors().len());

    metrics::get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

async fn login_state_handler(
    State(state): State<Arc<CallbackState>>,
    Path((provider, broker_id)): Path<(String, String)>,
) -> Response {
    let Some(provider) = Provider::from_str_case_insensitive(&provider) else {
        return error_response(StatusCode::NOT_FOUND, format!("unknown provider: {provider}"));
    };
    let Some(broker_id) = BrokerId::parse(&broker_id) else {
        return error_response(StatusCode::BAD_REQUEST, "broker id is required");
    };

    match state.handler.prepare_login(provider, &broker_id) {
        Ok(encoded) => Json(LoginState {
            provider,
            broker_id,
            state: encoded,
        })
        .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to prepare login state");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn start_monitor_handler(
    State(state): State<Arc<CallbackState>>,
    Path(broker_id): Path<String>,
) -> Response {
    let Some(broker_id) = BrokerId::parse(&broker_id) else {
        return error_response(StatusCode::BAD_REQUEST, "broker id is required");
    };
    state.monitor.start_monitoring(broker_id.clone());
    monitor_view(&state, &broker_id)
}

async fn stop_monitor_handler(
    State(state): State<Arc<CallbackState>>,
    Path(broker_id): Path<String>,
) -> Response {
    let broker_id = BrokerId::new(broker_id);
    if state.monitor.stop_monitoring(&broker_id) {
        monitor_view(&state, &broker_id)
    } else {
        error_response(StatusCode::NOT_FOUND, "broker is not monitored")
    }
}

async fn reset_monitor_handler(
    State(state): State<Arc<CallbackState>>,
    Path(broker_id): Path<String>,
) -> Response {
    let broker_id = BrokerId::new(broker_id);
    state.monitor.reset_retry_counter(&broker_id);
    monitor_view(&state, &broker_id)
}

fn monitor_view(state: &CallbackState, broker_id: &BrokerId) -> Response {
    state
        .monitor
        .snapshot()
        .into_iter()
        .find(|s| &s.broker_id == broker_id)
        .map_or_else(
            || error_response(StatusCode::NOT_FOUND, "broker is not monitored"),
            |snapshot| Json(snapshot).into_response(),
        )
}

// =============================================================================
// Errors
// =============================================================================

/// Callback server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
