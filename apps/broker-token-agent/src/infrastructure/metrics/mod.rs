//! Prometheus Metrics Module
//!
//! Exposes agent metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Backend**: REST calls by endpoint and outcome, with latency
//! - **Events**: Published agent events by kind
//! - **Redirects**: Landing-page navigations by classification
//! - **Monitoring**: Brokers with an active token check task
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the callback server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "broker_agent_backend_requests_total",
        "Backend REST calls by endpoint and outcome"
    );
    describe_histogram!(
        "broker_agent_backend_request_seconds",
        "Backend REST call latency"
    );
    describe_counter!(
        "broker_agent_events_total",
        "Agent events published by kind"
    );
    describe_counter!(
        "broker_agent_redirects_total",
        "Landing-page navigations by redirect kind"
    );
    describe_gauge!(
        "broker_agent_monitored_brokers",
        "Brokers with an active token check task"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Backend endpoint label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// `POST /auth/refresh`
    SessionRefresh,
    /// `POST /api/tokens/refresh/{id}` with a request token.
    ZerodhaExchange,
    /// `POST /brokers/upstox/exchange/{id}`
    UpstoxExchange,
    /// `POST /api/tokens/refresh/{id}` without a request token.
    BrokerRefresh,
    /// `GET /api/tokens/status/{id}`
    TokenStatus,
    /// `GET /api/tokens/validate-all`
    ValidateAll,
    /// `GET /brokers/credentials`
    Credentials,
    /// `GET /brokers/balance/{id}`
    Balance,
}

impl Endpoint {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SessionRefresh => "session_refresh",
            Self::ZerodhaExchange => "zerodha_exchange",
            Self::UpstoxExchange => "upstox_exchange",
            Self::BrokerRefresh => "broker_refresh",
            Self::TokenStatus => "token_status",
            Self::ValidateAll => "validate_all",
            Self::Credentials => "credentials",
            Self::Balance => "balance",
        }
    }
}

/// Outcome label of a backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// 2xx with a decodable body.
    Ok,
    /// Non-2xx status.
    HttpError,
    /// Transport failure.
    NetworkError,
    /// Undecodable body.
    DecodeError,
}

impl RequestOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::HttpError => "http_error",
            Self::NetworkError => "network_error",
            Self::DecodeError => "decode_error",
        }
    }
}

/// Record one backend call.
pub fn record_backend_request(endpoint: Endpoint, outcome: RequestOutcome, duration: Duration) {
    counter!(
        "broker_agent_backend_requests_total",
        "endpoint" => endpoint.as_str(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
    histogram!(
        "broker_agent_backend_request_seconds",
        "endpoint" => endpoint.as_str()
    )
    .record(duration.as_secs_f64());
}

/// Record a published agent event.
pub fn record_event(kind: &'static str) {
    counter!("broker_agent_events_total", "kind" => kind).increment(1);
}

/// Record a landing-page navigation.
pub fn record_redirect(kind: &'static str) {
    counter!("broker_agent_redirects_total", "kind" => kind).increment(1);
}

/// Update the monitored broker gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_monitored_brokers(count: usize) {
    gauge!("broker_agent_monitored_brokers").set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================
