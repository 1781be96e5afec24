//! Broker Token Agent Binary
//!
//! Serves the broker OAuth landing page and runs the token background tasks.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin broker-token-agent
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `BACKEND_URL`: Base URL of the trading backend
//!
//! ## Optional
//! - `BROKER_AGENT_PUBLIC_URL`: Origin the browser sees (default: <http://localhost:3000>)
//! - `BROKER_AGENT_HTTP_PORT`: Callback server port (default: 3000)
//! - `BROKER_AGENT_STORE_PATH`: Token store file (default: .broker-agent/tokens.json)
//! - `BROKER_AGENT_REQUEST_TIMEOUT_SECS`: Backend request timeout (default: 10)
//! - `BROKER_AGENT_SESSION_REFRESH_SECS`: Session refresh interval (default: 300)
//! - `BROKER_AGENT_TOKEN_CHECK_SECS`: Broker token check interval (default: 300)
//! - `BROKER_AGENT_VALIDATE_ALL_SECS`: Validate-all sweep interval, 0 disables (default: 300)
//! - `BROKER_AGENT_MAX_REFRESH_ATTEMPTS`: Refresh failures before reauth (default: 3)
//! - `BROKER_AGENT_RECONCILE_DELAY_MS`: Delay before post-login refetch (default: 1000)
//! - `BROKER_AGENT_MONITOR_BROKERS`: Comma-separated broker ids to monitor
//! - `BROKER_AGENT_ACCESS_TOKEN` / `BROKER_AGENT_REFRESH_TOKEN`: Seed an empty store
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Extra log directives

use std::sync::Arc;

use anyhow::Context;
use broker_token_agent::application::ports::{BackendPort, EventPublisher, TokenStore};
use broker_token_agent::infrastructure::telemetry;
use broker_token_agent::{
    AgentConfig, AgentEvent, CallbackServer, CallbackState, EventHub, FileTokenStore,
    HttpBackend, MonitorConfig, Reconciler, RedirectHandler, SessionRefresher, SessionTokens,
    TokenExchangeClient, TokenHealthMonitor, init_metrics,
};
use tokio::signal;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let telemetry_guard = telemetry::init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        otlp_export = telemetry_guard.is_exporting(),
        "Starting broker token agent"
    );

    let _metrics_handle = init_metrics();

    let config = AgentConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Store, backend, events
    let store: Arc<dyn TokenStore> = Arc::new(
        FileTokenStore::open(&config.store_path).context("failed to open token store")?,
    );
    seed_session(&config, store.as_ref())?;

    let backend: Arc<dyn BackendPort> = Arc::new(
        HttpBackend::new(
            config.backend.base_url.as_str(),
            config.backend.request_timeout,
            Arc::clone(&store),
        )
        .context("failed to build backend client")?,
    );
    let hub = Arc::new(EventHub::with_defaults());
    let events: Arc<dyn EventPublisher> = hub.clone();

    // Services
    let reconciler = Reconciler::with_settle_delay(
        Arc::clone(&backend),
        Arc::clone(&events),
        config.monitoring.reconcile_delay,
    );
    let handler = RedirectHandler::new(
        TokenExchangeClient::new(Arc::clone(&backend)),
        reconciler,
        Arc::clone(&store),
        Arc::clone(&events),
    );
    let monitor = TokenHealthMonitor::new(
        Arc::clone(&backend),
        Arc::clone(&events),
        MonitorConfig {
            check_interval: config.monitoring.token_check_interval,
            max_refresh_attempts: config.monitoring.max_refresh_attempts,
        },
        shutdown_token.clone(),
    );
    let session = SessionRefresher::new(
        Arc::clone(&backend),
        Arc::clone(&store),
        Arc::clone(&events),
        config.monitoring.session_refresh_interval,
    );

    // Background tasks
    tokio::spawn(log_events(hub.subscribe(), shutdown_token.clone()));

    let follower = monitor.clone();
    let exchanges = hub.subscribe();
    let follower_cancel = shutdown_token.clone();
    tokio::spawn(async move {
        follower.follow_exchanges(exchanges, follower_cancel).await;
    });

    let session_cancel = shutdown_token.clone();
    tokio::spawn(async move {
        session.run(session_cancel).await;
    });

    if let Some(period) = config.monitoring.validate_all_interval {
        let sweeper = monitor.clone();
        let sweep_cancel = shutdown_token.clone();
        tokio::spawn(async move {
            sweeper.run_validation_sweep(period, sweep_cancel).await;
        });
    }

    start_initial_monitors(&config, backend.as_ref(), &monitor).await;

    // Callback server
    let state = Arc::new(CallbackState::new(
        config.server.public_url.clone(),
        handler,
        monitor.clone(),
        Arc::clone(&store),
        env!("CARGO_PKG_VERSION").to_string(),
    ));
    let server = CallbackServer::new(config.server.http_port, state, shutdown_token.clone());
    let server_cancel = shutdown_token.clone();
    tokio::spawn(async move {
        if let Err(e) = server.run().await {
            tracing::error!(error = %e, "Callback server error");
            server_cancel.cancel();
        }
    });

    tracing::info!("Broker token agent ready");

    await_shutdown(shutdown_token).await;
    monitor.stop_all();

    tracing::info!("Broker token agent stopped");
    Ok(())
}

/// Write the configured session tokens into an empty store.
fn seed_session(config: &AgentConfig, store: &dyn TokenStore) -> anyhow::Result<()> {
    if store.session().is_some() {
        return Ok(());
    }
    let (Some(access), Some(refresh)) = (config.seed.access_token(), config.seed.refresh_token())
    else {
        tracing::warn!("No session tokens stored; backend calls will be rejected until login");
        return Ok(());
    };

    store
        .set_session(&SessionTokens::new(access, refresh))
        .context("failed to seed session tokens")?;
    tracing::info!("Session tokens seeded from environment");
    Ok(())
}

/// Monitor every broker holding an access token, plus the configured list.
async fn start_initial_monitors(
    config: &AgentConfig,
    backend: &dyn BackendPort,
    monitor: &TokenHealthMonitor,
) {
    let mut broker_ids = config.monitor_brokers.clone();

    match backend.list_credentials().await {
        Ok(credentials) => broker_ids.extend(
            credentials
                .into_iter()
                .filter(|c| c.is_monitorable())
                .map(|c| c.id),
        ),
        Err(e) => tracing::warn!(error = %e, "Could not list broker credentials at startup"),
    }

    broker_ids.sort();
    broker_ids.dedup();
    for broker_id in broker_ids {
        monitor.start_monitoring(broker_id);
    }
}

/// Log every published event until shutdown.
async fn log_events(mut rx: broadcast::Receiver<AgentEvent>, cancel: CancellationToken) {
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            event = rx.recv() => event,
        };

        match event {
            Ok(event) => {
                let payload = serde_json::to_string(&event).unwrap_or_default();
                tracing::info!(
                    event = event.kind(),
                    broker_id = event.broker_id().map_or("", |id| id.as_str()),
                    payload = %payload,
                    "Agent event"
                );
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event logger lagged behind event hub");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &AgentConfig) {
    tracing::info!(
        backend_url = %config.backend.base_url,
        public_url = %config.server.public_url,
        http_port = config.server.http_port,
        store_path = %config.store_path.display(),
        "Configuration loaded"
    );
    tracing::debug!(
        session_refresh_secs = config.monitoring.session_refresh_interval.as_secs(),
        token_check_secs = config.monitoring.token_check_interval.as_secs(),
        validate_all_secs = config.monitoring.validate_all_interval.map(|d| d.as_secs()),
        max_refresh_attempts = config.monitoring.max_refresh_attempts,
        monitor_brokers = config.monitor_brokers.len(),
        "Monitoring settings"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        for dir in cwd.ancestors().skip(1) {
            let env_path = dir.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT), or for a fatal task to
/// cancel the token itself.
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
        () = shutdown_token.cancelled() => {
            tracing::warn!("Shutdown requested by a failed task");
        }
    }

    shutdown_token.cancel();
}
