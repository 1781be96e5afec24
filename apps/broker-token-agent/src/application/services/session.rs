//! Session Refresher
//!
//! Keeps the agent's own backend session alive by trading the refresh
//! token for a new access token on a fixed interval.
//!
//! A rejected refresh token (401/403) ends the session: both tokens are
//! removed, `SessionExpired` is published and the refresher stops. Any
//! other failure waits for the next tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::application::events::AgentEvent;
use crate::application::ports::{BackendPort, EventPublisher, StoreKey, TokenStore};
use crate::domain::session::SessionTokens;

/// Where the user is sent when the session is gone.
pub const LOGIN_PATH: &str = "/";

/// Result of one refresh tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRefreshOutcome {
    /// New tokens were stored.
    Refreshed,
    /// No refresh token stored; nothing to do.
    Skipped,
    /// Transient failure; retried on the next tick.
    Failed,
    /// The backend rejected the refresh token; the session was cleared.
    Expired,
}

/// Periodic session token refresher.
#[derive(Clone)]
pub struct SessionRefresher {
    backend: Arc<dyn BackendPort>,
    store: Arc<dyn TokenStore>,
    events: Arc<dyn EventPublisher>,
    interval: Duration,
}

impl SessionRefresher {
    /// Create a refresher ticking every `interval`.
    #[must_use]
    pub fn new(
        backend: Arc<dyn BackendPort>,
        store: Arc<dyn TokenStore>,
        events: Arc<dyn EventPublisher>,
        interval: Duration,
    ) -> Self {
        Self {
            backend,
            store,
            events,
            interval,
        }
    }

    /// Run one refresh.
    pub async fn refresh_once(&self) -> SessionRefreshOutcome {
        let Some(refresh_token) = self.store.get(StoreKey::RefreshToken) else {
            tracing::debug!("No refresh token stored, skipping session refresh");
            return SessionRefreshOutcome::Skipped;
        };

        let grant = match self.backend.refresh_session(&refresh_token).await {
            Ok(grant) => grant,
            Err(e) if e.is_unauthorized() => {
                tracing::warn!(error = %e, "Session refresh rejected, clearing session");
                if let Err(e) = self.store.clear_session() {
                    tracing::error!(error = %e, "Failed to clear session tokens");
                }
                self.events.publish(AgentEvent::SessionExpired {
                    login_path: LOGIN_PATH.to_string(),
                });
                return SessionRefreshOutcome::Expired;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Session refresh failed, will retry");
                return SessionRefreshOutcome::Failed;
            }
        };

        if grant.access_token.is_empty() {
            tracing::warn!("Session refresh returned an empty access token");
            return SessionRefreshOutcome::Failed;
        }

        let tokens = SessionTokens::new(
            grant.access_token,
            grant.refresh_token.unwrap_or(refresh_token),
        );
        if let Err(e) = self.store.set_session(&tokens) {
            tracing::error!(error = %e, "Failed to persist refreshed session");
            return SessionRefreshOutcome::Failed;
        }

        tracing::debug!("Session token refreshed");
        self.events.publish(AgentEvent::SessionRefreshed);
        SessionRefreshOutcome::Refreshed
    }

    /// Refresh every interval until cancelled or the session expires.
    ///
    /// The first refresh happens one interval after the call. Expiry is
    /// terminal: the loop returns and is not restarted when a new pair is
    /// stored later, so the agent reports degraded health until it is
    /// restarted with seed tokens.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("Session refresher cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if self.refresh_once().await == SessionRefreshOutcome::Expired {
                        tracing::info!("Session expired, session refresher stopped");
                        break;
                    }
                }
            }
        }
    }
}
