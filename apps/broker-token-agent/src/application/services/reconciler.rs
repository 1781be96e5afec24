//! Credential and Balance Reconciler
//!
//! After a token exchange the backend needs a moment before new credentials
//! and balances are readable. The reconciler waits out that settle delay in
//! a background task, then refetches and publishes the results.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::application::events::AgentEvent;
use crate::application::ports::{BackendPort, EventPublisher};
use crate::domain::broker::{BalanceFeed, BrokerId};

/// Delay between an exchange and the follow-up fetches.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(1000);

/// Refetches credentials and balances and publishes what it finds.
#[derive(Clone)]
pub struct Reconciler {
    backend: Arc<dyn BackendPort>,
    events: Arc<dyn EventPublisher>,
    settle_delay: Duration,
}

impl Reconciler {
    /// Create a reconciler with the default settle delay.
    #[must_use]
    pub fn new(backend: Arc<dyn BackendPort>, events: Arc<dyn EventPublisher>) -> Self {
        Self::with_settle_delay(backend, events, DEFAULT_SETTLE_DELAY)
    }

    /// Create a reconciler with a custom settle delay.
    #[must_use]
    pub fn with_settle_delay(
        backend: Arc<dyn BackendPort>,
        events: Arc<dyn EventPublisher>,
        settle_delay: Duration,
    ) -> Self {
        Self {
            backend,
            events,
            settle_delay,
        }
    }

    /// Schedule a reconciliation after the settle delay.
    ///
    /// Returns immediately; the caller may await the handle in tests.
    pub fn reconcile(&self, broker_id: Option<BrokerId>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(this.settle_delay).await;
            this.reconcile_now(broker_id.as_ref()).await;
        })
    }

    /// Refetch the credential list and, when given, one broker's balance.
    ///
    /// Failures are logged and otherwise ignored.
    pub async fn reconcile_now(&self, broker_id: Option<&BrokerId>) {
        self.refresh_credentials().await;
        if let Some(id) = broker_id {
            self.refresh_balance(id).await;
        }
    }

    async fn refresh_credentials(&self) {
        match self.backend.list_credentials().await {
            Ok(credentials) => {
                tracing::debug!(count = credentials.len(), "Broker credentials refreshed");
                self.events
                    .publish(AgentEvent::CredentialsRefreshed { credentials });
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to refresh broker credentials");
            }
        }
    }

    async fn refresh_balance(&self, broker_id: &BrokerId) {
        match self.backend.broker_balance(broker_id).await {
            Ok(snapshot) => {
                let feed = snapshot.feed();
                tracing::debug!(
                    broker_id = %broker_id,
                    data_source = %snapshot.data_source,
                    ?feed,
                    "Broker balance refreshed"
                );
                self.events.publish(AgentEvent::BalanceUpdated {
                    broker_id: broker_id.clone(),
                    feed,
                    snapshot,
                });
                if feed == BalanceFeed::NeedsReconnect {
                    tracing::info!(broker_id = %broker_id, "Balance reports an expired broker token");
                    self.events.publish(AgentEvent::ReconnectRequired {
                        broker_id: broker_id.clone(),
                    });
                }
            }
            Err(e) => {
                tracing::warn!(broker_id = %broker_id, error = %e, "Failed to refresh broker balance");
            }
        }
    }
}
