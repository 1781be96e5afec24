//! Token Health Monitor
//!
//! Periodically checks broker tokens and escalates expired ones: first a
//! bounded number of unattended refreshes, then a reauth request to the
//! user.
//!
//! # Tasks
//!
//! Each monitored broker gets its own tokio task driven by an interval
//! timer. Restarting a broker cancels the previous task first, so there is
//! never more than one timer per broker id. Every task carries a generation
//! number; results of a request that was in flight when its task was
//! replaced or stopped are discarded.
//!
//! # Retry Counter
//!
//! Failed refreshes are counted per broker and survive stop/start. Only
//! [`TokenHealthMonitor::reset_retry_counter`] clears the count, which the
//! agent does after a fresh exchange for that broker.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::application::events::AgentEvent;
use crate::application::ports::{BackendPort, EventPublisher};
use crate::domain::broker::BrokerId;
use crate::domain::monitoring::{
    DEFAULT_MAX_REFRESH_ATTEMPTS, MAX_ATTEMPTS_MESSAGE, MonitorState, ReauthReason,
    RefreshDecision, RefreshOutcome, RetryBudget,
};

/// Shortest accepted check interval.
pub const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(1);

// =============================================================================
// Configuration
// =============================================================================

/// Monitor configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Default interval between token checks.
    pub check_interval: Duration,
    /// Failed refreshes tolerated before reauth is forced.
    pub max_refresh_attempts: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(300),
            max_refresh_attempts: DEFAULT_MAX_REFRESH_ATTEMPTS,
        }
    }
}

/// Point-in-time view of one broker, for health output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitorSnapshot {
    /// Broker id.
    pub broker_id: BrokerId,
    /// Current state.
    #[serde(flatten)]
    pub state: MonitorState,
    /// Failed refreshes since the last reset.
    pub failed_attempts: u32,
    /// Whether a check task is running.
    pub active: bool,
    /// Check interval of the running task.
    pub interval_secs: Option<u64>,
}

// =============================================================================
// Per-Broker Records
// =============================================================================

struct CheckTask {
    generation: u64,
    cancel: CancellationToken,
    interval: Duration,
}

#[derive(Default)]
struct BrokerRecord {
    state: MonitorState,
    failed_attempts: u32,
    task: Option<CheckTask>,
}

struct MonitorInner {
    backend: Arc<dyn BackendPort>,
    events: Arc<dyn EventPublisher>,
    config: MonitorConfig,
    budget: RetryBudget,
    brokers: Mutex<HashMap<BrokerId, BrokerRecord>>,
    next_generation: AtomicU64,
    shutdown: CancellationToken,
}

// =============================================================================
// Monitor
// =============================================================================

/// Per-broker token health monitor.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct TokenHealthMonitor {
    inner: Arc<MonitorInner>,
}

impl TokenHealthMonitor {
    /// Create a new monitor.
    ///
    /// All check tasks are children of `shutdown`.
    #[must_use]
    pub fn new(
        backend: Arc<dyn BackendPort>,
        events: Arc<dyn EventPublisher>,
        config: MonitorConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                backend,
                events,
                config,
                budget: RetryBudget::new(config.max_refresh_attempts),
                brokers: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
                shutdown,
            }),
        }
    }

    /// Start checking `broker_id` at the configured interval.
    pub fn start_monitoring(&self, broker_id: BrokerId) {
        self.start_monitoring_with_interval(broker_id, self.inner.config.check_interval);
    }

    /// Start checking `broker_id` every `interval`.
    ///
    /// Any running task for the broker is cancelled first. The first check
    /// fires one interval after the call. Intervals below
    /// [`MIN_CHECK_INTERVAL`] are raised to it.
    pub fn start_monitoring_with_interval(&self, broker_id: BrokerId, interval: Duration) {
        let interval = interval.max(MIN_CHECK_INTERVAL);
        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = self.inner.shutdown.child_token();

        {
            let mut brokers = self.inner.brokers.lock();
            let record = brokers.entry(broker_id.clone()).or_default();
            if let Some(previous) = record.task.replace(CheckTask {
                generation,
                cancel: cancel.clone(),
                interval,
            }) {
                previous.cancel.cancel();
                tracing::debug!(broker_id = %broker_id, "Replaced existing token check task");
            }
            record.state = MonitorState::Monitoring;
        }

        tracing::info!(
            broker_id = %broker_id,
            interval_secs = interval.as_secs(),
            "Token monitoring started"
        );

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.run_checks(broker_id, generation, interval, cancel).await;
        });
    }

    /// Stop checking `broker_id`.
    ///
    /// The retry counter is kept. Returns `false` if no task was running.
    pub fn stop_monitoring(&self, broker_id: &BrokerId) -> bool {
        let mut brokers = self.inner.brokers.lock();
        let Some(record) = brokers.get_mut(broker_id) else {
            return false;
        };
        let Some(task) = record.task.take() else {
            return false;
        };
        task.cancel.cancel();
        record.state = MonitorState::Idle;
        drop(brokers);

        tracing::info!(broker_id = %broker_id, "Token monitoring stopped");
        true
    }

    /// Stop every running task.
    pub fn stop_all(&self) {
        let mut brokers = self.inner.brokers.lock();
        for record in brokers.values_mut() {
            if let Some(task) = record.task.take() {
                task.cancel.cancel();
                record.state = MonitorState::Idle;
            }
        }
    }

    /// Brokers with a running check task, sorted.
    #[must_use]
    pub fn active_monitors(&self) -> Vec<BrokerId> {
        let brokers = self.inner.brokers.lock();
        let mut ids: Vec<BrokerId> = brokers
            .iter()
            .filter(|(_, record)| record.task.is_some())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Current state of `broker_id`.
    #[must_use]
    pub fn state(&self, broker_id: &BrokerId) -> MonitorState {
        self.inner.state(broker_id)
    }

    /// Failed refreshes recorded for `broker_id`.
    #[must_use]
    pub fn failed_attempts(&self, broker_id: &BrokerId) -> u32 {
        self.inner.failed_attempts(broker_id)
    }

    /// Every known broker, sorted by id.
    #[must_use]
    pub fn snapshot(&self) -> Vec<MonitorSnapshot> {
        let brokers = self.inner.brokers.lock();
        let mut snapshot: Vec<MonitorSnapshot> = brokers
            .iter()
            .map(|(id, record)| MonitorSnapshot {
                broker_id: id.clone(),
                state: record.state,
                failed_attempts: record.failed_attempts,
                active: record.task.is_some(),
                interval_secs: record.task.as_ref().map(|t| t.interval.as_secs()),
            })
            .collect();
        snapshot.sort_by(|a, b| a.broker_id.cmp(&b.broker_id));
        snapshot
    }

    /// Clear the retry counter of `broker_id`.
    ///
    /// A broker waiting on reauth, or mid-refresh, goes back to
    /// `Monitoring` (or `Idle` when no task runs).
    pub fn reset_retry_counter(&self, broker_id: &BrokerId) {
        let mut brokers = self.inner.brokers.lock();
        let Some(record) = brokers.get_mut(broker_id) else {
            return;
        };
        record.failed_attempts = 0;
        if matches!(
            record.state,
            MonitorState::ReauthRequired | MonitorState::RefreshAttempt(_)
        ) {
            record.state = if record.task.is_some() {
                MonitorState::Monitoring
            } else {
                MonitorState::Idle
            };
        }
        drop(brokers);

        tracing::debug!(broker_id = %broker_id, "Refresh retry counter reset");
    }

    /// Run one check for `broker_id` now, outside its timer.
    ///
    /// Returns the state after the check.
    pub async fn check_now(&self, broker_id: &BrokerId) -> MonitorState {
        self.inner.check_token(broker_id, None).await;
        self.state(broker_id)
    }

    /// Refresh `broker_id` within the retry budget.
    ///
    /// An exhausted budget moves the broker to `ReauthRequired` without
    /// calling the backend.
    pub async fn attempt_token_refresh(&self, broker_id: &BrokerId) -> RefreshOutcome {
        self.inner.refresh_within_budget(broker_id, None).await
    }

    /// Ask the backend to validate every token.
    ///
    /// Each broker reported as `requires_reauth` gets one `NeedReauth`
    /// event; brokers already waiting on reauth are not reported again. No
    /// refresh is attempted. Returns the newly flagged ids.
    pub async fn validate_all_tokens(&self) -> Vec<BrokerId> {
        let results = match self.inner.backend.validate_all().await {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!(error = %e, "Token validation sweep failed");
                return Vec::new();
            }
        };

        let mut flagged = Vec::new();
        for result in results.into_iter().filter(|r| r.requires_reauth()) {
            if self.inner.state(&result.broker_id).requires_reauth() {
                continue;
            }
            self.inner
                .require_reauth(&result.broker_id, ReauthReason::ValidationFlagged);
            flagged.push(result.broker_id);
        }

        tracing::debug!(flagged = flagged.len(), "Token validation sweep complete");
        flagged
    }

    /// Run [`Self::validate_all_tokens`] every `period` until cancelled.
    pub async fn run_validation_sweep(&self, period: Duration, cancel: CancellationToken) {
        let period = period.max(MIN_CHECK_INTERVAL);
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("Validation sweep cancelled");
                    break;
                }
                _ = interval.tick() => {
                    self.validate_all_tokens().await;
                }
            }
        }
    }

    /// Start monitoring every broker that completes an exchange.
    ///
    /// The broker's retry counter is reset first, since the user has just
    /// re-authenticated.
    pub async fn follow_exchanges(
        &self,
        mut events: broadcast::Receiver<AgentEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => break,
                event = events.recv() => event,
            };

            match event {
                Ok(AgentEvent::ExchangeSucceeded { broker_id, .. }) => {
                    self.reset_retry_counter(&broker_id);
                    self.start_monitoring(broker_id);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Exchange follower lagged behind event hub");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

impl MonitorInner {
    async fn run_checks(
        &self,
        broker_id: BrokerId,
        generation: u64,
        period: Duration,
        cancel: CancellationToken,
    ) {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!(broker_id = %broker_id, generation, "Token check task cancelled");
                    break;
                }
                _ = interval.tick() => {
                    self.check_token(&broker_id, Some(generation)).await;
                }
            }
        }
    }

    /// `None` skips the generation check (manual calls).
    fn is_current(&self, broker_id: &BrokerId, generation: Option<u64>) -> bool {
        let Some(generation) = generation else {
            return true;
        };
        self.brokers
            .lock()
            .get(broker_id)
            .and_then(|record| record.task.as_ref())
            .is_some_and(|task| task.generation == generation)
    }

    fn state(&self, broker_id: &BrokerId) -> MonitorState {
        self.brokers
            .lock()
            .get(broker_id)
            .map_or(MonitorState::Idle, |record| record.state)
    }

    fn failed_attempts(&self, broker_id: &BrokerId) -> u32 {
        self.brokers
            .lock()
            .get(broker_id)
            .map_or(0, |record| record.failed_attempts)
    }

    fn set_state(&self, broker_id: &BrokerId, state: MonitorState) {
        self.brokers
            .lock()
            .entry(broker_id.clone())
            .or_default()
            .state = state;
    }

    fn record_failure(&self, broker_id: &BrokerId) -> u32 {
        let mut brokers = self.brokers.lock();
        let record = brokers.entry(broker_id.clone()).or_default();
        record.failed_attempts = record.failed_attempts.saturating_add(1);
        record.failed_attempts
    }

    fn require_reauth(&self, broker_id: &BrokerId, reason: ReauthReason) {
        self.set_state(broker_id, MonitorState::ReauthRequired);
        tracing::warn!(
            broker_id = %broker_id,
            reason = %reason.message(),
            "Broker requires re-authentication"
        );
        self.events.publish(AgentEvent::NeedReauth {
            broker_id: broker_id.clone(),
            reason,
        });
    }

    async fn check_token(&self, broker_id: &BrokerId, generation: Option<u64>) {
        let status = match self.backend.token_status(broker_id).await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(broker_id = %broker_id, error = %e, "Token status check failed");
                return;
            }
        };

        if !self.is_current(broker_id, generation) {
            tracing::debug!(broker_id = %broker_id, "Discarding stale token status");
            return;
        }

        if status.is_valid {
            self.set_state(broker_id, MonitorState::Healthy);
            return;
        }

        if self.state(broker_id).requires_reauth() {
            tracing::debug!(broker_id = %broker_id, "Token still invalid, awaiting reauth");
            return;
        }

        tracing::info!(broker_id = %broker_id, "Broker token expired");
        self.events.publish(AgentEvent::TokenExpired {
            broker_id: broker_id.clone(),
        });
        self.refresh_within_budget(broker_id, generation).await;
    }

    async fn refresh_within_budget(
        &self,
        broker_id: &BrokerId,
        generation: Option<u64>,
    ) -> RefreshOutcome {
        let attempt = match self.budget.decide(self.failed_attempts(broker_id)) {
            RefreshDecision::ForceReauth => {
                self.require_reauth(broker_id, ReauthReason::MaxAttemptsReached);
                return RefreshOutcome::RequiresReauth {
                    message: Some(MAX_ATTEMPTS_MESSAGE.to_string()),
                };
            }
            RefreshDecision::Attempt(attempt) => attempt,
        };

        self.set_state(broker_id, MonitorState::RefreshAttempt(attempt));
        let outcome = match self.backend.refresh_broker_token(broker_id).await {
            Ok(response) => response.outcome(),
            Err(e) => RefreshOutcome::Failed {
                message: e.to_string(),
            },
        };

        if !self.is_current(broker_id, generation) {
            tracing::debug!(broker_id = %broker_id, "Discarding stale refresh result");
            return outcome;
        }

        match &outcome {
            RefreshOutcome::Refreshed => {
                tracing::info!(broker_id = %broker_id, attempt, "Broker token refreshed");
                self.set_state(broker_id, MonitorState::Healthy);
            }
            RefreshOutcome::RequiresReauth { message } => {
                self.require_reauth(broker_id, ReauthReason::BackendRequested(message.clone()));
            }
            RefreshOutcome::Failed { message } => {
                let failed = self.record_failure(broker_id);
                tracing::warn!(
                    broker_id = %broker_id,
                    attempt,
                    failed,
                    max = self.budget.max_attempts(),
                    error = %message,
                    "Broker token refresh failed"
                );
            }
        }
        outcome
    }
}
