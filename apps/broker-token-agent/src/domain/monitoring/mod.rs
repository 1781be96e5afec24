//! Token Health Monitoring Types
//!
//! State machine and retry budget for broker token monitoring.
//!
//! # State Machine
//!
//! ```text
//! Idle ──start──► Monitoring ──tick──► Healthy
//!                     │                   │
//!                     └──── invalid ──────┤
//!                                         ▼
//!                              RefreshAttempt(n) ──requires_reauth──► ReauthRequired
//!                                         │                              ▲
//!                                         └── n reached max, next check ─┘
//! ```
//!
//! The retry counter counts failed refreshes that did not explicitly ask for
//! reauth. It is cumulative per broker and only cleared explicitly.

use serde::Serialize;

// =============================================================================
// Constants
// =============================================================================

/// Failed refreshes tolerated before reauth is forced.
pub const DEFAULT_MAX_REFRESH_ATTEMPTS: u32 = 3;

/// Backend status meaning the broker login must be repeated.
pub const REQUIRES_REAUTH_STATUS: &str = "requires_reauth";

/// Backend status of a successful refresh.
pub const SUCCESS_STATUS: &str = "success";

/// Reason reported when the retry budget is exhausted.
pub const MAX_ATTEMPTS_MESSAGE: &str = "Max refresh attempts reached";

// =============================================================================
// Monitor State
// =============================================================================

/// State of one monitored broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", content = "attempt", rename_all = "snake_case")]
pub enum MonitorState {
    /// Not monitored.
    #[default]
    Idle,
    /// Monitored, no check completed yet.
    Monitoring,
    /// Last check found a valid token.
    Healthy,
    /// Refresh attempt `n` is in progress or has failed.
    RefreshAttempt(u32),
    /// The user has to repeat the broker login.
    ReauthRequired,
}

impl MonitorState {
    /// Short name for logs and health output.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Monitoring => "monitoring",
            Self::Healthy => "healthy",
            Self::RefreshAttempt(_) => "refresh_attempt",
            Self::ReauthRequired => "reauth_required",
        }
    }

    /// Whether the broker waits on the user.
    #[must_use]
    pub const fn requires_reauth(&self) -> bool {
        matches!(self, Self::ReauthRequired)
    }
}

// =============================================================================
// Retry Budget
// =============================================================================

/// What to do when a token check finds an invalid token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshDecision {
    /// Call the refresh endpoint; this is attempt `n` (1-based).
    Attempt(u32),
    /// Budget exhausted: skip the call and require reauth.
    ForceReauth,
}

/// Bounded retry policy for broker token refreshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    max_attempts: u32,
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REFRESH_ATTEMPTS)
    }
}

impl RetryBudget {
    /// Create a budget allowing `max_attempts` failed refreshes.
    #[must_use]
    pub const fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    /// Maximum failed refreshes.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decide the next step given the failures recorded so far.
    #[must_use]
    pub const fn decide(&self, failed_attempts: u32) -> RefreshDecision {
        if failed_attempts >= self.max_attempts {
            RefreshDecision::ForceReauth
        } else {
            RefreshDecision::Attempt(failed_attempts + 1)
        }
    }
}

// =============================================================================
// Refresh Outcome
// =============================================================================

/// Interpreted result of one broker token refresh call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Token refreshed.
    Refreshed,
    /// Backend says the login must be repeated.
    RequiresReauth {
        /// Backend message, if any.
        message: Option<String>,
    },
    /// Anything else, including transport errors.
    Failed {
        /// What went wrong.
        message: String,
    },
}

impl RefreshOutcome {
    /// Interpret a 2xx refresh response body.
    #[must_use]
    pub fn from_status(status: &str, message: Option<String>) -> Self {
        match status {
            SUCCESS_STATUS => Self::Refreshed,
            REQUIRES_REAUTH_STATUS => Self::RequiresReauth { message },
            other => Self::Failed {
                message: message.unwrap_or_else(|| format!("refresh returned status {other}")),
            },
        }
    }

    /// Whether this outcome counts against the retry budget.
    #[must_use]
    pub const fn counts_as_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Why a broker was moved to [`MonitorState::ReauthRequired`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "message", rename_all = "snake_case")]
pub enum ReauthReason {
    /// The refresh endpoint answered `requires_reauth`.
    BackendRequested(Option<String>),
    /// The retry budget ran out.
    MaxAttemptsReached,
    /// The validate-all sweep flagged the broker.
    ValidationFlagged,
}

impl ReauthReason {
    /// Human-readable reason.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::BackendRequested(Some(message)) => message.clone(),
            Self::BackendRequested(None) => "Broker requires re-authentication".to_string(),
            Self::MaxAttemptsReached => MAX_ATTEMPTS_MESSAGE.to_string(),
            Self::ValidationFlagged => "Token validation requires re-authentication".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_allows_three_attempts_then_forces_reauth() {
        let budget = RetryBudget::default();
        assert_eq!(budget.max_attempts(), 3);
        assert_eq!(budget.decide(0), RefreshDecision::Attempt(1));
        assert_eq!(budget.decide(1), RefreshDecision::Attempt(2));
        assert_eq!(budget.decide(2), RefreshDecision::Attempt(3));
        assert_eq!(budget.decide(3), RefreshDecision::ForceReauth);
        assert_eq!(budget.decide(10), RefreshDecision::ForceReauth);
    }

    #[test]
    fn zero_budget_always_forces_reauth() {
        assert_eq!(RetryBudget::new(0).decide(0), RefreshDecision::ForceReauth);
    }

    #[test]
    fn refresh_outcome_from_status() {
        assert_eq!(
            RefreshOutcome::from_status("success", None),
            RefreshOutcome::Refreshed
        );
        assert_eq!(
            RefreshOutcome::from_status("requires_reauth", Some("login again".to_string())),
            RefreshOutcome::RequiresReauth {
                message: Some("login again".to_string())
            }
        );
        let failed = RefreshOutcome::from_status("pending", None);
        assert!(failed.counts_as_failure());
        assert!(!RefreshOutcome::Refreshed.counts_as_failure());
        assert!(!RefreshOutcome::RequiresReauth { message: None }.counts_as_failure());
    }

    #[test]
    fn monitor_state_serialization() {
        assert_eq!(
            serde_json::to_value(MonitorState::RefreshAttempt(2)).unwrap(),
            serde_json::json!({"state": "refresh_attempt", "attempt": 2})
        );
        assert_eq!(
            serde_json::to_value(MonitorState::Healthy).unwrap(),
            serde_json::json!({"state": "healthy"})
        );
    }

    #[test]
    fn reauth_reason_messages() {
        assert_eq!(
            ReauthReason::MaxAttemptsReached.message(),
            "Max refresh attempts reached"
        );
        assert_eq!(
            ReauthReason::BackendRequested(Some("expired".to_string())).message(),
            "expired"
        );
    }
}
