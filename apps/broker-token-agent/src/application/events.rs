//! Agent Events
//!
//! Everything the user should see is published as an [`AgentEvent`] instead
//! of being pushed into a specific UI. Subscribers (a dashboard, a logger,
//! the monitor itself) receive them from the event hub.

use serde::Serialize;

use crate::domain::broker::{BalanceFeed, BalanceSnapshot, BrokerCredential, BrokerId, Provider};
use crate::domain::monitoring::ReauthReason;
use crate::domain::oauth::BackendAuthOutcome;

/// A user-visible outcome of the token lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A broker token exchange succeeded.
    ExchangeSucceeded {
        /// Provider of the login.
        provider: Provider,
        /// Broker id confirmed by the backend.
        broker_id: BrokerId,
    },
    /// A broker token exchange failed.
    ExchangeFailed {
        /// Provider of the login.
        provider: Provider,
        /// Broker id the exchange was attempted for.
        broker_id: BrokerId,
        /// Backend message or fallback.
        message: String,
    },
    /// A redirect arrived but no broker id could be recovered.
    BrokerIdUnresolved {
        /// Provider of the login.
        provider: Provider,
        /// Instruction for the user.
        message: String,
    },
    /// The backend finished a Zerodha login itself.
    BackendRedirect {
        /// Reported outcome.
        outcome: BackendAuthOutcome,
        /// Backend message, if any.
        message: Option<String>,
    },
    /// The credential list was refetched.
    CredentialsRefreshed {
        /// Current credentials.
        credentials: Vec<BrokerCredential>,
    },
    /// A balance snapshot was refetched.
    BalanceUpdated {
        /// Broker the snapshot belongs to.
        broker_id: BrokerId,
        /// How the snapshot should be shown.
        feed: BalanceFeed,
        /// The snapshot itself.
        snapshot: BalanceSnapshot,
    },
    /// Balance data shows the broker connection must be re-established.
    ReconnectRequired {
        /// Affected broker.
        broker_id: BrokerId,
    },
    /// A monitored broker token was found invalid.
    TokenExpired {
        /// Affected broker.
        broker_id: BrokerId,
    },
    /// The user must repeat the broker login.
    NeedReauth {
        /// Affected broker.
        broker_id: BrokerId,
        /// Why.
        #[serde(flatten)]
        reason: ReauthReason,
    },
    /// The session access token was refreshed.
    SessionRefreshed,
    /// The session is gone; the user must log in again.
    ///
    /// Published once. The session refresher stops afterwards and stays
    /// stopped until the agent restarts.
    SessionExpired {
        /// Where to send the user.
        login_path: String,
    },
}

impl AgentEvent {
    /// Short event name for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ExchangeSucceeded { .. } => "exchange_succeeded",
            Self::ExchangeFailed { .. } => "exchange_failed",
            Self::BrokerIdUnresolved { .. } => "broker_id_unresolved",
            Self::BackendRedirect { .. } => "backend_redirect",
            Self::CredentialsRefreshed { .. } => "credentials_refreshed",
            Self::BalanceUpdated { .. } => "balance_updated",
            Self::ReconnectRequired { .. } => "reconnect_required",
            Self::TokenExpired { .. } => "token_expired",
            Self::NeedReauth { .. } => "need_reauth",
            Self::SessionRefreshed => "session_refreshed",
            Self::SessionExpired { .. } => "session_expired",
        }
    }

    /// Broker the event concerns, if any.
    #[must_use]
    pub const fn broker_id(&self) -> Option<&BrokerId> {
        match self {
            Self::ExchangeSucceeded { broker_id, .. }
            | Self::ExchangeFailed { broker_id, .. }
            | Self::BalanceUpdated { broker_id, .. }
            | Self::ReconnectRequired { broker_id }
            | Self::TokenExpired { broker_id }
            | Self::NeedReauth { broker_id, .. } => Some(broker_id),
            Self::BrokerIdUnresolved { .. }
            | Self::BackendRedirect { .. }
            | Self::CredentialsRefreshed { .. }
            | Self::SessionRefreshed
            | Self::SessionExpired { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn need_reauth_serializes_flat_reason() {
        let event = AgentEvent::NeedReauth {
            broker_id: BrokerId::new("7"),
            reason: ReauthReason::MaxAttemptsReached,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({
                "type": "need_reauth",
                "broker_id": "7",
                "reason": "max_attempts_reached"
            })
        );
        assert_eq!(event.kind(), "need_reauth");
        assert_eq!(event.broker_id().unwrap().as_str(), "7");
    }

    #[test]
    fn session_expired_carries_login_path() {
        let event = AgentEvent::SessionExpired {
            login_path: "/".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({"type": "session_expired", "login_path": "/"})
        );
        assert!(event.broker_id().is_none());
    }
}
