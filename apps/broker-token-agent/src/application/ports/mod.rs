//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `BackendPort`: REST calls to the trading backend
//! - `TokenStore`: Locally persisted session and OAuth bookkeeping values
//! - `EventPublisher`: Delivery of [`AgentEvent`]s to subscribers

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::application::events::AgentEvent;
use crate::domain::broker::{BalanceSnapshot, BrokerCredential, BrokerId, Provider};
use crate::domain::monitoring::{REQUIRES_REAUTH_STATUS, RefreshOutcome, SUCCESS_STATUS};
use crate::domain::session::SessionTokens;

// =============================================================================
// Backend Port
// =============================================================================

/// Errors from the backend REST API.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// Non-2xx response.
    #[error("backend returned HTTP {status}: {}", message.as_deref().unwrap_or("no message"))]
    Status {
        /// HTTP status code.
        status: u16,
        /// `message` or `detail` from the error body.
        message: Option<String>,
    },

    /// Request never completed (connect, timeout, TLS, ...).
    #[error("network error: {0}")]
    Network(String),

    /// 2xx response whose body could not be decoded.
    #[error("invalid response body: {0}")]
    Decode(String),
}

impl BackendError {
    /// Whether the backend rejected our credentials (401/403).
    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Status { status: 401 | 403, .. })
    }

    /// Message supplied by the backend, if any.
    #[must_use]
    pub fn backend_message(&self) -> Option<&str> {
        match self {
            Self::Status { message, .. } => message.as_deref(),
            Self::Network(_) | Self::Decode(_) => None,
        }
    }
}

/// New session tokens from `POST /auth/refresh`.
#[derive(Clone, Deserialize)]
pub struct SessionGrant {
    /// Fresh access token.
    pub access_token: String,
    /// Rotated refresh token, when the backend rotates it.
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl std::fmt::Debug for SessionGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGrant")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Response of a broker token exchange.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExchangeResponse {
    /// `"success"` or anything else.
    #[serde(default)]
    pub status: String,
    /// Broker id the backend stored the token for.
    #[serde(default)]
    pub broker_id: Option<BrokerId>,
    /// Human-readable message.
    #[serde(default)]
    pub message: Option<String>,
    /// Alternative message field.
    #[serde(default)]
    pub detail: Option<String>,
}

impl ExchangeResponse {
    /// Whether the backend reports success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == SUCCESS_STATUS
    }

    /// `message`, else `detail`.
    #[must_use]
    pub fn failure_message(&self) -> Option<&str> {
        self.message.as_deref().or(self.detail.as_deref())
    }
}

/// Response of `GET /api/tokens/status/{id}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenStatus {
    /// Whether the broker token is currently usable.
    #[serde(default)]
    pub is_valid: bool,
    /// Optional status string.
    #[serde(default)]
    pub status: Option<String>,
}

/// Response of a broker token refresh (`POST /api/tokens/refresh/{id}`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenRefreshResponse {
    /// `"success"`, `"requires_reauth"` or anything else.
    #[serde(default)]
    pub status: String,
    /// Human-readable message.
    #[serde(default)]
    pub message: Option<String>,
    /// Alternative message field.
    #[serde(default)]
    pub detail: Option<String>,
}

impl TokenRefreshResponse {
    /// Interpret the response.
    #[must_use]
    pub fn outcome(&self) -> RefreshOutcome {
        RefreshOutcome::from_status(
            &self.status,
            self.message.clone().or_else(|| self.detail.clone()),
        )
    }
}

/// One entry of `GET /api/tokens/validate-all`.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenValidation {
    /// Broker the entry is about.
    pub broker_id: BrokerId,
    /// Validation status.
    #[serde(default)]
    pub status: String,
}

impl TokenValidation {
    /// Whether the broker needs to be reconnected.
    #[must_use]
    pub fn requires_reauth(&self) -> bool {
        self.status == REQUIRES_REAUTH_STATUS
    }
}

/// Port for the trading backend's REST API.
///
/// Implementations authenticate with the stored session access token.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BackendPort: Send + Sync {
    /// Exchange a refresh token for a new session access token.
    async fn refresh_session(&self, refresh_token: &str) -> Result<SessionGrant, BackendError>;

    /// Exchange a provider authorization artifact for a broker access token.
    async fn exchange_token(
        &self,
        provider: Provider,
        broker_id: &BrokerId,
        artifact: &str,
    ) -> Result<ExchangeResponse, BackendError>;

    /// Check whether a broker token is valid.
    async fn token_status(&self, broker_id: &BrokerId) -> Result<TokenStatus, BackendError>;

    /// Ask the backend to refresh a broker token without user interaction.
    async fn refresh_broker_token(
        &self,
        broker_id: &BrokerId,
    ) -> Result<TokenRefreshResponse, BackendError>;

    /// Validate every broker token of the user.
    async fn validate_all(&self) -> Result<Vec<TokenValidation>, BackendError>;

    /// List the user's broker credentials.
    async fn list_credentials(&self) -> Result<Vec<BrokerCredential>, BackendError>;

    /// Fetch the balance snapshot of one broker.
    async fn broker_balance(&self, broker_id: &BrokerId) -> Result<BalanceSnapshot, BackendError>;
}

// =============================================================================
// Token Store Port
// =============================================================================

/// Keys of the locally persisted values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKey {
    /// Session access token.
    AccessToken,
    /// Session refresh token.
    RefreshToken,
    /// Broker id cached before a Zerodha login redirect.
    ZerodhaLastBrokerId,
}

impl StoreKey {
    /// Persisted key name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AccessToken => "access_token",
            Self::RefreshToken => "refresh_token",
            Self::ZerodhaLastBrokerId => "zerodha_last_broker_id",
        }
    }
}

/// Token store errors.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed.
    #[error("token store I/O error: {0}")]
    Io(String),

    /// The backing file could not be encoded or decoded as JSON.
    #[error("token store serialization error: {0}")]
    Serialize(String),
}

/// Process-wide key/value store for session tokens and OAuth bookkeeping.
///
/// Reads and writes are synchronous. Writers of the session must use
/// [`TokenStore::set_session`] so the access/refresh pair is never torn.
pub trait TokenStore: Send + Sync {
    /// Read a value.
    fn get(&self, key: StoreKey) -> Option<String>;

    /// Write a value.
    fn set(&self, key: StoreKey, value: &str) -> Result<(), StoreError>;

    /// Delete a value.
    fn remove(&self, key: StoreKey) -> Result<(), StoreError>;

    /// Write the access and refresh token in one operation.
    fn set_session(&self, tokens: &SessionTokens) -> Result<(), StoreError>;

    /// Delete the access and refresh token in one operation.
    fn clear_session(&self) -> Result<(), StoreError>;

    /// Current session, when both tokens are present.
    fn session(&self) -> Option<SessionTokens> {
        let access = self.get(StoreKey::AccessToken)?;
        let refresh = self.get(StoreKey::RefreshToken)?;
        Some(SessionTokens::new(access, refresh))
    }
}

// =============================================================================
// Event Port
// =============================================================================

/// Sink for user-visible events.
pub trait EventPublisher: Send + Sync {
    /// Publish an event. Never blocks and never fails.
    fn publish(&self, event: AgentEvent);
}
