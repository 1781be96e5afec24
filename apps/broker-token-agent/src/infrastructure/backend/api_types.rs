//! Backend API request and response types.
//!
//! These types map directly to the backend's REST API format.

use serde::{Deserialize, Serialize};

use crate::application::ports::TokenValidation;
use crate::domain::broker::BrokerCredential;

// ============================================================================
// Request Types
// ============================================================================

/// Body of `POST /auth/refresh`.
#[derive(Serialize)]
pub struct SessionRefreshRequest<'a> {
    /// Current refresh token.
    pub refresh_token: &'a str,
}

/// Body of `POST /api/tokens/refresh/{id}`.
///
/// `request_token` is sent as `null` for an unattended refresh.
#[derive(Debug, Serialize)]
pub struct RequestTokenBody<'a> {
    /// Zerodha request token.
    pub request_token: Option<&'a str>,
}

/// Body of `POST /brokers/upstox/exchange/{id}`.
#[derive(Debug, Serialize)]
pub struct UpstoxCodeBody<'a> {
    /// Upstox authorization code.
    pub code: &'a str,
}

// ============================================================================
// Response Types
// ============================================================================

/// Response of `GET /api/tokens/validate-all`.
#[derive(Debug, Deserialize)]
pub struct ValidateAllResponse {
    /// Per-broker results.
    #[serde(default)]
    pub results: Vec<TokenValidation>,
}

/// Response of `GET /brokers/credentials`: a bare list or a wrapper.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum CredentialsResponse {
    /// `[...]`
    List(Vec<BrokerCredential>),
    /// `{"credentials": [...]}`
    Wrapped {
        /// The credential list.
        credentials: Vec<BrokerCredential>,
    },
}

impl CredentialsResponse {
    /// The credentials, whichever shape arrived.
    pub fn into_inner(self) -> Vec<BrokerCredential> {
        match self {
            Self::List(credentials) | Self::Wrapped { credentials } => credentials,
        }
    }
}

/// Error body of a non-2xx response.
///
/// `detail` may be a string or structured validation output.
#[derive(Debug, Default, Deserialize)]
pub struct ErrorBody {
    /// Human-readable message.
    #[serde(default)]
    pub message: Option<String>,
    /// Alternative message field.
    #[serde(default)]
    pub detail: Option<serde_json::Value>,
}

impl ErrorBody {
    /// `message`, else `detail` (strings verbatim, anything else as JSON).
    pub fn into_message(self) -> Option<String> {
        self.message.filter(|m| !m.is_empty()).or_else(|| {
            self.detail.and_then(|detail| match detail {
                serde_json::Value::Null => None,
                serde_json::Value::String(s) if s.is_empty() => None,
                serde_json::Value::String(s) => Some(s),
                other => Some(other.to_string()),
            })
        })
    }
}
