//! OAuth Redirect Interpretation
//!
//! Classifies the landing-page URL a broker sends the user back to and
//! recovers the broker id the login was started for.
//!
//! # Redirect Shapes
//!
//! | Kind | Query | Artifact |
//! |------|-------|----------|
//! | `zerodha-direct` | `status=success&request_token=..&state=..` | `request_token` |
//! | `upstox-callback` | `code=..&state=upstox:<nonce>:<broker_id>` | `code` |
//! | `zerodha-backend-redirect` | `zerodha_auth=success\|error&msg=..` | none |
//!
//! The broker id travels in the provider's `state` parameter, modelled here
//! as [`OAuthState`] with a single `encode`/`decode` pair.

use std::fmt;

use reqwest::Url;
use serde::Serialize;

use super::broker::{BrokerId, Provider};

// =============================================================================
// Constants
// =============================================================================

/// Query parameters consumed by the redirect flow.
///
/// They are stripped from the URL once interpreted so a page refresh cannot
/// replay the exchange.
pub const TRANSIENT_PARAMS: [&str; 6] = [
    "status",
    "request_token",
    "state",
    "code",
    "zerodha_auth",
    "msg",
];

/// Prefix Zerodha logins put in front of the broker id in `state`.
pub const ZERODHA_STATE_PREFIX: &str = "zerodha";

/// Message shown when no broker id can be recovered from a redirect.
pub const UNRESOLVED_BROKER_MESSAGE: &str =
    "Could not determine which broker this login belongs to. Please retry from the broker management page.";

// =============================================================================
// OAuth State
// =============================================================================

/// Typed form of the provider's `state` query parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OAuthState {
    /// `upstox:<nonce>:<broker_id>`
    Upstox {
        /// Per-login random nonce.
        nonce: String,
        /// Broker id from the third segment.
        broker_id: Option<BrokerId>,
    },
    /// `<prefix>:<broker_id>` (Zerodha composite).
    Composite {
        /// First segment, not interpreted.
        prefix: String,
        /// Broker id from the second segment.
        broker_id: Option<BrokerId>,
    },
    /// A bare broker id (Zerodha, no colon).
    Bare(BrokerId),
}

impl OAuthState {
    /// Build the `state` for a new login.
    ///
    /// Upstox logins get a fresh UUID nonce.
    #[must_use]
    pub fn for_login(provider: Provider, broker_id: BrokerId) -> Self {
        match provider {
            Provider::Upstox => Self::Upstox {
                nonce: uuid::Uuid::new_v4().simple().to_string(),
                broker_id: Some(broker_id),
            },
            Provider::Zerodha => Self::Composite {
                prefix: ZERODHA_STATE_PREFIX.to_string(),
                broker_id: Some(broker_id),
            },
        }
    }

    /// Decode a raw `state` value as sent back by `provider`.
    ///
    /// Returns `None` when the value is empty or, for Upstox, lacks the
    /// `upstox:` prefix.
    #[must_use]
    pub fn decode(provider: Provider, raw: &str) -> Option<Self> {
        if raw.is_empty() {
            return None;
        }

        match provider {
            Provider::Upstox => {
                let rest = raw.strip_prefix("upstox:")?;
                let mut segments = rest.split(':');
                let nonce = segments.next().unwrap_or_default().to_string();
                let broker_id = segments.next().and_then(BrokerId::parse);
                Some(Self::Upstox { nonce, broker_id })
            }
            Provider::Zerodha => {
                if raw.contains(':') {
                    let mut segments = raw.split(':');
                    let prefix = segments.next().unwrap_or_default().to_string();
                    let broker_id = segments.next().and_then(BrokerId::parse);
                    Some(Self::Composite { prefix, broker_id })
                } else {
                    BrokerId::parse(raw).map(Self::Bare)
                }
            }
        }
    }

    /// Encode back to the wire form.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Upstox { nonce, broker_id } => format!(
                "upstox:{nonce}:{}",
                broker_id.as_ref().map_or("", BrokerId::as_str)
            ),
            Self::Composite { prefix, broker_id } => format!(
                "{prefix}:{}",
                broker_id.as_ref().map_or("", BrokerId::as_str)
            ),
            Self::Bare(broker_id) => broker_id.to_string(),
        }
    }

    /// Broker id carried by this state, if any.
    #[must_use]
    pub const fn broker_id(&self) -> Option<&BrokerId> {
        match self {
            Self::Upstox { broker_id, .. } | Self::Composite { broker_id, .. } => {
                broker_id.as_ref()
            }
            Self::Bare(broker_id) => Some(broker_id),
        }
    }
}

impl fmt::Display for OAuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

// =============================================================================
// Redirect Parameters
// =============================================================================

/// The query parameters the redirect flow reads.
///
/// Empty values are treated as absent; the first occurrence of a key wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedirectParams {
    /// Zerodha login status (`success`).
    pub status: Option<String>,
    /// Zerodha request token.
    pub request_token: Option<String>,
    /// Provider-echoed `state`.
    pub state: Option<String>,
    /// Upstox authorization code.
    pub code: Option<String>,
    /// Outcome of a backend-handled Zerodha login.
    pub zerodha_auth: Option<String>,
    /// Message accompanying `zerodha_auth`.
    pub msg: Option<String>,
}

impl RedirectParams {
    /// Extract the parameters from a URL's query string.
    #[must_use]
    pub fn from_url(url: &Url) -> Self {
        Self::from_pairs(
            url.query_pairs()
                .map(|(k, v)| (k.into_owned(), v.into_owned())),
        )
    }

    /// Extract the parameters from decoded key/value pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut params = Self::default();
        for (key, value) in pairs {
            let value: String = value.into();
            if value.is_empty() {
                continue;
            }
            let slot = match key.as_ref() {
                "status" => &mut params.status,
                "request_token" => &mut params.request_token,
                "state" => &mut params.state,
                "code" => &mut params.code,
                "zerodha_auth" => &mut params.zerodha_auth,
                "msg" => &mut params.msg,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value);
            }
        }
        params
    }

    /// Classify the navigation. The first matching shape wins.
    #[must_use]
    pub fn classify(&self) -> Redirect {
        if self.status.as_deref() == Some("success")
            && let Some(request_token) = &self.request_token
        {
            return Redirect::ZerodhaDirect {
                request_token: request_token.clone(),
                state: self.state.clone(),
            };
        }

        if let (Some(code), Some(state)) = (&self.code, &self.state)
            && state.starts_with("upstox:")
        {
            return Redirect::UpstoxCallback {
                code: code.clone(),
                state: state.clone(),
            };
        }

        let outcome = match self.zerodha_auth.as_deref() {
            Some("success") => Some(BackendAuthOutcome::Success),
            Some("error") => Some(BackendAuthOutcome::Error),
            _ => None,
        };
        if let Some(outcome) = outcome {
            return Redirect::ZerodhaBackendRedirect {
                outcome,
                message: self.msg.clone(),
            };
        }

        Redirect::None
    }
}

// =============================================================================
// Redirect Classification
// =============================================================================

/// Result of a Zerodha login the backend completed itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendAuthOutcome {
    /// Login completed.
    Success,
    /// Login failed; see the accompanying message.
    Error,
}

/// A classified landing-page navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redirect {
    /// Zerodha returned directly to the dashboard with a request token.
    ZerodhaDirect {
        /// Token to exchange.
        request_token: String,
        /// Raw `state`, if echoed.
        state: Option<String>,
    },
    /// Upstox returned with an authorization code.
    UpstoxCallback {
        /// Code to exchange.
        code: String,
        /// Raw `state` (`upstox:` prefixed).
        state: String,
    },
    /// The backend already handled a Zerodha login and reports the outcome.
    ZerodhaBackendRedirect {
        /// Reported outcome.
        outcome: BackendAuthOutcome,
        /// Optional message from the backend.
        message: Option<String>,
    },
    /// Not an OAuth redirect.
    None,
}

/// Discriminant of [`Redirect`] for logging and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RedirectKind {
    /// See [`Redirect::ZerodhaDirect`].
    #[serde(rename = "zerodha-direct")]
    ZerodhaDirect,
    /// See [`Redirect::UpstoxCallback`].
    #[serde(rename = "upstox-callback")]
    UpstoxCallback,
    /// See [`Redirect::ZerodhaBackendRedirect`].
    #[serde(rename = "zerodha-backend-redirect")]
    ZerodhaBackendRedirect,
    /// See [`Redirect::None`].
    #[serde(rename = "none")]
    None,
}

impl RedirectKind {
    /// Kebab-case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ZerodhaDirect => "zerodha-direct",
            Self::UpstoxCallback => "upstox-callback",
            Self::ZerodhaBackendRedirect => "zerodha-backend-redirect",
            Self::None => "none",
        }
    }
}

impl Redirect {
    /// Discriminant of this redirect.
    #[must_use]
    pub const fn kind(&self) -> RedirectKind {
        match self {
            Self::ZerodhaDirect { .. } => RedirectKind::ZerodhaDirect,
            Self::UpstoxCallback { .. } => RedirectKind::UpstoxCallback,
            Self::ZerodhaBackendRedirect { .. } => RedirectKind::ZerodhaBackendRedirect,
            Self::None => RedirectKind::None,
        }
    }

    /// Provider whose token has to be exchanged, if any.
    #[must_use]
    pub const fn exchange_provider(&self) -> Option<Provider> {
        match self {
            Self::ZerodhaDirect { .. } => Some(Provider::Zerodha),
            Self::UpstoxCallback { .. } => Some(Provider::Upstox),
            Self::ZerodhaBackendRedirect { .. } | Self::None => None,
        }
    }
}

// =============================================================================
// Broker Id Resolution
// =============================================================================

/// Resolve the broker id of a direct Zerodha redirect.
///
/// Parsed `state` first, then the id cached before the login started.
#[must_use]
pub fn resolve_zerodha_broker_id(state: Option<&str>, fallback: Option<&str>) -> Option<BrokerId> {
    state
        .and_then(|raw| OAuthState::decode(Provider::Zerodha, raw))
        .and_then(|decoded| decoded.broker_id().cloned())
        .or_else(|| fallback.and_then(BrokerId::parse))
}

/// Resolve the broker id of an Upstox callback: the third `state` segment.
#[must_use]
pub fn resolve_upstox_broker_id(state: &str) -> Option<BrokerId> {
    OAuthState::decode(Provider::Upstox, state).and_then(|decoded| decoded.broker_id().cloned())
}

/// Remove [`TRANSIENT_PARAMS`] from `url`, keeping everything else.
#[must_use]
pub fn clean_url(url: &Url) -> Url {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !TRANSIENT_PARAMS.contains(&key.as_ref()))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    let mut cleaned = url.clone();
    if kept.is_empty() {
        cleaned.set_query(None);
    } else {
        cleaned.query_pairs_mut().clear().extend_pairs(kept.iter());
    }
    cleaned
}

// =============================================================================
// Exchange Result
// =============================================================================

/// Outcome of a token exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TokenExchangeResult {
    /// The backend stored a broker access token.
    Success {
        /// Broker id echoed by the backend.
        broker_id: BrokerId,
    },
    /// The exchange failed.
    Error {
        /// Backend message or a generic fallback.
        message: String,
    },
}

impl TokenExchangeResult {
    /// Whether the exchange succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}
