//! Broker Types
//!
//! Identity of a linked broker account and the records the backend returns
//! for it: credential rows and balance snapshots.
//!
//! Broker ids are numeric on the backend but travel as strings through
//! URLs and the OAuth `state` parameter, so [`BrokerId`] accepts both on
//! the way in and always renders as a string.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

// =============================================================================
// Broker Id
// =============================================================================

/// Backend identifier of a user's broker link.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct BrokerId(String);

impl BrokerId {
    /// Create a new identifier from a string.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Parse untrusted input such as an OAuth `state` segment.
    ///
    /// Only ASCII letters, digits, `_` and `-` are accepted; anything else,
    /// including empty input, is `None`. Parsed ids are safe to use as a
    /// single URL path segment.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = !raw.is_empty()
            && raw
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        valid.then(|| Self(raw.to_string()))
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BrokerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for BrokerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BrokerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<u64> for BrokerId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl<'de> Deserialize<'de> for BrokerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Unsigned(u64),
            Signed(i64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(s) => Ok(Self(s)),
            Raw::Unsigned(n) => Ok(Self(n.to_string())),
            Raw::Signed(n) => Ok(Self(n.to_string())),
        }
    }
}

// =============================================================================
// Provider
// =============================================================================

/// Broker with an interactive OAuth login flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Zerodha Kite Connect (`request_token` artifact).
    Zerodha,
    /// Upstox (`code` artifact).
    Upstox,
}

impl Provider {
    /// Lowercase provider name as used in URLs and `state` prefixes.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Zerodha => "zerodha",
            Self::Upstox => "upstox",
        }
    }

    /// Name of the authorization artifact field sent to the backend.
    #[must_use]
    pub const fn artifact_field(&self) -> &'static str {
        match self {
            Self::Zerodha => "request_token",
            Self::Upstox => "code",
        }
    }

    /// Parse a provider name case-insensitively.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "zerodha" => Some(Self::Zerodha),
            "upstox" => Some(Self::Upstox),
            _ => None,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Credential
// =============================================================================

/// A user's link to a named broker, as returned by `GET /brokers/credentials`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerCredential {
    /// Backend id of this credential.
    pub id: BrokerId,
    /// Broker name (`zerodha`, `upstox`, ...).
    pub broker_name: String,
    /// Whether a broker access token has been issued.
    #[serde(default)]
    pub has_access_token: bool,
    /// Whether the user must repeat the broker login.
    #[serde(default)]
    pub requires_reauth: bool,
    /// Whether the credential is enabled.
    #[serde(default)]
    pub is_active: bool,
    /// Creation time, when the backend reports it.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl BrokerCredential {
    /// Provider of this credential, if it has an OAuth flow.
    #[must_use]
    pub fn provider(&self) -> Option<Provider> {
        Provider::from_str_case_insensitive(&self.broker_name)
    }

    /// Whether the token monitor should watch this credential.
    #[must_use]
    pub const fn is_monitorable(&self) -> bool {
        self.is_active && self.has_access_token
    }
}

// =============================================================================
// Balance
// =============================================================================

/// Prefix of `data_source` values that come from a live broker feed.
pub const LIVE_DATA_SOURCE_PREFIX: &str = "real_";

/// Balance `status` reported when the broker token has expired.
pub const TOKEN_EXPIRED_STATUS: &str = "token_expired";

/// Balance snapshot from `GET /brokers/balance/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    /// Origin marker; `real_*` means live broker data.
    #[serde(default)]
    pub data_source: String,
    /// Backend status string (`token_expired`, ...).
    #[serde(default)]
    pub status: Option<String>,
    /// Backend-side reauth flag.
    #[serde(default)]
    pub requires_reauth: bool,
    /// Cash available for trading.
    #[serde(default)]
    pub available_balance: Option<Decimal>,
    /// Total account value.
    #[serde(default)]
    pub total_balance: Option<Decimal>,
    /// Margin in use.
    #[serde(default)]
    pub used_margin: Option<Decimal>,
}

/// How a balance snapshot should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceFeed {
    /// Live numbers from the broker.
    Live,
    /// Broker token is gone; the user has to reconnect.
    NeedsReconnect,
    /// Demo or placeholder numbers.
    Placeholder,
}

impl BalanceSnapshot {
    /// Classify the snapshot.
    ///
    /// Expiry signals win over a `real_` data source.
    #[must_use]
    pub fn feed(&self) -> BalanceFeed {
        if self.requires_reauth || self.status.as_deref() == Some(TOKEN_EXPIRED_STATUS) {
            BalanceFeed::NeedsReconnect
        } else if self.data_source.starts_with(LIVE_DATA_SOURCE_PREFIX) {
            BalanceFeed::Live
        } else {
            BalanceFeed::Placeholder
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn broker_id_accepts_number_and_string() {
        let from_number: BrokerId = serde_json::from_str("42").unwrap();
        let from_string: BrokerId = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(from_number, from_string);
        assert_eq!(serde_json::to_string(&from_number).unwrap(), "\"42\"");
    }

    #[test]
    fn broker_id_parse_rejects_blank() {
        assert!(BrokerId::parse("").is_none());
        assert!(BrokerId::parse("   ").is_none());
        assert_eq!(BrokerId::parse("7").unwrap().as_str(), "7");
        assert_eq!(BrokerId::parse("acct_9-b").unwrap().as_str(), "acct_9-b");
    }

    #[test_case("../../admin" ; "dot segments")]
    #[test_case("..%2Fadmin" ; "encoded slash")]
    #[test_case("a/b" ; "slash")]
    #[test_case("4 2" ; "inner space")]
    #[test_case(" 7" ; "leading space")]
    #[test_case("7?x=1" ; "query")]
    #[test_case("7#frag" ; "fragment")]
    #[test_case("\u{0663}" ; "non ascii digit")]
    fn broker_id_parse_rejects_path_unsafe_text(raw: &str) {
        assert!(BrokerId::parse(raw).is_none());
    }

    #[test]
    fn provider_parsing() {
        assert_eq!(
            Provider::from_str_case_insensitive("Zerodha"),
            Some(Provider::Zerodha)
        );
        assert_eq!(
            Provider::from_str_case_insensitive("UPSTOX"),
            Some(Provider::Upstox)
        );
        assert_eq!(Provider::from_str_case_insensitive("alpaca"), None);
        assert_eq!(Provider::Zerodha.artifact_field(), "request_token");
        assert_eq!(Provider::Upstox.artifact_field(), "code");
    }

    #[test]
    fn credential_defaults_missing_flags() {
        let json = r#"{"id": 3, "broker_name": "upstox"}"#;
        let cred: BrokerCredential = serde_json::from_str(json).unwrap();
        assert_eq!(cred.id.as_str(), "3");
        assert!(!cred.has_access_token);
        assert!(!cred.requires_reauth);
        assert!(cred.created_at.is_none());
        assert_eq!(cred.provider(), Some(Provider::Upstox));
        assert!(!cred.is_monitorable());
    }

    #[test]
    fn balance_feed_classification() {
        let mut snapshot: BalanceSnapshot = serde_json::from_str(
            r#"{"data_source": "real_zerodha", "available_balance": 1500.25}"#,
        )
        .unwrap();
        assert_eq!(snapshot.feed(), BalanceFeed::Live);
        assert_eq!(snapshot.available_balance, Some(Decimal::new(150_025, 2)));

        snapshot.data_source = "demo".to_string();
        assert_eq!(snapshot.feed(), BalanceFeed::Placeholder);

        snapshot.status = Some("token_expired".to_string());
        assert_eq!(snapshot.feed(), BalanceFeed::NeedsReconnect);

        snapshot.status = None;
        snapshot.data_source = "real_upstox".to_string();
        snapshot.requires_reauth = true;
        assert_eq!(snapshot.feed(), BalanceFeed::NeedsReconnect);
    }
}
