//! Agent Configuration Settings
//!
//! Configuration types for the broker token agent, loaded from environment
//! variables. Malformed numbers fall back to their defaults; malformed URLs
//! are errors.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::Url;

use crate::domain::broker::BrokerId;

/// Backend connection settings.
#[derive(Debug, Clone)]
pub struct BackendSettings {
    /// Base URL of the backend REST API.
    pub base_url: Url,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

/// Callback server settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Port of the callback/health HTTP server.
    pub http_port: u16,
    /// Externally visible origin of the callback server; redirect targets
    /// are built against it.
    pub public_url: Url,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            http_port: 3000,
            public_url: default_public_url(),
        }
    }
}

#[allow(clippy::expect_used)]
fn default_public_url() -> Url {
    Url::parse("http://localhost:3000").expect("static URL is valid")
}

/// Timer and retry settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoringSettings {
    /// Interval of the session token refresh.
    pub session_refresh_interval: Duration,
    /// Interval of per-broker token checks.
    pub token_check_interval: Duration,
    /// Interval of the validate-all sweep; `None` disables it.
    pub validate_all_interval: Option<Duration>,
    /// Failed broker refreshes tolerated before reauth is forced.
    pub max_refresh_attempts: u32,
    /// Delay between a token exchange and the follow-up fetches.
    pub reconcile_delay: Duration,
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            session_refresh_interval: Duration::from_secs(300),
            token_check_interval: Duration::from_secs(300),
            validate_all_interval: Some(Duration::from_secs(300)),
            max_refresh_attempts: 3,
            reconcile_delay: Duration::from_millis(1000),
        }
    }
}

/// Session tokens used to seed an empty store.
#[derive(Clone, Default)]
pub struct SessionSeed {
    access_token: Option<String>,
    refresh_token: Option<String>,
}

impl SessionSeed {
    /// Create a seed.
    #[must_use]
    pub const fn new(access_token: Option<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token,
            refresh_token,
        }
    }

    /// Get the access token.
    #[must_use]
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    /// Get the refresh token.
    #[must_use]
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }
}

impl std::fmt::Debug for SessionSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSeed")
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Complete agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Backend connection.
    pub backend: BackendSettings,
    /// Callback server.
    pub server: ServerSettings,
    /// Location of the token store file.
    pub store_path: PathBuf,
    /// Timers and retry budget.
    pub monitoring: MonitoringSettings,
    /// Brokers to monitor from startup, in addition to the credential list.
    pub monitor_brokers: Vec<BrokerId>,
    /// Session tokens for an empty store.
    pub seed: SessionSeed,
}

impl AgentConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `BACKEND_URL` is missing or a URL is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if `BACKEND_URL` is missing or a URL is invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let backend_url = lookup("BACKEND_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("BACKEND_URL".to_string()))?;
        if backend_url.trim().is_empty() {
            return Err(ConfigError::EmptyValue("BACKEND_URL".to_string()));
        }

        let backend = BackendSettings {
            base_url: parse_url("BACKEND_URL", &backend_url)?,
            request_timeout: parse_env_duration_secs(
                &lookup,
                "BROKER_AGENT_REQUEST_TIMEOUT_SECS",
                Duration::from_secs(10),
            ),
        };

        let server = ServerSettings {
            http_port: parse_env_u16(
                &lookup,
                "BROKER_AGENT_HTTP_PORT",
                ServerSettings::default().http_port,
            ),
            public_url: match non_empty(&lookup, "BROKER_AGENT_PUBLIC_URL") {
                Some(raw) => parse_url("BROKER_AGENT_PUBLIC_URL", &raw)?,
                None => ServerSettings::default().public_url,
            },
        };

        let defaults = MonitoringSettings::default();
        let monitoring = MonitoringSettings {
            session_refresh_interval: parse_env_duration_secs(
                &lookup,
                "BROKER_AGENT_SESSION_REFRESH_SECS",
                defaults.session_refresh_interval,
            ),
            token_check_interval: parse_env_duration_secs(
                &lookup,
                "BROKER_AGENT_TOKEN_CHECK_SECS",
                defaults.token_check_interval,
            ),
            validate_all_interval: Some(parse_env_duration_secs(
                &lookup,
                "BROKER_AGENT_VALIDATE_ALL_SECS",
                Duration::from_secs(300),
            ))
            .filter(|d| !d.is_zero()),
            max_refresh_attempts: parse_env_u32(
                &lookup,
                "BROKER_AGENT_MAX_REFRESH_ATTEMPTS",
                defaults.max_refresh_attempts,
            ),
            reconcile_delay: parse_env_duration_millis(
                &lookup,
                "BROKER_AGENT_RECONCILE_DELAY_MS",
                defaults.reconcile_delay,
            ),
        };

        let monitor_brokers = lookup("BROKER_AGENT_MONITOR_BROKERS")
            .map(|raw| raw.split(',').filter_map(|s| BrokerId::parse(s.trim())).collect())
            .unwrap_or_default();

        Ok(Self {
            backend,
            server,
            store_path: non_empty(&lookup, "BROKER_AGENT_STORE_PATH")
                .map_or_else(|| PathBuf::from(".broker-agent/tokens.json"), PathBuf::from),
            monitoring,
            monitor_brokers,
            seed: SessionSeed::new(
                non_empty(&lookup, "BROKER_AGENT_ACCESS_TOKEN"),
                non_empty(&lookup, "BROKER_AGENT_REFRESH_TOKEN"),
            ),
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable is not a valid URL.
    #[error("environment variable {key} is not a valid URL: {reason}")]
    InvalidUrl {
        /// Variable name.
        key: String,
        /// Parser message.
        reason: String,
    },
}

fn parse_url(key: &str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw.trim()).map_err(|e| ConfigError::InvalidUrl {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key).filter(|v| !v.trim().is_empty())
}

fn parse_env_u16(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u16) -> u16 {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_env_u32(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u32) -> u32 {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
