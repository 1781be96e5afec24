//! Session Tokens
//!
//! The primary (non-broker) session is an access/refresh token pair. The
//! pair is always persisted together; see `TokenStore::set_session`.

/// Access and refresh token of the dashboard session.
///
/// The `Debug` implementation redacts both tokens for safe logging.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionTokens {
    access_token: String,
    refresh_token: String,
}

impl SessionTokens {
    /// Create a token pair.
    #[must_use]
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }

    /// Get the access token.
    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Get the refresh token.
    #[must_use]
    pub fn refresh_token(&self) -> &str {
        &self.refresh_token
    }
}

impl std::fmt::Debug for SessionTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTokens")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .finish()
    }
}
