//! Token Exchange Client
//!
//! One backend call per OAuth artifact. Never retries: an artifact is
//! single-use, so a second attempt would only produce a confusing error.

use std::sync::Arc;

use crate::application::ports::BackendPort;
use crate::domain::broker::{BrokerId, Provider};
use crate::domain::oauth::TokenExchangeResult;

/// Message used when the backend gives no reason for a failed exchange.
pub const EXCHANGE_FAILED_MESSAGE: &str = "Token exchange failed";

/// Exchanges provider authorization artifacts for broker access tokens.
#[derive(Clone)]
pub struct TokenExchangeClient {
    backend: Arc<dyn BackendPort>,
}

impl TokenExchangeClient {
    /// Create a new exchange client.
    #[must_use]
    pub fn new(backend: Arc<dyn BackendPort>) -> Self {
        Self { backend }
    }

    /// Exchange `artifact` (a Zerodha `request_token` or an Upstox `code`).
    ///
    /// Transport failures and non-success bodies both end up as
    /// [`TokenExchangeResult::Error`] carrying the backend's message when
    /// there is one.
    pub async fn exchange(
        &self,
        provider: Provider,
        broker_id: &BrokerId,
        artifact: &str,
    ) -> TokenExchangeResult {
        tracing::debug!(
            provider = %provider,
            broker_id = %broker_id,
            artifact = provider.artifact_field(),
            "Exchanging authorization artifact"
        );
        match self.backend.exchange_token(provider, broker_id, artifact).await {
            Ok(response) if response.is_success() => {
                let confirmed = response.broker_id.unwrap_or_else(|| broker_id.clone());
                tracing::info!(provider = %provider, broker_id = %confirmed, "Broker token exchanged");
                TokenExchangeResult::Success {
                    broker_id: confirmed,
                }
            }
            Ok(response) => {
                let message = response
                    .failure_message()
                    .unwrap_or(EXCHANGE_FAILED_MESSAGE)
                    .to_string();
                tracing::warn!(
                    provider = %provider,
                    broker_id = %broker_id,
                    status = %response.status,
                    message = %message,
                    "Token exchange rejected"
                );
                TokenExchangeResult::Error { message }
            }
            Err(e) => {
                tracing::warn!(provider = %provider, broker_id = %broker_id, error = %e, "Token exchange request failed");
                TokenExchangeResult::Error {
                    message: e
                        .backend_message()
                        .unwrap_or(EXCHANGE_FAILED_MESSAGE)
                        .to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{BackendError, ExchangeResponse, MockBackendPort};

    fn client(backend: MockBackendPort) -> TokenExchangeClient {
        TokenExchangeClient::new(Arc::new(backend))
    }

    #[tokio::test]
    async fn success_uses_backend_echoed_id() {
        let mut backend = MockBackendPort::new();
        backend
            .expect_exchange_token()
            .withf(|provider, id, artifact| {
                *provider == Provider::Zerodha && id.as_str() == "42" && artifact == "abc"
            })
            .times(1)
            .returning(|_, _, _| {
                Ok(ExchangeResponse {
                    status: "success".to_string(),
                    broker_id: Some(BrokerId::new("42")),
                    ..ExchangeResponse::default()
                })
            });

        let result = client(backend)
            .exchange(Provider::Zerodha, &BrokerId::new("42"), "abc")
            .await;
        assert_eq!(
            result,
            TokenExchangeResult::Success {
                broker_id: BrokerId::new("42")
            }
        );
    }

    #[tokio::test]
    async fn success_without_echo_keeps_requested_id() {
        let mut backend = MockBackendPort::new();
        backend.expect_exchange_token().returning(|_, _, _| {
            Ok(ExchangeResponse {
                status: "success".to_string(),
                ..ExchangeResponse::default()
            })
        });

        let result = client(backend)
            .exchange(Provider::Upstox, &BrokerId::new("7"), "code")
            .await;
        assert_eq!(
            result,
            TokenExchangeResult::Success {
                broker_id: BrokerId::new("7")
            }
        );
    }

    #[tokio::test]
    async fn rejected_body_carries_backend_message() {
        let mut backend = MockBackendPort::new();
        backend.expect_exchange_token().returning(|_, _, _| {
            Ok(ExchangeResponse {
                status: "error".to_string(),
                detail: Some("Invalid request token".to_string()),
                ..ExchangeResponse::default()
            })
        });

        let result = client(backend)
            .exchange(Provider::Zerodha, &BrokerId::new("42"), "abc")
            .await;
        assert_eq!(
            result,
            TokenExchangeResult::Error {
                message: "Invalid request token".to_string()
            }
        );
    }

    #[tokio::test]
    async fn http_error_without_message_uses_fallback() {
        let mut backend = MockBackendPort::new();
        backend.expect_exchange_token().returning(|_, _, _| {
            Err(BackendError::Status {
                status: 500,
                message: None,
            })
        });

        let result = client(backend)
            .exchange(Provider::Zerodha, &BrokerId::new("42"), "abc")
            .await;
        assert_eq!(
            result,
            TokenExchangeResult::Error {
                message: EXCHANGE_FAILED_MESSAGE.to_string()
            }
        );
    }

    #[tokio::test]
    async fn http_error_with_message_is_surfaced() {
        let mut backend = MockBackendPort::new();
        backend.expect_exchange_token().returning(|_, _, _| {
            Err(BackendError::Status {
                status: 400,
                message: Some("Token already used".to_string()),
            })
        });

        let result = client(backend)
            .exchange(Provider::Upstox, &BrokerId::new("9"), "code")
            .await;
        assert_eq!(
            result,
            TokenExchangeResult::Error {
                message: "Token already used".to_string()
            }
        );
    }
}
