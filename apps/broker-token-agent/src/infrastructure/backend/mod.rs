//! Backend REST Adapter
//!
//! [`HttpBackend`] implements [`BackendPort`] over reqwest. Every call but
//! the session refresh carries the stored session access token as a bearer
//! token. There is no retry here; callers own their retry policy.

mod api_types;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;

use self::api_types::{
    CredentialsResponse, ErrorBody, RequestTokenBody, SessionRefreshRequest, UpstoxCodeBody,
    ValidateAllResponse,
};
use crate::application::ports::{
    BackendError, BackendPort, ExchangeResponse, SessionGrant, StoreKey, TokenRefreshResponse,
    TokenStatus, TokenStore, TokenValidation,
};
use crate::domain::broker::{BalanceSnapshot, BrokerCredential, BrokerId, Provider};
use crate::infrastructure::metrics::{self, Endpoint, RequestOutcome};

/// HTTP client for the trading backend.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: Url,
    store: Arc<dyn TokenStore>,
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackend")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl HttpBackend {
    /// Create a client for the backend at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if `base_url` cannot be parsed as a base URL or the
    /// HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        timeout: Duration,
        store: Arc<dyn TokenStore>,
    ) -> Result<Self, BackendError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| BackendError::Network(format!("invalid base URL {base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(BackendError::Network(format!(
                "invalid base URL {base_url}: cannot carry a path"
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            store,
        })
    }

    /// Join path segments onto the base URL.
    ///
    /// Each segment is percent-encoded on its own, so a `/` or `..` inside
    /// a broker id can never leave its segment.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match self.store.get(StoreKey::AccessToken) {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn get(&self, segments: &[&str]) -> RequestBuilder {
        self.authorized(self.client.get(self.url(segments)))
    }

    fn post(&self, segments: &[&str]) -> RequestBuilder {
        self.authorized(self.client.post(self.url(segments)))
    }

    /// Send a request and decode a 2xx JSON body.
    async fn send<T: DeserializeOwned + Send>(
        &self,
        endpoint: Endpoint,
        request: RequestBuilder,
    ) -> Result<T, BackendError> {
        let started = Instant::now();
        let result = Self::execute(request).await;
        let outcome = match &result {
            Ok(_) => RequestOutcome::Ok,
            Err(BackendError::Status { .. }) => RequestOutcome::HttpError,
            Err(BackendError::Network(_)) => RequestOutcome::NetworkError,
            Err(BackendError::Decode(_)) => RequestOutcome::DecodeError,
        };
        metrics::record_backend_request(endpoint, outcome, started.elapsed());

        if let Err(e) = &result {
            tracing::debug!(endpoint = endpoint.as_str(), error = %e, "Backend request failed");
        }
        result
    }

    async fn execute<T: DeserializeOwned + Send>(
        request: RequestBuilder,
    ) -> Result<T, BackendError> {
        let response = request
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;
        let status = response.status();

        let text = response
            .text()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        if status.is_success() {
            let text = if text.trim().is_empty() { "null" } else { &text };
            return serde_json::from_str(text).map_err(|e| BackendError::Decode(e.to_string()));
        }

        let message = serde_json::from_str::<ErrorBody>(&text)
            .ok()
            .and_then(ErrorBody::into_message);
        Err(BackendError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl BackendPort for HttpBackend {
    async fn refresh_session(&self, refresh_token: &str) -> Result<SessionGrant, BackendError> {
        // The access token is what is being replaced; no bearer here.
        let request = self
            .client
            .post(self.url(&["auth", "refresh"]))
            .json(&SessionRefreshRequest { refresh_token });
        self.send(Endpoint::SessionRefresh, request).await
    }

    async fn exchange_token(
        &self,
        provider: Provider,
        broker_id: &BrokerId,
        artifact: &str,
    ) -> Result<ExchangeResponse, BackendError> {
        match provider {
            Provider::Zerodha => {
                let request = self
                    .post(&["api", "tokens", "refresh", broker_id.as_str()])
                    .json(&RequestTokenBody {
                        request_token: Some(artifact),
                    });
                self.send(Endpoint::ZerodhaExchange, request).await
            }
            Provider::Upstox => {
                let request = self
                    .post(&["brokers", "upstox", "exchange", broker_id.as_str()])
                    .json(&UpstoxCodeBody { code: artifact });
                self.send(Endpoint::UpstoxExchange, request).await
            }
        }
    }

    async fn token_status(&self, broker_id: &BrokerId) -> Result<TokenStatus, BackendError> {
        let request = self.get(&["api", "tokens", "status", broker_id.as_str()]);
        self.send(Endpoint::TokenStatus, request).await
    }

    async fn refresh_broker_token(
        &self,
        broker_id: &BrokerId,
    ) -> Result<TokenRefreshResponse, BackendError> {
        let request = self
            .post(&["api", "tokens", "refresh", broker_id.as_str()])
            .json(&RequestTokenBody {
                request_token: None,
            });
        self.send(Endpoint::BrokerRefresh, request).await
    }

    async fn validate_all(&self) -> Result<Vec<TokenValidation>, BackendError> {
        let request = self.get(&["api", "tokens", "validate-all"]);
        let response: ValidateAllResponse = self.send(Endpoint::ValidateAll, request).await?;
        Ok(response.results)
    }

    async fn list_credentials(&self) -> Result<Vec<BrokerCredential>, BackendError> {
        let request = self.get(&["brokers", "credentials"]);
        let response: CredentialsResponse = self.send(Endpoint::Credentials, request).await?;
        Ok(response.into_inner())
    }

    async fn broker_balance(&self, broker_id: &BrokerId) -> Result<BalanceSnapshot, BackendError> {
        let request = self.get(&["brokers", "balance", broker_id.as_str()]);
        self.send(Endpoint::Balance, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::SessionTokens;
    use crate::infrastructure::store::MemoryTokenStore;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend(server: &MockServer, store: Arc<MemoryTokenStore>) -> HttpBackend {
        HttpBackend::new(&format!("{}/", server.uri()), Duration::from_secs(5), store).unwrap()
    }

    fn logged_in() -> Arc<MemoryTokenStore> {
        let store = Arc::new(MemoryTokenStore::new());
        store
            .set_session(&SessionTokens::new("session-access", "session-refresh"))
            .unwrap();
        store
    }

    #[tokio::test]
    async fn zerodha_exchange_posts_request_token_with_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/tokens/refresh/42"))
            .and(header("authorization", "Bearer session-access"))
            .and(body_json(serde_json::json!({"request_token": "abc"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"status": "success", "broker_id": 42})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let response = backend(&server, logged_in())
            .exchange_token(Provider::Zerodha, &BrokerId::new("42"), "abc")
            .await
            .unwrap();
        assert!(response.is_success());
        assert_eq!(response.broker_id, Some(BrokerId::new("42")));
    }

    #[tokio::test]
    async fn upstox_exchange_posts_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/brokers/upstox/exchange/7"))
            .and(body_json(serde_json::json!({"code": "xyz"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "success"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let response = backend(&server, logged_in())
            .exchange_token(Provider::Upstox, &BrokerId::new("7"), "xyz")
            .await
            .unwrap();
        assert!(response.is_success());
    }

    #[tokio::test]
    async fn error_status_carries_detail() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tokens/status/5"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(serde_json::json!({"detail": "Not authenticated"})),
            )
            .mount(&server)
            .await;

        let err = backend(&server, logged_in())
            .token_status(&BrokerId::new("5"))
            .await
            .unwrap_err();
        assert!(err.is_unauthorized());
        assert_eq!(err.backend_message(), Some("Not authenticated"));
    }

    #[tokio::test]
    async fn non_json_success_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/brokers/balance/5"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = backend(&server, logged_in())
            .broker_balance(&BrokerId::new("5"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Decode(_)));
    }

    #[tokio::test]
    async fn unattended_refresh_and_validate_all() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/tokens/refresh/9"))
            .and(body_json(serde_json::json!({"request_token": null})))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"status": "requires_reauth", "message": "Login again"}),
            ))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/tokens/validate-all"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [{"broker_id": 7, "status": "requires_reauth"}]
            })))
            .mount(&server)
            .await;

        let backend = backend(&server, logged_in());
        let refresh = backend
            .refresh_broker_token(&BrokerId::new("9"))
            .await
            .unwrap();
        assert_eq!(refresh.status, "requires_reauth");

        let results = backend.validate_all().await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].requires_reauth());
        assert_eq!(results[0].broker_id.as_str(), "7");
    }

    #[tokio::test]
    async fn session_refresh_sends_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .and(body_json(serde_json::json!({"refresh_token": "session-refresh"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"access_token": "fresh"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let grant = backend(&server, logged_in())
            .refresh_session("session-refresh")
            .await
            .unwrap();
        assert_eq!(grant.access_token, "fresh");
        assert!(grant.refresh_token.is_none());
    }

    #[tokio::test]
    async fn broker_id_stays_inside_its_path_segment() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gateway/brokers/balance/a%2F..%2Fadmin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data_source": "real_zerodha",
                "available_balance": "10"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let backend = HttpBackend::new(
            &format!("{}/gateway/", server.uri()),
            Duration::from_secs(5),
            logged_in(),
        )
        .unwrap();
        backend
            .broker_balance(&BrokerId::new("a/../admin"))
            .await
            .unwrap();
    }

    #[test]
    fn rejects_base_url_without_path() {
        let err = HttpBackend::new(
            "mailto:ops@example.com",
            Duration::from_secs(1),
            Arc::new(MemoryTokenStore::new()),
        )
        .unwrap_err();
        assert!(matches!(err, BackendError::Network(_)));
    }

    #[tokio::test]
    async fn unreachable_backend_is_network_error() {
        let backend = HttpBackend::new(
            "http://127.0.0.1:1",
            Duration::from_secs(1),
            Arc::new(MemoryTokenStore::new()),
        )
        .unwrap();
        let err = backend.list_credentials().await.unwrap_err();
        assert!(matches!(err, BackendError::Network(_)));
    }
}
