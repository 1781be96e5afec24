//! Callback Server Integration Tests
//!
//! Exercises the axum router end to end with a mock backend behind it.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use reqwest::Url;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use broker_token_agent::{
    CallbackState, EventHub, HttpBackend, MemoryTokenStore, MonitorConfig, Reconciler,
    RedirectHandler, SessionTokens, TokenExchangeClient, TokenHealthMonitor, TokenStore, router,
};

fn app(server: &MockServer) -> axum::Router {
    let store = Arc::new(MemoryTokenStore::new());
    store
        .set_session(&SessionTokens::new("session-access", "session-refresh"))
        .unwrap();
    let backend = Arc::new(
        HttpBackend::new(&server.uri(), Duration::from_secs(5), store.clone()).unwrap(),
    );
    let hub = Arc::new(EventHub::with_defaults());

    let handler = RedirectHandler::new(
        TokenExchangeClient::new(backend.clone()),
        Reconciler::with_settle_delay(backend.clone(), hub.clone(), Duration::from_millis(10)),
        store.clone(),
        hub.clone(),
    );
    let monitor = TokenHealthMonitor::new(
        backend,
        hub,
        MonitorConfig::default(),
        CancellationToken::new(),
    );

    router(Arc::new(CallbackState::new(
        Url::parse("https://dash.example.com").unwrap(),
        handler,
        monitor,
        store,
        "0.0.0-test".to_string(),
    )))
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn zerodha_landing_redirects_to_cleaned_url() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/tokens/refresh/42"))
        .and(body_json(json!({"request_token": "abc"})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"status": "success", "broker_id": 42})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let response = app(&server)
        .oneshot(get(
            "/settings/brokers?status=success&request_token=abc&state=success:42&tab=kite",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers()[header::LOCATION],
        "https://dash.example.com/settings/brokers?tab=kite"
    );

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["redirect"], "zerodha-direct");
    assert_eq!(body["exchange"], json!({"status": "success", "broker_id": "42"}));
}

#[tokio::test]
async fn backend_redirect_error_is_cleaned_without_exchange() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let response = app(&server)
        .oneshot(get("/?zerodha_auth=error&msg=User%20denied"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers()[header::LOCATION],
        "https://dash.example.com/"
    );
}

#[tokio::test]
async fn scheme_relative_target_stays_on_public_origin() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let response = app(&server)
        .oneshot(get("//evil.example/phish?zerodha_auth=error&msg=x"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let location = response.headers()[header::LOCATION].to_str().unwrap();
    let location = Url::parse(location).unwrap();
    assert_eq!(location.scheme(), "https");
    assert_eq!(location.host_str(), Some("dash.example.com"));
    assert_eq!(location.path(), "//evil.example/phish");
    assert!(location.query().is_none());
}

#[tokio::test]
async fn liveness_and_health() {
    let server = MockServer::start().await;
    let app = app(&server);

    let live = app.clone().oneshot(get("/healthz")).await.unwrap();
    assert_eq!(live.status(), StatusCode::OK);

    let health = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(health.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(health.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], "0.0.0-test");
    assert_eq!(body["monitors"], json!([]));
}
