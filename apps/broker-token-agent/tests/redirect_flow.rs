//! Redirect Flow Integration Tests
//!
//! Drives `RedirectHandler` against a mock backend over real HTTP and
//! checks requests sent, events published and the cleaned URL.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use serde_json::json;
use tokio::sync::broadcast;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use broker_token_agent::{
    AgentEvent, BalanceFeed, BrokerId, EventHub, HttpBackend, MemoryTokenStore, Provider,
    Reconciler, RedirectHandler, RedirectKind, SessionTokens, StoreKey, TokenExchangeClient,
    TokenExchangeResult, TokenStore,
};

struct Harness {
    handler: RedirectHandler,
    store: Arc<MemoryTokenStore>,
    events: broadcast::Receiver<AgentEvent>,
}

fn harness(server: &MockServer) -> Harness {
    let store = Arc::new(MemoryTokenStore::new());
    store
        .set_session(&SessionTokens::new("session-access", "session-refresh"))
        .unwrap();

    let backend = Arc::new(
        HttpBackend::new(&server.uri(), Duration::from_secs(5), store.clone()).unwrap(),
    );
    let hub = Arc::new(EventHub::with_defaults());
    let events = hub.subscribe();

    let handler = RedirectHandler::new(
        TokenExchangeClient::new(backend.clone()),
        Reconciler::with_settle_delay(backend, hub.clone(), Duration::from_millis(10)),
        store.clone(),
        hub,
    );

    Harness {
        handler,
        store,
        events,
    }
}

async fn next_event(rx: &mut broadcast::Receiver<AgentEvent>) -> AgentEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event within timeout")
        .expect("hub open")
}

async fn mount_reconcile_endpoints(server: &MockServer, broker_id: &str) {
    Mock::given(method("GET"))
        .and(path("/brokers/credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 42, "broker_name": "zerodha", "has_access_token": true, "is_active": true}
        ])))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/brokers/balance/{broker_id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data_source": "real_zerodha",
            "available_balance": "1500.25"
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn zerodha_direct_redirect_exchanges_and_reconciles() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/tokens/refresh/42"))
        .and(header("authorization", "Bearer session-access"))
        .and(body_json(json!({"request_token": "abc"})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"status": "success", "broker_id": 42})),
        )
        .expect(1)
        .mount(&server)
        .await;
    mount_reconcile_endpoints(&server, "42").await;

    let mut h = harness(&server);
    let url = Url::parse(
        "http://localhost:3000/brokers?status=success&request_token=abc&state=success:42&tab=live",
    )
    .unwrap();

    let outcome = h.handler.handle(&url).await;

    assert_eq!(outcome.kind, RedirectKind::ZerodhaDirect);
    assert_eq!(
        outcome.exchange,
        Some(TokenExchangeResult::Success {
            broker_id: BrokerId::new("42")
        })
    );
    assert_eq!(
        outcome.clean_url.unwrap().as_str(),
        "http://localhost:3000/brokers?tab=live"
    );

    assert_eq!(
        next_event(&mut h.events).await,
        AgentEvent::ExchangeSucceeded {
            provider: Provider::Zerodha,
            broker_id: BrokerId::new("42"),
        }
    );
    let AgentEvent::CredentialsRefreshed { credentials } = next_event(&mut h.events).await else {
        panic!("expected credentials refresh");
    };
    assert_eq!(credentials.len(), 1);
    let AgentEvent::BalanceUpdated { broker_id, feed, .. } = next_event(&mut h.events).await
    else {
        panic!("expected balance update");
    };
    assert_eq!(broker_id.as_str(), "42");
    assert_eq!(feed, BalanceFeed::Live);
}

#[tokio::test]
async fn zerodha_missing_state_falls_back_to_cached_broker() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/tokens/refresh/9"))
        .and(body_json(json!({"request_token": "tok"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "success"})))
        .expect(1)
        .mount(&server)
        .await;
    mount_reconcile_endpoints(&server, "9").await;

    let h = harness(&server);
    h.handler
        .prepare_login(Provider::Zerodha, &BrokerId::new("9"))
        .unwrap();
    assert_eq!(h.store.get(StoreKey::ZerodhaLastBrokerId).as_deref(), Some("9"));

    // No state on the way back; only status and request_token.
    let url = Url::parse("http://localhost:3000/?status=success&request_token=tok").unwrap();
    let outcome = h.handler.handle(&url).await;

    assert_eq!(
        outcome.exchange,
        Some(TokenExchangeResult::Success {
            broker_id: BrokerId::new("9")
        })
    );
    assert!(h.store.get(StoreKey::ZerodhaLastBrokerId).is_none());
}

#[tokio::test]
async fn upstox_callback_posts_code_to_third_state_segment() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/brokers/upstox/exchange/17"))
        .and(body_json(json!({"code": "auth-code"})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"status": "success", "broker_id": "17"})),
        )
        .expect(1)
        .mount(&server)
        .await;
    mount_reconcile_endpoints(&server, "17").await;

    let h = harness(&server);
    let url =
        Url::parse("http://localhost:3000/brokers?code=auth-code&state=upstox:n0nce:17").unwrap();
    let outcome = h.handler.handle(&url).await;

    assert_eq!(outcome.kind, RedirectKind::UpstoxCallback);
    assert!(outcome.exchange.unwrap().is_success());
    assert_eq!(
        outcome.clean_url.unwrap().as_str(),
        "http://localhost:3000/brokers"
    );
}

#[tokio::test]
async fn failed_exchange_surfaces_backend_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/tokens/refresh/42"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"detail": "Token is invalid or has expired"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut h = harness(&server);
    let url =
        Url::parse("http://localhost:3000/?status=success&request_token=stale&state=x:42").unwrap();
    let outcome = h.handler.handle(&url).await;

    let expected = "Token is invalid or has expired".to_string();
    assert_eq!(
        outcome.exchange,
        Some(TokenExchangeResult::Error {
            message: expected.clone()
        })
    );
    assert_eq!(
        next_event(&mut h.events).await,
        AgentEvent::ExchangeFailed {
            provider: Provider::Zerodha,
            broker_id: BrokerId::new("42"),
            message: expected,
        }
    );
}

#[tokio::test]
async fn unresolved_broker_id_makes_no_backend_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "success"})))
        .expect(0)
        .mount(&server)
        .await;

    let mut h = harness(&server);
    let url = Url::parse("http://localhost:3000/?status=success&request_token=abc").unwrap();
    let outcome = h.handler.handle(&url).await;

    assert!(matches!(
        outcome.exchange,
        Some(TokenExchangeResult::Error { .. })
    ));
    assert!(matches!(
        next_event(&mut h.events).await,
        AgentEvent::BrokerIdUnresolved {
            provider: Provider::Zerodha,
            ..
        }
    ));
    // Dropping the server verifies `expect(0)`.
}

#[tokio::test]
async fn path_traversal_in_state_is_unresolved() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "success"})))
        .expect(0)
        .mount(&server)
        .await;

    let mut h = harness(&server);
    let url = Url::parse(
        "http://localhost:3000/?status=success&request_token=abc&state=x:..%2F..%2F..%2Fadmin%2Fdanger",
    )
    .unwrap();
    let outcome = h.handler.handle(&url).await;

    assert_eq!(outcome.kind, RedirectKind::ZerodhaDirect);
    assert!(matches!(
        outcome.exchange,
        Some(TokenExchangeResult::Error { .. })
    ));
    assert!(matches!(
        next_event(&mut h.events).await,
        AgentEvent::BrokerIdUnresolved {
            provider: Provider::Zerodha,
            ..
        }
    ));
    assert_eq!(outcome.clean_url.unwrap().as_str(), "http://localhost:3000/");
}
