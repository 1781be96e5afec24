//! Redirect Handler
//!
//! Runs one landing-page navigation through classification, broker id
//! resolution, token exchange and reconciliation.

use std::sync::Arc;

use reqwest::Url;

use super::exchange::TokenExchangeClient;
use super::reconciler::Reconciler;
use crate::application::events::AgentEvent;
use crate::application::ports::{EventPublisher, StoreError, StoreKey, TokenStore};
use crate::domain::broker::{BrokerId, Provider};
use crate::domain::oauth::{
    BackendAuthOutcome, OAuthState, Redirect, RedirectKind, RedirectParams,
    TokenExchangeResult, UNRESOLVED_BROKER_MESSAGE, clean_url, resolve_upstox_broker_id,
    resolve_zerodha_broker_id,
};

/// What happened to one navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectOutcome {
    /// How the navigation was classified.
    pub kind: RedirectKind,
    /// Exchange result, for redirects that carry an artifact.
    pub exchange: Option<TokenExchangeResult>,
    /// Where the browser should go next; `None` when nothing was consumed.
    pub clean_url: Option<Url>,
}

impl RedirectOutcome {
    fn untouched() -> Self {
        Self {
            kind: RedirectKind::None,
            exchange: None,
            clean_url: None,
        }
    }
}

/// Interprets OAuth redirects and prepares outbound logins.
#[derive(Clone)]
pub struct RedirectHandler {
    exchange: TokenExchangeClient,
    reconciler: Reconciler,
    store: Arc<dyn TokenStore>,
    events: Arc<dyn EventPublisher>,
}

impl RedirectHandler {
    /// Create a new redirect handler.
    #[must_use]
    pub fn new(
        exchange: TokenExchangeClient,
        reconciler: Reconciler,
        store: Arc<dyn TokenStore>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            exchange,
            reconciler,
            store,
            events,
        }
    }

    /// Handle a landing-page URL.
    ///
    /// At most one exchange call is made. The reconciliation it triggers
    /// runs in the background and is not awaited.
    pub async fn handle(&self, url: &Url) -> RedirectOutcome {
        let redirect = RedirectParams::from_url(url).classify();
        let kind = redirect.kind();

        let exchange = match redirect {
            Redirect::None => return RedirectOutcome::untouched(),
            Redirect::ZerodhaDirect {
                request_token,
                state,
            } => {
                let fallback = self.store.get(StoreKey::ZerodhaLastBrokerId);
                let broker_id = resolve_zerodha_broker_id(state.as_deref(), fallback.as_deref());
                Some(
                    self.exchange_and_reconcile(Provider::Zerodha, broker_id, &request_token)
                        .await,
                )
            }
            Redirect::UpstoxCallback { code, state } => {
                let broker_id = resolve_upstox_broker_id(&state);
                Some(
                    self.exchange_and_reconcile(Provider::Upstox, broker_id, &code)
                        .await,
                )
            }
            Redirect::ZerodhaBackendRedirect { outcome, message } => {
                self.handle_backend_redirect(outcome, message);
                None
            }
        };

        RedirectOutcome {
            kind,
            exchange,
            clean_url: Some(clean_url(url)),
        }
    }

    async fn exchange_and_reconcile(
        &self,
        provider: Provider,
        broker_id: Option<BrokerId>,
        artifact: &str,
    ) -> TokenExchangeResult {
        let Some(broker_id) = broker_id else {
            tracing::warn!(provider = %provider, "Redirect carries no resolvable broker id");
            self.events.publish(AgentEvent::BrokerIdUnresolved {
                provider,
                message: UNRESOLVED_BROKER_MESSAGE.to_string(),
            });
            return TokenExchangeResult::Error {
                message: UNRESOLVED_BROKER_MESSAGE.to_string(),
            };
        };

        let result = self.exchange.exchange(provider, &broker_id, artifact).await;
        match &result {
            TokenExchangeResult::Success {
                broker_id: confirmed,
            } => {
                if provider == Provider::Zerodha
                    && let Err(e) = self.store.remove(StoreKey::ZerodhaLastBrokerId)
                {
                    tracing::warn!(error = %e, "Failed to clear cached Zerodha broker id");
                }
                self.events.publish(AgentEvent::ExchangeSucceeded {
                    provider,
                    broker_id: confirmed.clone(),
                });
                self.reconciler.reconcile(Some(confirmed.clone()));
            }
            TokenExchangeResult::Error { message } => {
                self.events.publish(AgentEvent::ExchangeFailed {
                    provider,
                    broker_id,
                    message: message.clone(),
                });
            }
        }
        result
    }

    fn handle_backend_redirect(&self, outcome: BackendAuthOutcome, message: Option<String>) {
        match outcome {
            BackendAuthOutcome::Success => {
                tracing::info!("Backend completed Zerodha login");
                self.reconciler.reconcile(None);
            }
            BackendAuthOutcome::Error => {
                tracing::warn!(message = ?message, "Backend reported failed Zerodha login");
            }
        }
        self.events
            .publish(AgentEvent::BackendRedirect { outcome, message });
    }

    /// Build the `state` for a new broker login.
    ///
    /// Zerodha logins also cache the broker id locally, for providers
    /// that do not echo `state` back intact.
    ///
    /// # Errors
    ///
    /// Returns an error if the cached id cannot be persisted.
    pub fn prepare_login(
        &self,
        provider: Provider,
        broker_id: &BrokerId,
    ) -> Result<String, StoreError> {
        if provider == Provider::Zerodha {
            self.store
                .set(StoreKey::ZerodhaLastBrokerId, broker_id.as_str())?;
        }
        Ok(OAuthState::for_login(provider, broker_id.clone()).encode())
    }
}
