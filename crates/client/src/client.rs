//! Process-wide client wiring.

use std::sync::Arc;

use tracing::info;

use crate::config::ClientConfig;
use crate::context::shop::SelectedShop;
use crate::error::Result;
use crate::events::EventChannel;
use crate::gateway::{GatewayConfig, HttpGateway, ReqwestTransport, Transport};
use crate::session::{SessionConfig, SessionManager};
use crate::storage::{FileStore, KeyValueStore};
use crate::token_store::TokenStore;

/// The salon client: one instance per process, created at startup and handed
/// to every consumer.
///
/// This struct is cheaply cloneable via `Arc`; clones share the same session,
/// cache and event channel.
#[derive(Clone)]
pub struct SalonClient {
    inner: Arc<SalonClientInner>,
}

struct SalonClientInner {
    config: ClientConfig,
    events: Arc<EventChannel>,
    tokens: TokenStore,
    gateway: Arc<HttpGateway>,
    session: Arc<SessionManager>,
    selected_shop: SelectedShop,
}

impl SalonClient {
    /// Assemble a client from its ports.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the cache thresholds are inconsistent.
    pub fn new(
        config: ClientConfig,
        store: Arc<dyn KeyValueStore>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        config.context.validate()?;

        let events = Arc::new(EventChannel::new());
        let tokens = TokenStore::new(store);
        let gateway = Arc::new(HttpGateway::new(
            GatewayConfig {
                base_url: config.base_url.clone(),
                timeout: config.request_timeout,
                context_required_code: config.context_required_code.clone(),
            },
            transport,
            tokens.clone(),
            Arc::clone(&events),
        ));
        let session = SessionManager::new(
            Arc::clone(&gateway),
            tokens.clone(),
            Arc::clone(&events),
            SessionConfig {
                logout_quiet_period: config.logout_quiet_period,
                validate_on_restore: config.validate_on_restore,
            },
        );
        let selected_shop = SelectedShop::new(Arc::clone(&gateway), tokens.clone(), config.context);
        selected_shop.bind(&events);

        Ok(Self {
            inner: Arc::new(SalonClientInner {
                config,
                events,
                tokens,
                gateway,
                session,
                selected_shop,
            }),
        })
    }

    /// Build a client with the file store under `data_dir` and a `reqwest`
    /// transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is inconsistent or the HTTP
    /// client cannot be built.
    pub fn from_config(config: ClientConfig) -> Result<Self> {
        let store = Arc::new(FileStore::new(config.store_path()));
        let transport = Arc::new(ReqwestTransport::new()?);
        info!(
            base_url = %config.base_url,
            store = %config.store_path().display(),
            "salon client initialized"
        );
        Self::new(config, store, transport)
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Session state machine.
    #[must_use]
    pub fn session(&self) -> &SessionManager {
        &self.inner.session
    }

    /// Selected-shop cache.
    #[must_use]
    pub fn selected_shop(&self) -> &SelectedShop {
        &self.inner.selected_shop
    }

    /// Event channel for `session-cleared` and `context-required`.
    #[must_use]
    pub fn events(&self) -> &EventChannel {
        &self.inner.events
    }

    /// Gateway for backend calls outside the session core.
    #[must_use]
    pub fn gateway(&self) -> &HttpGateway {
        &self.inner.gateway
    }

    /// Persisted credentials.
    #[must_use]
    pub fn tokens(&self) -> &TokenStore {
        &self.inner.tokens
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use reqwest::StatusCode;
    use salon_core::{Email, ShopId};
    use secrecy::SecretString;
    use serde_json::json;
    use url::Url;

    use super::*;
    use crate::context::{Freshness, GetOptions};
    use crate::events::{Event, Topic};
    use crate::gateway::{GatewayError, HttpResponse};
    use crate::session::SessionState;
    use crate::testutil::{FlakyStore, ScriptedTransport};

    fn client(transport: &Arc<ScriptedTransport>, store: &Arc<FlakyStore>) -> SalonClient {
        let config = ClientConfig::new(Url::parse("http://backend.test/api").unwrap());
        SalonClient::new(config, store.clone(), transport.clone()).unwrap()
    }

    async fn login(client: &SalonClient, transport: &ScriptedTransport) {
        transport.push(
            "/auth/login",
            HttpResponse::json(
                StatusCode::OK,
                &json!({
                    "access_token": "tok-1",
                    "user": {"id": 1, "email": "owner@salon.example"}
                }),
            ),
        );
        client
            .session()
            .login(
                &Email::parse("owner@salon.example").unwrap(),
                &SecretString::from("hunter2"),
            )
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_then_no_selected_shop() {
        let transport = Arc::new(ScriptedTransport::new());
        let store = Arc::new(FlakyStore::new());
        let client = client(&transport, &store);

        login(&client, &transport).await;
        assert!(client.session().session().is_authenticated());
        assert!(client.tokens().get().await.unwrap().has_access_token("tok-1"));

        transport.push("/shops/selected", HttpResponse::empty(StatusCode::NOT_FOUND));
        let shop = client
            .selected_shop()
            .current(GetOptions::default())
            .await
            .unwrap();

        assert_eq!(shop, None);
        let snapshot = client.selected_shop().snapshot();
        assert_eq!(snapshot.value, None);
        assert_eq!(snapshot.age, Some(Duration::ZERO));
        assert_eq!(
            transport.requests()[1].bearer.as_deref(),
            Some("tok-1")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_401s_logs_out_once() {
        let transport = Arc::new(ScriptedTransport::new());
        let store = Arc::new(FlakyStore::new());
        let client = client(&transport, &store);
        login(&client, &transport).await;
        transport.push(
            "/shops/selected",
            HttpResponse::json(StatusCode::OK, &json!({"id": 4, "name": "Downtown"})),
        );
        client.selected_shop().select(ShopId::new(4)).await.unwrap();

        let cleared = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&cleared);
        client.events().subscribe(Topic::SessionCleared, move |_| {
            *counter.lock().unwrap() += 1;
            Ok(())
        });

        for delay in [0, 50, 150] {
            transport.push_delayed(
                "/appointments",
                Duration::from_millis(delay),
                HttpResponse::empty(StatusCode::UNAUTHORIZED),
            );
        }
        transport.always("/auth/logout", HttpResponse::empty(StatusCode::NO_CONTENT));

        let gateway = client.gateway();
        let (a, b, c) = tokio::join!(
            gateway.get::<serde_json::Value>("appointments"),
            gateway.get::<serde_json::Value>("appointments"),
            gateway.get::<serde_json::Value>("appointments"),
        );
        for result in [a, b, c] {
            assert!(matches!(result, Err(GatewayError::AuthFailure { .. })));
        }

        assert_eq!(client.session().session(), SessionState::LoggedOut);
        assert!(client.tokens().get().await.is_none());
        assert_eq!(client.selected_shop().snapshot().freshness, Freshness::Empty);
        assert_eq!(*cleared.lock().unwrap(), 1);
        assert_eq!(store.removals(), 1);
    }

    #[tokio::test]
    async fn test_context_required_reaches_subscribers() {
        let transport = Arc::new(ScriptedTransport::new());
        let store = Arc::new(FlakyStore::new());
        let client = client(&transport, &store);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        client.events().subscribe(Topic::ContextRequired, move |event| {
            sink.lock().unwrap().push(event.clone());
            Ok(())
        });

        transport.push(
            "/appointments",
            HttpResponse::json(
                StatusCode::BAD_REQUEST,
                &json!({"code": "shop_not_selected", "message": "Select a shop"}),
            ),
        );
        let err = client
            .gateway()
            .get::<serde_json::Value>("appointments")
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::ContextRequired { .. }));
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert!(matches!(
            seen.lock().unwrap()[0],
            Event::ContextRequired { .. }
        ));
    }
}
