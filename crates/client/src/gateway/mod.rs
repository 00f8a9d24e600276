//! Outbound HTTP gateway.
//!
//! Every backend call goes through [`HttpGateway`]. It attaches the stored
//! bearer credential, bounds the call with a timeout, classifies the response
//! and raises the client-wide reactions (auth-failure handling and the
//! `context-required` event) before the caller sees the error.

mod classify;
mod transport;

pub use classify::{Classification, classify};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};

use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use secrecy::SecretString;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::events::{Event, EventChannel};
use crate::token_store::TokenStore;

/// Errors returned by gateway requests.
///
/// `Clone` so a single failed fetch can be handed to every caller waiting on it.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// The backend rejected the credential (401 or 403).
    #[error("authentication failed (HTTP {status})")]
    AuthFailure { status: StatusCode },

    /// The operation needs a selected shop.
    #[error("a shop must be selected: {message}")]
    ContextRequired { message: String },

    /// The requested resource does not exist.
    #[error("not found: {message}")]
    NotFound { message: String },

    /// Any other 4xx/5xx response.
    #[error("backend error (HTTP {status}): {message}")]
    Domain {
        status: StatusCode,
        code: Option<String>,
        message: String,
    },

    /// No response: connection failure or timeout.
    #[error("network error: {0}")]
    Network(String),

    /// A body could not be encoded or decoded.
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl GatewayError {
    /// Whether this error was a 401/403.
    #[must_use]
    pub const fn is_auth_failure(&self) -> bool {
        matches!(self, Self::AuthFailure { .. })
    }
}

/// Reacts to 401/403 responses. Implemented by the session manager.
#[async_trait]
pub trait AuthFailureHandler: Send + Sync {
    /// Called before the failing request returns. `attempted` is the access
    /// token the request carried, if any.
    async fn on_auth_failure(&self, status: StatusCode, attempted: Option<SecretString>);
}

/// Per-request options.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Use this token instead of the stored one
    pub bearer: Option<SecretString>,
    /// Skip the stored credential entirely
    pub anonymous: bool,
    /// Run the auth-failure handler on 401/403
    pub auth_hook: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            bearer: None,
            anonymous: false,
            auth_hook: true,
        }
    }
}

impl RequestOptions {
    /// Options for calls whose 401/403 must not end the session
    /// (login, logout notification, restore validation).
    #[must_use]
    pub fn without_auth_hook() -> Self {
        Self {
            auth_hook: false,
            ..Self::default()
        }
    }

    /// Send with an explicit token.
    #[must_use]
    pub fn with_bearer(mut self, token: SecretString) -> Self {
        self.bearer = Some(token);
        self
    }

    /// Send without any credential.
    #[must_use]
    pub const fn anonymous(mut self) -> Self {
        self.anonymous = true;
        self
    }
}

/// Gateway settings taken from `ClientConfig`.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: Url,
    pub timeout: Duration,
    pub context_required_code: String,
}

/// The single outbound path to the backend.
pub struct HttpGateway {
    config: GatewayConfig,
    transport: Arc<dyn Transport>,
    tokens: TokenStore,
    events: Arc<EventChannel>,
    auth_handler: RwLock<Option<Weak<dyn AuthFailureHandler>>>,
}

impl HttpGateway {
    #[must_use]
    pub fn new(
        config: GatewayConfig,
        transport: Arc<dyn Transport>,
        tokens: TokenStore,
        events: Arc<EventChannel>,
    ) -> Self {
        Self {
            config,
            transport,
            tokens,
            events,
            auth_handler: RwLock::new(None),
        }
    }

    /// Register the auth-failure handler. Held weakly: the handler owns the
    /// gateway, not the other way round.
    pub fn set_auth_failure_handler(&self, handler: Weak<dyn AuthFailureHandler>) {
        match self.auth_handler.write() {
            Ok(mut slot) => *slot = Some(handler),
            Err(poisoned) => *poisoned.into_inner() = Some(handler),
        }
    }

    /// `GET path`, decoding a JSON response.
    ///
    /// # Errors
    ///
    /// Returns the classified `GatewayError` for any non-2xx outcome.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, GatewayError> {
        self.request(Method::GET, path, None::<&()>, RequestOptions::default())
            .await
    }

    /// `POST path` with a JSON body, decoding a JSON response.
    ///
    /// # Errors
    ///
    /// Returns the classified `GatewayError` for any non-2xx outcome.
    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, GatewayError>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        self.request(Method::POST, path, Some(body), RequestOptions::default())
            .await
    }

    /// Send a request and decode the JSON response. An empty 2xx body
    /// decodes as JSON `null`, so `T = ()` accepts `204 No Content`.
    ///
    /// # Errors
    ///
    /// Returns the classified `GatewayError` for any non-2xx outcome, or
    /// `GatewayError::Decode` if the body does not match `T`.
    pub async fn request<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        options: RequestOptions,
    ) -> Result<T, GatewayError>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let body = body
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| GatewayError::Decode(format!("failed to encode request: {e}")))?;

        let response = self.execute(method, path, body, options).await?;

        let bytes: &[u8] = if response.body.is_empty() {
            b"null"
        } else {
            &response.body
        };
        serde_json::from_slice(bytes).map_err(|e| GatewayError::Decode(e.to_string()))
    }

    #[instrument(skip(self, body, options))]
    async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
        options: RequestOptions,
    ) -> Result<HttpResponse, GatewayError> {
        let url = self.resolve(path)?;

        let bearer = if options.anonymous {
            None
        } else if let Some(token) = options.bearer {
            Some(token)
        } else {
            self.tokens.get().await.map(|bundle| bundle.access_token)
        };

        let request = HttpRequest {
            method,
            url,
            bearer: bearer.clone(),
            body,
        };

        let response = tokio::time::timeout(self.config.timeout, self.transport.send(request))
            .await
            .map_err(|_| {
                warn!(timeout = ?self.config.timeout, "request timed out");
                GatewayError::Network(format!(
                    "request timed out after {}s",
                    self.config.timeout.as_secs()
                ))
            })??;

        match classify(&response, &self.config.context_required_code) {
            Classification::Success => {
                debug!(status = %response.status, "request succeeded");
                Ok(response)
            }
            Classification::AuthFailure(status) => {
                warn!(status = %status, "request rejected by backend");
                if options.auth_hook {
                    self.notify_auth_failure(status, bearer).await;
                }
                Err(GatewayError::AuthFailure { status })
            }
            Classification::ContextRequired { message } => {
                debug!(%message, "backend requires a selected shop");
                self.events.publish(&Event::ContextRequired {
                    message: message.clone(),
                });
                Err(GatewayError::ContextRequired { message })
            }
            Classification::NotFound { message } => Err(GatewayError::NotFound { message }),
            Classification::Domain {
                status,
                code,
                message,
            } => {
                debug!(status = %status, code = ?code, "backend returned an error");
                Err(GatewayError::Domain {
                    status,
                    code,
                    message,
                })
            }
        }
    }

    async fn notify_auth_failure(&self, status: StatusCode, attempted: Option<SecretString>) {
        let handler = match self.auth_handler.read() {
            Ok(slot) => slot.as_ref().and_then(Weak::upgrade),
            Err(poisoned) => poisoned.into_inner().as_ref().and_then(Weak::upgrade),
        };
        if let Some(handler) = handler {
            handler.on_auth_failure(status, attempted).await;
        }
    }

    fn resolve(&self, path: &str) -> Result<Url, GatewayError> {
        self.config
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| GatewayError::Decode(format!("invalid request path '{path}': {e}")))
    }
}
