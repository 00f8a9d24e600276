//! Authentication state machine.
//!
//! [`SessionManager`] is the only writer of the session state. It moves
//! between `LoggedOut`, `Authenticating` and `Authenticated`, persists the
//! credential bundle through [`TokenStore`], and ends the session when the
//! gateway reports a 401/403.
//!
//! Ending a session runs in a fixed order: state becomes `LoggedOut`,
//! `session-cleared` is published, storage is cleared, then the backend is
//! told (best effort). A guard flag collapses every logout that arrives
//! within the quiet period into the first one.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use salon_core::{CredentialBundle, Email, User};
use secrecy::{ExposeSecret, SecretString};
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::events::{ClearReason, Event, EventChannel};
use crate::gateway::{AuthFailureHandler, GatewayError, HttpGateway, RequestOptions};
use crate::token_store::TokenStore;

const LOGIN_PATH: &str = "auth/login";
const ME_PATH: &str = "auth/me";
const LOGOUT_PATH: &str = "auth/logout";

/// Errors from session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Another login is still running.
    #[error("a login is already in progress")]
    LoginInProgress,

    /// The backend rejected the email/password.
    #[error("invalid email or password")]
    InvalidCredentials,

    /// Anything else the backend or network reported.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Current authentication state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    LoggedOut,
    Authenticating,
    Authenticated(User),
}

impl SessionState {
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }

    /// The logged-in user, if any.
    #[must_use]
    pub const fn user(&self) -> Option<&User> {
        match self {
            Self::Authenticated(user) => Some(user),
            Self::LoggedOut | Self::Authenticating => None,
        }
    }
}

/// Session settings taken from `ClientConfig`.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// How long the logout guard stays up after a logout starts
    pub logout_quiet_period: Duration,
    /// Validate stored credentials against `/auth/me` on restore
    pub validate_on_restore: bool,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    user: User,
}

enum EndOutcome {
    /// A logout was already running.
    Skipped,
    /// This call ended the session. Carries the token to report to the backend.
    Ended(Option<SecretString>),
}

/// Owner of the session state.
pub struct SessionManager {
    gateway: Arc<HttpGateway>,
    tokens: TokenStore,
    events: Arc<EventChannel>,
    state: watch::Sender<SessionState>,
    logout_guard: Arc<AtomicBool>,
    /// Bumped by every logout and login; a guard reset armed under an older
    /// epoch does nothing.
    guard_epoch: Arc<AtomicU64>,
    config: SessionConfig,
}

impl SessionManager {
    /// Create the session manager and register it as the gateway's
    /// auth-failure handler.
    #[must_use]
    pub fn new(
        gateway: Arc<HttpGateway>,
        tokens: TokenStore,
        events: Arc<EventChannel>,
        config: SessionConfig,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(SessionState::LoggedOut);
        let manager = Arc::new(Self {
            gateway: Arc::clone(&gateway),
            tokens,
            events,
            state,
            logout_guard: Arc::new(AtomicBool::new(false)),
            guard_epoch: Arc::new(AtomicU64::new(0)),
            config,
        });

        let handler: std::sync::Weak<dyn AuthFailureHandler> = Arc::<SessionManager>::downgrade(&manager);
        gateway.set_auth_failure_handler(handler);
        manager
    }

    /// Snapshot of the current state.
    #[must_use]
    pub fn session(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Receiver that observes every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Restore a session from storage.
    ///
    /// Never fails: any problem ends in `LoggedOut` with storage cleared.
    #[instrument(skip(self))]
    pub async fn restore(&self) -> SessionState {
        if !self.claim_authenticating() {
            debug!("login or restore in progress, skipping restore");
            return self.session();
        }

        let Some(bundle) = self.tokens.get().await else {
            debug!("no stored credentials");
            self.state.send_replace(SessionState::LoggedOut);
            return SessionState::LoggedOut;
        };

        if !self.config.validate_on_restore {
            if let Some(user) = self.tokens.user().await {
                info!(user_id = %user.id, "session restored from storage");
                let state = SessionState::Authenticated(user);
                self.state.send_replace(state.clone());
                return state;
            }
            debug!("no stored profile, validating instead");
        }

        let options = RequestOptions::without_auth_hook().with_bearer(bundle.access_token);
        match self
            .gateway
            .request::<(), User>(Method::GET, ME_PATH, None, options)
            .await
        {
            Ok(user) => {
                self.tokens.set_user(&user).await;
                info!(user_id = %user.id, "session restored");
                let state = SessionState::Authenticated(user);
                self.state.send_replace(state.clone());
                state
            }
            Err(e) => {
                warn!(error = %e, "stored session could not be validated, logging out");
                self.state.send_replace(SessionState::LoggedOut);
                self.events.publish(&Event::SessionCleared {
                    reason: ClearReason::AuthFailure,
                });
                self.tokens.clear().await;
                SessionState::LoggedOut
            }
        }
    }

    /// Log in with email and password.
    ///
    /// # Errors
    ///
    /// - `SessionError::LoginInProgress` if another login has not finished
    /// - `SessionError::InvalidCredentials` if the backend answers 401/403
    /// - `SessionError::Gateway` for any other failure
    #[instrument(skip(self, password), fields(email = %email))]
    pub async fn login(&self, email: &Email, password: &SecretString) -> Result<User, SessionError> {
        if !self.claim_authenticating() {
            return Err(SessionError::LoginInProgress);
        }

        let body = LoginRequest {
            email: email.as_str(),
            password: password.expose_secret(),
        };
        let result = self
            .gateway
            .request::<_, LoginResponse>(
                Method::POST,
                LOGIN_PATH,
                Some(&body),
                RequestOptions::without_auth_hook().anonymous(),
            )
            .await;

        match result {
            Ok(response) => {
                let bundle = CredentialBundle::new(response.access_token, response.refresh_token);
                self.tokens.set(&bundle).await;
                self.tokens.set_user(&response.user).await;
                self.guard_epoch.fetch_add(1, Ordering::SeqCst);
                self.logout_guard.store(false, Ordering::SeqCst);
                info!(user_id = %response.user.id, "logged in");
                self.state
                    .send_replace(SessionState::Authenticated(response.user.clone()));
                Ok(response.user)
            }
            Err(e) => {
                self.state.send_replace(SessionState::LoggedOut);
                // A failed login also ends whatever session it was replacing.
                if self.tokens.get().await.is_some() {
                    self.events.publish(&Event::SessionCleared {
                        reason: ClearReason::Logout,
                    });
                    self.tokens.clear().await;
                }
                match e {
                    GatewayError::AuthFailure { status } => {
                        info!(status = %status, "login rejected");
                        Err(SessionError::InvalidCredentials)
                    }
                    other => {
                        warn!(error = %other, "login failed");
                        Err(SessionError::Gateway(other))
                    }
                }
            }
        }
    }

    /// End the session at the user's request and tell the backend.
    ///
    /// Backend failures are logged, never returned.
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        if let EndOutcome::Ended(Some(token)) = self.end_session(ClearReason::Logout).await {
            notify_backend(&self.gateway, token).await;
        }
    }

    /// End the session because the backend rejected it. The backend
    /// notification runs in the background.
    #[instrument(skip(self))]
    pub async fn force_logout(&self) {
        if let EndOutcome::Ended(Some(token)) = self.end_session(ClearReason::AuthFailure).await {
            let gateway = Arc::clone(&self.gateway);
            tokio::spawn(async move { notify_backend(&gateway, token).await });
        }
    }

    /// Move to `Authenticating` unless a login or restore already holds it.
    fn claim_authenticating(&self) -> bool {
        let mut busy = false;
        self.state.send_if_modified(|state| {
            if matches!(state, SessionState::Authenticating) {
                busy = true;
                return false;
            }
            *state = SessionState::Authenticating;
            true
        });
        !busy
    }

    async fn end_session(&self, reason: ClearReason) -> EndOutcome {
        if self.logout_guard.swap(true, Ordering::SeqCst) {
            debug!(?reason, "logout already in progress");
            return EndOutcome::Skipped;
        }
        self.arm_guard_reset();

        let token = self.tokens.get().await.map(|bundle| bundle.access_token);

        self.state.send_replace(SessionState::LoggedOut);
        self.events.publish(&Event::SessionCleared { reason });
        self.tokens.clear().await;
        info!(?reason, "session ended");

        EndOutcome::Ended(token)
    }

    fn arm_guard_reset(&self) {
        let epoch = self.guard_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let current = Arc::clone(&self.guard_epoch);
        let guard = Arc::clone(&self.logout_guard);
        let quiet = self.config.logout_quiet_period;
        tokio::spawn(async move {
            tokio::time::sleep(quiet).await;
            if current.load(Ordering::SeqCst) == epoch {
                guard.store(false, Ordering::SeqCst);
            }
        });
    }
}

#[async_trait]
impl AuthFailureHandler for SessionManager {
    async fn on_auth_failure(&self, status: StatusCode, attempted: Option<SecretString>) {
        let state = self.session();
        if matches!(state, SessionState::Authenticating) {
            debug!(status = %status, "auth failure while authenticating, ignoring");
            return;
        }

        let stored = self.tokens.get().await;
        if let (Some(attempted), Some(stored)) = (&attempted, &stored)
            && !stored.has_access_token(attempted.expose_secret())
        {
            debug!(status = %status, "auth failure for a replaced token, ignoring");
            return;
        }

        // Outside a session only a rejection of the stored credential itself
        // matters: it must not survive until the next restore.
        if !state.is_authenticated() && (attempted.is_none() || stored.is_none()) {
            debug!(status = %status, "auth failure outside an authenticated session, ignoring");
            return;
        }

        warn!(status = %status, "session rejected by backend");
        self.force_logout().await;
    }
}

async fn notify_backend(gateway: &HttpGateway, token: SecretString) {
    let options = RequestOptions::without_auth_hook().with_bearer(token);
    match gateway
        .request::<(), IgnoredAny>(Method::POST, LOGOUT_PATH, None, options)
        .await
    {
        Ok(_) => debug!("backend notified of logout"),
        Err(e) => warn!(error = %e, "logout notification failed"),
    }
}
