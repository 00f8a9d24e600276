//! CLI command implementations.

pub mod session;
pub mod shop;

use salon_client::{ClientConfig, SalonClient, SessionState, Topic};
use salon_core::EmailError;
use thiserror::Error;

use crate::telemetry;

/// Errors that can occur while running a command.
#[derive(Debug, Error)]
pub enum CliError {
    /// The client failed.
    #[error(transparent)]
    Client(#[from] salon_client::Error),

    /// The command needs a logged-in session.
    #[error("Not logged in")]
    NotLoggedIn,

    /// The email argument is not an email address.
    #[error("Invalid email: {0}")]
    InvalidEmail(#[from] EmailError),
}

impl CliError {
    /// Whether the fix is to run `salon login`.
    #[must_use]
    pub const fn requires_login(&self) -> bool {
        match self {
            Self::Client(e) => e.requires_login(),
            Self::NotLoggedIn => true,
            Self::InvalidEmail(_) => false,
        }
    }
}

impl From<salon_client::SessionError> for CliError {
    fn from(e: salon_client::SessionError) -> Self {
        Self::Client(e.into())
    }
}

impl From<salon_client::GatewayError> for CliError {
    fn from(e: salon_client::GatewayError) -> Self {
        Self::Client(e.into())
    }
}

/// Build the client from the environment and restore any stored session.
///
/// # Errors
///
/// Returns `CliError::Client` if configuration is missing or invalid.
pub async fn connect() -> Result<SalonClient, CliError> {
    let config = ClientConfig::from_env().map_err(salon_client::Error::from)?;
    let client = SalonClient::from_config(config)?;

    client.events().subscribe(Topic::SessionCleared, |_| {
        telemetry::clear_sentry_user();
        Ok(())
    });
    client.events().subscribe(Topic::ContextRequired, |event| {
        tracing::warn!(?event, "No shop selected. Run `salon shop select <id>`.");
        Ok(())
    });

    if let SessionState::Authenticated(user) = client.session().restore().await {
        telemetry::set_sentry_user(&user.id, Some(user.email.as_str()));
    }

    Ok(client)
}

/// Fail unless the restored session is authenticated.
fn require_login(client: &SalonClient) -> Result<(), CliError> {
    if client.session().session().is_authenticated() {
        Ok(())
    } else {
        Err(CliError::NotLoggedIn)
    }
}

#[cfg(test)]
mod tests {
    use salon_client::{GatewayError, SessionError};

    use super::*;

    #[test]
    fn test_login_hint() {
        assert!(CliError::NotLoggedIn.requires_login());
        assert!(CliError::from(SessionError::InvalidCredentials).requires_login());
        assert!(!CliError::from(GatewayError::Network("offline".to_string())).requires_login());
        assert!(!CliError::from(EmailError::Empty).requires_login());
    }
}
