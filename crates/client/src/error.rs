//! Unified error type for the client crate.

use thiserror::Error;

use crate::config::ConfigError;
use crate::gateway::GatewayError;
use crate::session::SessionError;

/// Any error the client can return.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration could not be loaded.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// A session operation failed.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// A backend request failed.
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

impl Error {
    /// Whether the error means the session is gone and the user must log in.
    #[must_use]
    pub const fn requires_login(&self) -> bool {
        matches!(
            self,
            Self::Gateway(GatewayError::AuthFailure { .. })
                | Self::Session(
                    SessionError::InvalidCredentials
                        | SessionError::Gateway(GatewayError::AuthFailure { .. })
                )
        )
    }
}

/// Result alias for client operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;

    use super::*;

    #[test]
    fn test_requires_login() {
        let rejected: Error = GatewayError::AuthFailure {
            status: StatusCode::UNAUTHORIZED,
        }
        .into();
        assert!(rejected.requires_login());
        assert!(Error::from(SessionError::InvalidCredentials).requires_login());

        let offline: Error = GatewayError::Network("offline".to_string()).into();
        assert!(!offline.requires_login());
        assert!(!Error::from(SessionError::LoginInProgress).requires_login());
    }
}
