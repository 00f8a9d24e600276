//! Credential bundle issued by the backend at login.

use secrecy::{ExposeSecret, SecretString};

/// The minimal set of tokens needed to authenticate a request.
///
/// Tokens are held as [`SecretString`] and never printed. Implements `Debug`
/// manually to redact them.
#[derive(Clone)]
pub struct CredentialBundle {
    /// Bearer token attached to every request.
    pub access_token: SecretString,
    /// Refresh token, when the backend issues one.
    pub refresh_token: Option<SecretString>,
}

impl CredentialBundle {
    /// Create a bundle from raw token strings.
    #[must_use]
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
            refresh_token: refresh_token.map(SecretString::from),
        }
    }

    /// Whether `token` is this bundle's access token.
    #[must_use]
    pub fn has_access_token(&self, token: &str) -> bool {
        self.access_token.expose_secret() == token
    }
}

impl std::fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}
