//! Session commands: login, logout, whoami.

use salon_client::SalonClient;
use salon_core::Email;
use secrecy::SecretString;
use tracing::info;

use super::{CliError, require_login};
use crate::telemetry;

/// Log in and persist the session.
///
/// # Errors
///
/// Returns `CliError::InvalidEmail` for a malformed email, or the session
/// error (invalid credentials, network failure) otherwise.
pub async fn login(client: &SalonClient, email: &str, password: String) -> Result<(), CliError> {
    let email = Email::parse(email)?;
    let password = SecretString::from(password);

    let user = client.session().login(&email, &password).await?;
    telemetry::set_sentry_user(&user.id, Some(user.email.as_str()));

    info!(
        user_id = %user.id,
        email = %user.email,
        "Logged in as {}",
        user.name.as_deref().unwrap_or(user.email.as_str())
    );
    Ok(())
}

/// Log out. Always succeeds locally.
pub async fn logout(client: &SalonClient) {
    if !client.session().session().is_authenticated() {
        info!("Not logged in");
        return;
    }
    client.session().logout().await;
    info!("Logged out");
}

/// Show the logged-in user.
///
/// # Errors
///
/// Returns `CliError::NotLoggedIn` if no session could be restored.
pub fn whoami(client: &SalonClient) -> Result<(), CliError> {
    require_login(client)?;
    if let Some(user) = client.session().session().user() {
        info!(
            user_id = %user.id,
            email = %user.email,
            name = user.name.as_deref().unwrap_or("-"),
            "Logged in"
        );
    }
    Ok(())
}
