//! Authenticated user profile.

use serde::{Deserialize, Serialize};

use crate::{Email, UserId};

/// Profile of the logged-in salon user, as returned by `/auth/me` and the
/// login response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Backend user ID.
    pub id: UserId,
    /// Login email.
    pub email: Email,
    /// Display name, if the account has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}
