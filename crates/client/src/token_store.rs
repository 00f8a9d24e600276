//! Persisted session credentials.
//!
//! [`TokenStore`] is the only component that reads or writes the session's
//! storage keys. It never propagates storage failures: a store that cannot be
//! read behaves like an empty one, so the client degrades to logged-out
//! instead of crashing.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use salon_core::{CredentialBundle, User};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, warn};

use crate::context::ContextSlot;
use crate::storage::KeyValueStore;

/// Storage keys owned by the token store.
pub mod keys {
    /// Serialized credential bundle.
    pub const CREDENTIALS: &str = "session.credentials";

    /// Serialized user profile of the logged-in user.
    pub const USER: &str = "session.user";

    /// Serialized selected-shop cache slot.
    pub const SELECTED_CONTEXT: &str = "context.selected_shop";

    /// Every key cleared on logout.
    pub const ALL: [&str; 3] = [CREDENTIALS, USER, SELECTED_CONTEXT];
}

/// On-disk form of [`CredentialBundle`].
#[derive(Serialize, Deserialize)]
struct StoredCredentials {
    access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
}

impl From<&CredentialBundle> for StoredCredentials {
    fn from(bundle: &CredentialBundle) -> Self {
        Self {
            access_token: bundle.access_token.expose_secret().to_string(),
            refresh_token: bundle
                .refresh_token
                .as_ref()
                .map(|t| t.expose_secret().to_string()),
        }
    }
}

impl From<StoredCredentials> for CredentialBundle {
    fn from(stored: StoredCredentials) -> Self {
        Self::new(stored.access_token, stored.refresh_token)
    }
}

/// A cached context value together with the wall-clock time it was fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedContext<T> {
    pub value: T,
    pub fetched_at: DateTime<Utc>,
}

/// Durable storage for the credential bundle and the state derived from it.
///
/// Cheap to clone; clones share the same backing store.
#[derive(Clone)]
pub struct TokenStore {
    store: Arc<dyn KeyValueStore>,
}

impl TokenStore {
    /// Create a token store over a key-value backend.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Read the stored credential bundle.
    pub async fn get(&self) -> Option<CredentialBundle> {
        self.read_json::<StoredCredentials>(keys::CREDENTIALS)
            .await
            .map(CredentialBundle::from)
    }

    /// Persist a credential bundle, replacing any previous one.
    pub async fn set(&self, bundle: &CredentialBundle) {
        self.write_json(keys::CREDENTIALS, &StoredCredentials::from(bundle))
            .await;
    }

    /// Remove the credential bundle, the user profile and the selected
    /// context in one storage operation.
    pub async fn clear(&self) {
        match self.store.remove_all(&keys::ALL).await {
            Ok(()) => debug!("session storage cleared"),
            Err(e) => warn!(error = %e, "failed to clear session storage"),
        }
    }

    /// Read the persisted user profile.
    pub async fn user(&self) -> Option<User> {
        self.read_json(keys::USER).await
    }

    /// Persist the user profile.
    pub async fn set_user(&self, user: &User) {
        self.write_json(keys::USER, user).await;
    }

    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.store.get(key).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(key, error = %e, "storage read failed, treating as absent");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "stored value is corrupt, treating as absent");
                None
            }
        }
    }

    async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key, error = %e, "failed to serialize value for storage");
                return;
            }
        };

        if let Err(e) = self.store.set(key, raw).await {
            warn!(key, error = %e, "storage write failed");
        }
    }
}

#[async_trait]
impl<T> ContextSlot<T> for TokenStore
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn load(&self) -> Option<PersistedContext<T>> {
        self.read_json(keys::SELECTED_CONTEXT).await
    }

    async fn save(&self, context: &PersistedContext<T>) {
        self.write_json(keys::SELECTED_CONTEXT, context).await;
    }

    async fn clear(&self) {
        if let Err(e) = self.store.remove_all(&[keys::SELECTED_CONTEXT]).await {
            warn!(error = %e, "failed to clear selected context");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use salon_core::{Email, Shop, ShopId, UserId};

    use super::*;
    use crate::storage::MemoryStore;
    use crate::testutil::FlakyStore;

    fn user() -> User {
        User {
            id: UserId::new(1),
            email: Email::parse("owner@salon.example").unwrap(),
            name: None,
        }
    }

    #[tokio::test]
    async fn test_bundle_roundtrip() {
        let tokens = TokenStore::new(Arc::new(MemoryStore::new()));
        assert!(tokens.get().await.is_none());

        tokens
            .set(&CredentialBundle::new("tok-1", Some("ref-1".to_string())))
            .await;

        let bundle = tokens.get().await.unwrap();
        assert!(bundle.has_access_token("tok-1"));
        assert_eq!(
            bundle.refresh_token.as_ref().map(|t| t.expose_secret().to_string()),
            Some("ref-1".to_string())
        );
    }

    #[tokio::test]
    async fn test_clear_removes_every_session_key() {
        let store = Arc::new(MemoryStore::new());
        let tokens = TokenStore::new(store.clone());

        tokens.set(&CredentialBundle::new("tok-1", None)).await;
        tokens.set_user(&user()).await;
        ContextSlot::<Shop>::save(
            &tokens,
            &PersistedContext {
                value: Shop::new(ShopId::new(4), "Downtown"),
                fetched_at: Utc::now(),
            },
        )
        .await;
        assert_eq!(store.len(), 3);

        tokens.clear().await;
        tokens.clear().await;

        assert!(store.is_empty());
        assert!(tokens.get().await.is_none());
        assert!(tokens.user().await.is_none());
    }

    #[tokio::test]
    async fn test_unavailable_storage_reads_as_logged_out() {
        let store = Arc::new(FlakyStore::new());
        let tokens = TokenStore::new(store.clone());
        tokens.set(&CredentialBundle::new("tok-1", None)).await;

        store.set_available(false);
        assert!(tokens.get().await.is_none());
        // Writes and clears are swallowed, not propagated.
        tokens.set(&CredentialBundle::new("tok-2", None)).await;
        tokens.clear().await;

        store.set_available(true);
        assert!(tokens.get().await.unwrap().has_access_token("tok-1"));
    }

    #[tokio::test]
    async fn test_corrupt_credentials_read_as_absent() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(keys::CREDENTIALS, "not json".to_string())
            .await
            .unwrap();

        let tokens = TokenStore::new(store);
        assert!(tokens.get().await.is_none());
    }
}
