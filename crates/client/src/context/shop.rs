//! The selected shop: the context every booking operation runs against.

use std::sync::Arc;

use async_trait::async_trait;
use salon_core::{Shop, ShopId};
use serde::Serialize;
use tracing::{info, instrument};

use super::{ContextCache, ContextSnapshot, ContextSource, GetOptions};
use crate::config::ContextCacheConfig;
use crate::events::{EventChannel, SubscriptionToken};
use crate::gateway::{GatewayError, HttpGateway};
use crate::token_store::TokenStore;

const SELECTED_SHOP_PATH: &str = "shops/selected";

#[derive(Debug, Serialize)]
struct SelectShopRequest {
    shop_id: ShopId,
}

/// Fetches the selected shop from the backend.
pub struct SelectedShopSource {
    gateway: Arc<HttpGateway>,
}

impl SelectedShopSource {
    #[must_use]
    pub const fn new(gateway: Arc<HttpGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl ContextSource<Shop> for SelectedShopSource {
    async fn fetch(&self) -> Result<Shop, GatewayError> {
        self.gateway.get(SELECTED_SHOP_PATH).await
    }
}

/// Cached view of the shop the user is working in.
#[derive(Clone)]
pub struct SelectedShop {
    gateway: Arc<HttpGateway>,
    cache: ContextCache<Shop>,
}

impl SelectedShop {
    #[must_use]
    pub fn new(gateway: Arc<HttpGateway>, tokens: TokenStore, policy: ContextCacheConfig) -> Self {
        let source = Arc::new(SelectedShopSource::new(Arc::clone(&gateway)));
        Self {
            gateway,
            cache: ContextCache::new(source, Arc::new(tokens), policy),
        }
    }

    /// The selected shop, or `None` if the user has not picked one.
    ///
    /// # Errors
    ///
    /// Returns the gateway error of a failed fetch.
    pub async fn current(&self, options: GetOptions) -> Result<Option<Shop>, GatewayError> {
        self.cache.get(options).await
    }

    /// Select a shop on the backend and cache the result.
    ///
    /// # Errors
    ///
    /// Returns the gateway error if the backend rejects the selection. The
    /// cache is left untouched in that case.
    #[instrument(skip(self), fields(shop_id = %shop_id))]
    pub async fn select(&self, shop_id: ShopId) -> Result<Shop, GatewayError> {
        let shop: Shop = self
            .gateway
            .post(SELECTED_SHOP_PATH, &SelectShopRequest { shop_id })
            .await?;
        self.cache.set(shop.clone()).await;
        info!(shop = %shop.name, "shop selected");
        Ok(shop)
    }

    /// Forget the cached shop. The next read fetches.
    pub async fn invalidate(&self) {
        self.cache.invalidate().await;
    }

    #[must_use]
    pub fn snapshot(&self) -> ContextSnapshot<Shop> {
        self.cache.snapshot()
    }

    /// Clear the cached shop whenever the session is cleared.
    pub fn bind(&self, events: &EventChannel) -> SubscriptionToken {
        self.cache.bind(events)
    }
}
