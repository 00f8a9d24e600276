//! Selected-shop commands.

use salon_client::{Freshness, GetOptions, SalonClient};
use salon_core::ShopId;
use tracing::info;

use super::{CliError, require_login};

/// Show the selected shop.
///
/// # Errors
///
/// Returns `CliError::NotLoggedIn` without a session, or the gateway error
/// of a failed fetch.
pub async fn show(client: &SalonClient, refresh: bool, allow_stale: bool) -> Result<(), CliError> {
    require_login(client)?;

    let options = GetOptions {
        force_refresh: refresh,
        allow_stale,
    };
    let shop = client.selected_shop().current(options).await?;
    let snapshot = client.selected_shop().snapshot();

    match shop {
        Some(shop) => info!(
            shop_id = %shop.id,
            age_secs = snapshot.age.map_or(0, |age| age.as_secs()),
            stale = snapshot.freshness == Freshness::Stale,
            "Selected shop: {}",
            shop.name
        ),
        None => info!("No shop selected"),
    }
    Ok(())
}

/// Select a shop.
///
/// # Errors
///
/// Returns `CliError::NotLoggedIn` without a session, or the gateway error
/// if the backend rejects the selection.
pub async fn select(client: &SalonClient, shop_id: ShopId) -> Result<(), CliError> {
    require_login(client)?;
    let shop = client.selected_shop().select(shop_id).await?;
    info!(shop_id = %shop.id, "Selected shop: {}", shop.name);
    Ok(())
}
