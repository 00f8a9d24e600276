//! Shop (the active context a session operates against).

use serde::{Deserialize, Serialize};

use crate::ShopId;

/// A salon shop.
///
/// The client only relies on `id` and `name`; every other field the backend
/// sends is kept verbatim in `extra` so a cached shop round-trips through
/// storage without losing data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shop {
    /// Backend shop ID.
    pub id: ShopId,
    /// Display name.
    pub name: String,
    /// Fields the client does not interpret (address, hours, ...).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Shop {
    /// Create a shop with no extra fields.
    #[must_use]
    pub fn new(id: ShopId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            extra: serde_json::Map::new(),
        }
    }
}
