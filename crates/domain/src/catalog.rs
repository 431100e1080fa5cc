//! Catalog collaborator.
//!
//! Product management lives outside the commerce core; the core only needs to
//! look variants up at checkout and when editing carts.

use std::collections::HashMap;

use async_trait::async_trait;
use common::{Money, VariantId};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// The catalog's view of a purchasable variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogVariant {
    pub id: VariantId,
    pub sku: String,
    pub product_name: String,
    pub price: Money,
    /// Untracked variants are never deducted or restocked.
    pub track_inventory: bool,
    pub allow_backorder: bool,
    pub active: bool,
}

impl CatalogVariant {
    pub fn new(id: VariantId, sku: impl Into<String>, product_name: impl Into<String>, price: Money) -> Self {
        Self {
            id,
            sku: sku.into(),
            product_name: product_name.into(),
            price,
            track_inventory: true,
            allow_backorder: false,
            active: true,
        }
    }

    pub fn untracked(mut self) -> Self {
        self.track_inventory = false;
        self
    }

    pub fn with_backorder(mut self) -> Self {
        self.allow_backorder = true;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn variant(&self, id: VariantId) -> Option<CatalogVariant>;
}

/// Catalog held in memory, for tests and demos.
#[derive(Default)]
pub struct InMemoryCatalog {
    variants: RwLock<HashMap<VariantId, CatalogVariant>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, variant: CatalogVariant) {
        self.variants.write().await.insert(variant.id, variant);
    }

    pub async fn set_price(&self, id: VariantId, price: Money) -> bool {
        match self.variants.write().await.get_mut(&id) {
            Some(variant) => {
                variant.price = price;
                true
            }
            None => false,
        }
    }

    pub async fn set_active(&self, id: VariantId, active: bool) -> bool {
        match self.variants.write().await.get_mut(&id) {
            Some(variant) => {
                variant.active = active;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn variant(&self, id: VariantId) -> Option<CatalogVariant> {
        self.variants.read().await.get(&id).cloned()
    }
}
