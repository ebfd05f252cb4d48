use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use atelier_core::{ItemRef, Provider};

use super::CollaboratorError;

/// What the catalog knows about a material or product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub item: ItemRef,
    pub unit_price: Decimal,
    pub provider: Provider,
    pub display_name: Option<String>,
    pub image: Option<String>,
    pub provider_name: Option<String>,
    pub provider_avatar: Option<String>,
}

#[async_trait]
pub trait Catalog: Send + Sync {
    /// `Ok(None)` for unknown ids.
    async fn lookup(&self, item: ItemRef) -> Result<Option<CatalogEntry>, CollaboratorError>;
}

#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    entries: RwLock<HashMap<ItemRef, CatalogEntry>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entry: CatalogEntry) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(entry.item, entry);
        }
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn lookup(&self, item: ItemRef) -> Result<Option<CatalogEntry>, CollaboratorError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| CollaboratorError::new("catalog", "lock poisoned"))?;
        Ok(entries.get(&item).cloned())
    }
}
