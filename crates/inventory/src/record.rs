use core::fmt::{Debug, Display};
use core::hash::Hash;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use atelier_core::{
    DomainError, DomainResult, Entity, InventoryRecordId, MaterialId, ProductId, WarehouseId,
};

use crate::quantity::Quantity;

/// The two stock variants: finished products and raw materials.
pub trait StockKind:
    Copy + Debug + PartialEq + Eq + Hash + Send + Sync + 'static
{
    type ItemId: Copy
        + Debug
        + Display
        + Eq
        + Ord
        + Hash
        + Send
        + Sync
        + Serialize
        + DeserializeOwned
        + 'static;
    type Quantity: Quantity;

    /// "product" / "material"
    const LABEL: &'static str;
}

/// Finished products, counted in whole units per warehouse.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ProductStock;

impl StockKind for ProductStock {
    type ItemId = ProductId;
    type Quantity = i64;
    const LABEL: &'static str = "product";
}

/// Raw materials, measured in decimal amounts per designer material warehouse.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct MaterialStock;

impl StockKind for MaterialStock {
    type ItemId = MaterialId;
    type Quantity = Decimal;
    const LABEL: &'static str = "material";
}

/// (item, warehouse): at most one inventory record exists per key.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct StockKey<K: StockKind> {
    pub item_id: K::ItemId,
    pub warehouse_id: WarehouseId,
}

impl<K: StockKind> StockKey<K> {
    pub fn new(item_id: K::ItemId, warehouse_id: WarehouseId) -> Self {
        Self {
            item_id,
            warehouse_id,
        }
    }
}

/// Quantity on hand for one (item, warehouse) pair. Never negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct InventoryRecord<K: StockKind> {
    pub id: InventoryRecordId,
    pub key: StockKey<K>,
    quantity: K::Quantity,
    pub updated_at: DateTime<Utc>,
}

pub type ProductInventory = InventoryRecord<ProductStock>;
pub type MaterialInventory = InventoryRecord<MaterialStock>;

impl<K: StockKind> InventoryRecord<K> {
    pub fn create(
        id: InventoryRecordId,
        key: StockKey<K>,
        quantity: K::Quantity,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if quantity.is_negative() {
            return Err(DomainError::invalid_request(format!(
                "{} {} cannot start with negative quantity {}",
                K::LABEL,
                key.item_id,
                quantity
            )));
        }
        Ok(Self {
            id,
            key,
            quantity,
            updated_at: now,
        })
    }

    pub fn quantity(&self) -> K::Quantity {
        self.quantity
    }

    pub fn item_id(&self) -> K::ItemId {
        self.key.item_id
    }

    pub fn warehouse_id(&self) -> WarehouseId {
        self.key.warehouse_id
    }

    /// Add `delta` (may be negative) and return `(before, after)`.
    ///
    /// Fails without changing anything if the result would be negative.
    pub fn apply_delta(
        &mut self,
        delta: K::Quantity,
        now: DateTime<Utc>,
    ) -> DomainResult<(K::Quantity, K::Quantity)> {
        let before = self.quantity;
        let after = before.try_add(delta).ok_or_else(|| {
            DomainError::invalid_request(format!(
                "{} {} quantity overflow ({before} + {delta})",
                K::LABEL,
                self.key.item_id
            ))
        })?;
        if after.is_negative() {
            return Err(DomainError::invalid_state(format!(
                "{} {} would go negative ({before} + {delta})",
                K::LABEL,
                self.key.item_id
            )));
        }

        self.quantity = after;
        self.updated_at = now;
        Ok((before, after))
    }
}

impl<K: StockKind> Entity for InventoryRecord<K> {
    type Id = InventoryRecordId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product_record(quantity: i64) -> ProductInventory {
        InventoryRecord::create(
            InventoryRecordId::new(),
            StockKey::new(ProductId::new(), WarehouseId::new()),
            quantity,
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn apply_delta_reports_before_and_after() {
        let mut r = product_record(20);
        let (before, after) = r.apply_delta(5, Utc::now()).unwrap();
        assert_eq!((before, after), (20, 25));
        assert_eq!(r.quantity(), 25);
    }

    #[test]
    fn apply_delta_never_goes_negative() {
        let mut r = product_record(3);
        assert!(r.apply_delta(-4, Utc::now()).is_err());
        assert_eq!(r.quantity(), 3);
    }

    #[test]
    fn negative_initial_quantity_is_rejected() {
        let res = MaterialInventory::create(
            InventoryRecordId::new(),
            StockKey::new(MaterialId::new(), WarehouseId::new()),
            Decimal::new(-1, 1),
            Utc::now(),
        );
        assert!(matches!(res, Err(DomainError::InvalidRequest(_))));
    }
}
