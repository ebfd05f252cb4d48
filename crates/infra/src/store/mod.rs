//! Persistence ports and their implementations.
//!
//! Every mutating method is one atomic unit. Methods that take a planner
//! (`update_session`, `commit_split`) or run one (`apply_restock`,
//! `apply_usage`) do so *inside* that unit, after the rows they read have
//! been locked, so check-then-act cannot interleave with another writer.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use atelier_checkout::{CheckoutSession, SplitPlan};
use atelier_core::{
    CheckoutSessionId, DesignerId, DomainError, DomainResult, InventoryRecordId, MaterialId,
    OrderGroupId, OrderId, ProductId, UserId, WarehouseId,
};
use atelier_inventory::{
    LedgerPolicy, MaterialChange, MaterialInventory, MaterialStock, MaterialTransaction,
    ProductChange, ProductInventory, ProductStock, ProductTransaction, RestockPlan, StockChange,
    StockKey, StockKind, UsagePlan, Warehouse,
};
use atelier_orders::{Order, OrderDetail, OrderGroup};

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;

/// Store-level failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A planner rejected the unit; nothing was written.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Lost a race with another writer (unique violation, serialization
    /// failure, conditional update matched nothing).
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// In-place change to a session, applied under the session's lock.
pub type SessionMutation =
    Box<dyn FnOnce(&mut CheckoutSession) -> DomainResult<()> + Send + 'static>;

/// Split planner, applied under the session's lock.
pub type SplitPlanner =
    Box<dyn FnOnce(&mut CheckoutSession) -> DomainResult<SplitPlan> + Send + 'static>;

#[async_trait]
pub trait CheckoutStore: Send + Sync {
    /// Persist a new session with all of its items.
    async fn insert_session(&self, session: &CheckoutSession) -> StoreResult<()>;

    async fn load_session(&self, id: CheckoutSessionId) -> StoreResult<Option<CheckoutSession>>;

    /// Lock the session, apply `mutation`, and persist the result.
    async fn update_session(
        &self,
        id: CheckoutSessionId,
        mutation: SessionMutation,
    ) -> StoreResult<CheckoutSession>;

    /// Lock the session, run `planner`, and persist the order group, its
    /// orders and details, and the session's `Completed` status together.
    async fn commit_split(
        &self,
        id: CheckoutSessionId,
        planner: SplitPlanner,
    ) -> StoreResult<SplitPlan>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn load_group(&self, id: OrderGroupId) -> StoreResult<Option<OrderGroup>>;

    /// Orders of a group in creation order.
    async fn list_orders(&self, group_id: OrderGroupId) -> StoreResult<Vec<Order>>;

    /// Orders created from a checkout session.
    async fn orders_for_session(&self, session_id: CheckoutSessionId) -> StoreResult<Vec<Order>>;

    async fn load_order(&self, id: OrderId) -> StoreResult<Option<Order>>;

    async fn load_order_details(&self, order_id: OrderId) -> StoreResult<Vec<OrderDetail>>;

    /// Count one more order of the group as settled.
    async fn record_order_completed(&self, group_id: OrderGroupId) -> StoreResult<OrderGroup>;
}

/// A stock record together with its ledger, in replay order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerEntries {
    Product {
        record: ProductInventory,
        transactions: Vec<ProductTransaction>,
    },
    Material {
        record: MaterialInventory,
        transactions: Vec<MaterialTransaction>,
    },
}

#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Fails with `Conflict` if the designer already has a material warehouse.
    async fn register_warehouse(&self, warehouse: Warehouse) -> StoreResult<Warehouse>;

    async fn material_warehouse(&self, designer_id: DesignerId) -> StoreResult<Option<Warehouse>>;

    async fn apply_product_restock(
        &self,
        changes: &[ProductChange],
        actor: UserId,
        policy: LedgerPolicy,
        now: DateTime<Utc>,
    ) -> StoreResult<RestockPlan<ProductStock>>;

    /// Restock into the designer's material warehouse.
    async fn apply_material_restock(
        &self,
        designer_id: DesignerId,
        quantities: &BTreeMap<MaterialId, Decimal>,
        actor: UserId,
        policy: LedgerPolicy,
        now: DateTime<Utc>,
    ) -> StoreResult<RestockPlan<MaterialStock>>;

    /// Consume from the designer's material warehouse, all or nothing.
    async fn apply_usage(
        &self,
        designer_id: DesignerId,
        usage: &BTreeMap<MaterialId, Decimal>,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> StoreResult<UsagePlan>;

    async fn product_stock(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> StoreResult<Option<ProductInventory>>;

    async fn material_stock(
        &self,
        material_id: MaterialId,
        warehouse_id: WarehouseId,
    ) -> StoreResult<Option<MaterialInventory>>;

    async fn ledger_entries(&self, record_id: InventoryRecordId)
    -> StoreResult<Option<LedgerEntries>>;
}

/// Resolve the designer's material warehouse or fail the unit.
pub(crate) fn require_material_warehouse(
    found: Option<Warehouse>,
    designer_id: DesignerId,
) -> StoreResult<Warehouse> {
    found.ok_or_else(|| {
        StoreError::Domain(DomainError::not_found(
            "material warehouse for designer",
            designer_id,
        ))
    })
}

/// Restock lines for a material batch, targeting `warehouse`.
pub(crate) fn material_changes(
    warehouse: &Warehouse,
    quantities: &BTreeMap<MaterialId, Decimal>,
) -> Vec<MaterialChange> {
    quantities
        .iter()
        .map(|(material, qty)| MaterialChange::new(*material, warehouse.id, *qty))
        .collect()
}

/// Keys of a batch, first occurrence order.
pub(crate) fn distinct_keys<K: StockKind>(changes: &[StockChange<K>]) -> Vec<StockKey<K>> {
    let mut keys: Vec<StockKey<K>> = Vec::with_capacity(changes.len());
    for change in changes {
        if !keys.contains(&change.key) {
            keys.push(change.key);
        }
    }
    keys
}
