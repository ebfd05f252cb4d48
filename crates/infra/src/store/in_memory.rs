use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use atelier_checkout::{CheckoutSession, SplitPlan};
use atelier_core::{
    CheckoutSessionId, DesignerId, DomainError, Entity, InventoryRecordId, MaterialId,
    OrderGroupId, OrderId, ProductId, UserId, WarehouseId,
};
use atelier_inventory::{
    InventoryRecord, InventoryTransaction, LedgerPolicy, MaterialInventory, MaterialStock,
    MaterialTransaction, ProductChange, ProductInventory, ProductStock, ProductTransaction,
    RestockPlan, StockKey, StockKind, UsagePlan, Warehouse, WarehouseKind, plan_restock,
    plan_usage,
};
use atelier_orders::{Order, OrderDetail, OrderGroup};

use super::{
    CheckoutStore, InventoryStore, LedgerEntries, OrderStore, SessionMutation, SplitPlanner,
    StoreError, StoreResult, distinct_keys, material_changes, require_material_warehouse,
};

#[derive(Debug, Default)]
struct Tables {
    sessions: HashMap<CheckoutSessionId, CheckoutSession>,
    groups: HashMap<OrderGroupId, OrderGroup>,
    /// Creation order.
    orders: Vec<Order>,
    details: HashMap<OrderId, Vec<OrderDetail>>,
    warehouses: HashMap<WarehouseId, Warehouse>,
    products: HashMap<StockKey<ProductStock>, ProductInventory>,
    materials: HashMap<StockKey<MaterialStock>, MaterialInventory>,
    /// Append order.
    product_txs: Vec<ProductTransaction>,
    material_txs: Vec<MaterialTransaction>,
}

impl Tables {
    fn material_warehouse(&self, designer_id: DesignerId) -> Option<Warehouse> {
        self.warehouses
            .values()
            .find(|w| w.designer_id == designer_id && w.kind == WarehouseKind::Material)
            .cloned()
    }

    fn apply_plan<K: StockKind>(
        records: &mut HashMap<StockKey<K>, InventoryRecord<K>>,
        ledger: &mut Vec<InventoryTransaction<K>>,
        plan: &RestockPlan<K>,
    ) {
        for record in plan.inserts.iter().chain(&plan.updates) {
            records.insert(record.key, record.clone());
        }
        ledger.extend(plan.transactions.iter().cloned());
    }
}

/// Every table behind one lock; each unit runs under a single write guard.
///
/// Intended for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }
}

fn session_not_found(id: CheckoutSessionId) -> StoreError {
    StoreError::Domain(DomainError::not_found("checkout session", id))
}

#[async_trait]
impl CheckoutStore for InMemoryStore {
    async fn insert_session(&self, session: &CheckoutSession) -> StoreResult<()> {
        let mut tables = self.write()?;
        let id = *session.id();
        if tables.sessions.contains_key(&id) {
            return Err(StoreError::Conflict(format!(
                "checkout session {id} already exists"
            )));
        }
        tables.sessions.insert(id, session.clone());
        Ok(())
    }

    async fn load_session(&self, id: CheckoutSessionId) -> StoreResult<Option<CheckoutSession>> {
        Ok(self.read()?.sessions.get(&id).cloned())
    }

    async fn update_session(
        &self,
        id: CheckoutSessionId,
        mutation: SessionMutation,
    ) -> StoreResult<CheckoutSession> {
        let mut tables = self.write()?;
        let stored = tables.sessions.get(&id).ok_or_else(|| session_not_found(id))?;

        // Work on a copy so a rejected mutation leaves the stored session untouched.
        let mut working = stored.clone();
        mutation(&mut working)?;
        tables.sessions.insert(id, working.clone());
        Ok(working)
    }

    async fn commit_split(
        &self,
        id: CheckoutSessionId,
        planner: SplitPlanner,
    ) -> StoreResult<SplitPlan> {
        let mut tables = self.write()?;
        let stored = tables.sessions.get(&id).ok_or_else(|| session_not_found(id))?;

        let mut working = stored.clone();
        let plan = planner(&mut working)?;

        tables.groups.insert(plan.group.id, plan.group.clone());
        for (order, details) in &plan.orders {
            tables.orders.push(order.clone());
            tables.details.insert(order.id, details.clone());
        }
        tables.sessions.insert(id, working);
        Ok(plan)
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn load_group(&self, id: OrderGroupId) -> StoreResult<Option<OrderGroup>> {
        Ok(self.read()?.groups.get(&id).cloned())
    }

    async fn list_orders(&self, group_id: OrderGroupId) -> StoreResult<Vec<Order>> {
        Ok(self
            .read()?
            .orders
            .iter()
            .filter(|o| o.group_id == Some(group_id))
            .cloned()
            .collect())
    }

    async fn orders_for_session(&self, session_id: CheckoutSessionId) -> StoreResult<Vec<Order>> {
        Ok(self
            .read()?
            .orders
            .iter()
            .filter(|o| o.session_id == Some(session_id))
            .cloned()
            .collect())
    }

    async fn load_order(&self, id: OrderId) -> StoreResult<Option<Order>> {
        Ok(self.read()?.orders.iter().find(|o| o.id == id).cloned())
    }

    async fn load_order_details(&self, order_id: OrderId) -> StoreResult<Vec<OrderDetail>> {
        Ok(self
            .read()?
            .details
            .get(&order_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn record_order_completed(&self, group_id: OrderGroupId) -> StoreResult<OrderGroup> {
        let mut tables = self.write()?;
        let group = tables
            .groups
            .get_mut(&group_id)
            .ok_or_else(|| StoreError::Domain(DomainError::not_found("order group", group_id)))?;

        let mut working = group.clone();
        working.record_completed_order()?;
        *group = working.clone();
        Ok(working)
    }
}

#[async_trait]
impl InventoryStore for InMemoryStore {
    async fn register_warehouse(&self, warehouse: Warehouse) -> StoreResult<Warehouse> {
        let mut tables = self.write()?;
        if tables.warehouses.contains_key(&warehouse.id) {
            return Err(StoreError::Conflict(format!(
                "warehouse {} already exists",
                warehouse.id
            )));
        }
        if warehouse.kind == WarehouseKind::Material
            && tables.material_warehouse(warehouse.designer_id).is_some()
        {
            return Err(StoreError::Conflict(format!(
                "designer {} already has a material warehouse",
                warehouse.designer_id
            )));
        }
        tables.warehouses.insert(warehouse.id, warehouse.clone());
        Ok(warehouse)
    }

    async fn material_warehouse(&self, designer_id: DesignerId) -> StoreResult<Option<Warehouse>> {
        Ok(self.read()?.material_warehouse(designer_id))
    }

    async fn apply_product_restock(
        &self,
        changes: &[ProductChange],
        actor: UserId,
        policy: LedgerPolicy,
        now: DateTime<Utc>,
    ) -> StoreResult<RestockPlan<ProductStock>> {
        let mut tables = self.write()?;
        let existing: Vec<ProductInventory> = distinct_keys(changes)
            .iter()
            .filter_map(|key| tables.products.get(key).cloned())
            .collect();
        let plan = plan_restock(existing, changes, actor, policy, now)?;

        let Tables {
            products,
            product_txs,
            ..
        } = &mut *tables;
        Tables::apply_plan(products, product_txs, &plan);
        Ok(plan)
    }

    async fn apply_material_restock(
        &self,
        designer_id: DesignerId,
        quantities: &BTreeMap<MaterialId, Decimal>,
        actor: UserId,
        policy: LedgerPolicy,
        now: DateTime<Utc>,
    ) -> StoreResult<RestockPlan<MaterialStock>> {
        let mut tables = self.write()?;
        let warehouse =
            require_material_warehouse(tables.material_warehouse(designer_id), designer_id)?;
        let changes = material_changes(&warehouse, quantities);
        let existing: Vec<MaterialInventory> = distinct_keys(&changes)
            .iter()
            .filter_map(|key| tables.materials.get(key).cloned())
            .collect();
        let plan = plan_restock(existing, &changes, actor, policy, now)?;

        let Tables {
            materials,
            material_txs,
            ..
        } = &mut *tables;
        Tables::apply_plan(materials, material_txs, &plan);
        Ok(plan)
    }

    async fn apply_usage(
        &self,
        designer_id: DesignerId,
        usage: &BTreeMap<MaterialId, Decimal>,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> StoreResult<UsagePlan> {
        let mut tables = self.write()?;
        let warehouse =
            require_material_warehouse(tables.material_warehouse(designer_id), designer_id)?;
        let rows: Vec<MaterialInventory> = usage
            .keys()
            .filter_map(|m| tables.materials.get(&StockKey::new(*m, warehouse.id)).cloned())
            .collect();
        let plan = plan_usage(&warehouse, rows, usage, actor, now)?;

        for row in &plan.updates {
            tables.materials.insert(row.key, row.clone());
        }
        tables.material_txs.extend(plan.transactions.iter().cloned());
        Ok(plan)
    }

    async fn product_stock(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> StoreResult<Option<ProductInventory>> {
        Ok(self
            .read()?
            .products
            .get(&StockKey::new(product_id, warehouse_id))
            .cloned())
    }

    async fn material_stock(
        &self,
        material_id: MaterialId,
        warehouse_id: WarehouseId,
    ) -> StoreResult<Option<MaterialInventory>> {
        Ok(self
            .read()?
            .materials
            .get(&StockKey::new(material_id, warehouse_id))
            .cloned())
    }

    async fn ledger_entries(
        &self,
        record_id: InventoryRecordId,
    ) -> StoreResult<Option<LedgerEntries>> {
        let tables = self.read()?;
        if let Some(record) = tables.products.values().find(|r| r.id == record_id) {
            return Ok(Some(LedgerEntries::Product {
                record: record.clone(),
                transactions: tables
                    .product_txs
                    .iter()
                    .filter(|t| t.record_id == record_id)
                    .cloned()
                    .collect(),
            }));
        }
        if let Some(record) = tables.materials.values().find(|r| r.id == record_id) {
            return Ok(Some(LedgerEntries::Material {
                record: record.clone(),
                transactions: tables
                    .material_txs
                    .iter()
                    .filter(|t| t.record_id == record_id)
                    .cloned()
                    .collect(),
            }));
        }
        Ok(None)
    }
}
