use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, instrument};

use atelier_core::{
    DesignerId, DomainError, InventoryRecordId, MaterialId, ProductId, UserId, WarehouseId,
};
use atelier_inventory::{
    LedgerAudit, LedgerPolicy, MaterialInventory, MaterialStock, ProductChange, ProductInventory,
    ProductStock, RestockPlan, UsagePlan, Warehouse, WarehouseKind, audit,
};

use crate::external::ActorResolver;
use crate::store::{InventoryStore, LedgerEntries};

use super::{RequestContext, ServiceError, ServiceResult, within};

/// Stock levels and their append-only ledger.
#[derive(Clone)]
pub struct InventoryLedgerService {
    store: Arc<dyn InventoryStore>,
    actors: Arc<dyn ActorResolver>,
    policy: LedgerPolicy,
    timeout: Option<Duration>,
}

impl InventoryLedgerService {
    pub fn new(
        store: Arc<dyn InventoryStore>,
        actors: Arc<dyn ActorResolver>,
        policy: LedgerPolicy,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            store,
            actors,
            policy,
            timeout,
        }
    }

    /// `Unauthorized` without a claim, `InvalidState` when the claim is not a
    /// user id.
    fn actor(&self, ctx: &RequestContext) -> ServiceResult<UserId> {
        let claim = self.actors.resolve(ctx).ok_or(DomainError::Unauthorized)?;
        claim.parse::<UserId>().map_err(|_| {
            DomainError::invalid_state(format!("unresolvable actor id '{claim}'")).into()
        })
    }

    #[instrument(skip(self, ctx), fields(designer_id = %designer_id, kind = kind.as_str()), err)]
    pub async fn register_warehouse(
        &self,
        ctx: &RequestContext,
        designer_id: DesignerId,
        kind: WarehouseKind,
        name: &str,
    ) -> ServiceResult<Warehouse> {
        self.actor(ctx)?;
        let warehouse =
            Warehouse::register(WarehouseId::new(), designer_id, kind, name, Utc::now())?;
        within(ctx, self.timeout, async {
            let warehouse = self.store.register_warehouse(warehouse).await?;
            info!(warehouse_id = %warehouse.id, "warehouse registered");
            Ok::<_, ServiceError>(warehouse)
        })
        .await
    }

    /// Additive restock of product stock. Repeated pairs apply in order.
    #[instrument(skip(self, ctx, changes), fields(changes = changes.len()), err)]
    pub async fn restock_products(
        &self,
        ctx: &RequestContext,
        changes: Vec<ProductChange>,
    ) -> ServiceResult<RestockPlan<ProductStock>> {
        let actor = self.actor(ctx)?;
        within(ctx, self.timeout, async {
            let plan = self
                .store
                .apply_product_restock(&changes, actor, self.policy, Utc::now())
                .await?;
            info!(
                actor = %actor,
                created = plan.inserts.len(),
                updated = plan.updates.len(),
                ledgered = plan.transactions.len(),
                "product stock restocked"
            );
            Ok::<_, ServiceError>(plan)
        })
        .await
    }

    /// Additive restock into the designer's material warehouse.
    #[instrument(skip(self, ctx, quantities), fields(designer_id = %designer_id, materials = quantities.len()), err)]
    pub async fn restock_materials(
        &self,
        ctx: &RequestContext,
        designer_id: DesignerId,
        quantities: BTreeMap<MaterialId, Decimal>,
    ) -> ServiceResult<RestockPlan<MaterialStock>> {
        let actor = self.actor(ctx)?;
        within(ctx, self.timeout, async {
            let plan = self
                .store
                .apply_material_restock(designer_id, &quantities, actor, self.policy, Utc::now())
                .await?;
            info!(
                actor = %actor,
                created = plan.inserts.len(),
                updated = plan.updates.len(),
                "material stock restocked"
            );
            Ok::<_, ServiceError>(plan)
        })
        .await
    }

    /// Consume materials, all or nothing.
    #[instrument(skip(self, ctx, usage), fields(designer_id = %designer_id, materials = usage.len()), err)]
    pub async fn consume_materials(
        &self,
        ctx: &RequestContext,
        designer_id: DesignerId,
        usage: BTreeMap<MaterialId, Decimal>,
    ) -> ServiceResult<UsagePlan> {
        let actor = self.actor(ctx)?;
        within(ctx, self.timeout, async {
            let plan = self
                .store
                .apply_usage(designer_id, &usage, actor, Utc::now())
                .await?;
            info!(actor = %actor, consumed = plan.transactions.len(), "materials consumed");
            Ok::<_, ServiceError>(plan)
        })
        .await
    }

    #[instrument(skip(self, ctx), err)]
    pub async fn product_stock(
        &self,
        ctx: &RequestContext,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> ServiceResult<ProductInventory> {
        within(ctx, self.timeout, async {
            self.store
                .product_stock(product_id, warehouse_id)
                .await?
                .ok_or_else(|| {
                    ServiceError::from(DomainError::not_found(
                        "product inventory",
                        format!("{product_id}@{warehouse_id}"),
                    ))
                })
        })
        .await
    }

    #[instrument(skip(self, ctx), err)]
    pub async fn material_stock(
        &self,
        ctx: &RequestContext,
        material_id: MaterialId,
        warehouse_id: WarehouseId,
    ) -> ServiceResult<MaterialInventory> {
        within(ctx, self.timeout, async {
            self.store
                .material_stock(material_id, warehouse_id)
                .await?
                .ok_or_else(|| {
                    ServiceError::from(DomainError::not_found(
                        "material inventory",
                        format!("{material_id}@{warehouse_id}"),
                    ))
                })
        })
        .await
    }

    /// The record and its transactions, oldest first.
    #[instrument(skip(self, ctx), fields(record_id = %record_id), err)]
    pub async fn list_transactions(
        &self,
        ctx: &RequestContext,
        record_id: InventoryRecordId,
    ) -> ServiceResult<LedgerEntries> {
        within(ctx, self.timeout, async {
            self.store
                .ledger_entries(record_id)
                .await?
                .ok_or_else(|| {
                    ServiceError::from(DomainError::not_found("inventory record", record_id))
                })
        })
        .await
    }

    #[instrument(skip(self, ctx), fields(record_id = %record_id), err)]
    pub async fn audit_record(
        &self,
        ctx: &RequestContext,
        record_id: InventoryRecordId,
    ) -> ServiceResult<LedgerAudit> {
        let report = match self.list_transactions(ctx, record_id).await? {
            LedgerEntries::Product {
                record,
                transactions,
            } => audit(&record, &transactions),
            LedgerEntries::Material {
                record,
                transactions,
            } => audit(&record, &transactions),
        };
        if !report.consistent {
            tracing::warn!(
                broken_at = ?report.broken_at,
                on_hand = %report.on_hand,
                replayed = ?report.replayed,
                "ledger does not reproduce on-hand quantity"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::ContextActorResolver;
    use crate::store::InMemoryStore;

    fn service() -> InventoryLedgerService {
        InventoryLedgerService::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(ContextActorResolver),
            LedgerPolicy::default(),
            None,
        )
    }

    fn one_change() -> Vec<ProductChange> {
        vec![ProductChange::new(ProductId::new(), WarehouseId::new(), 3)]
    }

    #[tokio::test]
    async fn missing_actor_is_unauthorized() {
        let err = service()
            .restock_products(&RequestContext::anonymous(), one_change())
            .await
            .unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::Unauthorized)));

        let blank = RequestContext::for_actor("   ");
        let err = service()
            .restock_products(&blank, one_change())
            .await
            .unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::Unauthorized)));
    }

    #[tokio::test]
    async fn unparseable_actor_is_invalid_state() {
        let err = service()
            .restock_products(&RequestContext::for_actor("42"), one_change())
            .await
            .unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::InvalidState(_))));
    }

    #[tokio::test]
    async fn unknown_record_is_not_found() {
        let ctx = RequestContext::for_actor(UserId::new().to_string());
        let err = service()
            .audit_record(&ctx, InventoryRecordId::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "not_found");
    }
}
