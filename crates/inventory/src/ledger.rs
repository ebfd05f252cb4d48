//! Ledger planning.
//!
//! Each planner takes the rows currently stored for a batch and returns the
//! complete set of writes for that batch, or an error and no writes at all.
//! Stores run the planner inside their atomic unit, so the reads it was
//! given stay valid until the writes land.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use atelier_core::{
    DomainError, DomainResult, InventoryRecordId, InventoryTransactionId, MaterialId, UserId,
    WarehouseId,
};

use crate::quantity::Quantity;
use crate::record::{
    InventoryRecord, MaterialInventory, MaterialStock, ProductStock, StockKey, StockKind,
};
use crate::transaction::{InventoryTransaction, MaterialTransaction, TransactionType};
use crate::warehouse::{Warehouse, WarehouseKind};

/// How first creation of a record is ledgered.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct LedgerPolicy {
    /// When set, creating a record also appends a `Restock` transaction
    /// with `before = 0`. Off by default: only changes to an existing row
    /// are ledgered.
    pub ledger_initial_stock: bool,
}

/// One line of a restock batch.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct StockChange<K: StockKind> {
    pub key: StockKey<K>,
    pub delta: K::Quantity,
}

pub type ProductChange = StockChange<ProductStock>;
pub type MaterialChange = StockChange<MaterialStock>;

impl<K: StockKind> StockChange<K> {
    pub fn new(item_id: K::ItemId, warehouse_id: WarehouseId, delta: K::Quantity) -> Self {
        Self {
            key: StockKey::new(item_id, warehouse_id),
            delta,
        }
    }
}

/// Writes produced by [`plan_restock`].
#[derive(Debug, Clone)]
pub struct RestockPlan<K: StockKind> {
    /// Records that did not exist before this batch, in their final state.
    pub inserts: Vec<InventoryRecord<K>>,
    /// Pre-existing records touched by this batch, in their final state.
    pub updates: Vec<InventoryRecord<K>>,
    pub transactions: Vec<InventoryTransaction<K>>,
}

/// Writes produced by [`plan_usage`].
#[derive(Debug, Clone, Default)]
pub struct UsagePlan {
    pub updates: Vec<MaterialInventory>,
    pub transactions: Vec<MaterialTransaction>,
}

/// Plan an additive restock.
///
/// `existing` holds the stored records for the batch's distinct keys
/// (missing keys are simply absent). Repeated keys are applied in order.
pub fn plan_restock<K: StockKind>(
    existing: Vec<InventoryRecord<K>>,
    changes: &[StockChange<K>],
    actor: UserId,
    policy: LedgerPolicy,
    now: DateTime<Utc>,
) -> DomainResult<RestockPlan<K>> {
    if changes.is_empty() {
        return Err(DomainError::invalid_request("restock batch is empty"));
    }
    if let Some(bad) = changes.iter().find(|c| !c.delta.is_positive()) {
        return Err(DomainError::invalid_request(format!(
            "restock delta for {} {} must be positive, got {}",
            K::LABEL,
            bad.key.item_id,
            bad.delta
        )));
    }

    // key -> (record, existed before this batch)
    let mut working: HashMap<StockKey<K>, (InventoryRecord<K>, bool)> = existing
        .into_iter()
        .map(|r| (r.key, (r, true)))
        .collect();
    let mut touched: Vec<StockKey<K>> = Vec::new();
    let mut transactions = Vec::new();

    for change in changes {
        let key = change.key;
        match working.get_mut(&key) {
            Some((record, _)) => {
                let (before, _) = record.apply_delta(change.delta, now)?;
                transactions.push(InventoryTransaction::record(
                    InventoryTransactionId::new(),
                    record,
                    TransactionType::Restock,
                    change.delta,
                    before,
                    format!("Restocked from {before}"),
                    actor,
                    now,
                )?);
            }
            None => {
                let record =
                    InventoryRecord::create(InventoryRecordId::new(), key, change.delta, now)?;
                if policy.ledger_initial_stock {
                    transactions.push(InventoryTransaction::record(
                        InventoryTransactionId::new(),
                        &record,
                        TransactionType::Restock,
                        change.delta,
                        <K::Quantity as Quantity>::zero(),
                        "Initial stock",
                        actor,
                        now,
                    )?);
                }
                working.insert(key, (record, false));
            }
        }
        if !touched.contains(&key) {
            touched.push(key);
        }
    }

    let mut plan = RestockPlan {
        inserts: Vec::new(),
        updates: Vec::new(),
        transactions,
    };
    for key in touched {
        if let Some((record, existed)) = working.remove(&key) {
            if existed {
                plan.updates.push(record);
            } else {
                plan.inserts.push(record);
            }
        }
    }
    Ok(plan)
}

/// Plan a material consumption against one designer's material warehouse.
///
/// Every requested material is checked before any row is changed; the first
/// missing or insufficient material (in material-id order) fails the batch.
pub fn plan_usage(
    warehouse: &Warehouse,
    rows: Vec<MaterialInventory>,
    usage: &BTreeMap<MaterialId, Decimal>,
    actor: UserId,
    now: DateTime<Utc>,
) -> DomainResult<UsagePlan> {
    if warehouse.kind != WarehouseKind::Material {
        return Err(DomainError::invalid_state(format!(
            "warehouse {} is not a material warehouse",
            warehouse.id
        )));
    }
    if usage.is_empty() {
        return Err(DomainError::invalid_request("usage map is empty"));
    }
    if let Some((material, qty)) = usage.iter().find(|(_, q)| !q.is_positive()) {
        return Err(DomainError::invalid_request(format!(
            "usage for material {material} must be positive, got {qty}"
        )));
    }

    let mut by_material: HashMap<MaterialId, MaterialInventory> = rows
        .into_iter()
        .filter(|r| r.warehouse_id() == warehouse.id)
        .map(|r| (r.item_id(), r))
        .collect();

    for (material, requested) in usage {
        let row = by_material
            .get(material)
            .ok_or_else(|| DomainError::not_found("material inventory", material))?;
        if row.quantity() < *requested {
            return Err(DomainError::InsufficientStock {
                material_id: *material,
                requested: *requested,
                available: row.quantity(),
            });
        }
    }

    let mut plan = UsagePlan::default();
    for (material, requested) in usage {
        let Some(mut row) = by_material.remove(material) else {
            return Err(DomainError::not_found("material inventory", material));
        };
        let delta = requested.negated();
        let (before, _) = row.apply_delta(delta, now)?;
        plan.transactions.push(InventoryTransaction::record(
            InventoryTransactionId::new(),
            &row,
            TransactionType::Usage,
            delta,
            before,
            format!("Used {requested} of {before}"),
            actor,
            now,
        )?);
        plan.updates.push(row);
    }
    Ok(plan)
}

/// Result of replaying a record's transactions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerAudit {
    pub record_id: InventoryRecordId,
    pub on_hand: Decimal,
    /// Quantity reached by the replay; `None` when the record has no
    /// transactions.
    pub replayed: Option<Decimal>,
    pub transaction_count: usize,
    /// First transaction whose `before` does not continue the chain.
    pub broken_at: Option<InventoryTransactionId>,
    pub consistent: bool,
}

/// Replay `transactions` in timestamp order, starting from the first one's
/// `quantity_before`, and compare the result with the record's quantity.
pub fn audit<K: StockKind>(
    record: &InventoryRecord<K>,
    transactions: &[InventoryTransaction<K>],
) -> LedgerAudit {
    let mut ordered: Vec<&InventoryTransaction<K>> = transactions
        .iter()
        .filter(|t| t.record_id == record.id)
        .collect();
    ordered.sort_by_key(|t| t.created_at);

    let mut running: Option<K::Quantity> = None;
    let mut broken_at = None;
    for tx in &ordered {
        if running.is_some_and(|expected| expected != tx.quantity_before()) {
            broken_at.get_or_insert(tx.id);
        }
        let start = running.unwrap_or(tx.quantity_before());
        running = start.try_add(tx.delta());
        if running.is_none() {
            broken_at.get_or_insert(tx.id);
            break;
        }
    }

    let consistent = match running {
        Some(replayed) => broken_at.is_none() && replayed == record.quantity(),
        None => ordered.is_empty(),
    };
    LedgerAudit {
        record_id: record.id,
        on_hand: record.quantity().to_decimal(),
        replayed: running.map(Quantity::to_decimal),
        transaction_count: ordered.len(),
        broken_at,
        consistent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ProductInventory;
    use atelier_core::{DesignerId, ProductId};

    fn actor() -> UserId {
        UserId::new()
    }

    fn material_warehouse() -> Warehouse {
        Warehouse::register(
            WarehouseId::new(),
            DesignerId::new(),
            WarehouseKind::Material,
            "studio",
            Utc::now(),
        )
        .unwrap()
    }

    fn material_row(
        warehouse: &Warehouse,
        material: MaterialId,
        qty: Decimal,
    ) -> MaterialInventory {
        InventoryRecord::create(
            InventoryRecordId::new(),
            StockKey::new(material, warehouse.id),
            qty,
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn first_restock_creates_record_without_transaction() {
        let change = ProductChange::new(ProductId::new(), WarehouseId::new(), 20);
        let plan =
            plan_restock(vec![], &[change], actor(), LedgerPolicy::default(), Utc::now()).unwrap();
        assert_eq!(plan.inserts.len(), 1);
        assert_eq!(plan.inserts[0].quantity(), 20);
        assert!(plan.updates.is_empty());
        assert!(plan.transactions.is_empty());

        let created = plan.inserts[0].clone();
        let second = ProductChange { delta: 5, ..change };
        let plan = plan_restock(
            vec![created],
            &[second],
            actor(),
            LedgerPolicy::default(),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(plan.updates[0].quantity(), 25);
        assert_eq!(plan.transactions.len(), 1);
        let tx = &plan.transactions[0];
        assert_eq!((tx.quantity_before(), tx.quantity_after()), (20, 25));
        assert_eq!(tx.kind, TransactionType::Restock);
        assert!(tx.note.contains("20"));
    }

    #[test]
    fn initial_stock_policy_ledgers_creation() {
        let change = ProductChange::new(ProductId::new(), WarehouseId::new(), 7);
        let policy = LedgerPolicy {
            ledger_initial_stock: true,
        };
        let plan = plan_restock(vec![], &[change], actor(), policy, Utc::now()).unwrap();
        assert_eq!(plan.transactions.len(), 1);
        assert_eq!(plan.transactions[0].quantity_before(), 0);
        assert_eq!(plan.transactions[0].quantity_after(), 7);
    }

    #[test]
    fn repeated_pairs_apply_in_order() {
        let change = ProductChange::new(ProductId::new(), WarehouseId::new(), 4);
        let plan = plan_restock(
            vec![],
            &[change, ProductChange { delta: 6, ..change }],
            actor(),
            LedgerPolicy::default(),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(plan.inserts.len(), 1);
        assert_eq!(plan.inserts[0].quantity(), 10);
        assert_eq!(plan.transactions.len(), 1);
        assert_eq!(plan.transactions[0].quantity_before(), 4);
    }

    #[test]
    fn restock_rejects_empty_and_non_positive() {
        let now = Utc::now();
        assert!(matches!(
            plan_restock::<ProductStock>(vec![], &[], actor(), LedgerPolicy::default(), now),
            Err(DomainError::InvalidRequest(_))
        ));
        let zero = ProductChange::new(ProductId::new(), WarehouseId::new(), 0);
        assert!(matches!(
            plan_restock(vec![], &[zero], actor(), LedgerPolicy::default(), now),
            Err(DomainError::InvalidRequest(_))
        ));
    }

    #[test]
    fn material_restock_uses_decimal_quantities() {
        let wh = material_warehouse();
        let m = MaterialId::new();
        let existing = material_row(&wh, m, Decimal::new(15, 1));
        let plan = plan_restock(
            vec![existing],
            &[MaterialChange::new(m, wh.id, Decimal::new(25, 1))],
            actor(),
            LedgerPolicy::default(),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(plan.updates[0].quantity(), Decimal::from(4));
        assert_eq!(plan.transactions[0].quantity_before(), Decimal::new(15, 1));
    }

    #[test]
    fn insufficient_stock_names_material_and_amounts() {
        let wh = material_warehouse();
        let m1 = MaterialId::new();
        let rows = vec![material_row(&wh, m1, Decimal::from(5))];
        let usage = BTreeMap::from([(m1, Decimal::from(10))]);

        let err = plan_usage(&wh, rows, &usage, actor(), Utc::now()).unwrap_err();
        assert_eq!(
            err,
            DomainError::InsufficientStock {
                material_id: m1,
                requested: Decimal::from(10),
                available: Decimal::from(5),
            }
        );
    }

    #[test]
    fn one_short_material_fails_the_whole_batch() {
        let wh = material_warehouse();
        let (a, b) = (MaterialId::new(), MaterialId::new());
        let rows = vec![
            material_row(&wh, a, Decimal::from(50)),
            material_row(&wh, b, Decimal::from(1)),
        ];
        let usage = BTreeMap::from([(a, Decimal::from(5)), (b, Decimal::from(2))]);
        assert!(plan_usage(&wh, rows, &usage, actor(), Utc::now()).is_err());
    }

    #[test]
    fn missing_material_is_not_found() {
        let wh = material_warehouse();
        let missing = MaterialId::new();
        let usage = BTreeMap::from([(missing, Decimal::ONE)]);
        let err = plan_usage(&wh, vec![], &usage, actor(), Utc::now()).unwrap_err();
        assert_eq!(err, DomainError::not_found("material inventory", missing));
    }

    #[test]
    fn usage_appends_negative_deltas() {
        let wh = material_warehouse();
        let m = MaterialId::new();
        let rows = vec![material_row(&wh, m, Decimal::new(125, 1))];
        let usage = BTreeMap::from([(m, Decimal::new(25, 1))]);
        let plan = plan_usage(&wh, rows, &usage, actor(), Utc::now()).unwrap();

        assert_eq!(plan.updates[0].quantity(), Decimal::from(10));
        let tx = &plan.transactions[0];
        assert_eq!(tx.kind, TransactionType::Usage);
        assert_eq!(tx.delta(), Decimal::new(-25, 1));
        assert_eq!(tx.quantity_before(), Decimal::new(125, 1));
        assert_eq!(tx.quantity_after(), Decimal::from(10));
    }

    #[test]
    fn product_warehouse_cannot_be_consumed_from() {
        let wh = Warehouse::register(
            WarehouseId::new(),
            DesignerId::new(),
            WarehouseKind::Product,
            "shop",
            Utc::now(),
        )
        .unwrap();
        let usage = BTreeMap::from([(MaterialId::new(), Decimal::ONE)]);
        assert!(matches!(
            plan_usage(&wh, vec![], &usage, actor(), Utc::now()),
            Err(DomainError::InvalidState(_))
        ));
    }

    #[test]
    fn audit_detects_a_tampered_quantity() {
        let change = ProductChange::new(ProductId::new(), WarehouseId::new(), 10);
        let now = Utc::now();
        let created = plan_restock(vec![], &[change], actor(), LedgerPolicy::default(), now)
            .unwrap()
            .inserts
            .remove(0);
        let plan = plan_restock(
            vec![created],
            &[ProductChange { delta: 3, ..change }],
            actor(),
            LedgerPolicy::default(),
            now,
        )
        .unwrap();
        let record = plan.updates[0].clone();

        let report = audit(&record, &plan.transactions);
        assert!(report.consistent);
        assert_eq!(report.replayed, Some(Decimal::from(13)));

        let mut tampered = record.clone();
        tampered.apply_delta(1, now).unwrap();
        assert!(!audit(&tampered, &plan.transactions).consistent);
    }

    #[test]
    fn audit_of_untouched_record_is_trivially_consistent() {
        let record = ProductInventory::create(
            InventoryRecordId::new(),
            StockKey::new(ProductId::new(), WarehouseId::new()),
            20,
            Utc::now(),
        )
        .unwrap();
        let report = audit(&record, &[]);
        assert!(report.consistent);
        assert_eq!(report.replayed, None);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn replay_reproduces_on_hand(
                restocks in proptest::collection::vec(1i64..500, 1..20),
                usages in proptest::collection::vec(1i64..50, 0..20),
            ) {
                let wh = material_warehouse();
                let m = MaterialId::new();
                let mut row = material_row(&wh, m, Decimal::ZERO);
                let mut txs: Vec<MaterialTransaction> = Vec::new();
                let mut now = Utc::now();

                let steps = restocks
                    .iter()
                    .map(|r| Decimal::from(*r))
                    .chain(usages.iter().map(|u| -Decimal::from(*u)));
                for delta in steps {
                    now += chrono::Duration::milliseconds(1);
                    if (row.quantity() + delta).is_sign_negative() {
                        continue;
                    }
                    let (before, _) = row.apply_delta(delta, now).unwrap();
                    txs.push(InventoryTransaction::record(
                        InventoryTransactionId::new(),
                        &row,
                        TransactionType::Other("test".into()),
                        delta,
                        before,
                        "",
                        actor(),
                        now,
                    ).unwrap());
                    prop_assert!(!row.quantity().is_sign_negative());
                }

                let report = audit(&row, &txs);
                prop_assert!(report.consistent);
                prop_assert_eq!(report.on_hand, row.quantity());
            }

            #[test]
            fn usage_is_all_or_nothing(
                stock in proptest::collection::vec(0i64..100, 1..8),
                asks in proptest::collection::vec(1i64..100, 1..8),
            ) {
                let wh = material_warehouse();
                let ids: Vec<MaterialId> = stock.iter().map(|_| MaterialId::new()).collect();
                let rows: Vec<MaterialInventory> = ids
                    .iter()
                    .zip(&stock)
                    .map(|(m, q)| material_row(&wh, *m, Decimal::from(*q)))
                    .collect();
                let usage: BTreeMap<MaterialId, Decimal> = ids
                    .iter()
                    .zip(&asks)
                    .map(|(m, q)| (*m, Decimal::from(*q)))
                    .collect();

                let sufficient = ids.iter().zip(&stock).zip(&asks).all(|((_, s), a)| a <= s);
                match plan_usage(&wh, rows.clone(), &usage, actor(), Utc::now()) {
                    Ok(plan) => {
                        prop_assert!(sufficient);
                        prop_assert_eq!(plan.updates.len(), usage.len());
                        prop_assert_eq!(plan.transactions.len(), usage.len());
                    }
                    Err(DomainError::InsufficientStock { .. }) => prop_assert!(!sufficient),
                    Err(other) => prop_assert!(false, "unexpected error {other}"),
                }
            }
        }
    }
}
