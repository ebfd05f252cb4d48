//! Inventory domain: stock records, the append-only transaction ledger, and
//! designer warehouses.
//!
//! Pure logic only. Stores load rows, call a planner, and persist the plan in
//! one atomic unit.

pub mod ledger;
pub mod quantity;
pub mod record;
pub mod transaction;
pub mod warehouse;

pub use ledger::{
    LedgerAudit, LedgerPolicy, MaterialChange, ProductChange, RestockPlan, StockChange, UsagePlan,
    audit, plan_restock, plan_usage,
};
pub use quantity::Quantity;
pub use record::{
    InventoryRecord, MaterialInventory, MaterialStock, ProductInventory, ProductStock, StockKey,
    StockKind,
};
pub use transaction::{
    InventoryTransaction, MaterialTransaction, ProductTransaction, TransactionType,
};
pub use warehouse::{Warehouse, WarehouseKind};
