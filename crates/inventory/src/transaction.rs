use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use atelier_core::{DomainError, DomainResult, InventoryRecordId, InventoryTransactionId, UserId};

use crate::quantity::Quantity;
use crate::record::{InventoryRecord, MaterialStock, ProductStock, StockKind};

/// Why a stock level changed. Unknown labels round-trip through `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum TransactionType {
    Restock,
    Usage,
    Other(String),
}

impl TransactionType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Restock => "restock",
            Self::Usage => "usage",
            Self::Other(label) => label,
        }
    }

    pub fn parse(label: &str) -> Self {
        match label {
            "restock" => Self::Restock,
            "usage" => Self::Usage,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for TransactionType {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<TransactionType> for String {
    fn from(value: TransactionType) -> Self {
        value.as_str().to_string()
    }
}

/// Append-only record of a single change to an inventory record.
///
/// `quantity_after` is always `quantity_before + delta`; the constructor is
/// the only way to produce one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct InventoryTransaction<K: StockKind> {
    pub id: InventoryTransactionId,
    pub record_id: InventoryRecordId,
    pub item_id: K::ItemId,
    pub kind: TransactionType,
    delta: K::Quantity,
    quantity_before: K::Quantity,
    quantity_after: K::Quantity,
    pub note: String,
    pub actor: UserId,
    pub created_at: DateTime<Utc>,
}

pub type ProductTransaction = InventoryTransaction<ProductStock>;
pub type MaterialTransaction = InventoryTransaction<MaterialStock>;

impl<K: StockKind> InventoryTransaction<K> {
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        id: InventoryTransactionId,
        record: &InventoryRecord<K>,
        kind: TransactionType,
        delta: K::Quantity,
        quantity_before: K::Quantity,
        note: impl Into<String>,
        actor: UserId,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let quantity_after = quantity_before.try_add(delta).ok_or_else(|| {
            DomainError::invalid_request(format!(
                "{} {} quantity overflow",
                K::LABEL,
                record.item_id()
            ))
        })?;
        Ok(Self {
            id,
            record_id: record.id,
            item_id: record.item_id(),
            kind,
            delta,
            quantity_before,
            quantity_after,
            note: note.into(),
            actor,
            created_at,
        })
    }

    /// Rebuild from storage, checking the before/after arithmetic.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: InventoryTransactionId,
        record_id: InventoryRecordId,
        item_id: K::ItemId,
        kind: TransactionType,
        delta: K::Quantity,
        quantity_before: K::Quantity,
        quantity_after: K::Quantity,
        note: String,
        actor: UserId,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if quantity_before.try_add(delta) != Some(quantity_after) {
            return Err(DomainError::invalid_state(format!(
                "transaction {id}: {quantity_before} + {delta} != {quantity_after}"
            )));
        }
        Ok(Self {
            id,
            record_id,
            item_id,
            kind,
            delta,
            quantity_before,
            quantity_after,
            note,
            actor,
            created_at,
        })
    }

    pub fn delta(&self) -> K::Quantity {
        self.delta
    }

    pub fn quantity_before(&self) -> K::Quantity {
        self.quantity_before
    }

    pub fn quantity_after(&self) -> K::Quantity {
        self.quantity_after
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_labels_survive_a_round_trip() {
        assert_eq!(TransactionType::parse("restock"), TransactionType::Restock);
        let t = TransactionType::parse("adjustment");
        assert_eq!(t, TransactionType::Other("adjustment".into()));
        assert_eq!(t.as_str(), "adjustment");
    }
}
