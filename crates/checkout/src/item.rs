use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use atelier_core::{
    CheckoutSessionId, DomainError, DomainResult, Entity, ItemRef, Provider, SessionItemId,
};

/// Provider name/avatar captured when the item was staged.
///
/// Intentionally stale: this is what the shopper saw at add-time, not a live
/// join against the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DisplaySnapshot {
    pub provider_name: Option<String>,
    pub provider_avatar: Option<String>,
}

/// An item resolved against the catalog and ready to be staged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSessionItem {
    pub item: ItemRef,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub provider: Provider,
    pub display: DisplaySnapshot,
}

/// One staged line item.
///
/// Quantity and unit price are snapshotted at add-time and never updated in
/// place; only the `selected` flag changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSessionItem {
    pub id: SessionItemId,
    pub session_id: CheckoutSessionId,
    pub item: ItemRef,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub provider: Provider,
    pub display: DisplaySnapshot,
    pub selected: bool,
    pub created_at: DateTime<Utc>,
}

impl CheckoutSessionItem {
    pub fn stage(
        id: SessionItemId,
        session_id: CheckoutSessionId,
        new: NewSessionItem,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if new.quantity == 0 {
            return Err(DomainError::invalid_request(format!(
                "quantity for {} must be positive",
                new.item
            )));
        }
        if new.unit_price.is_sign_negative() {
            return Err(DomainError::invalid_request(format!(
                "unit price for {} cannot be negative, got {}",
                new.item, new.unit_price
            )));
        }

        let staged = Self {
            id,
            session_id,
            item: new.item,
            quantity: new.quantity,
            unit_price: new.unit_price,
            provider: new.provider,
            display: new.display,
            selected: true,
            created_at,
        };
        staged.total()?;
        Ok(staged)
    }

    /// quantity × unit price
    pub fn total(&self) -> DomainResult<Decimal> {
        self.unit_price
            .checked_mul(Decimal::from(self.quantity))
            .ok_or_else(|| {
                DomainError::invalid_request(format!(
                    "line total for {} overflows: {} x {}",
                    self.item, self.quantity, self.unit_price
                ))
            })
    }
}

impl Entity for CheckoutSessionItem {
    type Id = SessionItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
