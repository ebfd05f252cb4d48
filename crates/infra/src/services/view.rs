//! Read models returned by `CreateSession` and `GetSession`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use atelier_checkout::{CheckoutSessionItem, CheckoutStatus, SessionAddress, SessionTotals};
use atelier_core::{CheckoutSessionId, DomainResult, Provider, SessionItemId, UserId};

use crate::external::CatalogEntry;

/// Shown when neither the catalog nor the staged snapshot has a name.
pub(crate) const UNKNOWN_LABEL: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemView {
    pub item: CheckoutSessionItem,
    pub total: Decimal,
    pub display_name: String,
    pub image: Option<String>,
    pub provider_name: String,
    pub provider_avatar: Option<String>,
}

impl ItemView {
    /// Prefer live catalog data, then the snapshot taken at staging time.
    pub(crate) fn decorate(
        item: CheckoutSessionItem,
        entry: Option<&CatalogEntry>,
    ) -> DomainResult<Self> {
        let display_name = entry
            .and_then(|e| e.display_name.clone())
            .unwrap_or_else(|| UNKNOWN_LABEL.to_string());
        let image = entry.and_then(|e| e.image.clone());
        let provider_name = entry
            .and_then(|e| e.provider_name.clone())
            .or_else(|| item.display.provider_name.clone())
            .unwrap_or_else(|| UNKNOWN_LABEL.to_string());
        let provider_avatar = entry
            .and_then(|e| e.provider_avatar.clone())
            .or_else(|| item.display.provider_avatar.clone());

        Ok(Self {
            total: item.total()?,
            item,
            display_name,
            image,
            provider_name,
            provider_avatar,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderGroupView {
    pub provider: Provider,
    pub provider_name: String,
    pub provider_avatar: Option<String>,
    pub item_ids: Vec<SessionItemId>,
    pub subtotal: Decimal,
    pub item_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionView {
    pub id: CheckoutSessionId,
    pub shopper_id: UserId,
    /// `Expired` once the hold has lapsed, even if never persisted as such.
    pub status: CheckoutStatus,
    pub address: SessionAddress,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub totals: SessionTotals,
    pub selected_totals: SessionTotals,
    pub items: Vec<ItemView>,
    pub providers: Vec<ProviderGroupView>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_checkout::DisplaySnapshot;
    use atelier_core::{ItemRef, MaterialId, SupplierId};

    fn staged(display: DisplaySnapshot) -> CheckoutSessionItem {
        CheckoutSessionItem {
            id: SessionItemId::new(),
            session_id: CheckoutSessionId::new(),
            item: ItemRef::Material(MaterialId::new()),
            quantity: 3,
            unit_price: Decimal::new(250, 2),
            provider: Provider::Supplier(SupplierId::new()),
            display,
            selected: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn missing_decoration_degrades_to_snapshot_then_unknown() {
        let with_snapshot = staged(DisplaySnapshot {
            provider_name: Some("Loom & Co".into()),
            provider_avatar: None,
        });
        let view = ItemView::decorate(with_snapshot, None).unwrap();
        assert_eq!(view.provider_name, "Loom & Co");
        assert_eq!(view.display_name, UNKNOWN_LABEL);
        assert_eq!(view.total, Decimal::new(750, 2));

        let bare = ItemView::decorate(staged(DisplaySnapshot::default()), None).unwrap();
        assert_eq!(bare.provider_name, UNKNOWN_LABEL);
        assert!(bare.image.is_none());
    }

    #[test]
    fn catalog_data_wins_over_snapshot() {
        let item = staged(DisplaySnapshot {
            provider_name: Some("Old name".into()),
            provider_avatar: Some("old.png".into()),
        });
        let entry = CatalogEntry {
            item: item.item,
            unit_price: item.unit_price,
            provider: item.provider,
            display_name: Some("Raw silk".into()),
            image: Some("silk.png".into()),
            provider_name: Some("New name".into()),
            provider_avatar: None,
        };
        let view = ItemView::decorate(item, Some(&entry)).unwrap();
        assert_eq!(view.display_name, "Raw silk");
        assert_eq!(view.provider_name, "New name");
        assert_eq!(view.provider_avatar.as_deref(), Some("old.png"));
    }
}
