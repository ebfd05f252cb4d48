use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use atelier_core::{
    AddressId, CheckoutSessionId, DomainError, DomainResult, Entity, Provider, ProviderFilter,
    SessionItemId, UserId,
};

use crate::item::{CheckoutSessionItem, DisplaySnapshot, NewSessionItem};
use crate::totals::SessionTotals;

/// Hold applied when the caller does not ask for a positive one.
pub const DEFAULT_HOLD_MINUTES: i64 = 30;

/// Checkout session status lifecycle.
///
/// `Expired` is never written by this core; it is the effective status of an
/// `Active` session read after its expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckoutStatus {
    Active,
    Completed,
    Expired,
}

impl CheckoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "expired" => Ok(Self::Expired),
            other => Err(DomainError::invalid_state(format!(
                "unknown checkout status '{other}'"
            ))),
        }
    }
}

/// Shipping address as given at session creation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionAddress {
    pub address_id: Option<AddressId>,
    /// Formatted address text, if known.
    pub snapshot: Option<String>,
}

/// Items of one provider, for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderGroup {
    pub provider: Provider,
    pub display: DisplaySnapshot,
    pub item_ids: Vec<SessionItemId>,
    pub subtotal: Decimal,
    /// Sum of quantities.
    pub item_count: u64,
}

/// A time-bounded staging cart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    id: CheckoutSessionId,
    shopper_id: UserId,
    status: CheckoutStatus,
    address: SessionAddress,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    totals: SessionTotals,
    items: Vec<CheckoutSessionItem>,
}

impl CheckoutSession {
    /// Open a new, empty session.
    ///
    /// A hold of zero or less falls back to [`DEFAULT_HOLD_MINUTES`].
    pub fn open(
        id: CheckoutSessionId,
        shopper_id: UserId,
        address: SessionAddress,
        hold_minutes: i64,
        now: DateTime<Utc>,
    ) -> Self {
        let hold = if hold_minutes <= 0 {
            DEFAULT_HOLD_MINUTES
        } else {
            hold_minutes
        };

        Self {
            id,
            shopper_id,
            status: CheckoutStatus::Active,
            address,
            created_at: now,
            expires_at: now + Duration::minutes(hold),
            totals: SessionTotals::default(),
            items: Vec::new(),
        }
    }

    /// Rebuild a session from storage. Totals are recomputed from the items.
    pub fn restore(
        id: CheckoutSessionId,
        shopper_id: UserId,
        status: CheckoutStatus,
        address: SessionAddress,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        items: Vec<CheckoutSessionItem>,
    ) -> DomainResult<Self> {
        let totals = SessionTotals::compute(&items)?;
        Ok(Self {
            id,
            shopper_id,
            status,
            address,
            created_at,
            expires_at,
            totals,
            items,
        })
    }

    pub fn shopper_id(&self) -> UserId {
        self.shopper_id
    }

    /// Stored status.
    pub fn status(&self) -> CheckoutStatus {
        self.status
    }

    /// Status as a reader should treat it at `now`.
    pub fn effective_status(&self, now: DateTime<Utc>) -> CheckoutStatus {
        if self.is_expired(now) {
            CheckoutStatus::Expired
        } else {
            self.status
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            CheckoutStatus::Active => now >= self.expires_at,
            CheckoutStatus::Expired => true,
            CheckoutStatus::Completed => false,
        }
    }

    pub fn address(&self) -> &SessionAddress {
        &self.address
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Cached totals over every staged item, selected or not.
    pub fn totals(&self) -> SessionTotals {
        self.totals
    }

    pub fn items(&self) -> &[CheckoutSessionItem] {
        &self.items
    }

    pub fn selected_items(&self) -> impl Iterator<Item = &CheckoutSessionItem> {
        self.items.iter().filter(|i| i.selected)
    }

    /// Totals over the currently selected subset (what the shopper is about to buy).
    pub fn selected_preview(&self) -> DomainResult<SessionTotals> {
        SessionTotals::compute(self.selected_items())
    }

    pub fn ensure_owned_by(&self, shopper_id: UserId) -> DomainResult<()> {
        if self.shopper_id != shopper_id {
            return Err(DomainError::forbidden(format!(
                "checkout session {} does not belong to user {}",
                self.id, shopper_id
            )));
        }
        Ok(())
    }

    /// The session must be Active and unexpired to be mutated.
    pub fn ensure_open(&self, now: DateTime<Utc>) -> DomainResult<()> {
        match self.status {
            CheckoutStatus::Completed => Err(DomainError::conflict(format!(
                "checkout session {} is already completed",
                self.id
            ))),
            _ if self.is_expired(now) => Err(DomainError::invalid_state(format!(
                "checkout session {} expired at {}",
                self.id, self.expires_at
            ))),
            _ => Ok(()),
        }
    }

    /// Stage one more item and recompute totals.
    pub fn stage(
        &mut self,
        item_id: SessionItemId,
        new: NewSessionItem,
        now: DateTime<Utc>,
    ) -> DomainResult<&CheckoutSessionItem> {
        self.ensure_open(now)?;
        let item = CheckoutSessionItem::stage(item_id, self.id, new, now)?;
        self.totals = SessionTotals::compute(self.items.iter().chain([&item]))?;
        self.items.push(item);
        Ok(&self.items[self.items.len() - 1])
    }

    /// Deselect everything, then select exactly the listed items that also
    /// pass `filter`. Idempotent.
    pub fn apply_selection(
        &mut self,
        selected: &[SessionItemId],
        filter: &ProviderFilter,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_open(now)?;
        for item in &mut self.items {
            item.selected = selected.contains(&item.id) && filter.matches(&item.provider);
        }
        // Cached totals span every item, so they do not move with the selection.
        Ok(())
    }

    /// Items grouped by provider, in order of first appearance.
    pub fn provider_groups(&self) -> DomainResult<Vec<ProviderGroup>> {
        let mut groups: Vec<ProviderGroup> = Vec::new();
        for item in &self.items {
            let total = item.total()?;
            match groups.iter_mut().find(|g| g.provider == item.provider) {
                Some(group) => {
                    group.item_ids.push(item.id);
                    group.subtotal = group.subtotal.checked_add(total).ok_or_else(|| {
                        DomainError::invalid_request(format!(
                            "subtotal for {} overflows",
                            item.provider
                        ))
                    })?;
                    group.item_count += u64::from(item.quantity);
                }
                None => groups.push(ProviderGroup {
                    provider: item.provider,
                    display: item.display.clone(),
                    item_ids: vec![item.id],
                    subtotal: total,
                    item_count: u64::from(item.quantity),
                }),
            }
        }
        Ok(groups)
    }

    pub(crate) fn mark_completed(&mut self) {
        self.status = CheckoutStatus::Completed;
    }
}

impl Entity for CheckoutSession {
    type Id = CheckoutSessionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
