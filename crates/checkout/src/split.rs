//! Splitting a checkout session into one order per provider.
//!
//! `plan_split` is pure: it validates, partitions and builds every record the
//! split will create, and flips the session to `Completed` in memory. The store
//! persists the plan as one atomic unit.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use atelier_core::{
    AddressId, CheckoutSessionId, DomainError, DomainResult, Entity, OrderDetailId, OrderGroupId,
    OrderId, Provider, ProviderFilter, SessionItemId, UserId,
};
use atelier_orders::{LineStatus, NewOrder, Order, OrderDetail, OrderGroup, OrderSummary};

use crate::item::CheckoutSessionItem;
use crate::session::CheckoutSession;

/// Which items of the session go into the split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SplitMode {
    /// Explicit item ids, or the session's current selection when `None`.
    Selected(Option<Vec<SessionItemId>>),
    /// Items sold by one provider.
    ByProvider(ProviderFilter),
    /// Every staged item.
    All,
}

impl SplitMode {
    /// Build a mode from its request name (`selected`, `byProvider`, `all`).
    pub fn parse(
        mode: &str,
        selected_item_ids: Option<Vec<SessionItemId>>,
        provider_filter: Option<ProviderFilter>,
    ) -> DomainResult<Self> {
        match mode {
            "selected" => Ok(Self::Selected(selected_item_ids)),
            "byProvider" => match provider_filter {
                Some(filter) if filter.id.is_some() => Ok(Self::ByProvider(filter)),
                _ => Err(DomainError::invalid_request(
                    "mode 'byProvider' requires a provider id",
                )),
            },
            "all" => Ok(Self::All),
            other => Err(DomainError::invalid_request(format!(
                "unknown checkout mode '{other}' (expected selected, byProvider or all)"
            ))),
        }
    }

    fn includes(&self, item: &CheckoutSessionItem) -> bool {
        match self {
            Self::Selected(Some(ids)) => ids.contains(&item.id),
            Self::Selected(None) => item.selected,
            Self::ByProvider(filter) => filter.matches(&item.provider),
            Self::All => true,
        }
    }
}

/// A split as requested by the shopper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitRequest {
    pub session_id: CheckoutSessionId,
    pub shopper_id: UserId,
    pub mode: SplitMode,
    /// Explicit address text; wins over everything else.
    pub shipping_address: Option<String>,
    /// Address book entry, formatted by the address service.
    pub address_id: Option<AddressId>,
}

/// Inputs of `plan_split` that do not come from the session.
#[derive(Debug, Clone)]
pub struct SplitContext<'a> {
    pub shopper_id: UserId,
    /// Address resolved from the request (explicit text or address id).
    pub requested_address: Option<String>,
    pub fallback_address: &'a str,
    pub group_hold: Duration,
    pub now: DateTime<Utc>,
}

/// Everything one split creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitPlan {
    pub session_id: CheckoutSessionId,
    pub group: OrderGroup,
    pub orders: Vec<(Order, Vec<OrderDetail>)>,
}

impl SplitPlan {
    pub fn response(&self) -> SplitResponse {
        SplitResponse {
            order_group_id: self.group.id,
            expires_at: self.group.expires_at,
            orders: self.orders.iter().map(|(o, _)| o.summary()).collect(),
        }
    }
}

/// Result returned to the caller of a split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitResponse {
    pub order_group_id: OrderGroupId,
    pub expires_at: DateTime<Utc>,
    pub orders: Vec<OrderSummary>,
}

/// Partition the working set by provider and build the order group, orders and
/// details. On success the session is marked `Completed`.
pub fn plan_split(
    session: &mut CheckoutSession,
    mode: &SplitMode,
    ctx: &SplitContext<'_>,
) -> DomainResult<SplitPlan> {
    session.ensure_owned_by(ctx.shopper_id)?;
    session.ensure_open(ctx.now)?;

    let groups = group_by_provider(session.items().iter().filter(|i| mode.includes(i)));
    if groups.is_empty() {
        return Err(DomainError::invalid_request("no items selected"));
    }

    let shipping_address = choose_address(
        ctx.requested_address.as_deref(),
        session,
        ctx.fallback_address,
    );
    let total_orders = u32::try_from(groups.len())
        .map_err(|_| DomainError::invalid_request("too many providers in one split"))?;
    let expires_at = ctx.now + ctx.group_hold;
    let group = OrderGroup::new(
        OrderGroupId::new(),
        ctx.shopper_id,
        total_orders,
        ctx.now,
        expires_at,
    );

    let mut orders = Vec::with_capacity(groups.len());
    for (provider, items) in groups {
        let order_id = OrderId::new();
        let details: Vec<OrderDetail> = items
            .iter()
            .map(|item| OrderDetail {
                id: OrderDetailId::new(),
                order_id,
                item: item.item,
                seller: item.provider,
                quantity: item.quantity,
                unit_price: item.unit_price,
                status: LineStatus::Pending,
            })
            .collect();

        let order = Order::open(
            NewOrder {
                id: order_id,
                shopper_id: ctx.shopper_id,
                group_id: Some(group.id),
                session_id: Some(*session.id()),
                seller: provider,
                shipping_address: shipping_address.clone(),
                expires_at,
                created_at: ctx.now,
            },
            &details,
        )?;
        orders.push((order, details));
    }

    session.mark_completed();

    Ok(SplitPlan {
        session_id: *session.id(),
        group,
        orders,
    })
}

/// Group items by provider, keeping the order in which providers first appear.
fn group_by_provider<'a>(
    items: impl Iterator<Item = &'a CheckoutSessionItem>,
) -> Vec<(Provider, Vec<&'a CheckoutSessionItem>)> {
    let mut groups: Vec<(Provider, Vec<&CheckoutSessionItem>)> = Vec::new();
    for item in items {
        match groups.iter_mut().find(|(p, _)| *p == item.provider) {
            Some((_, members)) => members.push(item),
            None => groups.push((item.provider, vec![item])),
        }
    }
    groups
}

/// requested > session snapshot > fallback
fn choose_address(requested: Option<&str>, session: &CheckoutSession, fallback: &str) -> String {
    requested
        .filter(|a| !a.trim().is_empty())
        .or(session.address().snapshot.as_deref().filter(|a| !a.trim().is_empty()))
        .unwrap_or(fallback)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::{material_from, open_session, product_from};
    use crate::session::{CheckoutStatus, SessionAddress};
    use atelier_core::{DesignerId, SupplierId};
    use rust_decimal::Decimal;

    const FALLBACK: &str = "Address not provided";

    fn ctx(shopper_id: UserId, now: DateTime<Utc>) -> SplitContext<'static> {
        SplitContext {
            shopper_id,
            requested_address: None,
            fallback_address: FALLBACK,
            group_hold: Duration::minutes(30),
            now,
        }
    }

    #[test]
    fn scenario_a_splits_one_order_per_provider() {
        let now = Utc::now();
        let mut s = open_session(now);
        let s1 = SupplierId::new();
        let d1 = DesignerId::new();
        s.stage(SessionItemId::new(), material_from(s1, 3, 100), now).unwrap();
        s.stage(SessionItemId::new(), product_from(d1, 1, 500), now).unwrap();

        let shopper = s.shopper_id();
        let plan = plan_split(&mut s, &SplitMode::All, &ctx(shopper, now)).unwrap();

        assert_eq!(plan.group.total_orders, 2);
        assert_eq!(plan.group.completed_orders, 0);
        assert_eq!(plan.group.expires_at, now + Duration::minutes(30));

        let (supplier_order, supplier_lines) = &plan.orders[0];
        assert_eq!(supplier_order.seller(), Provider::Supplier(s1));
        assert_eq!(supplier_order.subtotal, Decimal::from(300));
        assert_eq!(supplier_lines.len(), 1);
        assert_eq!(supplier_lines[0].quantity, 3);

        let (designer_order, _) = &plan.orders[1];
        assert_eq!(designer_order.seller(), Provider::Designer(d1));
        assert_eq!(designer_order.subtotal, Decimal::from(500));
        assert_eq!(designer_order.expires_at, plan.group.expires_at);

        assert_eq!(s.status(), CheckoutStatus::Completed);
    }

    #[test]
    fn completed_session_cannot_be_split_again() {
        let now = Utc::now();
        let mut s = open_session(now);
        s.stage(SessionItemId::new(), material_from(SupplierId::new(), 1, 1), now).unwrap();
        let shopper = s.shopper_id();
        let c = ctx(shopper, now);

        plan_split(&mut s, &SplitMode::All, &c).unwrap();
        let err = plan_split(&mut s, &SplitMode::All, &c).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn foreign_shopper_is_forbidden_and_session_untouched() {
        let now = Utc::now();
        let mut s = open_session(now);
        s.stage(SessionItemId::new(), material_from(SupplierId::new(), 1, 1), now).unwrap();

        let err = plan_split(&mut s, &SplitMode::All, &ctx(UserId::new(), now)).unwrap_err();
        assert!(matches!(err, DomainError::Forbidden(_)));
        assert_eq!(s.status(), CheckoutStatus::Active);
    }

    #[test]
    fn empty_working_set_is_rejected() {
        let now = Utc::now();
        let mut s = open_session(now);
        s.stage(SessionItemId::new(), material_from(SupplierId::new(), 1, 1), now).unwrap();

        let shopper = s.shopper_id();
        let err = plan_split(&mut s, &SplitMode::Selected(Some(vec![])), &ctx(shopper, now))
            .unwrap_err();
        assert_eq!(err, DomainError::invalid_request("no items selected"));
        assert_eq!(s.status(), CheckoutStatus::Active);
    }

    #[test]
    fn selected_mode_without_ids_uses_session_selection() {
        let now = Utc::now();
        let mut s = open_session(now);
        let s1 = SupplierId::new();
        let d1 = DesignerId::new();
        let keep = s.stage(SessionItemId::new(), product_from(d1, 1, 40), now).unwrap().id;
        s.stage(SessionItemId::new(), material_from(s1, 1, 10), now).unwrap();
        s.apply_selection(&[keep], &ProviderFilter::default(), now).unwrap();

        let shopper = s.shopper_id();
        let plan = plan_split(&mut s, &SplitMode::Selected(None), &ctx(shopper, now)).unwrap();

        assert_eq!(plan.orders.len(), 1);
        assert_eq!(plan.orders[0].0.seller(), Provider::Designer(d1));
        assert_eq!(plan.orders[0].1.len(), 1);
    }

    #[test]
    fn by_provider_matches_supplier_or_designer_id() {
        let now = Utc::now();
        let mut s = open_session(now);
        let s1 = SupplierId::new();
        let d1 = DesignerId::new();
        s.stage(SessionItemId::new(), material_from(s1, 2, 10), now).unwrap();
        s.stage(SessionItemId::new(), product_from(d1, 1, 40), now).unwrap();

        let filter = ProviderFilter::by_id(*s1.as_uuid());
        let mode = SplitMode::parse("byProvider", None, Some(filter)).unwrap();
        let shopper = s.shopper_id();
        let plan = plan_split(&mut s, &mode, &ctx(shopper, now)).unwrap();

        assert_eq!(plan.orders.len(), 1);
        assert_eq!(plan.orders[0].0.subtotal, Decimal::from(20));
    }

    #[test]
    fn mode_parsing_rejects_unknown_and_incomplete_modes() {
        assert!(matches!(
            SplitMode::parse("byProvider", None, None),
            Err(DomainError::InvalidRequest(_))
        ));
        assert!(matches!(
            SplitMode::parse("everything", None, None),
            Err(DomainError::InvalidRequest(_))
        ));
        assert_eq!(SplitMode::parse("all", None, None).unwrap(), SplitMode::All);
    }

    #[test]
    fn address_resolution_prefers_request_then_session_then_fallback() {
        let now = Utc::now();
        let mut s = CheckoutSession::open(
            CheckoutSessionId::new(),
            UserId::new(),
            SessionAddress {
                address_id: None,
                snapshot: Some("12 Session Road".to_string()),
            },
            30,
            now,
        );
        s.stage(SessionItemId::new(), material_from(SupplierId::new(), 1, 1), now).unwrap();

        assert_eq!(choose_address(Some("9 Request Ave"), &s, FALLBACK), "9 Request Ave");
        assert_eq!(choose_address(Some("  "), &s, FALLBACK), "12 Session Road");
        assert_eq!(choose_address(None, &s, FALLBACK), "12 Session Road");

        let bare = open_session(now);
        assert_eq!(choose_address(None, &bare, FALLBACK), FALLBACK);

        let shopper = s.shopper_id();
        let plan = plan_split(&mut s, &SplitMode::All, &ctx(shopper, now)).unwrap();
        assert_eq!(plan.orders[0].0.shipping_address, "12 Session Road");
    }

    #[test]
    fn response_summarises_every_order() {
        let now = Utc::now();
        let mut s = open_session(now);
        s.stage(SessionItemId::new(), material_from(SupplierId::new(), 1, 5), now).unwrap();
        s.stage(SessionItemId::new(), product_from(DesignerId::new(), 2, 7), now).unwrap();

        let shopper = s.shopper_id();
        let plan = plan_split(&mut s, &SplitMode::All, &ctx(shopper, now)).unwrap();
        let response = plan.response();

        assert_eq!(response.order_group_id, plan.group.id);
        assert_eq!(response.orders.len(), 2);
        assert_eq!(response.orders[1].total, Decimal::from(14));
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;
        use std::collections::HashSet;

        proptest! {
            /// Property: split subtotals add up to the working set, and there is
            /// one order per distinct provider.
            #[test]
            fn split_conserves_amounts_and_counts_providers(
                lines in prop::collection::vec((0usize..4, 1u32..20, 0i64..1_000), 1..25)
            ) {
                let now = Utc::now();
                let suppliers: Vec<SupplierId> = (0..4).map(|_| SupplierId::new()).collect();
                let mut s = open_session(now);
                for (who, qty, price) in &lines {
                    let new = material_from(suppliers[*who], *qty, *price);
                    s.stage(SessionItemId::new(), new, now).unwrap();
                }
                let expected: Decimal = s.items().iter().map(|i| i.total().unwrap()).sum();
                let providers: HashSet<_> = s.items().iter().map(|i| i.provider).collect();

                let shopper = s.shopper_id();
                let plan = plan_split(&mut s, &SplitMode::All, &ctx(shopper, now)).unwrap();

                let split_total: Decimal = plan.orders.iter().map(|(o, _)| o.subtotal).sum();
                prop_assert_eq!(split_total, expected);
                prop_assert_eq!(plan.group.total_orders as usize, providers.len());
                prop_assert_eq!(plan.orders.len(), providers.len());
            }
        }
    }
}
