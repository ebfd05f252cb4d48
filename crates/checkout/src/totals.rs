//! Totals maintenance.
//!
//! Always a full recomputation from the item set; there are no incremental
//! counters.

use std::collections::HashSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use atelier_core::{DomainError, DomainResult};

use crate::item::CheckoutSessionItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionTotals {
    pub total_amount: Decimal,
    /// Sum of quantities.
    pub total_items: u64,
    /// Number of distinct providers.
    pub total_providers: u32,
}

impl SessionTotals {
    /// Fails when the amount leaves the range of `Decimal`.
    pub fn compute<'a>(
        items: impl IntoIterator<Item = &'a CheckoutSessionItem>,
    ) -> DomainResult<Self> {
        let mut total_amount = Decimal::ZERO;
        let mut total_items = 0u64;
        let mut providers = HashSet::new();

        for item in items {
            total_amount = total_amount
                .checked_add(item.total()?)
                .ok_or_else(|| DomainError::invalid_request("session total overflows"))?;
            total_items += u64::from(item.quantity);
            providers.insert(item.provider);
        }

        let total_providers = u32::try_from(providers.len())
            .map_err(|_| DomainError::invalid_request("too many providers in one session"))?;

        Ok(Self {
            total_amount,
            total_items,
            total_providers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::{material_from, open_session};
    use atelier_core::{SessionItemId, SupplierId};
    use chrono::Utc;

    #[test]
    fn empty_set_is_zero() {
        assert_eq!(
            SessionTotals::compute(&Vec::<CheckoutSessionItem>::new()).unwrap(),
            SessionTotals::default()
        );
    }

    #[test]
    fn sum_past_decimal_range_is_rejected() {
        let now = Utc::now();
        let supplier = SupplierId::new();
        let mut s = open_session(now);
        let mut half = material_from(supplier, 1, 0);
        half.unit_price = Decimal::MAX / Decimal::from(2) + Decimal::ONE;
        s.stage(SessionItemId::new(), half.clone(), now).unwrap();

        let err = s.stage(SessionItemId::new(), half, now).unwrap_err();
        assert!(matches!(err, DomainError::InvalidRequest(_)));
        assert_eq!(s.items().len(), 1);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: recomputation does not depend on item order.
            #[test]
            fn totals_are_order_independent(
                lines in prop::collection::vec((0usize..3, 1u32..50, 0i64..500), 0..20),
                rotate in 0usize..20,
            ) {
                let now = Utc::now();
                let suppliers: Vec<SupplierId> = (0..3).map(|_| SupplierId::new()).collect();
                let mut s = open_session(now);
                for (who, qty, price) in &lines {
                    let new = material_from(suppliers[*who], *qty, *price);
                    s.stage(SessionItemId::new(), new, now).unwrap();
                }

                let mut shuffled: Vec<&CheckoutSessionItem> = s.items().iter().collect();
                if !shuffled.is_empty() {
                    let by = rotate % shuffled.len();
                    shuffled.rotate_left(by);
                }
                shuffled.reverse();

                prop_assert_eq!(SessionTotals::compute(shuffled).unwrap(), s.totals());
            }
        }
    }
}
