use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use atelier_core::{
    CheckoutSessionId, DomainError, DomainResult, Entity, ItemRef, OrderDetailId, OrderGroupId,
    OrderId, Provider, UserId,
};

/// Order status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

status_labels!(OrderStatus, "order status", {
    Pending => "pending",
    Confirmed => "confirmed",
    Cancelled => "cancelled",
    Completed => "completed",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

status_labels!(PaymentStatus, "payment status", {
    Pending => "Pending",
    Paid => "Paid",
    Failed => "Failed",
    Refunded => "Refunded",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FulfillmentStatus {
    None,
    Processing,
    Shipped,
    Delivered,
}

status_labels!(FulfillmentStatus, "fulfillment status", {
    None => "None",
    Processing => "Processing",
    Shipped => "Shipped",
    Delivered => "Delivered",
});

/// Per-line status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineStatus {
    Pending,
    Fulfilled,
    Cancelled,
}

status_labels!(LineStatus, "line status", {
    Pending => "pending",
    Fulfilled => "fulfilled",
    Cancelled => "cancelled",
});

/// One line inside an order. Quantity and unit price are copied from the
/// staged item and never recomputed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDetail {
    pub id: OrderDetailId,
    pub order_id: OrderId,
    pub item: ItemRef,
    pub seller: Provider,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub status: LineStatus,
}

impl OrderDetail {
    pub fn line_total(&self) -> DomainResult<Decimal> {
        self.unit_price
            .checked_mul(Decimal::from(self.quantity))
            .ok_or_else(|| {
                DomainError::invalid_request(format!("line total of detail {} overflows", self.id))
            })
    }
}

impl Entity for OrderDetail {
    type Id = OrderDetailId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Header fields of an order about to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub id: OrderId,
    pub shopper_id: UserId,
    pub group_id: Option<OrderGroupId>,
    pub session_id: Option<CheckoutSessionId>,
    pub seller: Provider,
    pub shipping_address: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// One provider's slice of a split (or a standalone order).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub shopper_id: UserId,
    pub group_id: Option<OrderGroupId>,
    pub session_id: Option<CheckoutSessionId>,
    seller: Provider,
    pub shipping_address: String,
    pub subtotal: Decimal,
    pub shipping_fee: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub fulfillment_status: FulfillmentStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Create an order whose subtotal is the sum of its lines.
    ///
    /// Shipping fee and discount start at zero. Every line must belong to this
    /// order and to the same seller.
    pub fn open(new: NewOrder, details: &[OrderDetail]) -> DomainResult<Self> {
        if details.is_empty() {
            return Err(DomainError::invalid_request("an order needs at least one line"));
        }
        for d in details {
            if d.order_id != new.id {
                return Err(DomainError::invalid_state(format!(
                    "order detail {} belongs to order {}, not {}",
                    d.id, d.order_id, new.id
                )));
            }
            if d.seller != new.seller {
                return Err(DomainError::invalid_state(format!(
                    "order detail {} is sold by {}, order seller is {}",
                    d.id, d.seller, new.seller
                )));
            }
        }

        let mut subtotal = Decimal::ZERO;
        for d in details {
            subtotal = subtotal
                .checked_add(d.line_total()?)
                .ok_or_else(|| DomainError::invalid_request("order subtotal overflows"))?;
        }

        Ok(Self {
            id: new.id,
            shopper_id: new.shopper_id,
            group_id: new.group_id,
            session_id: new.session_id,
            seller: new.seller,
            shipping_address: new.shipping_address,
            subtotal,
            shipping_fee: Decimal::ZERO,
            discount: Decimal::ZERO,
            total: subtotal,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            fulfillment_status: FulfillmentStatus::None,
            expires_at: new.expires_at,
            created_at: new.created_at,
        })
    }

    /// Rebuild an order from storage.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: OrderId,
        shopper_id: UserId,
        group_id: Option<OrderGroupId>,
        session_id: Option<CheckoutSessionId>,
        seller: Provider,
        shipping_address: String,
        amounts: OrderAmounts,
        statuses: (OrderStatus, PaymentStatus, FulfillmentStatus),
        expires_at: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            shopper_id,
            group_id,
            session_id,
            seller,
            shipping_address,
            subtotal: amounts.subtotal,
            shipping_fee: amounts.shipping_fee,
            discount: amounts.discount,
            total: amounts.total,
            status: statuses.0,
            payment_status: statuses.1,
            fulfillment_status: statuses.2,
            expires_at,
            created_at,
        }
    }

    /// Seller attribution; fixed at creation.
    pub fn seller(&self) -> Provider {
        self.seller
    }

    /// Set shipping fee and discount; total becomes `subtotal - discount + shipping_fee`.
    pub fn adjust(&mut self, shipping_fee: Decimal, discount: Decimal) -> DomainResult<()> {
        if shipping_fee.is_sign_negative() || discount.is_sign_negative() {
            return Err(DomainError::invalid_request(
                "shipping fee and discount cannot be negative",
            ));
        }
        let gross = self
            .subtotal
            .checked_add(shipping_fee)
            .ok_or_else(|| DomainError::invalid_request("shipping fee overflows the order total"))?;
        if discount > gross {
            return Err(DomainError::invalid_request(format!(
                "discount {discount} exceeds order amount {gross}"
            )));
        }
        self.shipping_fee = shipping_fee;
        self.discount = discount;
        self.total = gross - discount;
        Ok(())
    }

    pub fn summary(&self) -> OrderSummary {
        OrderSummary {
            order_id: self.id,
            seller: self.seller,
            subtotal: self.subtotal,
            shipping_fee: self.shipping_fee,
            discount: self.discount,
            total: self.total,
            payment_status: self.payment_status,
        }
    }
}

impl Entity for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Stored money columns of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderAmounts {
    pub subtotal: Decimal,
    pub shipping_fee: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
}

/// Per-order entry of a split response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSummary {
    pub order_id: OrderId,
    pub seller: Provider,
    pub subtotal: Decimal,
    pub shipping_fee: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    pub payment_status: PaymentStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_core::{MaterialId, SupplierId};
    use chrono::Duration;

    fn new_order(seller: Provider) -> NewOrder {
        let now = Utc::now();
        NewOrder {
            id: OrderId::new(),
            shopper_id: UserId::new(),
            group_id: Some(OrderGroupId::new()),
            session_id: Some(CheckoutSessionId::new()),
            seller,
            shipping_address: "1 Loom Street".to_string(),
            expires_at: now + Duration::minutes(30),
            created_at: now,
        }
    }

    fn line(order_id: OrderId, seller: Provider, quantity: u32, unit_price: i64) -> OrderDetail {
        OrderDetail {
            id: OrderDetailId::new(),
            order_id,
            item: ItemRef::Material(MaterialId::new()),
            seller,
            quantity,
            unit_price: Decimal::from(unit_price),
            status: LineStatus::Pending,
        }
    }

    #[test]
    fn open_sums_lines_into_subtotal_and_total() {
        let seller = Provider::Supplier(SupplierId::new());
        let new = new_order(seller);
        let lines = vec![line(new.id, seller, 3, 100), line(new.id, seller, 2, 25)];

        let order = Order::open(new, &lines).unwrap();

        assert_eq!(order.subtotal, Decimal::from(350));
        assert_eq!(order.total, Decimal::from(350));
        assert_eq!(order.shipping_fee, Decimal::ZERO);
        assert_eq!(order.discount, Decimal::ZERO);
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.payment_status, PaymentStatus::Pending);
        assert_eq!(order.fulfillment_status, FulfillmentStatus::None);
    }

    #[test]
    fn open_rejects_lines_from_another_seller() {
        let seller = Provider::Supplier(SupplierId::new());
        let other = Provider::Supplier(SupplierId::new());
        let new = new_order(seller);
        let lines = vec![line(new.id, other, 1, 10)];

        assert!(matches!(Order::open(new, &lines), Err(DomainError::InvalidState(_))));
    }

    #[test]
    fn open_rejects_empty_orders() {
        let seller = Provider::Supplier(SupplierId::new());
        assert!(matches!(
            Order::open(new_order(seller), &[]),
            Err(DomainError::InvalidRequest(_))
        ));
    }

    #[test]
    fn open_rejects_subtotals_beyond_decimal_range() {
        let seller = Provider::Supplier(SupplierId::new());
        let new = new_order(seller);
        let mut lines = vec![line(new.id, seller, 2, 0)];
        lines[0].unit_price = Decimal::MAX;

        assert!(matches!(Order::open(new, &lines), Err(DomainError::InvalidRequest(_))));
    }

    #[test]
    fn adjust_recomputes_total() {
        let seller = Provider::Supplier(SupplierId::new());
        let new = new_order(seller);
        let lines = vec![line(new.id, seller, 1, 500)];
        let mut order = Order::open(new, &lines).unwrap();

        order.adjust(Decimal::from(20), Decimal::from(50)).unwrap();
        assert_eq!(order.total, Decimal::from(470));

        assert!(order.adjust(Decimal::ZERO, Decimal::from(1000)).is_err());
        assert_eq!(order.total, Decimal::from(470));
    }

    #[test]
    fn status_labels_round_trip() {
        assert_eq!(OrderStatus::parse("pending").unwrap(), OrderStatus::Pending);
        assert_eq!(PaymentStatus::parse("Pending").unwrap(), PaymentStatus::Pending);
        assert_eq!(FulfillmentStatus::parse("None").unwrap(), FulfillmentStatus::None);
        assert_eq!(LineStatus::parse(LineStatus::Pending.as_str()).unwrap(), LineStatus::Pending);
        assert!(OrderStatus::parse("shipped").is_err());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: subtotal equals the sum of line totals.
            #[test]
            fn subtotal_is_sum_of_lines(
                lines in prop::collection::vec((1u32..50, 0i64..10_000), 1..20)
            ) {
                let seller = Provider::Supplier(SupplierId::new());
                let new = new_order(seller);
                let details: Vec<_> = lines
                    .iter()
                    .map(|(q, p)| line(new.id, seller, *q, *p))
                    .collect();
                let expected: Decimal = lines
                    .iter()
                    .map(|(q, p)| Decimal::from(*p) * Decimal::from(*q))
                    .sum();

                let order = Order::open(new, &details).unwrap();
                prop_assert_eq!(order.subtotal, expected);
                prop_assert_eq!(order.total, expected);
            }
        }
    }
}
