//! Orders domain module.
//!
//! The durable, immutable-once-created record of what was ordered from each
//! provider, plus the `OrderGroup` that ties one split together. Pure domain
//! logic (no IO, no storage).

/// Storage labels for status enums (`as_str` / `parse`).
macro_rules! status_labels {
    ($t:ident, $what:literal, { $($variant:ident => $label:literal),+ $(,)? }) => {
        impl $t {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $label,)+
                }
            }

            pub fn parse(s: &str) -> atelier_core::DomainResult<Self> {
                match s {
                    $($label => Ok(Self::$variant),)+
                    other => Err(atelier_core::DomainError::invalid_state(format!(
                        "unknown {} '{}'",
                        $what, other
                    ))),
                }
            }
        }
    };
}

pub mod group;
pub mod order;

pub use group::{OrderGroup, OrderGroupStatus};
pub use order::{
    FulfillmentStatus, LineStatus, NewOrder, Order, OrderAmounts, OrderDetail, OrderStatus,
    OrderSummary, PaymentStatus,
};
