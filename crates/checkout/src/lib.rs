//! Checkout domain module.
//!
//! Staging carts (checkout sessions), their totals and selection state, and the
//! split of a session into one order per provider. Pure domain logic: the
//! infrastructure layer loads and persists, this crate decides.

pub mod item;
pub mod session;
pub mod split;
pub mod totals;

pub use item::{CheckoutSessionItem, DisplaySnapshot, NewSessionItem};
pub use session::{
    CheckoutSession, CheckoutStatus, DEFAULT_HOLD_MINUTES, ProviderGroup, SessionAddress,
};
pub use split::{SplitContext, SplitMode, SplitPlan, SplitRequest, SplitResponse, plan_split};
pub use totals::SessionTotals;
