use core::fmt::{Debug, Display};

use rust_decimal::Decimal;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Arithmetic needed by the ledger, over whole units (products) or decimal
/// amounts (materials).
pub trait Quantity:
    Copy
    + Debug
    + Display
    + PartialEq
    + PartialOrd
    + Send
    + Sync
    + Serialize
    + DeserializeOwned
    + 'static
{
    fn zero() -> Self;
    fn try_add(self, other: Self) -> Option<Self>;
    fn try_sub(self, other: Self) -> Option<Self>;
    fn negated(self) -> Self;
    /// Lossless view as a decimal, for error payloads and reports.
    fn to_decimal(self) -> Decimal;

    fn is_negative(&self) -> bool {
        *self < Self::zero()
    }

    fn is_positive(&self) -> bool {
        *self > Self::zero()
    }
}

impl Quantity for i64 {
    fn zero() -> Self {
        0
    }

    fn try_add(self, other: Self) -> Option<Self> {
        self.checked_add(other)
    }

    fn try_sub(self, other: Self) -> Option<Self> {
        self.checked_sub(other)
    }

    fn negated(self) -> Self {
        -self
    }

    fn to_decimal(self) -> Decimal {
        Decimal::from(self)
    }
}

impl Quantity for Decimal {
    fn zero() -> Self {
        Decimal::ZERO
    }

    fn try_add(self, other: Self) -> Option<Self> {
        self.checked_add(other)
    }

    fn try_sub(self, other: Self) -> Option<Self> {
        self.checked_sub(other)
    }

    fn negated(self) -> Self {
        -self
    }

    fn to_decimal(self) -> Decimal {
        self
    }
}
