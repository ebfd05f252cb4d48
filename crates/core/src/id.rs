//! Strongly-typed identifiers used across the domain.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

macro_rules! uuid_newtype {
    ($(#[$meta:meta])* $t:ident, $name:literal) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $t(Uuid);

        impl $t {
            /// Create a new identifier.
            ///
            /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in tests
            /// for determinism.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s)
                    .map_err(|e| DomainError::invalid_request(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

uuid_newtype!(
    /// Acting user (shopper, operator, designer account).
    UserId,
    "UserId"
);
uuid_newtype!(CheckoutSessionId, "CheckoutSessionId");
uuid_newtype!(SessionItemId, "SessionItemId");
uuid_newtype!(MaterialId, "MaterialId");
uuid_newtype!(ProductId, "ProductId");
uuid_newtype!(SupplierId, "SupplierId");
uuid_newtype!(DesignerId, "DesignerId");
uuid_newtype!(AddressId, "AddressId");
uuid_newtype!(WarehouseId, "WarehouseId");
uuid_newtype!(OrderGroupId, "OrderGroupId");
uuid_newtype!(OrderId, "OrderId");
uuid_newtype!(OrderDetailId, "OrderDetailId");
uuid_newtype!(
    /// Identifier of one inventory row (product or material variant).
    InventoryRecordId,
    "InventoryRecordId"
);
uuid_newtype!(InventoryTransactionId, "InventoryTransactionId");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_display() {
        let id = OrderId::new();
        let parsed: OrderId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn parse_failure_is_invalid_request() {
        let err = "not-a-uuid".parse::<MaterialId>().unwrap_err();
        match err {
            DomainError::InvalidRequest(msg) => assert!(msg.starts_with("MaterialId")),
            other => panic!("expected InvalidRequest, got {other:?}"),
        }
    }
}
