//! `atelier-core`: ids, errors and shared value types.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod entity;
pub mod error;
pub mod id;
pub mod reference;
pub mod value_object;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{
    AddressId, CheckoutSessionId, DesignerId, InventoryRecordId, InventoryTransactionId,
    MaterialId, OrderDetailId, OrderGroupId, OrderId, ProductId, SessionItemId, SupplierId,
    UserId, WarehouseId,
};
pub use reference::{ItemRef, Provider, ProviderFilter, ProviderKind};
pub use value_object::ValueObject;
