//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects have no identity: two instances with the same attribute values
/// are the same value. They are immutable; "changing" one means building a new one.
///
/// - **Value Object**: `ItemRef::Material(id)`, `Provider::Supplier(id)`
/// - **Entity**: `CheckoutSession { id, .. }`, `Order { id, .. }`
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
