//! Entities: records that keep their identity while their state changes.

/// Something addressed by id rather than by value.
///
/// A checkout session stays the same session as items are staged and its
/// status flips; an inventory record stays the same row as its quantity moves.
pub trait Entity {
    type Id: Copy + Eq + core::hash::Hash + core::fmt::Debug + core::fmt::Display;

    fn id(&self) -> &Self::Id;
}
