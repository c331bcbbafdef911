//! Aggregate root and owned-entity traits.
//!
//! The root's identity scopes every owned child: children are written,
//! replaced and removed together with the root, never on their own through the
//! aggregate.

/// An entity owned by an aggregate root.
///
/// `Id` only needs to be unique within one root (an invoice line is identified
/// by its product inside its invoice).
pub trait Entity {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;
}

/// Aggregate root marker + minimal interface.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Owned child entity type.
    type Child: Entity;

    fn id(&self) -> &Self::Id;

    /// Owned children in their persisted order.
    fn children(&self) -> &[Self::Child];
}
