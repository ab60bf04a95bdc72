//! Value object trait: equality by value, not identity.

/// Marker trait for immutable, value-compared domain objects.
///
/// Two value objects with the same attribute values are equal; identity does
/// not exist for them. "Modifying" a value object means constructing a new
/// one.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
