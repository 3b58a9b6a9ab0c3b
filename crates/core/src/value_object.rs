//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**. A quant key
/// (product, location, lot, owner, package) is a value object; the quant row it
/// addresses is an entity.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
