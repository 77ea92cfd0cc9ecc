//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**. In this workspace the
/// in-flight channel messages (`EmailNotice`, `OrderSnapshot`) are value objects: they are
/// built once by the producer and never mutated afterwards.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
