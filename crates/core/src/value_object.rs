//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values. A guarantor
/// entry inside a `GuarantorCreated` event is one: two entries with the same fields
/// are the same fact, even though the stream keeps both when both were appended.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
