use crate::EventEnvelope;

/// A projection builds a read model from published, committed events.
///
/// Projections implement the CQRS read side: they turn the append-only log into
/// rows that can be queried without replaying streams. Read models are disposable
/// and can be rebuilt from the log at any time.
///
/// ## Delivery contract
///
/// For a given stream, envelopes must be applied in sequence order. Implementations
/// deduplicate by sequence number (at-least-once delivery is tolerated) and must
/// reject a gap instead of silently skipping ahead.
///
/// ## Error handling
///
/// Errors are returned, never swallowed; the worker driving the projection decides
/// how loudly to report them.
pub trait Projection: Send + Sync {
    type Payload;
    type Error: core::fmt::Debug + core::fmt::Display + Send + Sync + 'static;

    /// Stable name used in logs and worker thread names.
    fn name(&self) -> &'static str;

    /// Whether envelopes from streams of `aggregate_type` feed this projection.
    fn handles(&self, aggregate_type: &str) -> bool;

    /// Apply a single envelope, updating the read model.
    fn apply(&self, envelope: &EventEnvelope<Self::Payload>) -> Result<(), Self::Error>;

    /// Whether `error` means the delivered data broke the delivery contract (gap,
    /// unknown kind, foreign stream) rather than a local failure of the read model.
    fn is_protocol_violation(&self, error: &Self::Error) -> bool {
        let _ = error;
        true
    }
}
