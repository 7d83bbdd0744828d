use promissory_core::AggregateId;

/// A command targets a specific aggregate (command abstraction).
///
/// Commands represent **intent** and are transient; the aggregate turns an accepted
/// command into events, which are persisted. A command operates on exactly one
/// stream, so `target_aggregate_id()` is also the stream the resulting events go to.
pub trait Command: Clone + core::fmt::Debug + Send + Sync + 'static {
    fn target_aggregate_id(&self) -> AggregateId;
}
