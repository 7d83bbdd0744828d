//! Command execution pipeline (application-level orchestration).
//!
//! ```text
//! Command
//!   ↓
//! 1. Load the stream (existing aggregates only)
//!   ↓
//! 2. Rehydrate the aggregate through the aggregator's decode + fold
//!   ↓
//! 3. Handle the command (pure decision logic, produces events)
//!   ↓
//! 4. Append with ExpectedVersion::Exact(loaded version), or NoStream when starting
//!   ↓
//! 5. Publication happens inside the store adapter, in stream order
//! ```
//!
//! The dispatcher never retries: a concurrency conflict is returned to the caller,
//! which decides whether to reload and resubmit.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use promissory_core::{Aggregate, AggregateId, DomainError, ExpectedVersion};
use promissory_events::{Command, Event};

use crate::aggregator::{rehydrate, ReplayError};
use crate::event_store::{stream_version, EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// The command targets a stream that was never started.
    #[error("stream {0} not found")]
    StreamNotFound(AggregateId),
    /// A creation command targeted a stream that already has events.
    #[error("stream {0} already exists")]
    StreamAlreadyExists(AggregateId),
    /// Optimistic concurrency failure (stale aggregate version).
    #[error("concurrency conflict: {0}")]
    Concurrency(String),
    /// Domain validation failure (deterministic).
    #[error("validation failed: {0}")]
    Validation(String),
    /// Domain invariant failure (deterministic).
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
    /// The stored history could not be replayed (unknown kind, gap, mismatched tag).
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    /// The event store failed.
    #[error("event store failure: {0}")]
    Store(EventStoreError),
    /// Publication failed after a successful append (at-least-once; the events are stored).
    #[error("event publication failed: {0}")]
    Publish(String),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::StreamNotFound(id) => DispatchError::StreamNotFound(id),
            EventStoreError::StreamAlreadyExists(id) => DispatchError::StreamAlreadyExists(id),
            EventStoreError::Concurrency { .. } => DispatchError::Concurrency(value.to_string()),
            EventStoreError::Publish(msg) => DispatchError::Publish(msg),
            other => DispatchError::Store(other),
        }
    }
}

impl From<ReplayError> for DispatchError {
    fn from(value: ReplayError) -> Self {
        match value {
            ReplayError::StreamNotFound(id) => DispatchError::StreamNotFound(id),
            ReplayError::ProtocolViolation { .. } => DispatchError::ProtocolViolation(value.to_string()),
            ReplayError::Store(e) => DispatchError::from(e),
        }
    }
}

fn domain_error(aggregate_id: AggregateId, err: DomainError) -> DispatchError {
    match err {
        DomainError::Validation(msg) | DomainError::InvalidId(msg) => DispatchError::Validation(msg),
        DomainError::InvariantViolation(msg) => DispatchError::InvariantViolation(msg),
        DomainError::NotFound => DispatchError::StreamNotFound(aggregate_id),
        DomainError::Conflict(_) => DispatchError::StreamAlreadyExists(aggregate_id),
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// `S` is usually a `PublishingEventStore`, so a successful append has already been
/// published by the time `start`/`dispatch` return.
#[derive(Debug)]
pub struct CommandDispatcher<S> {
    store: S,
}

impl<S> CommandDispatcher<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S> CommandDispatcher<S>
where
    S: EventStore,
{
    /// Handle a creation command against an empty aggregate and start its stream.
    ///
    /// Fails with `StreamAlreadyExists` if the stream already has events.
    pub fn start<A>(
        &self,
        aggregate_type: &str,
        command: A::Command,
        make_empty: impl FnOnce(AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Command: Command,
        A::Event: Event + Serialize,
    {
        let aggregate_id = command.target_aggregate_id();
        let aggregate = make_empty(aggregate_id);

        let decided = aggregate
            .handle(&command)
            .map_err(|e| domain_error(aggregate_id, e))?;
        let uncommitted = to_uncommitted(aggregate_id, aggregate_type, &decided)?;

        let committed = self
            .store
            .append(aggregate_id, ExpectedVersion::NoStream, uncommitted)?;

        tracing::info!(
            stream = %aggregate_id,
            aggregate_type,
            version = stream_version(&committed),
            "stream started"
        );
        Ok(committed)
    }

    /// Dispatch a command to an existing aggregate.
    ///
    /// Loads and replays the stream, decides, then appends expecting the loaded version.
    /// A concurrent append in between surfaces as `DispatchError::Concurrency`.
    pub fn dispatch<A>(
        &self,
        aggregate_type: &str,
        command: A::Command,
        make_empty: impl FnOnce(AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Command: Command,
        A::Event: Event + Serialize + DeserializeOwned,
    {
        let aggregate_id = command.target_aggregate_id();

        // 1) Load history
        let history = self.store.fetch_stream(aggregate_id)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        // 2) Rehydrate aggregate
        let aggregate = rehydrate(aggregate_id, make_empty(aggregate_id), &history)?;

        // 3) Decide events (no mutation)
        let decided = aggregate
            .handle(&command)
            .map_err(|e| domain_error(aggregate_id, e))?;
        if decided.is_empty() {
            return Ok(vec![]);
        }

        // 4) Persist (and publish, through the store adapter)
        let uncommitted = to_uncommitted(aggregate_id, aggregate_type, &decided)?;
        let committed = self
            .store
            .append(aggregate_id, expected, uncommitted)
            .inspect_err(|err| {
                if matches!(err, EventStoreError::Concurrency { .. }) {
                    tracing::warn!(stream = %aggregate_id, error = %err, "stale write rejected");
                }
            })?;

        tracing::info!(
            stream = %aggregate_id,
            aggregate_type,
            version = stream_version(&committed),
            "command committed"
        );
        Ok(committed)
    }
}

fn to_uncommitted<E>(
    aggregate_id: AggregateId,
    aggregate_type: &str,
    events: &[E],
) -> Result<Vec<UncommittedEvent>, DispatchError>
where
    E: Event + Serialize,
{
    events
        .iter()
        .map(|e| UncommittedEvent::from_typed(aggregate_id, aggregate_type, Uuid::now_v7(), e))
        .collect::<Result<Vec<_>, _>>()
        .map_err(DispatchError::from)
}
