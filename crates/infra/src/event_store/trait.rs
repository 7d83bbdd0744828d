use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use promissory_core::{AggregateId, ExpectedVersion};
use std::sync::Arc;

/// An event ready to be appended to a stream (not yet assigned a sequence number).
///
/// ## Event Lifecycle
///
/// 1. **Domain event**: decided by an aggregate's `handle()`
/// 2. **UncommittedEvent**: serialized payload plus stream metadata
/// 3. **StoredEvent**: persisted with an assigned `sequence_number`
/// 4. **EventEnvelope**: published to the bus for projections
///
/// Use `UncommittedEvent::from_typed()` to build one from a typed domain event. It
/// serializes the payload and copies the kind tag, schema version and timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

/// A stored event in an append-only stream.
///
/// ## Sequence Numbers
///
/// Assigned by the store during append:
/// - **Gapless**: the first event of a stream is `1`, each append continues at `last + 1`
/// - **Stream-scoped**: numbering is per aggregate stream
/// - **Immutable**: once assigned, never changes
///
/// Projections use the sequence number as their per-stream cursor, which is what makes
/// redelivery of an already-applied event detectable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    /// Position in the aggregate stream (1-based).
    pub sequence_number: u64,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl StoredEvent {
    pub fn stream_version(&self) -> u64 {
        self.sequence_number
    }

    /// Convert a stored event into an envelope for publication.
    pub fn to_envelope(&self) -> promissory_events::EventEnvelope<JsonValue> {
        promissory_events::EventEnvelope::new(
            self.event_id,
            self.aggregate_id,
            self.aggregate_type.clone(),
            self.sequence_number,
            self.event_type.clone(),
            self.occurred_at,
            self.payload.clone(),
        )
    }
}

/// Current version of a loaded stream (`0` when empty).
pub fn stream_version(history: &[StoredEvent]) -> u64 {
    history.last().map(StoredEvent::stream_version).unwrap_or(0)
}

/// Event store operation error.
///
/// These are **infrastructure errors** (missing streams, concurrency, malformed
/// batches) as opposed to domain errors (validation, invariants).
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("stream {0} not found")]
    StreamNotFound(AggregateId),

    #[error("stream {0} already exists")]
    StreamAlreadyExists(AggregateId),

    #[error("optimistic concurrency check failed on stream {stream}: expected {expected:?}, found {actual}")]
    Concurrency {
        stream: AggregateId,
        expected: ExpectedVersion,
        actual: u64,
    },

    #[error("aggregate type mismatch: {0}")]
    AggregateTypeMismatch(String),

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("event publication failed: {0}")]
    Publish(String),
}

/// Append-only event log, one stream per aggregate instance.
///
/// ## Append Semantics
///
/// `append()`:
/// - requires every event in the batch to target `aggregate_id` with one aggregate type
/// - checks the expectation atomically with the write:
///   `NoStream` fails with `StreamAlreadyExists` if the stream has events,
///   `Exact(v)` fails with `StreamNotFound` if the stream is missing and with
///   `Concurrency` if the stream is at any other version
/// - assigns sequence numbers `current + 1 ..= current + n`
/// - persists the whole batch or nothing
///
/// ## Read Semantics
///
/// `fetch_stream()` returns the stream in sequence order and fails with
/// `StreamNotFound` for a stream that was never started. `fetch_all()` returns every
/// stream, ordered by stream id and then sequence number, for projection rebuilds.
pub trait EventStore: Send + Sync {
    /// Start a new stream with its first event (sequence number `1`).
    fn start_stream(&self, event: UncommittedEvent) -> Result<StoredEvent, EventStoreError> {
        let aggregate_id = event.aggregate_id;
        let mut committed = self.append(aggregate_id, ExpectedVersion::NoStream, vec![event])?;
        committed.pop().ok_or_else(|| {
            EventStoreError::InvalidAppend(format!("start of stream {aggregate_id} committed no event"))
        })
    }

    /// Append events to an existing stream, or to a new one with `ExpectedVersion::NoStream`.
    fn append(
        &self,
        aggregate_id: AggregateId,
        expected_version: ExpectedVersion,
        events: Vec<UncommittedEvent>,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Load the full stream for an aggregate.
    fn fetch_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Load every stream.
    fn fetch_all(&self) -> Result<Vec<StoredEvent>, EventStoreError>;
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn start_stream(&self, event: UncommittedEvent) -> Result<StoredEvent, EventStoreError> {
        (**self).start_stream(event)
    }

    fn append(
        &self,
        aggregate_id: AggregateId,
        expected_version: ExpectedVersion,
        events: Vec<UncommittedEvent>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).append(aggregate_id, expected_version, events)
    }

    fn fetch_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).fetch_stream(aggregate_id)
    }

    fn fetch_all(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).fetch_all()
    }
}

impl UncommittedEvent {
    /// Build an uncommitted event from a typed domain event.
    pub fn from_typed<E>(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        event_id: Uuid,
        event: &E,
    ) -> Result<Self, EventStoreError>
    where
        E: promissory_events::Event + Serialize,
    {
        let payload = serde_json::to_value(event)
            .map_err(|e| EventStoreError::InvalidAppend(format!("payload serialization failed: {e}")))?;

        Ok(Self {
            event_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            occurred_at: event.occurred_at(),
            payload,
        })
    }
}
