//! Aggregate rehydration from the event log.
//!
//! The aggregator loads a stream, decodes each stored record into the aggregate's
//! closed event type and folds the result from an empty instance. Decoding and
//! validation happen before the fold, so `Aggregate::apply` only ever sees
//! well-formed, correctly ordered events.
//!
//! A record that cannot be decoded (unknown kind, malformed payload) or whose kind
//! tag disagrees with its payload is a protocol violation: the stream is not
//! partially folded and the failure is surfaced, never skipped.

use promissory_core::{fold, Aggregate, AggregateId};
use promissory_events::Event;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::event_store::{EventStore, EventStoreError, StoredEvent};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("stream {0} not found")]
    StreamNotFound(AggregateId),

    #[error("protocol violation in stream {stream} at sequence {sequence}: {reason}")]
    ProtocolViolation {
        stream: AggregateId,
        sequence: u64,
        reason: String,
    },

    #[error(transparent)]
    Store(EventStoreError),
}

impl From<EventStoreError> for ReplayError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::StreamNotFound(id) => ReplayError::StreamNotFound(id),
            other => ReplayError::Store(other),
        }
    }
}

/// Rebuilds aggregates from their streams.
#[derive(Debug, Clone)]
pub struct Aggregator<S> {
    store: S,
}

impl<S> Aggregator<S>
where
    S: EventStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Fetch the stream for `aggregate_id` and fold it into a fresh aggregate.
    ///
    /// `make_empty` builds the not-yet-created instance the fold starts from.
    pub fn rebuild<A>(
        &self,
        aggregate_id: AggregateId,
        make_empty: impl FnOnce(AggregateId) -> A,
    ) -> Result<A, ReplayError>
    where
        A: Aggregate,
        A::Event: Event + DeserializeOwned,
    {
        let history = self.store.fetch_stream(aggregate_id)?;
        rehydrate(aggregate_id, make_empty(aggregate_id), &history)
    }
}

/// Fold an already-loaded stream into `initial`.
pub fn rehydrate<A>(aggregate_id: AggregateId, initial: A, history: &[StoredEvent]) -> Result<A, ReplayError>
where
    A: Aggregate,
    A::Event: Event + DeserializeOwned,
{
    let events = decode_history::<A::Event>(aggregate_id, history).inspect_err(|err| {
        tracing::error!(stream = %aggregate_id, error = %err, "stream replay rejected");
    })?;
    Ok(fold(initial, &events))
}

/// Decode a stream into typed events, validating stream membership and gapless numbering.
pub fn decode_history<E>(aggregate_id: AggregateId, history: &[StoredEvent]) -> Result<Vec<E>, ReplayError>
where
    E: Event + DeserializeOwned,
{
    let violation = |sequence: u64, reason: String| ReplayError::ProtocolViolation {
        stream: aggregate_id,
        sequence,
        reason,
    };

    let mut events = Vec::with_capacity(history.len());
    for (expected, stored) in (1u64..).zip(history) {
        if stored.aggregate_id != aggregate_id {
            return Err(violation(
                stored.sequence_number,
                format!("record belongs to stream {}", stored.aggregate_id),
            ));
        }
        if stored.sequence_number != expected {
            return Err(violation(
                stored.sequence_number,
                format!("expected sequence {expected}"),
            ));
        }

        let event: E = serde_json::from_value(stored.payload.clone()).map_err(|e| {
            violation(
                stored.sequence_number,
                format!("unknown or malformed event '{}': {e}", stored.event_type),
            )
        })?;
        if event.event_type() != stored.event_type {
            return Err(violation(
                stored.sequence_number,
                format!(
                    "kind tag '{}' does not match payload kind '{}'",
                    stored.event_type,
                    event.event_type()
                ),
            ));
        }

        events.push(event);
    }

    Ok(events)
}
