use std::collections::HashMap;
use std::sync::RwLock;

use promissory_core::{AggregateId, ExpectedVersion};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

/// In-memory append-only event store.
///
/// Intended for tests/dev and the single-process service. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<AggregateId, Vec<StoredEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.sequence_number).unwrap_or(0)
    }

    fn poisoned() -> EventStoreError {
        EventStoreError::InvalidAppend("lock poisoned".to_string())
    }
}

impl EventStore for InMemoryEventStore {
    fn append(
        &self,
        aggregate_id: AggregateId,
        expected_version: ExpectedVersion,
        events: Vec<UncommittedEvent>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let aggregate_type = events.first().map(|e| e.aggregate_type.clone());

        for (idx, e) in events.iter().enumerate() {
            if e.aggregate_id != aggregate_id {
                return Err(EventStoreError::InvalidAppend(format!(
                    "event at index {idx} targets stream {} instead of {aggregate_id}",
                    e.aggregate_id
                )));
            }
            if Some(&e.aggregate_type) != aggregate_type.as_ref() {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "batch contains multiple aggregate_types (index {idx})"
                )));
            }
        }

        let mut streams = self.streams.write().map_err(|_| Self::poisoned())?;

        let current = streams
            .get(&aggregate_id)
            .map(|s| Self::current_version(s))
            .unwrap_or(0);

        match expected_version {
            ExpectedVersion::NoStream if current > 0 => {
                return Err(EventStoreError::StreamAlreadyExists(aggregate_id));
            }
            ExpectedVersion::Exact(_) if current == 0 => {
                return Err(EventStoreError::StreamNotFound(aggregate_id));
            }
            _ if !expected_version.matches(current) => {
                return Err(EventStoreError::Concurrency {
                    stream: aggregate_id,
                    expected: expected_version,
                    actual: current,
                });
            }
            _ => {}
        }

        // The expectation holds even for an empty batch; there is just nothing to write.
        let Some(aggregate_type) = aggregate_type else {
            return Ok(vec![]);
        };

        let stream = streams.entry(aggregate_id).or_default();

        // Enforce aggregate type stability across the stream.
        if let Some(existing) = stream.first() {
            if existing.aggregate_type != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "stream aggregate_type is '{}', attempted append with '{}'",
                    existing.aggregate_type, aggregate_type
                )));
            }
        }

        let mut next = current + 1;
        let mut committed = Vec::with_capacity(events.len());
        for e in events {
            let stored = StoredEvent {
                event_id: e.event_id,
                aggregate_id: e.aggregate_id,
                aggregate_type: e.aggregate_type,
                sequence_number: next,
                event_type: e.event_type,
                event_version: e.event_version,
                occurred_at: e.occurred_at,
                payload: e.payload,
            };
            next += 1;
            stream.push(stored.clone());
            committed.push(stored);
        }

        Ok(committed)
    }

    fn fetch_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self.streams.read().map_err(|_| Self::poisoned())?;

        match streams.get(&aggregate_id) {
            Some(stream) if !stream.is_empty() => Ok(stream.clone()),
            _ => Err(EventStoreError::StreamNotFound(aggregate_id)),
        }
    }

    fn fetch_all(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self.streams.read().map_err(|_| Self::poisoned())?;

        let mut ids: Vec<&AggregateId> = streams.keys().collect();
        ids.sort();

        Ok(ids
            .into_iter()
            .filter_map(|id| streams.get(id))
            .flat_map(|stream| stream.iter().cloned())
            .collect())
    }
}
