//! Append-only event store boundary.
//!
//! Defines the event log abstraction, an in-memory implementation and an adapter that
//! publishes committed events to an `EventBus` in per-stream order.

pub mod in_memory;
pub mod r#trait;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use promissory_core::{AggregateId, ExpectedVersion};
use promissory_events::{EventBus, EventEnvelope};
use serde_json::Value as JsonValue;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{stream_version, EventStore, EventStoreError, StoredEvent, UncommittedEvent};

/// Adapter that publishes committed events to an `EventBus` after a successful append.
///
/// Ordering invariants:
/// - **publish happens only after append succeeds**
/// - events of one stream are published in sequence order: append and publish run
///   under a per-stream lock, so two writers on the same stream cannot interleave
///   their publications. Writers on different streams do not block each other.
pub struct PublishingEventStore<S, B> {
    store: S,
    bus: B,
    stream_locks: Mutex<HashMap<AggregateId, Arc<Mutex<()>>>>,
}

impl<S, B> PublishingEventStore<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self {
            store,
            bus,
            stream_locks: Mutex::new(HashMap::new()),
        }
    }

    fn stream_lock(&self, aggregate_id: AggregateId) -> Result<Arc<Mutex<()>>, EventStoreError> {
        let mut locks = self
            .stream_locks
            .lock()
            .map_err(|_| EventStoreError::InvalidAppend("stream lock table poisoned".to_string()))?;
        Ok(locks.entry(aggregate_id).or_default().clone())
    }
}

impl<S, B> EventStore for PublishingEventStore<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    fn append(
        &self,
        aggregate_id: AggregateId,
        expected_version: ExpectedVersion,
        events: Vec<UncommittedEvent>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let lock = self.stream_lock(aggregate_id)?;
        let _guard = lock
            .lock()
            .map_err(|_| EventStoreError::InvalidAppend(format!("stream {aggregate_id} lock poisoned")))?;

        // 1) Append (durable step)
        let committed = self.store.append(aggregate_id, expected_version, events)?;

        // 2) Publish committed events; at-least-once delivery is acceptable downstream.
        for e in &committed {
            self.bus.publish(e.to_envelope()).map_err(|err| {
                tracing::error!(
                    stream = %aggregate_id,
                    sequence = e.sequence_number,
                    error = ?err,
                    "event committed but publication failed"
                );
                EventStoreError::Publish(format!("{err:?}"))
            })?;
        }

        tracing::debug!(
            stream = %aggregate_id,
            committed = committed.len(),
            version = stream_version(&committed),
            "events appended and published"
        );

        Ok(committed)
    }

    fn fetch_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.store.fetch_stream(aggregate_id)
    }

    fn fetch_all(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.store.fetch_all()
    }
}
