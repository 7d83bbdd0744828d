//! Application service: the promissory use cases over the event-sourced core.
//!
//! Wiring (in-memory, single process):
//!
//! ```text
//! PromissoryService ──► CommandDispatcher ──► PublishingEventStore ──► InMemoryEventBus
//!        │                                                                    │
//!        ├──► Aggregator (single-entity reads, replayed from the log)         ▼
//!        └──► PromissoryListProjection ◄────────────────────────── ProjectionWorker
//! ```

use std::sync::{Arc, Mutex};

use chrono::Utc;
use rand::Rng;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use promissory_core::{AggregateId, UserId};
use promissory_events::{EventEnvelope, InMemoryEventBus};
use promissory_infra::{
    aggregator::{Aggregator, ReplayError},
    command_dispatcher::{CommandDispatcher, DispatchError},
    event_store::{EventStore, EventStoreError, InMemoryEventStore, PublishingEventStore, StoredEvent},
    projections::{ProjectionError, PromissoryListProjection, PromissoryRow},
    read_model::InMemoryRowStore,
    workers::{ProjectionWorker, WorkerHandle},
};
use promissory_notes::{
    AddGuarantor, CreatePromissory, MarkDone, Promissory, PromissoryCommand, PromissoryId, AGGREGATE_TYPE,
};

pub type InMemoryBus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
pub type InMemoryStore = Arc<PublishingEventStore<InMemoryEventStore, InMemoryBus>>;
pub type InMemoryListProjection = PromissoryListProjection<Arc<InMemoryRowStore<PromissoryId, PromissoryRow>>>;

/// Guarantor data supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GuarantorFields {
    pub national_id: String,
    pub name: String,
    pub family: String,
}

/// Failure while replaying the log into the list projection.
#[derive(Debug, Error)]
pub enum CatchUpError {
    #[error(transparent)]
    Store(#[from] EventStoreError),

    #[error(transparent)]
    Projection(#[from] ProjectionError),
}

fn empty(aggregate_id: AggregateId) -> Promissory {
    Promissory::empty(PromissoryId::new(aggregate_id))
}

/// External promissory code: decimal form of a random positive 63-bit integer.
fn generate_code() -> String {
    rand::thread_rng().gen_range(1..=i64::MAX).to_string()
}

pub struct PromissoryService {
    store: InMemoryStore,
    dispatcher: CommandDispatcher<InMemoryStore>,
    aggregator: Aggregator<InMemoryStore>,
    projection: Arc<InMemoryListProjection>,
    worker: Mutex<Option<WorkerHandle>>,
}

impl PromissoryService {
    /// In-memory wiring: store + bus + list projection fed by a background worker.
    pub fn in_memory() -> std::io::Result<Self> {
        let bus: InMemoryBus = Arc::new(InMemoryEventBus::new());
        let store: InMemoryStore = Arc::new(PublishingEventStore::new(InMemoryEventStore::new(), bus.clone()));

        let rows: Arc<InMemoryRowStore<PromissoryId, PromissoryRow>> = Arc::new(InMemoryRowStore::new());
        let projection = Arc::new(PromissoryListProjection::new(rows));

        // Subscribes before returning, so the first command's event is not missed.
        let worker = ProjectionWorker::spawn("promissory-list-projection", bus, projection.clone())?;

        Ok(Self {
            dispatcher: CommandDispatcher::new(store.clone()),
            aggregator: Aggregator::new(store.clone()),
            store,
            projection,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Start a new promissory stream with a freshly generated code.
    pub fn create_promissory(&self, actor: UserId) -> Result<AggregateId, DispatchError> {
        let aggregate_id = AggregateId::new();
        let command = PromissoryCommand::CreatePromissory(CreatePromissory {
            promissory_id: PromissoryId::new(aggregate_id),
            code: generate_code(),
            actor,
            row_version: Uuid::now_v7(),
            occurred_at: Utc::now(),
        });

        self.after_write(self.dispatcher.start(AGGREGATE_TYPE, command, empty))?;
        Ok(aggregate_id)
    }

    pub fn add_guarantor(
        &self,
        actor: UserId,
        id: AggregateId,
        fields: GuarantorFields,
    ) -> Result<StoredEvent, DispatchError> {
        let command = PromissoryCommand::AddGuarantor(AddGuarantor {
            promissory_id: PromissoryId::new(id),
            guarantor_id: Uuid::now_v7(),
            national_id: fields.national_id,
            name: fields.name,
            family: fields.family,
            actor,
            row_version: Uuid::now_v7(),
            occurred_at: Utc::now(),
        });

        single(self.after_write(self.dispatcher.dispatch(AGGREGATE_TYPE, command, empty))?)
    }

    pub fn mark_done(&self, actor: UserId, id: AggregateId) -> Result<StoredEvent, DispatchError> {
        let command = PromissoryCommand::MarkDone(MarkDone {
            promissory_id: PromissoryId::new(id),
            actor,
            occurred_at: Utc::now(),
        });

        single(self.after_write(self.dispatcher.dispatch(AGGREGATE_TYPE, command, empty))?)
    }

    /// A publish failure means the events are committed but the worker never saw them;
    /// replay the log so the list does not stay stuck behind the gap.
    fn after_write<T>(&self, result: Result<T, DispatchError>) -> Result<T, DispatchError> {
        if let Err(DispatchError::Publish(_)) = &result {
            if let Err(err) = self.catch_up_projection() {
                tracing::error!(error = %err, "catch-up after failed publish did not complete");
            }
        }
        result
    }

    /// Replay the whole event log into the list projection.
    ///
    /// Already-applied events are skipped, so this only fills in what the worker missed.
    /// Returns the number of events applied.
    pub fn catch_up_projection(&self) -> Result<usize, CatchUpError> {
        let envelopes: Vec<_> = self.store.fetch_all()?.iter().map(StoredEvent::to_envelope).collect();
        Ok(self.projection.catch_up(envelopes)?)
    }

    /// Current state, replayed from the log (always up to date).
    pub fn get_promissory(&self, id: AggregateId) -> Result<Promissory, ReplayError> {
        self.aggregator.rebuild(id, empty)
    }

    /// Every promissory row (eventually consistent with the log).
    pub fn list_promissories(&self) -> Result<Vec<PromissoryRow>, ProjectionError> {
        self.projection.list()
    }

    pub fn get_row(&self, id: AggregateId) -> Result<Option<PromissoryRow>, ProjectionError> {
        self.projection.get(&PromissoryId::new(id))
    }

    pub fn stream_events(&self, id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.store.fetch_stream(id)
    }

    /// Stop the projection worker. Later calls are no-ops.
    pub fn shutdown(&self) {
        let handle = match self.worker.lock() {
            Ok(mut worker) => worker.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            tracing::info!(worker = handle.name(), "stopping projection worker");
            handle.shutdown();
        }
    }
}

impl Drop for PromissoryService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn single(mut committed: Vec<StoredEvent>) -> Result<StoredEvent, DispatchError> {
    match (committed.pop(), committed.is_empty()) {
        (Some(event), true) => Ok(event),
        (Some(_), false) => Err(DispatchError::InvariantViolation(
            "command produced more than one event".to_string(),
        )),
        (None, _) => Err(DispatchError::InvariantViolation(
            "command produced no event".to_string(),
        )),
    }
}
