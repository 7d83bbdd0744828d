//! Integration tests for the full event-sourced pipeline.
//!
//! Tests: Command → EventStore → EventBus → ProjectionWorker → ReadModel
//!
//! Verifies:
//! - Replaying a stream yields every committed event, in order
//! - The list projection converges on what the aggregates say
//! - Optimistic concurrency conflicts are detected, never retried
//! - Writers on disjoint streams do not interfere

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    use promissory_core::{AggregateId, AggregateRoot, ExpectedVersion, UserId};
    use promissory_events::{EventEnvelope, InMemoryEventBus};
    use promissory_notes::{
        AddGuarantor, CreatePromissory, MarkDone, Promissory, PromissoryCommand, PromissoryId,
        PromissoryState, AGGREGATE_TYPE,
    };

    use crate::aggregator::{Aggregator, ReplayError};
    use crate::command_dispatcher::{CommandDispatcher, DispatchError};
    use crate::event_store::{
        stream_version, EventStore, EventStoreError, InMemoryEventStore, PublishingEventStore,
        UncommittedEvent,
    };
    use crate::projections::{PromissoryListProjection, PromissoryRow};
    use crate::read_model::InMemoryRowStore;
    use crate::workers::{ProjectionWorker, WorkerHandle};

    type Bus = Arc<InMemoryEventBus<EventEnvelope<serde_json::Value>>>;
    type Store = Arc<PublishingEventStore<InMemoryEventStore, Bus>>;
    type ListProjection = PromissoryListProjection<Arc<InMemoryRowStore<PromissoryId, PromissoryRow>>>;

    struct Pipeline {
        store: Store,
        dispatcher: CommandDispatcher<Store>,
        aggregator: Aggregator<Store>,
        projection: Arc<ListProjection>,
        worker: Option<WorkerHandle>,
    }

    impl Drop for Pipeline {
        fn drop(&mut self) {
            if let Some(worker) = self.worker.take() {
                worker.shutdown();
            }
        }
    }

    fn setup() -> Pipeline {
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let store: Store = Arc::new(PublishingEventStore::new(InMemoryEventStore::new(), bus.clone()));
        let projection = Arc::new(PromissoryListProjection::new(Arc::new(InMemoryRowStore::new())));

        // The worker subscribes before returning, so no early event is missed.
        let worker = ProjectionWorker::spawn("promissory-list-test", bus, projection.clone()).unwrap();

        Pipeline {
            store: store.clone(),
            dispatcher: CommandDispatcher::new(store.clone()),
            aggregator: Aggregator::new(store),
            projection,
            worker: Some(worker),
        }
    }

    fn eventually(mut check: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if check() {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("condition not reached before deadline");
    }

    fn empty(id: AggregateId) -> Promissory {
        Promissory::empty(PromissoryId(id))
    }

    fn create(id: AggregateId, code: &str) -> PromissoryCommand {
        PromissoryCommand::CreatePromissory(CreatePromissory {
            promissory_id: PromissoryId(id),
            code: code.to_string(),
            actor: UserId::new(),
            row_version: Uuid::now_v7(),
            occurred_at: Utc::now(),
        })
    }

    fn add_guarantor(id: AggregateId, name: &str) -> PromissoryCommand {
        PromissoryCommand::AddGuarantor(AddGuarantor {
            promissory_id: PromissoryId(id),
            guarantor_id: Uuid::now_v7(),
            national_id: "0098765432".to_string(),
            name: name.to_string(),
            family: "Moradi".to_string(),
            actor: UserId::new(),
            row_version: Uuid::now_v7(),
            occurred_at: Utc::now(),
        })
    }

    fn mark_done(id: AggregateId) -> PromissoryCommand {
        PromissoryCommand::MarkDone(MarkDone {
            promissory_id: PromissoryId(id),
            actor: UserId::new(),
            occurred_at: Utc::now(),
        })
    }

    fn row(p: &Pipeline, id: AggregateId) -> Option<PromissoryRow> {
        p.projection.get(&PromissoryId(id)).unwrap()
    }

    #[test]
    fn full_lifecycle_replays_and_projects() {
        let p = setup();
        let id = AggregateId::new();

        p.dispatcher.start(AGGREGATE_TYPE, create(id, "551100"), empty).unwrap();
        p.dispatcher.dispatch(AGGREGATE_TYPE, add_guarantor(id, "Sara"), empty).unwrap();
        p.dispatcher.dispatch(AGGREGATE_TYPE, add_guarantor(id, "Reza"), empty).unwrap();
        p.dispatcher.dispatch(AGGREGATE_TYPE, mark_done(id), empty).unwrap();

        let replayed = p.aggregator.rebuild(id, empty).unwrap();
        assert_eq!(replayed.version(), 4);
        assert_eq!(replayed.state(), PromissoryState::Done);
        let names: Vec<&str> = replayed.guarantors().iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["Sara", "Reza"]);

        eventually(|| row(&p, id).is_some_and(|r| r.last_sequence == 4));
        let r = row(&p, id).unwrap();
        assert_eq!(r.code, "551100");
        assert_eq!(r.guarantor_count, 2);
        assert_eq!(r.state, PromissoryState::Done);
    }

    #[test]
    fn operations_on_unknown_stream_are_not_found_and_leave_no_trace() {
        let p = setup();
        let id = AggregateId::new();

        let err = p
            .dispatcher
            .dispatch(AGGREGATE_TYPE, add_guarantor(id, "Sara"), empty)
            .unwrap_err();
        assert!(matches!(err, DispatchError::StreamNotFound(s) if s == id));

        assert!(matches!(p.aggregator.rebuild(id, empty), Err(ReplayError::StreamNotFound(_))));
        assert!(matches!(p.store.fetch_stream(id), Err(EventStoreError::StreamNotFound(_))));

        thread::sleep(Duration::from_millis(50));
        assert!(row(&p, id).is_none());
    }

    #[test]
    fn starting_a_stream_twice_is_rejected() {
        let p = setup();
        let id = AggregateId::new();
        p.dispatcher.start(AGGREGATE_TYPE, create(id, "1"), empty).unwrap();

        let err = p
            .dispatcher
            .start(AGGREGATE_TYPE, create(id, "2"), empty)
            .unwrap_err();
        assert!(matches!(err, DispatchError::StreamAlreadyExists(_)));

        let replayed = p.aggregator.rebuild(id, empty).unwrap();
        assert_eq!(replayed.code(), "1");
        assert_eq!(replayed.version(), 1);
    }

    #[test]
    fn stale_writer_gets_a_conflict_and_nothing_is_appended() {
        let p = setup();
        let id = AggregateId::new();
        p.dispatcher.start(AGGREGATE_TYPE, create(id, "1"), empty).unwrap();

        // Two writers load version 1; the first wins.
        let loaded = stream_version(&p.store.fetch_stream(id).unwrap());
        p.dispatcher.dispatch(AGGREGATE_TYPE, add_guarantor(id, "Sara"), empty).unwrap();

        let late = UncommittedEvent {
            event_id: Uuid::now_v7(),
            aggregate_id: id,
            aggregate_type: AGGREGATE_TYPE.to_string(),
            event_type: "promissory.done".to_string(),
            event_version: 1,
            occurred_at: Utc::now(),
            payload: json!({}),
        };
        let err = p
            .store
            .append(id, ExpectedVersion::Exact(loaded), vec![late])
            .unwrap_err();
        assert!(matches!(err, EventStoreError::Concurrency { actual: 2, .. }));
        assert_eq!(p.store.fetch_stream(id).unwrap().len(), 2);

        // And through the dispatcher error mapping.
        assert!(matches!(DispatchError::from(err), DispatchError::Concurrency(_)));
    }

    #[test]
    fn concurrent_commands_on_one_stream_all_land_or_conflict() {
        let p = Arc::new(setup());
        let id = AggregateId::new();
        p.dispatcher.start(AGGREGATE_TYPE, create(id, "1"), empty).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|n| {
                let p = p.clone();
                thread::spawn(move || {
                    p.dispatcher
                        .dispatch(AGGREGATE_TYPE, add_guarantor(id, &format!("g{n}")), empty)
                        .is_ok()
                })
            })
            .collect();
        let succeeded = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert!(succeeded >= 1);
        let replayed = p.aggregator.rebuild(id, empty).unwrap();
        assert_eq!(replayed.guarantors().len(), succeeded);
        assert_eq!(replayed.version(), succeeded as u64 + 1);

        eventually(|| row(&p, id).is_some_and(|r| r.guarantor_count == succeeded as u64));
    }

    #[test]
    fn disjoint_streams_progress_independently() {
        let p = Arc::new(setup());

        let handles: Vec<_> = (0..6)
            .map(|n| {
                let p = p.clone();
                thread::spawn(move || {
                    let id = AggregateId::new();
                    p.dispatcher
                        .start(AGGREGATE_TYPE, create(id, &format!("{n}")), empty)
                        .unwrap();
                    for g in 0..n {
                        p.dispatcher
                            .dispatch(AGGREGATE_TYPE, add_guarantor(id, &format!("g{g}")), empty)
                            .unwrap();
                    }
                    (id, n)
                })
            })
            .collect();
        let streams: Vec<(AggregateId, usize)> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        for (id, n) in &streams {
            let replayed = p.aggregator.rebuild(*id, empty).unwrap();
            assert_eq!(replayed.guarantors().len(), *n);
            eventually(|| row(&p, *id).is_some_and(|r| r.guarantor_count == *n as u64));
        }
        assert_eq!(p.projection.list().unwrap().len(), streams.len());
    }

    #[test]
    fn unknown_event_kind_in_history_fails_replay_and_commands() {
        let p = setup();
        let id = AggregateId::new();
        p.dispatcher.start(AGGREGATE_TYPE, create(id, "1"), empty).unwrap();

        let foreign = UncommittedEvent {
            event_id: Uuid::now_v7(),
            aggregate_id: id,
            aggregate_type: AGGREGATE_TYPE.to_string(),
            event_type: "promissory.cancelled".to_string(),
            event_version: 1,
            occurred_at: Utc::now(),
            payload: json!({ "PromissoryCancelled": { "promissory_id": id } }),
        };
        p.store.append(id, ExpectedVersion::Exact(1), vec![foreign]).unwrap();

        assert!(matches!(
            p.aggregator.rebuild(id, empty),
            Err(ReplayError::ProtocolViolation { sequence: 2, .. })
        ));
        assert!(matches!(
            p.dispatcher.dispatch(AGGREGATE_TYPE, mark_done(id), empty),
            Err(DispatchError::ProtocolViolation(_))
        ));

        // The projection rejected sequence 2 and stayed at 1.
        eventually(|| row(&p, id).is_some());
        thread::sleep(Duration::from_millis(50));
        assert_eq!(p.projection.cursor(id).unwrap(), 1);
    }

    #[test]
    fn rebuild_from_log_matches_live_projection() {
        let p = setup();
        let mut ids = Vec::new();
        for n in 0..4 {
            let id = AggregateId::new();
            p.dispatcher.start(AGGREGATE_TYPE, create(id, &n.to_string()), empty).unwrap();
            for _ in 0..n {
                p.dispatcher.dispatch(AGGREGATE_TYPE, add_guarantor(id, "x"), empty).unwrap();
            }
            if n % 2 == 0 {
                p.dispatcher.dispatch(AGGREGATE_TYPE, mark_done(id), empty).unwrap();
            }
            ids.push(id);
        }
        let total_events = p.store.fetch_all().unwrap().len();
        eventually(|| {
            ids.iter()
                .map(|id| p.projection.cursor(*id).unwrap())
                .sum::<u64>()
                == total_events as u64
        });
        let live = p.projection.list().unwrap();

        let fresh: ListProjection = PromissoryListProjection::new(Arc::new(InMemoryRowStore::new()));
        let envelopes = p.store.fetch_all().unwrap().iter().map(|e| e.to_envelope()).collect::<Vec<_>>();
        let applied = fresh.rebuild_from_scratch(envelopes).unwrap();

        assert_eq!(applied, total_events);
        assert_eq!(fresh.list().unwrap(), live);
    }
}
