use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use promissory_core::{AggregateId, UserId};
use promissory_events::{Event, EventEnvelope, Projection};
use promissory_notes::{PromissoryEvent, PromissoryId, PromissoryState, AGGREGATE_TYPE};

use crate::read_model::{RowStore, RowStoreError};

/// Queryable list row: one per promissory note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromissoryRow {
    pub id: PromissoryId,
    pub code: String,
    pub state: PromissoryState,
    pub created_at: DateTime<Utc>,
    pub created_by: UserId,
    pub guarantor_count: u64,
    /// Sequence number of the last event folded into this row.
    pub last_sequence: u64,
}

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("unknown or malformed event '{event_type}' in stream {stream} at sequence {sequence}: {reason}")]
    UnknownEvent {
        stream: AggregateId,
        sequence: u64,
        event_type: String,
        reason: String,
    },

    #[error("out-of-order delivery in stream {stream} (last={last}, found={found})")]
    OutOfOrder {
        stream: AggregateId,
        last: u64,
        found: u64,
    },

    #[error("no row for stream {stream} when applying sequence {sequence}")]
    MissingRow { stream: AggregateId, sequence: u64 },

    #[error("event for stream {event_stream} delivered in an envelope of stream {stream}")]
    StreamMismatch {
        stream: AggregateId,
        event_stream: AggregateId,
    },

    #[error("projection cursor lock poisoned")]
    Poisoned,

    #[error(transparent)]
    Store(#[from] RowStoreError),
}

impl ProjectionError {
    /// Whether the error means the delivered data broke the event protocol
    /// (as opposed to a local storage failure).
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            ProjectionError::UnknownEvent { .. }
                | ProjectionError::OutOfOrder { .. }
                | ProjectionError::MissingRow { .. }
                | ProjectionError::StreamMismatch { .. }
        )
    }
}

/// Result of offering one envelope to the projection.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Already applied (sequence at or below the stream cursor); nothing changed.
    Duplicate,
    /// Envelope of another aggregate type; ignored.
    Skipped,
}

/// Promissory list projection.
///
/// Consumes published envelopes (JSON payloads) and keeps one `PromissoryRow` per
/// stream. The cursor table remembers the last applied sequence of every stream:
/// - `seq <= cursor` is a redelivery and is ignored
/// - `seq == cursor + 1` is applied, then the cursor advances
/// - anything else is out of order and rejected
///
/// Each stream has its own cursor lock, held for the whole apply: cursor check, row
/// write and cursor advance are atomic per stream, and a failed apply leaves both
/// the row and the cursor untouched. Different streams apply in parallel.
#[derive(Debug)]
pub struct PromissoryListProjection<S>
where
    S: RowStore<PromissoryId, PromissoryRow>,
{
    store: S,
    cursors: Mutex<HashMap<AggregateId, Arc<Mutex<u64>>>>,
}

impl<S> PromissoryListProjection<S>
where
    S: RowStore<PromissoryId, PromissoryRow>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, id: &PromissoryId) -> Result<Option<PromissoryRow>, ProjectionError> {
        Ok(self.store.get(id)?)
    }

    /// All rows, oldest first (ties broken by id).
    pub fn list(&self) -> Result<Vec<PromissoryRow>, ProjectionError> {
        let mut rows = self.store.list()?;
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(rows)
    }

    /// Last applied sequence for a stream (`0` if none).
    pub fn cursor(&self, stream: AggregateId) -> Result<u64, ProjectionError> {
        let last = *self
            .stream_cursor(stream)?
            .lock()
            .map_err(|_| ProjectionError::Poisoned)?;
        Ok(last)
    }

    fn stream_cursor(&self, stream: AggregateId) -> Result<Arc<Mutex<u64>>, ProjectionError> {
        let mut cursors = self.cursors.lock().map_err(|_| ProjectionError::Poisoned)?;
        Ok(cursors.entry(stream).or_default().clone())
    }

    /// Apply a published envelope into the projection.
    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<ApplyOutcome, ProjectionError> {
        if envelope.aggregate_type() != AGGREGATE_TYPE {
            return Ok(ApplyOutcome::Skipped);
        }

        let stream = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let cursor = self.stream_cursor(stream)?;
        let mut last_applied = cursor.lock().map_err(|_| ProjectionError::Poisoned)?;
        let last = *last_applied;

        if seq <= last {
            tracing::debug!(
                stream = %stream,
                sequence = seq,
                last,
                event_id = %envelope.event_id(),
                "duplicate delivery ignored"
            );
            return Ok(ApplyOutcome::Duplicate);
        }
        if seq != last + 1 {
            return Err(ProjectionError::OutOfOrder {
                stream,
                last,
                found: seq,
            });
        }

        let unknown = |reason: String| ProjectionError::UnknownEvent {
            stream,
            sequence: seq,
            event_type: envelope.event_type().to_string(),
            reason,
        };

        let event: PromissoryEvent =
            serde_json::from_value(envelope.payload().clone()).map_err(|e| unknown(e.to_string()))?;
        if event.event_type() != envelope.event_type() {
            return Err(unknown(format!("payload decodes as '{}'", event.event_type())));
        }

        let id = event.promissory_id();
        if id.0 != stream {
            return Err(ProjectionError::StreamMismatch {
                stream,
                event_stream: id.0,
            });
        }

        let row = match event {
            PromissoryEvent::PromissoryCreated(e) => PromissoryRow {
                id,
                code: e.code,
                state: e.state,
                created_at: e.created_at,
                created_by: e.created_by,
                guarantor_count: 0,
                last_sequence: seq,
            },
            PromissoryEvent::GuarantorCreated(e) => {
                let mut row = self.existing_row(&id, seq)?;
                row.guarantor_count += e.guarantors.len() as u64;
                row.last_sequence = seq;
                row
            }
            PromissoryEvent::PromissoryDone(e) => {
                let mut row = self.existing_row(&id, seq)?;
                row.state = e.state;
                row.last_sequence = seq;
                row
            }
        };

        self.store.upsert(id, row)?;
        *last_applied = seq;

        Ok(ApplyOutcome::Applied)
    }

    fn existing_row(&self, id: &PromissoryId, sequence: u64) -> Result<PromissoryRow, ProjectionError> {
        self.store.get(id)?.ok_or(ProjectionError::MissingRow {
            stream: id.0,
            sequence,
        })
    }

    /// Rebuild the read model from scratch by replaying envelopes.
    ///
    /// Returns the number of events applied.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<usize, ProjectionError> {
        self.cursors.lock().map_err(|_| ProjectionError::Poisoned)?.clear();
        self.store.clear()?;

        let mut envs: Vec<_> = envelopes.into_iter().collect();
        envs.sort_by_key(|e| (e.aggregate_id(), e.sequence_number()));

        let mut applied = 0;
        for env in &envs {
            if self.apply_envelope(env)? == ApplyOutcome::Applied {
                applied += 1;
            }
        }

        tracing::info!(applied, "promissory list rebuilt");
        Ok(applied)
    }

    /// Replay envelopes on top of the current rows without clearing them.
    ///
    /// Sequences at or below a stream's cursor are duplicates, so feeding the whole log
    /// fills the gap a lost delivery left behind. A stream whose history breaks the event
    /// protocol is logged and skipped; the remaining streams still catch up.
    ///
    /// Returns the number of events applied.
    pub fn catch_up(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<usize, ProjectionError> {
        let mut envs: Vec<_> = envelopes.into_iter().collect();
        envs.sort_by_key(|e| (e.aggregate_id(), e.sequence_number()));

        let mut applied = 0;
        let mut broken: Option<AggregateId> = None;
        for env in &envs {
            if broken == Some(env.aggregate_id()) {
                continue;
            }
            match self.apply_envelope(env) {
                Ok(ApplyOutcome::Applied) => applied += 1,
                Ok(ApplyOutcome::Duplicate | ApplyOutcome::Skipped) => {}
                Err(err) if err.is_protocol_violation() => {
                    tracing::error!(
                        stream = %env.aggregate_id(),
                        sequence = env.sequence_number(),
                        error = %err,
                        "stream skipped during catch-up"
                    );
                    broken = Some(env.aggregate_id());
                }
                Err(err) => return Err(err),
            }
        }

        tracing::info!(applied, "promissory list caught up");
        Ok(applied)
    }
}

impl<S> Projection for PromissoryListProjection<S>
where
    S: RowStore<PromissoryId, PromissoryRow>,
{
    type Payload = JsonValue;
    type Error = ProjectionError;

    fn name(&self) -> &'static str {
        "promissory_list"
    }

    fn handles(&self, aggregate_type: &str) -> bool {
        aggregate_type == AGGREGATE_TYPE
    }

    fn apply(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        self.apply_envelope(envelope).map(|_| ())
    }

    fn is_protocol_violation(&self, error: &ProjectionError) -> bool {
        error.is_protocol_violation()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use promissory_notes::{GuarantorAdded, GuarantorCreated, PromissoryCreated, PromissoryDone};
    use proptest::prelude::*;
    use serde_json::json;
    use uuid::Uuid;

    use super::*;
    use crate::read_model::InMemoryRowStore;

    type Store = Arc<InMemoryRowStore<PromissoryId, PromissoryRow>>;

    fn projection() -> PromissoryListProjection<Store> {
        PromissoryListProjection::new(Arc::new(InMemoryRowStore::new()))
    }

    fn envelope(stream: AggregateId, seq: u64, event: &PromissoryEvent) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            Uuid::now_v7(),
            stream,
            AGGREGATE_TYPE,
            seq,
            event.event_type(),
            event.occurred_at(),
            serde_json::to_value(event).unwrap(),
        )
    }

    fn created(id: PromissoryId, code: &str) -> PromissoryEvent {
        PromissoryEvent::PromissoryCreated(PromissoryCreated {
            promissory_id: id,
            code: code.to_string(),
            state: PromissoryState::Created,
            created_at: Utc::now(),
            created_by: UserId::new(),
            row_version: Uuid::now_v7(),
        })
    }

    fn guarantors(id: PromissoryId, n: usize) -> PromissoryEvent {
        let g = GuarantorAdded {
            guarantor_id: Uuid::now_v7(),
            national_id: "0012345678".to_string(),
            name: "Sara".to_string(),
            family: "Karimi".to_string(),
            created_at: Utc::now(),
            created_by: UserId::new(),
            row_version: Uuid::now_v7(),
        };
        PromissoryEvent::GuarantorCreated(GuarantorCreated {
            promissory_id: id,
            state: PromissoryState::GuarantorAdded,
            guarantors: vec![g; n],
            occurred_at: Utc::now(),
        })
    }

    fn done(id: PromissoryId) -> PromissoryEvent {
        PromissoryEvent::PromissoryDone(PromissoryDone {
            promissory_id: id,
            state: PromissoryState::Done,
            completed_at: Utc::now(),
            completed_by: UserId::new(),
        })
    }

    #[test]
    fn folds_a_full_lifecycle_into_one_row() {
        let p = projection();
        let stream = AggregateId::new();
        let id = PromissoryId(stream);

        for (seq, event) in [created(id, "100200"), guarantors(id, 1), guarantors(id, 2), done(id)]
            .iter()
            .enumerate()
        {
            let outcome = p.apply_envelope(&envelope(stream, seq as u64 + 1, event)).unwrap();
            assert_eq!(outcome, ApplyOutcome::Applied);
        }

        let row = p.get(&id).unwrap().unwrap();
        assert_eq!(row.code, "100200");
        assert_eq!(row.guarantor_count, 3);
        // Guarantor events do not move the row state; only Done does.
        assert_eq!(row.state, PromissoryState::Done);
        assert_eq!(row.last_sequence, 4);
        assert_eq!(p.cursor(stream).unwrap(), 4);
    }

    #[test]
    fn guarantor_event_keeps_created_state() {
        let p = projection();
        let stream = AggregateId::new();
        let id = PromissoryId(stream);

        p.apply_envelope(&envelope(stream, 1, &created(id, "1"))).unwrap();
        p.apply_envelope(&envelope(stream, 2, &guarantors(id, 1))).unwrap();

        assert_eq!(p.get(&id).unwrap().unwrap().state, PromissoryState::Created);
    }

    #[test]
    fn redelivery_is_ignored() {
        let p = projection();
        let stream = AggregateId::new();
        let id = PromissoryId(stream);
        let first = envelope(stream, 1, &created(id, "1"));
        let second = envelope(stream, 2, &guarantors(id, 1));

        p.apply_envelope(&first).unwrap();
        p.apply_envelope(&second).unwrap();
        assert_eq!(p.apply_envelope(&second).unwrap(), ApplyOutcome::Duplicate);
        assert_eq!(p.apply_envelope(&first).unwrap(), ApplyOutcome::Duplicate);

        assert_eq!(p.get(&id).unwrap().unwrap().guarantor_count, 1);
    }

    #[test]
    fn gap_in_delivery_is_rejected_without_side_effects() {
        let p = projection();
        let stream = AggregateId::new();
        let id = PromissoryId(stream);
        p.apply_envelope(&envelope(stream, 1, &created(id, "1"))).unwrap();

        let err = p.apply_envelope(&envelope(stream, 3, &done(id))).unwrap_err();
        assert!(matches!(err, ProjectionError::OutOfOrder { last: 1, found: 3, .. }));
        assert!(err.is_protocol_violation());

        let row = p.get(&id).unwrap().unwrap();
        assert_eq!(row.state, PromissoryState::Created);
        assert_eq!(p.cursor(stream).unwrap(), 1);
    }

    #[test]
    fn first_event_must_be_sequence_one() {
        let p = projection();
        let stream = AggregateId::new();

        let err = p
            .apply_envelope(&envelope(stream, 2, &created(PromissoryId(stream), "1")))
            .unwrap_err();
        assert!(matches!(err, ProjectionError::OutOfOrder { last: 0, found: 2, .. }));
    }

    #[test]
    fn unknown_event_kind_is_a_protocol_violation() {
        let p = projection();
        let stream = AggregateId::new();
        let env = EventEnvelope::new(
            Uuid::now_v7(),
            stream,
            AGGREGATE_TYPE,
            1,
            "promissory.cancelled",
            Utc::now(),
            json!({ "PromissoryCancelled": { "promissory_id": stream } }),
        );

        let err = p.apply_envelope(&env).unwrap_err();
        assert!(matches!(err, ProjectionError::UnknownEvent { sequence: 1, .. }));
        assert!(err.is_protocol_violation());
        assert_eq!(p.cursor(stream).unwrap(), 0);
        assert!(p.list().unwrap().is_empty());
    }

    #[test]
    fn mismatched_kind_tag_is_rejected() {
        let p = projection();
        let stream = AggregateId::new();
        let event = created(PromissoryId(stream), "1");
        let env = EventEnvelope::new(
            Uuid::now_v7(),
            stream,
            AGGREGATE_TYPE,
            1,
            "promissory.done",
            Utc::now(),
            serde_json::to_value(&event).unwrap(),
        );

        assert!(matches!(
            p.apply_envelope(&env),
            Err(ProjectionError::UnknownEvent { .. })
        ));
    }

    #[test]
    fn event_for_another_stream_is_rejected() {
        let p = projection();
        let stream = AggregateId::new();
        let other = PromissoryId(AggregateId::new());

        let err = p.apply_envelope(&envelope(stream, 1, &created(other, "1"))).unwrap_err();
        assert!(matches!(err, ProjectionError::StreamMismatch { .. }));
    }

    #[test]
    fn guarantors_before_creation_report_missing_row() {
        let p = projection();
        let stream = AggregateId::new();

        let err = p
            .apply_envelope(&envelope(stream, 1, &guarantors(PromissoryId(stream), 1)))
            .unwrap_err();
        assert!(matches!(err, ProjectionError::MissingRow { sequence: 1, .. }));
    }

    #[test]
    fn foreign_aggregate_types_are_skipped() {
        let p = projection();
        let env = EventEnvelope::new(
            Uuid::now_v7(),
            AggregateId::new(),
            "invoice",
            1,
            "invoice.created",
            Utc::now(),
            json!({}),
        );

        assert_eq!(p.apply_envelope(&env).unwrap(), ApplyOutcome::Skipped);
        assert!(!p.handles("invoice"));
        assert!(p.handles(AGGREGATE_TYPE));
    }

    #[test]
    fn list_is_ordered_by_creation_time() {
        let p = projection();
        let base = Utc::now();
        for n in [2i64, 0, 1] {
            let stream = AggregateId::new();
            let event = PromissoryEvent::PromissoryCreated(PromissoryCreated {
                promissory_id: PromissoryId(stream),
                code: n.to_string(),
                state: PromissoryState::Created,
                created_at: base + chrono::Duration::seconds(n),
                created_by: UserId::new(),
                row_version: Uuid::now_v7(),
            });
            p.apply_envelope(&envelope(stream, 1, &event)).unwrap();
        }

        let codes: Vec<String> = p.list().unwrap().into_iter().map(|r| r.code).collect();
        assert_eq!(codes, vec!["0", "1", "2"]);
    }

    #[test]
    fn rebuild_from_scratch_replaces_previous_state() {
        let p = projection();
        let stream = AggregateId::new();
        let id = PromissoryId(stream);
        let history = vec![
            envelope(stream, 1, &created(id, "7")),
            envelope(stream, 2, &guarantors(id, 2)),
        ];
        for env in &history {
            p.apply_envelope(env).unwrap();
        }
        let before = p.list().unwrap();

        // Shuffled input; rebuild sorts by stream and sequence.
        let applied = p.rebuild_from_scratch(history.into_iter().rev()).unwrap();

        assert_eq!(applied, 2);
        assert_eq!(p.list().unwrap(), before);
    }

    #[test]
    fn catch_up_recovers_from_a_lost_delivery() {
        let p = projection();
        let stream = AggregateId::new();
        let id = PromissoryId(stream);
        let log = vec![
            envelope(stream, 1, &created(id, "9")),
            envelope(stream, 2, &guarantors(id, 1)),
            envelope(stream, 3, &guarantors(id, 1)),
            envelope(stream, 4, &done(id)),
        ];

        // Sequence 2 never arrives; everything after it is stuck behind the gap.
        p.apply_envelope(&log[0]).unwrap();
        for env in &log[2..] {
            assert!(matches!(
                p.apply_envelope(env),
                Err(ProjectionError::OutOfOrder { last: 1, .. })
            ));
        }
        assert_eq!(p.get(&id).unwrap().unwrap().state, PromissoryState::Created);

        let applied = p.catch_up(log.clone()).unwrap();

        assert_eq!(applied, 3);
        let row = p.get(&id).unwrap().unwrap();
        assert_eq!(row.state, PromissoryState::Done);
        assert_eq!(row.guarantor_count, 2);
        assert_eq!(row.last_sequence, 4);

        // Running it again is a no-op.
        assert_eq!(p.catch_up(log).unwrap(), 0);
    }

    #[test]
    fn catch_up_skips_a_broken_stream_and_keeps_going() {
        let p = projection();
        let broken = AggregateId::new();
        let healthy = AggregateId::new();
        let unknown = EventEnvelope::new(
            Uuid::now_v7(),
            broken,
            AGGREGATE_TYPE,
            1,
            "promissory.cancelled",
            Utc::now(),
            json!({ "PromissoryCancelled": { "promissory_id": broken } }),
        );
        let log = vec![
            unknown,
            envelope(healthy, 1, &created(PromissoryId(healthy), "5")),
            envelope(healthy, 2, &done(PromissoryId(healthy))),
        ];

        assert_eq!(p.catch_up(log).unwrap(), 2);
        assert!(p.get(&PromissoryId(broken)).unwrap().is_none());
        assert_eq!(
            p.get(&PromissoryId(healthy)).unwrap().unwrap().state,
            PromissoryState::Done
        );
    }

    #[test]
    fn protocol_violations_are_classified_for_the_worker() {
        let p = projection();
        let gap = ProjectionError::OutOfOrder {
            stream: AggregateId::new(),
            last: 1,
            found: 3,
        };
        assert!(Projection::is_protocol_violation(&p, &gap));
        assert!(!Projection::is_protocol_violation(&p, &ProjectionError::Poisoned));
    }

    proptest! {
        #[test]
        fn redelivery_never_changes_the_outcome(
            batches in proptest::collection::vec(1usize..4, 0..8),
            redeliver in proptest::collection::vec(any::<bool>(), 8),
        ) {
            let clean = projection();
            let noisy = projection();
            let stream = AggregateId::new();
            let id = PromissoryId(stream);

            let mut history = vec![envelope(stream, 1, &created(id, "42"))];
            for (n, size) in batches.iter().enumerate() {
                history.push(envelope(stream, n as u64 + 2, &guarantors(id, *size)));
            }

            for (n, env) in history.iter().enumerate() {
                clean.apply_envelope(env).unwrap();
                noisy.apply_envelope(env).unwrap();
                if redeliver.get(n).copied().unwrap_or(false) {
                    prop_assert_eq!(noisy.apply_envelope(env).unwrap(), ApplyOutcome::Duplicate);
                }
            }

            let expected: u64 = batches.iter().map(|n| *n as u64).sum();
            let row = noisy.get(&id).unwrap().unwrap();
            prop_assert_eq!(row.guarantor_count, expected);
            prop_assert_eq!(clean.get(&id).unwrap(), noisy.get(&id).unwrap());
        }
    }
}
