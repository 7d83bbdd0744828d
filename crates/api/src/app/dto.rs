use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use promissory_core::{AggregateId, AggregateRoot};
use promissory_infra::event_store::StoredEvent;
use promissory_infra::projections::PromissoryRow;
use promissory_notes::{GuarantorAdded, Promissory};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct AddGuarantorRequest {
    pub p_id: String,
    pub national_id: String,
    pub name: String,
    pub family: String,
}

#[derive(Debug, Deserialize)]
pub struct MarkDoneRequest {
    pub p_id: String,
}

// -------------------------
// Response mapping
// -------------------------

pub fn write_ack(id: AggregateId, event: &StoredEvent) -> JsonValue {
    json!({
        "id": id.to_string(),
        "stream_version": event.stream_version(),
    })
}

pub fn promissory_to_json(p: &Promissory) -> JsonValue {
    json!({
        "id": p.id().to_string(),
        "code": p.code(),
        "state": p.state().as_str(),
        "state_code": p.state().code(),
        "version": p.version(),
        "guarantors": p.guarantors().iter().map(guarantor_to_json).collect::<Vec<_>>(),
    })
}

fn guarantor_to_json(g: &GuarantorAdded) -> JsonValue {
    json!({
        "guarantor_id": g.guarantor_id.to_string(),
        "national_id": g.national_id,
        "name": g.name,
        "family": g.family,
        "created_at": g.created_at,
        "created_by": g.created_by.to_string(),
    })
}

pub fn row_to_json(row: &PromissoryRow) -> JsonValue {
    json!({
        "id": row.id.to_string(),
        "code": row.code,
        "state": row.state.as_str(),
        "state_code": row.state.code(),
        "created_at": row.created_at,
        "created_by": row.created_by.to_string(),
        "guarantor_count": row.guarantor_count,
    })
}

pub fn event_to_json(e: &StoredEvent) -> JsonValue {
    json!({
        "event_id": e.event_id.to_string(),
        "sequence_number": e.sequence_number,
        "event_type": e.event_type,
        "event_version": e.event_version,
        "occurred_at": e.occurred_at,
        "payload": e.payload,
    })
}
