use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use promissory_core::AggregateId;

use crate::app::services::{GuarantorFields, PromissoryService};
use crate::app::{dto, errors};
use crate::context::ActorContext;

pub fn router() -> Router {
    Router::new()
        .route("/add", post(create_promissory))
        .route("/guarantor/add", post(add_guarantor))
        .route("/done", post(mark_done))
        .route("/all", get(list_promissories))
        .route("/:id", get(get_promissory))
        .route("/:id/events", get(get_events))
}

fn parse_id(raw: &str) -> Result<AggregateId, axum::response::Response> {
    raw.trim().parse().map_err(|_| errors::invalid_id())
}

pub async fn create_promissory(
    Extension(services): Extension<Arc<PromissoryService>>,
    Extension(actor): Extension<ActorContext>,
) -> axum::response::Response {
    match services.create_promissory(actor.actor()) {
        Ok(id) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "id": id.to_string() })),
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn add_guarantor(
    Extension(services): Extension<Arc<PromissoryService>>,
    Extension(actor): Extension<ActorContext>,
    body: Result<Json<dto::AddGuarantorRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(v) => v,
        Err(rejection) => return errors::json_rejection_to_response(rejection),
    };
    let id = match parse_id(&body.p_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let fields = GuarantorFields {
        national_id: body.national_id,
        name: body.name,
        family: body.family,
    };

    match services.add_guarantor(actor.actor(), id, fields) {
        Ok(event) => (StatusCode::OK, Json(dto::write_ack(id, &event))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn mark_done(
    Extension(services): Extension<Arc<PromissoryService>>,
    Extension(actor): Extension<ActorContext>,
    body: Result<Json<dto::MarkDoneRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(v) => v,
        Err(rejection) => return errors::json_rejection_to_response(rejection),
    };
    let id = match parse_id(&body.p_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.mark_done(actor.actor(), id) {
        Ok(event) => (StatusCode::OK, Json(dto::write_ack(id, &event))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn get_promissory(
    Extension(services): Extension<Arc<PromissoryService>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.get_promissory(id) {
        Ok(p) => (StatusCode::OK, Json(dto::promissory_to_json(&p))).into_response(),
        Err(e) => errors::replay_error_to_response(e),
    }
}

pub async fn list_promissories(
    Extension(services): Extension<Arc<PromissoryService>>,
) -> axum::response::Response {
    match services.list_promissories() {
        Ok(rows) => {
            let items: Vec<_> = rows.iter().map(dto::row_to_json).collect();
            (StatusCode::OK, Json(items)).into_response()
        }
        Err(e) => errors::projection_error_to_response(e),
    }
}

pub async fn get_events(
    Extension(services): Extension<Arc<PromissoryService>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.stream_events(id) {
        Ok(events) => {
            let items: Vec<_> = events.iter().map(dto::event_to_json).collect();
            (StatusCode::OK, Json(items)).into_response()
        }
        Err(e) => errors::store_error_to_response(e),
    }
}
