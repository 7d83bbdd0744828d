use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use promissory_infra::aggregator::ReplayError;
use promissory_infra::command_dispatcher::DispatchError;
use promissory_infra::event_store::EventStoreError;
use promissory_infra::projections::ProjectionError;

use crate::app::services::CatchUpError;

const INTERNAL_MESSAGE: &str = "internal error";

pub fn dispatch_error_to_response(err: DispatchError) -> axum::response::Response {
    match err {
        DispatchError::StreamNotFound(id) => not_found(id),
        DispatchError::StreamAlreadyExists(id) => json_error(
            StatusCode::CONFLICT,
            "already_exists",
            format!("promissory {id} already exists"),
        ),
        DispatchError::Concurrency(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        DispatchError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DispatchError::InvariantViolation(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg)
        }
        DispatchError::Publish(msg) => {
            tracing::error!(error = %msg, "event stored but not published");
            json_error(StatusCode::BAD_GATEWAY, "publish_error", "event stored but not published")
        }
        err @ (DispatchError::ProtocolViolation(_) | DispatchError::Store(_)) => internal(&err),
    }
}

pub fn replay_error_to_response(err: ReplayError) -> axum::response::Response {
    match err {
        ReplayError::StreamNotFound(id) => not_found(id),
        other => internal(&other),
    }
}

pub fn store_error_to_response(err: EventStoreError) -> axum::response::Response {
    match err {
        EventStoreError::StreamNotFound(id) => not_found(id),
        other => internal(&other),
    }
}

pub fn projection_error_to_response(err: ProjectionError) -> axum::response::Response {
    internal(&err)
}

pub fn catch_up_error_to_response(err: CatchUpError) -> axum::response::Response {
    internal(&err)
}

fn not_found(id: impl std::fmt::Display) -> axum::response::Response {
    json_error(StatusCode::NOT_FOUND, "not_found", format!("promissory {id} not found"))
}

/// Log the cause and answer with an opaque 500.
fn internal(err: &dyn std::error::Error) -> axum::response::Response {
    tracing::error!(error = %err, "request failed");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", INTERNAL_MESSAGE)
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Body extraction failures (missing fields, bad JSON, wrong content type) keep axum's
/// status code but use the common error body.
pub fn json_rejection_to_response(rejection: JsonRejection) -> axum::response::Response {
    json_error(rejection.status(), "invalid_body", rejection.body_text())
}

pub fn invalid_id() -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid promissory id")
}
