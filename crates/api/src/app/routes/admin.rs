//! Operational endpoints for the read side.

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};

use crate::app::errors;
use crate::app::services::PromissoryService;

pub fn router() -> Router {
    Router::new().route("/projections/promissory_list/catch-up", post(catch_up_promissory_list))
}

/// Replay the event log into the promissory list, filling any delivery gaps.
pub async fn catch_up_promissory_list(
    Extension(services): Extension<Arc<PromissoryService>>,
) -> axum::response::Response {
    match services.catch_up_projection() {
        Ok(applied) => {
            tracing::info!(applied, "promissory list catch-up requested");
            (
                StatusCode::OK,
                Json(serde_json::json!({ "projection": "promissory_list", "applied": applied })),
            )
                .into_response()
        }
        Err(e) => errors::catch_up_error_to_response(e),
    }
}
