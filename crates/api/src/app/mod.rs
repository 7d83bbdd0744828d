//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: the promissory application service and its in-memory infra wiring
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::PromissoryService;

/// Build the full HTTP router (public entrypoint used by `main.rs` and the black-box tests).
pub fn build_app(services: Arc<PromissoryService>) -> Router {
    let domain = routes::router().layer(
        ServiceBuilder::new()
            .layer(Extension(services))
            .layer(axum::middleware::from_fn(middleware::actor_middleware)),
    );

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(domain)
}
