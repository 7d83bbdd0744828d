use axum::Router;

pub mod admin;
pub mod promissory;
pub mod system;

/// Router for all domain and admin endpoints.
pub fn router() -> Router {
    Router::new()
        .nest("/promissory", promissory::router())
        .nest("/admin", admin::router())
}
