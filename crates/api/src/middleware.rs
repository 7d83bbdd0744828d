use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use promissory_core::UserId;

use crate::app::errors;
use crate::context::ActorContext;

pub const ACTOR_HEADER: &str = "x-actor-id";

/// Attach an `ActorContext` to every request.
pub async fn actor_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let actor = extract_actor(req.headers())
        .map_err(|msg| errors::json_error(StatusCode::BAD_REQUEST, "invalid_actor", msg))?;

    req.extensions_mut().insert(actor);

    Ok(next.run(req).await)
}

fn extract_actor(headers: &HeaderMap) -> Result<ActorContext, String> {
    let Some(header) = headers.get(ACTOR_HEADER) else {
        return Ok(ActorContext::generated());
    };

    let raw = header
        .to_str()
        .map_err(|_| format!("{ACTOR_HEADER} must be valid ASCII"))?
        .trim();

    raw.parse::<UserId>()
        .map(ActorContext::supplied)
        .map_err(|_| format!("{ACTOR_HEADER} must be a UUID"))
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn missing_header_generates_an_actor() {
        let ctx = extract_actor(&HeaderMap::new()).unwrap();
        assert!(!ctx.is_supplied());
    }

    #[test]
    fn valid_header_is_used_verbatim() {
        let actor = UserId::new();
        let mut headers = HeaderMap::new();
        headers.insert(ACTOR_HEADER, HeaderValue::from_str(&actor.to_string()).unwrap());

        let ctx = extract_actor(&headers).unwrap();
        assert!(ctx.is_supplied());
        assert_eq!(ctx.actor(), actor);
    }

    #[test]
    fn malformed_header_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(ACTOR_HEADER, HeaderValue::from_static("not-a-uuid"));

        assert!(extract_actor(&headers).is_err());
    }
}
