//! Caller identity extraction.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use common::UserId;

use crate::error::ApiError;

/// Header carrying the authenticated caller's stable identity key.
pub const ACTOR_HEADER: &str = "x-actor-id";

/// The identity performing a request, taken from [`ACTOR_HEADER`].
///
/// Rejects with 401 when the header is missing, blank, or not valid UTF-8.
#[derive(Debug, Clone)]
pub struct Actor(pub UserId);

impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ApiError::Unauthorized(format!("Missing {ACTOR_HEADER} header")))?;
        Ok(Actor(UserId::new(value)))
    }
}
