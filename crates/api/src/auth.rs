//! Caller identity supplied by the upstream session service.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use common::UserId;

use crate::error::ApiError;

/// Header carrying the authenticated user id, set by the gateway in front of
/// this service.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated caller. The id is trusted as given.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedUser(pub UserId);

impl<S: Send + Sync> FromRequestParts<S> for AuthenticatedUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| ApiError::Unauthorized(format!("missing {USER_ID_HEADER} header")))?
            .to_str()
            .map_err(|_| ApiError::Unauthorized(format!("malformed {USER_ID_HEADER} header")))?;

        raw.parse::<UserId>()
            .map(AuthenticatedUser)
            .map_err(|e| ApiError::Unauthorized(format!("invalid user id: {e}")))
    }
}
