//! Session-based caller identity.
//!
//! Sessions are issued by the identity provider and stored in the `sessions`
//! table. Each request presents its session token as a bearer token; this
//! module only resolves it to a caller.

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};

use crate::errors::AppError;
use crate::AppState;

/// Header carrying the session token when no `Authorization` header is sent.
pub const SESSION_HEADER: &str = "x-session-token";

/// The authenticated user behind a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
    pub username: Option<String>,
}

/// Caller identity if the request carries a valid session, `None` otherwise.
#[derive(Debug, Clone)]
pub struct MaybeCaller(pub Option<Caller>);

impl FromRequestParts<AppState> for MaybeCaller {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(token) = session_token(parts) else {
            return Ok(MaybeCaller(None));
        };

        let repo = state.store.acquire().await?;
        let caller = repo.find_session_user(&token).await?.map(|user| Caller {
            user_id: user.id,
            username: user.username,
        });

        if caller.is_none() {
            tracing::debug!("Ignoring unknown or expired session token");
        }
        Ok(MaybeCaller(caller))
    }
}

/// Reject the request unless a caller is present.
pub fn require(caller: Option<Caller>) -> Result<Caller, AppError> {
    caller.ok_or_else(|| AppError::Unauthorized("Unauthorized".to_string()))
}

/// Extract the session token from `Authorization: Bearer` or the session header.
fn session_token(parts: &Parts) -> Option<String> {
    let bearer = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "));

    bearer
        .or_else(|| {
            parts
                .headers
                .get(SESSION_HEADER)
                .and_then(|v| v.to_str().ok())
        })
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}
