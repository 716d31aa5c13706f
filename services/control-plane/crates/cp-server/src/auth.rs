//! Host authentication for agent-facing endpoints.
//!
//! A bad or stale token is `401`; a well-formed token for a host that was
//! never admitted is `403`.

use axum::extract::FromRequestParts;
use chrono::Utc;
use http::header::AUTHORIZATION;
use http::request::Parts;
use outpost_common::token;

use crate::AppState;
use crate::error::ApiError;

/// UUID of the admitted host making the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostIdentity(pub String);

/// Token part of an `Authorization: Bearer <token>` header.
fn bearer(parts: &Parts) -> Result<&str, ApiError> {
    let value = parts
        .headers
        .get(AUTHORIZATION)
        .ok_or_else(|| ApiError::Unauthorized("missing authorization header".into()))?
        .to_str()
        .map_err(|_| ApiError::Unauthorized("authorization header is not text".into()))?;
    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("expected a bearer token".into()))
}

impl FromRequestParts<AppState> for HostIdentity {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let host = token::validate(bearer(parts)?, Utc::now())
            .map_err(|e| ApiError::Unauthorized(e.to_string()))?;
        if !state.store.is_admitted(&host.host_id).await? {
            return Err(ApiError::Forbidden(format!(
                "host '{}' is not admitted",
                host.host_id
            )));
        }
        Ok(Self(host.host_id))
    }
}
