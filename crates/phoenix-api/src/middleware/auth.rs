//! Two trust boundaries per spec §4.3/§4.9: a bearer JWT for the user v2
//! surface, and the `X-Agent-Host-ID` header for the agent v1 surface. Both
//! extractors also enforce the per-identity rate limit (spec §4.8) so every
//! authenticated route gets it for free by taking the extractor as an
//! argument, instead of a separate layer that would have to re-parse the
//! credential to learn the identity to key on.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use phoenix_types::{Claims, PhoenixError};

use crate::error::ApiError;
use crate::middleware::request_id::RequestId;
use crate::AppState;

fn request_id_of(parts: &Parts) -> uuid::Uuid {
    parts
        .extensions
        .get::<RequestId>()
        .map(|r| r.0)
        .unwrap_or_else(uuid::Uuid::new_v4)
}

pub struct AuthUser(pub Claims);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let request_id = request_id_of(parts);
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| PhoenixError::Unauthorized("missing authorization header".to_string()))
            .map_err(|e| ApiError::new(e, request_id))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| PhoenixError::Unauthorized("expected a bearer token".to_string()))
            .map_err(|e| ApiError::new(e, request_id))?;

        let claims = state
            .auth()
            .verify(token)
            .await
            .map_err(|e| ApiError::new(e, request_id))?;

        if !state.rate_limit_user().check(&claims.sub) {
            return Err(ApiError::new(PhoenixError::RateLimited, request_id));
        }

        Ok(AuthUser(claims))
    }
}

pub struct AgentIdentity(pub String);

impl FromRequestParts<AppState> for AgentIdentity {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let request_id = request_id_of(parts);
        let host_id = parts
            .headers
            .get("x-agent-host-id")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| PhoenixError::Unauthorized("missing X-Agent-Host-ID header".to_string()))
            .map_err(|e| ApiError::new(e, request_id))?
            .to_string();

        if !state.rate_limit_agent().check(&host_id) {
            return Err(ApiError::new(PhoenixError::RateLimited, request_id));
        }

        Ok(AgentIdentity(host_id))
    }
}

/// Checks `claims.role` against `allowed`, reusing `phoenix_auth::require_role`.
pub fn require_role(claims: &Claims, allowed: &[&str], request_id: uuid::Uuid) -> Result<(), ApiError> {
    phoenix_auth::require_role(&claims.role, allowed).map_err(|e| ApiError::new(e, request_id))
}
