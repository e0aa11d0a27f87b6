//! Maps the `PhoenixError` taxonomy (spec §7) onto HTTP status codes and the
//! `ErrorEnvelope` response body. `ApiError` is a thin newtype so this crate
//! can impl the foreign `IntoResponse` trait for the foreign `PhoenixError`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use phoenix_types::{ErrorEnvelope, PhoenixError};
use uuid::Uuid;

pub struct ApiError {
    pub err: PhoenixError,
    pub request_id: Uuid,
}

impl ApiError {
    pub fn new(err: PhoenixError, request_id: Uuid) -> Self {
        Self { err, request_id }
    }
}

impl From<PhoenixError> for ApiError {
    /// Used inside handlers via `?` where the request id comes from request
    /// extensions instead; prefer `ApiError::new` when the id is in scope.
    /// Falls back to a fresh id only for code paths outside the request-id
    /// middleware's reach (should not happen on the happy path).
    fn from(err: PhoenixError) -> Self {
        Self {
            err,
            request_id: Uuid::new_v4(),
        }
    }
}

fn status_for(err: &PhoenixError) -> StatusCode {
    match err {
        PhoenixError::Validation(_) => StatusCode::BAD_REQUEST,
        PhoenixError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        PhoenixError::Forbidden(_) => StatusCode::FORBIDDEN,
        PhoenixError::NotFound(_) => StatusCode::NOT_FOUND,
        PhoenixError::Conflict(_) => StatusCode::CONFLICT,
        PhoenixError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        PhoenixError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if matches!(self.err, PhoenixError::Internal(_)) {
            tracing::error!(request_id = %self.request_id, error = %self.err, "internal error");
        }
        let status = status_for(&self.err);
        let body = ErrorEnvelope::new(&self.err, self.request_id);
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
