use serde::Serialize;
use uuid::Uuid;

/// The surface-visible error taxonomy from the control plane's error handling design.
///
/// Handlers map this to an HTTP status and an `ErrorEnvelope`; repositories and
/// engines return it directly so `?` carries typed failures up to the API layer.
#[derive(Debug, thiserror::Error)]
pub enum PhoenixError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("rate limited")]
    RateLimited,

    #[error("internal error")]
    Internal(#[source] anyhow::Error),
}

impl PhoenixError {
    pub fn code(&self) -> &'static str {
        match self {
            PhoenixError::Validation(_) => "VALIDATION_ERROR",
            PhoenixError::Unauthorized(_) => "UNAUTHORIZED",
            PhoenixError::Forbidden(_) => "FORBIDDEN",
            PhoenixError::NotFound(_) => "NOT_FOUND",
            PhoenixError::Conflict(_) => "CONFLICT",
            PhoenixError::RateLimited => "RATE_LIMITED",
            PhoenixError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn internal<E: Into<anyhow::Error>>(err: E) -> Self {
        PhoenixError::Internal(err.into())
    }
}

impl From<sqlx::Error> for PhoenixError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => PhoenixError::NotFound("row not found".to_string()),
            other => PhoenixError::Internal(other.into()),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for PhoenixError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        PhoenixError::Unauthorized(err.to_string())
    }
}

impl From<serde_json::Error> for PhoenixError {
    fn from(err: serde_json::Error) -> Self {
        PhoenixError::Validation(err.to_string())
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    pub request_id: Uuid,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ResponseMeta {
    pub fn new(request_id: Uuid) -> Self {
        Self {
            request_id,
            timestamp: chrono::Utc::now(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
    pub meta: ResponseMeta,
}

impl ErrorEnvelope {
    pub fn new(err: &PhoenixError, request_id: Uuid) -> Self {
        Self {
            error: ErrorBody {
                code: err.code().to_string(),
                message: public_message(err),
                details: None,
            },
            meta: ResponseMeta::new(request_id),
        }
    }
}

/// `InternalError` never leaks details; everything else reports its own message.
fn public_message(err: &PhoenixError) -> String {
    match err {
        PhoenixError::Internal(_) => "an internal error occurred".to_string(),
        other => other.to_string(),
    }
}

pub type PhoenixResult<T> = Result<T, PhoenixError>;
