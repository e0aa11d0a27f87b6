//! Session termination (C9, spec §4.9): revokes the caller's own token.

use axum::extract::{Extension, State};
use axum::http::StatusCode;

use crate::error::ApiResult;
use crate::middleware::{AuthUser, RequestId};
use crate::AppState;

pub async fn logout(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Extension(request_id): Extension<RequestId>,
) -> ApiResult<StatusCode> {
    state
        .auth()
        .logout(&claims)
        .await
        .map_err(|e| crate::error::ApiError::new(e, request_id.0))?;
    Ok(StatusCode::NO_CONTENT)
}
