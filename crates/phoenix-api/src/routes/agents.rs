//! Fleet read surface (spec §4.1): the agent registry as seen by users. No
//! write path here — agents register themselves via `/api/v1/heartbeat`.

use axum::extract::{Extension, Path, Query, State};
use axum::Json;
use phoenix_types::{Agent, Page, PageMeta, PageParams};

use crate::error::{ApiError, ApiResult};
use crate::middleware::{AuthUser, RequestId};
use crate::AppState;

pub async fn list(
    State(state): State<AppState>,
    AuthUser(_claims): AuthUser,
    Query(page): Query<PageParams>,
    Extension(request_id): Extension<RequestId>,
) -> ApiResult<Json<Page<Agent>>> {
    let (items, total) = state
        .agents()
        .list_page(page.limit, page.offset)
        .await
        .map_err(|e| ApiError::new(e, request_id.0))?;
    Ok(Json(Page {
        items,
        meta: PageMeta {
            total,
            limit: page.limit,
            offset: page.offset,
        },
    }))
}

pub async fn get(
    State(state): State<AppState>,
    AuthUser(_claims): AuthUser,
    Path(host_id): Path<String>,
    Extension(request_id): Extension<RequestId>,
) -> ApiResult<Json<Agent>> {
    let agent = state
        .agents()
        .get(&host_id)
        .await
        .map_err(|e| ApiError::new(e, request_id.0))?
        .ok_or_else(|| {
            ApiError::new(
                phoenix_types::PhoenixError::NotFound(format!("agent {host_id} not found")),
                request_id.0,
            )
        })?;
    Ok(Json(agent))
}
