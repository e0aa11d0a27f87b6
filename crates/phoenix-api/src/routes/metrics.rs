//! Cost/cardinality read surface (C6, spec §4.6): top cost flows, the one
//! view specific to the "where is the money going" question the platform
//! exists to answer.

use axum::extract::{Extension, Query, State};
use axum::Json;
use phoenix_types::CostFlowEntry;
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};
use crate::middleware::{AuthUser, RequestId};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct TopCostFlowParams {
    limit: Option<i64>,
}

const DEFAULT_LIMIT: i64 = 20;

pub async fn top_cost_flows(
    State(state): State<AppState>,
    AuthUser(_claims): AuthUser,
    Extension(request_id): Extension<RequestId>,
    Query(params): Query<TopCostFlowParams>,
) -> ApiResult<Json<Vec<CostFlowEntry>>> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, 500);
    let flows = state
        .metrics()
        .top_cost_flows(limit)
        .await
        .map_err(|e| ApiError::new(e, request_id.0))?;
    Ok(Json(flows))
}
