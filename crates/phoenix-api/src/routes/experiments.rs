//! User v2 experiment lifecycle (C4, spec §4.4): create, start, stop,
//! rollback, promote, overlap check, and KPI read. Every mutating call that
//! changes `phase` re-runs the reconciler inline afterward so the response
//! reflects the freshest phase rather than a stale pre-transition snapshot.

use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use phoenix_types::{Experiment, ExperimentKpis, NewExperiment, OverlapReport, Page, PageMeta, PageParams, Variant};
use serde::Deserialize;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::middleware::{require_role, AuthUser, RequestId};
use crate::AppState;

pub async fn create(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Extension(request_id): Extension<RequestId>,
    Json(new): Json<NewExperiment>,
) -> ApiResult<(StatusCode, Json<Experiment>)> {
    require_role(&claims, &["admin", "operator"], request_id.0)?;
    let created = state
        .experiments()
        .create(new)
        .await
        .map_err(|e| crate::error::ApiError::new(e, request_id.0))?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn list(
    State(state): State<AppState>,
    AuthUser(_claims): AuthUser,
    Query(page): Query<PageParams>,
    Extension(request_id): Extension<RequestId>,
) -> ApiResult<Json<Page<Experiment>>> {
    let (items, total) = state
        .experiments()
        .list_page(page.limit, page.offset)
        .await
        .map_err(|e| crate::error::ApiError::new(e, request_id.0))?;
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
    Path(id): Path<Uuid>,
    Extension(request_id): Extension<RequestId>,
) -> ApiResult<Json<Experiment>> {
    let experiment = state
        .experiments()
        .get(id)
        .await
        .map_err(|e| crate::error::ApiError::new(e, request_id.0))?
        .ok_or_else(|| {
            crate::error::ApiError::new(
                phoenix_types::PhoenixError::NotFound(format!("experiment {id} not found")),
                request_id.0,
            )
        })?;
    Ok(Json(experiment))
}

#[derive(Debug, Deserialize)]
pub struct CheckOverlapBody {
    candidate_hosts: Vec<String>,
}

pub async fn check_overlap(
    State(state): State<AppState>,
    AuthUser(_claims): AuthUser,
    Path(id): Path<Uuid>,
    Extension(request_id): Extension<RequestId>,
    Json(body): Json<CheckOverlapBody>,
) -> ApiResult<Json<OverlapReport>> {
    let report = state
        .experiments()
        .check_overlap(id, &body.candidate_hosts)
        .await
        .map_err(|e| crate::error::ApiError::new(e, request_id.0))?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
pub struct StartBody {
    baseline_template_body: String,
    candidate_template_body: String,
    #[serde(default)]
    parameters: HashMap<String, String>,
}

pub async fn start(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Path(id): Path<Uuid>,
    Extension(request_id): Extension<RequestId>,
    Json(body): Json<StartBody>,
) -> ApiResult<Json<Experiment>> {
    require_role(&claims, &["admin", "operator"], request_id.0)?;
    state
        .experiments()
        .start(id, &body.baseline_template_body, &body.candidate_template_body, body.parameters)
        .await
        .map_err(|e| crate::error::ApiError::new(e, request_id.0))?;
    let experiment = state
        .experiments()
        .reconcile(id)
        .await
        .map_err(|e| crate::error::ApiError::new(e, request_id.0))?;
    Ok(Json(experiment))
}

pub async fn stop(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Path(id): Path<Uuid>,
    Extension(request_id): Extension<RequestId>,
) -> ApiResult<Json<Experiment>> {
    require_role(&claims, &["admin", "operator"], request_id.0)?;
    state
        .experiments()
        .stop(id)
        .await
        .map_err(|e| crate::error::ApiError::new(e, request_id.0))?;
    let experiment = state
        .experiments()
        .reconcile(id)
        .await
        .map_err(|e| crate::error::ApiError::new(e, request_id.0))?;
    Ok(Json(experiment))
}

pub async fn rollback(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Path(id): Path<Uuid>,
    Extension(request_id): Extension<RequestId>,
) -> ApiResult<Json<Experiment>> {
    require_role(&claims, &["admin", "operator"], request_id.0)?;
    state
        .experiments()
        .rollback(id)
        .await
        .map_err(|e| crate::error::ApiError::new(e, request_id.0))?;
    let experiment = state
        .experiments()
        .reconcile(id)
        .await
        .map_err(|e| crate::error::ApiError::new(e, request_id.0))?;
    Ok(Json(experiment))
}

#[derive(Debug, Deserialize)]
pub struct PromoteBody {
    variant: Variant,
}

pub async fn promote(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Path(id): Path<Uuid>,
    Extension(request_id): Extension<RequestId>,
    Json(body): Json<PromoteBody>,
) -> ApiResult<Json<phoenix_types::Deployment>> {
    require_role(&claims, &["admin", "operator"], request_id.0)?;
    let deployment = state
        .experiments()
        .promote(id, body.variant)
        .await
        .map_err(|e| crate::error::ApiError::new(e, request_id.0))?;
    state
        .experiments()
        .reconcile(id)
        .await
        .map_err(|e| crate::error::ApiError::new(e, request_id.0))?;
    Ok(Json(deployment))
}

pub async fn delete(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Path(id): Path<Uuid>,
    Extension(request_id): Extension<RequestId>,
) -> ApiResult<StatusCode> {
    require_role(&claims, &["admin", "operator"], request_id.0)?;
    state
        .experiments()
        .delete(id)
        .await
        .map_err(|e| crate::error::ApiError::new(e, request_id.0))?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn kpis(
    State(state): State<AppState>,
    AuthUser(_claims): AuthUser,
    Path(id): Path<Uuid>,
    Extension(request_id): Extension<RequestId>,
) -> ApiResult<Json<ExperimentKpis>> {
    let kpis = state
        .metrics()
        .experiment_kpis(id)
        .await
        .map_err(|e| crate::error::ApiError::new(e, request_id.0))?;
    Ok(Json(kpis))
}
