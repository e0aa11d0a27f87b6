//! User v2 deployment registry (C5, spec §4.5): direct, experiment-less
//! pipeline rollouts with versioned rollback.

use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use phoenix_types::{Deployment, DeploymentVersion, NewDeployment, Page, PageMeta, PageParams};
use serde::Deserialize;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::middleware::{require_role, AuthUser, RequestId};
use crate::AppState;

pub async fn create(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Extension(request_id): Extension<RequestId>,
    Json(new): Json<NewDeployment>,
) -> ApiResult<(StatusCode, Json<Deployment>)> {
    require_role(&claims, &["admin", "operator"], request_id.0)?;
    let deployment = state
        .deployments()
        .create(new)
        .await
        .map_err(|e| ApiError::new(e, request_id.0))?;
    Ok((StatusCode::CREATED, Json(deployment)))
}

pub async fn list(
    State(state): State<AppState>,
    AuthUser(_claims): AuthUser,
    Query(page): Query<PageParams>,
    Extension(request_id): Extension<RequestId>,
) -> ApiResult<Json<Page<Deployment>>> {
    let (items, total) = state
        .deployments()
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
    Path(id): Path<Uuid>,
    Extension(request_id): Extension<RequestId>,
) -> ApiResult<Json<Deployment>> {
    let deployment = state
        .deployments()
        .get(id)
        .await
        .map_err(|e| ApiError::new(e, request_id.0))?
        .ok_or_else(|| {
            ApiError::new(
                phoenix_types::PhoenixError::NotFound(format!("deployment {id} not found")),
                request_id.0,
            )
        })?;
    Ok(Json(deployment))
}

#[derive(Debug, Deserialize)]
pub struct DeployBody {
    pipeline_template_body: String,
    #[serde(default)]
    parameters: HashMap<String, String>,
}

pub async fn deploy(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Path(id): Path<Uuid>,
    Extension(request_id): Extension<RequestId>,
    Json(body): Json<DeployBody>,
) -> ApiResult<Json<DeploymentVersion>> {
    require_role(&claims, &["admin", "operator"], request_id.0)?;
    let version = state
        .deployments()
        .deploy(id, &body.pipeline_template_body, body.parameters, &claims.sub)
        .await
        .map_err(|e| ApiError::new(e, request_id.0))?;
    Ok(Json(version))
}

#[derive(Debug, Deserialize)]
pub struct RollbackBody {
    target_version: i32,
}

pub async fn rollback(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Path(id): Path<Uuid>,
    Extension(request_id): Extension<RequestId>,
    Json(body): Json<RollbackBody>,
) -> ApiResult<Json<DeploymentVersion>> {
    require_role(&claims, &["admin", "operator"], request_id.0)?;
    let version = state
        .deployments()
        .rollback(id, body.target_version, &claims.sub)
        .await
        .map_err(|e| ApiError::new(e, request_id.0))?;
    Ok(Json(version))
}

pub async fn list_versions(
    State(state): State<AppState>,
    AuthUser(_claims): AuthUser,
    Path(id): Path<Uuid>,
    Query(page): Query<PageParams>,
    Extension(request_id): Extension<RequestId>,
) -> ApiResult<Json<Page<DeploymentVersion>>> {
    let (items, total) = state
        .deployments()
        .list_versions_page(id, page.limit, page.offset)
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

pub async fn get_config(
    State(state): State<AppState>,
    AuthUser(_claims): AuthUser,
    Path(id): Path<Uuid>,
    Extension(request_id): Extension<RequestId>,
) -> ApiResult<Json<Option<String>>> {
    let config = state
        .deployments()
        .get_config(id)
        .await
        .map_err(|e| ApiError::new(e, request_id.0))?;
    Ok(Json(config))
}
