//! Integration tests driving the router through `tower::ServiceExt::oneshot`,
//! with in-memory fakes standing in for every repository trait. None of the
//! scenarios below exercise a fake's body, since both fail (or succeed)
//! before a handler reaches into a domain service -- `health` has none, and
//! the unauthorized case is rejected by the `AuthUser` extractor first.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{DateTime, Utc};
use phoenix_api::AppState;
use phoenix_auth::TokenVerifier;
use phoenix_db::{
    ActivePipelineRepository, AgentRepository, DeploymentRepository, ExperimentEventRepository,
    ExperimentRepository, MetricRepository, TaskRepository, TokenRepository,
};
use phoenix_deployments::DeploymentService;
use phoenix_events::EventHub;
use phoenix_experiments::ExperimentEngine;
use phoenix_metrics::MetricService;
use phoenix_platform::{Clock, PlatformConfig};
use phoenix_queue::TaskQueue;
use phoenix_types::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;

struct FrozenClock;

impl Clock for FrozenClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }
}

struct NullTasks;
#[async_trait]
impl TaskRepository for NullTasks {
    async fn enqueue(&self, _task: NewTask) -> PhoenixResult<Task> {
        unimplemented!()
    }
    async fn enqueue_batch(&self, _tasks: Vec<NewTask>) -> PhoenixResult<Vec<Task>> {
        unimplemented!()
    }
    async fn try_assign(&self, _host_id: &str, _now: DateTime<Utc>) -> PhoenixResult<Option<Task>> {
        Ok(None)
    }
    async fn report(
        &self,
        _task_id: Uuid,
        _host_id: &str,
        _status: TaskStatus,
        _result: Option<serde_json::Value>,
        _error: Option<String>,
        _now: DateTime<Utc>,
    ) -> PhoenixResult<Task> {
        unimplemented!()
    }
    async fn cancel(&self, _task_id: Uuid) -> PhoenixResult<()> {
        unimplemented!()
    }
    async fn get(&self, _task_id: Uuid) -> PhoenixResult<Option<Task>> {
        unimplemented!()
    }
    async fn list_for_experiment(&self, _experiment_id: Uuid) -> PhoenixResult<Vec<Task>> {
        unimplemented!()
    }
    async fn find_timed_out(
        &self,
        _assign_cutoff: DateTime<Utc>,
        _run_cutoff: DateTime<Utc>,
    ) -> PhoenixResult<Vec<Task>> {
        unimplemented!()
    }
    async fn reset_to_pending(&self, _task_id: Uuid) -> PhoenixResult<()> {
        unimplemented!()
    }
    async fn mark_failed(&self, _task_id: Uuid, _error: &str) -> PhoenixResult<()> {
        unimplemented!()
    }
}

struct NullAgents;
#[async_trait]
impl AgentRepository for NullAgents {
    async fn upsert_heartbeat(
        &self,
        _host_id: &str,
        _hostname: &str,
        _address: &str,
        _version: &str,
        _status: AgentStatus,
        _resource_usage: &ResourceUsage,
        _active_tasks: &[String],
        _now: DateTime<Utc>,
    ) -> PhoenixResult<()> {
        unimplemented!()
    }
    async fn get(&self, _host_id: &str) -> PhoenixResult<Option<Agent>> {
        unimplemented!()
    }
    async fn list(&self) -> PhoenixResult<Vec<Agent>> {
        unimplemented!()
    }
    async fn list_page(&self, _limit: i64, _offset: i64) -> PhoenixResult<(Vec<Agent>, i64)> {
        unimplemented!()
    }
    async fn mark_stale_offline(&self, _threshold: DateTime<Utc>) -> PhoenixResult<Vec<String>> {
        unimplemented!()
    }
}

struct NullTokens;
#[async_trait]
impl TokenRepository for NullTokens {
    async fn revoke(&self, _jti: &str, _user_id: &str, _expires_at: DateTime<Utc>, _now: DateTime<Utc>) -> PhoenixResult<()> {
        unimplemented!()
    }
    async fn is_revoked(&self, _jti: &str) -> PhoenixResult<bool> {
        Ok(false)
    }
    async fn purge_expired(&self, _now: DateTime<Utc>) -> PhoenixResult<u64> {
        unimplemented!()
    }
}

struct NullMetrics;
#[async_trait]
impl MetricRepository for NullMetrics {
    async fn ingest_batch(&self, _batch_id: &str, _samples: &[MetricSample]) -> PhoenixResult<bool> {
        unimplemented!()
    }
    async fn samples_in_window(
        &self,
        _source_id: &str,
        _metric_name: &str,
        _window_start: DateTime<Utc>,
        _window_end: DateTime<Utc>,
    ) -> PhoenixResult<Vec<f64>> {
        unimplemented!()
    }
    async fn distinct_series_in_window(
        &self,
        _window_start: DateTime<Utc>,
        _window_end: DateTime<Utc>,
    ) -> PhoenixResult<Vec<(String, String, MetricType)>> {
        unimplemented!()
    }
    async fn distinct_fingerprint_count(
        &self,
        _source_ids: &[String],
        _metric_name: &str,
        _since: DateTime<Utc>,
    ) -> PhoenixResult<i64> {
        unimplemented!()
    }
    async fn average_latest_value(
        &self,
        _source_ids: &[String],
        _metric_name: &str,
        _since: DateTime<Utc>,
    ) -> PhoenixResult<Option<f64>> {
        unimplemented!()
    }
    async fn upsert_aggregate(&self, _metric: &AggregatedMetric) -> PhoenixResult<()> {
        unimplemented!()
    }
    async fn list_aggregates(
        &self,
        _source: &str,
        _name: &str,
        _period: AggPeriod,
        _since: DateTime<Utc>,
    ) -> PhoenixResult<Vec<AggregatedMetric>> {
        unimplemented!()
    }
    async fn upsert_cardinality(
        &self,
        _experiment_id: Uuid,
        _metric_name: &str,
        _kpis: &ExperimentKpis,
        _now: DateTime<Utc>,
    ) -> PhoenixResult<()> {
        unimplemented!()
    }
    async fn experiment_kpis(&self, _experiment_id: Uuid) -> PhoenixResult<ExperimentKpis> {
        unimplemented!()
    }
    async fn upsert_cost_cache(&self, _entry: &CostFlowEntry, _now: DateTime<Utc>) -> PhoenixResult<()> {
        unimplemented!()
    }
    async fn top_cost_flows(&self, _limit: i64) -> PhoenixResult<Vec<CostFlowEntry>> {
        unimplemented!()
    }
    async fn cardinality_by_service_namespace(&self, _since: DateTime<Utc>) -> PhoenixResult<Vec<CostFlowEntry>> {
        unimplemented!()
    }
    async fn purge_older_than(
        &self,
        _sample_cutoff: DateTime<Utc>,
        _aggregate_cutoff: DateTime<Utc>,
        _batch_cutoff: DateTime<Utc>,
    ) -> PhoenixResult<u64> {
        unimplemented!()
    }
}

struct NullDeployments;
#[async_trait]
impl DeploymentRepository for NullDeployments {
    async fn create(&self, _new: NewDeployment) -> PhoenixResult<Deployment> {
        unimplemented!()
    }
    async fn get(&self, _id: Uuid) -> PhoenixResult<Option<Deployment>> {
        unimplemented!()
    }
    async fn list(&self) -> PhoenixResult<Vec<Deployment>> {
        unimplemented!()
    }
    async fn list_page(&self, _limit: i64, _offset: i64) -> PhoenixResult<(Vec<Deployment>, i64)> {
        unimplemented!()
    }
    async fn deploy_version(
        &self,
        _deployment_id: Uuid,
        _pipeline_config: &str,
        _parameters: HashMap<String, String>,
        _deployed_by: &str,
        _now: DateTime<Utc>,
    ) -> PhoenixResult<DeploymentVersion> {
        unimplemented!()
    }
    async fn rollback_to(
        &self,
        _deployment_id: Uuid,
        _target_version: i32,
        _deployed_by: &str,
        _now: DateTime<Utc>,
    ) -> PhoenixResult<DeploymentVersion> {
        unimplemented!()
    }
    async fn list_versions(&self, _deployment_id: Uuid) -> PhoenixResult<Vec<DeploymentVersion>> {
        unimplemented!()
    }
    async fn list_versions_page(
        &self,
        _deployment_id: Uuid,
        _limit: i64,
        _offset: i64,
    ) -> PhoenixResult<(Vec<DeploymentVersion>, i64)> {
        unimplemented!()
    }
    async fn get_active_version(&self, _deployment_id: Uuid) -> PhoenixResult<Option<DeploymentVersion>> {
        unimplemented!()
    }
    async fn set_status(&self, _id: Uuid, _status: DeploymentStatus, _now: DateTime<Utc>) -> PhoenixResult<()> {
        unimplemented!()
    }
}

struct NullExperiments;
#[async_trait]
impl ExperimentRepository for NullExperiments {
    async fn create(&self, _new: NewExperiment) -> PhoenixResult<Experiment> {
        unimplemented!()
    }
    async fn get(&self, _id: Uuid) -> PhoenixResult<Option<Experiment>> {
        unimplemented!()
    }
    async fn list(&self) -> PhoenixResult<Vec<Experiment>> {
        unimplemented!()
    }
    async fn list_page(&self, _limit: i64, _offset: i64) -> PhoenixResult<(Vec<Experiment>, i64)> {
        unimplemented!()
    }
    async fn list_active(&self) -> PhoenixResult<Vec<Experiment>> {
        unimplemented!()
    }
    async fn transition(
        &self,
        _id: Uuid,
        _next: Phase,
        _resolved_hosts: Option<Vec<String>>,
        _now: DateTime<Utc>,
    ) -> PhoenixResult<Experiment> {
        unimplemented!()
    }
    async fn delete(&self, _id: Uuid) -> PhoenixResult<()> {
        unimplemented!()
    }
    async fn merge_metadata(&self, _id: Uuid, _entries: HashMap<String, String>) -> PhoenixResult<()> {
        unimplemented!()
    }
}

struct NullEventLog;
#[async_trait]
impl ExperimentEventRepository for NullEventLog {
    async fn append(&self, _experiment_id: Uuid, _kind: &EventKind, _now: DateTime<Utc>) -> PhoenixResult<i64> {
        unimplemented!()
    }
    async fn list_since(&self, _experiment_id: Uuid, _since_sequence: i64) -> PhoenixResult<Vec<(i64, EventKind)>> {
        unimplemented!()
    }
    async fn next_sequence(&self, _experiment_id: Uuid) -> PhoenixResult<i64> {
        unimplemented!()
    }
}

struct NullPipelines;
#[async_trait]
impl ActivePipelineRepository for NullPipelines {
    async fn start(
        &self,
        _host_id: &str,
        _experiment_id: Uuid,
        _variant: Variant,
        _config_hash: &str,
        _now: DateTime<Utc>,
    ) -> PhoenixResult<ActivePipeline> {
        unimplemented!()
    }
    async fn set_status(&self, _id: Uuid, _status: PipelineStatus, _now: DateTime<Utc>) -> PhoenixResult<ActivePipeline> {
        unimplemented!()
    }
    async fn get(&self, _id: Uuid) -> PhoenixResult<Option<ActivePipeline>> {
        unimplemented!()
    }
    async fn list_for_experiment(&self, _experiment_id: Uuid) -> PhoenixResult<Vec<ActivePipeline>> {
        unimplemented!()
    }
    async fn list_for_host(&self, _host_id: &str) -> PhoenixResult<Vec<ActivePipeline>> {
        unimplemented!()
    }
    async fn promote_variant(&self, _experiment_id: Uuid, _variant: Variant) -> PhoenixResult<Vec<ActivePipeline>> {
        unimplemented!()
    }
}

fn test_state() -> AppState {
    let config = PlatformConfig::default();
    let clock: Arc<dyn Clock> = Arc::new(FrozenClock);
    let events = Arc::new(EventHub::new());

    let tasks: Arc<dyn TaskRepository> = Arc::new(NullTasks);
    let queue = Arc::new(TaskQueue::new(tasks, clock.clone(), Duration::from_secs(30)));

    let agents: Arc<dyn AgentRepository> = Arc::new(NullAgents);
    let tokens: Arc<dyn TokenRepository> = Arc::new(NullTokens);
    let auth = Arc::new(TokenVerifier::new("test-secret", tokens));

    let metric_repo: Arc<dyn MetricRepository> = Arc::new(NullMetrics);
    let metrics = Arc::new(MetricService::new(metric_repo));

    let deployment_repo: Arc<dyn DeploymentRepository> = Arc::new(NullDeployments);
    let deployments = Arc::new(DeploymentService::new(
        deployment_repo.clone(),
        agents.clone(),
        queue.clone(),
        clock.clone(),
    ));

    let experiment_repo: Arc<dyn ExperimentRepository> = Arc::new(NullExperiments);
    let pipelines: Arc<dyn ActivePipelineRepository> = Arc::new(NullPipelines);
    let event_log: Arc<dyn ExperimentEventRepository> = Arc::new(NullEventLog);
    let experiments = Arc::new(ExperimentEngine::new(
        experiment_repo,
        agents.clone(),
        pipelines,
        deployment_repo,
        queue.clone(),
        metrics.clone(),
        events.clone(),
        event_log,
        clock.clone(),
    ));

    AppState::new(
        config, clock, events, queue, auth, agents, metrics, deployments, experiments,
    )
}

#[tokio::test]
async fn health_returns_ok() {
    let router = phoenix_api::build_router(test_state());
    let response = router
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn experiments_list_without_token_is_unauthorized() {
    let router = phoenix_api::build_router(test_state());
    let response = router
        .oneshot(
            Request::builder()
                .uri("/api/v2/experiments")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn agent_poll_without_host_header_is_unauthorized() {
    let router = phoenix_api::build_router(test_state());
    let response = router
        .oneshot(Request::builder().uri("/api/v1/tasks").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
