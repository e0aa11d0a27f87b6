//! Deployment Registry (C5, spec §4.5): versioned direct pipeline rollouts,
//! independent of the experiment engine. `deploy` and `rollback_to` both
//! enqueue `update` tasks to the hosts matched by `target_selector`.

use phoenix_db::{AgentRepository, DeploymentRepository};
use phoenix_platform::{template, Clock};
use phoenix_queue::TaskQueue;
use phoenix_types::{
    resolve_selectors, Deployment, DeploymentVersion, HostSelector, NewDeployment, NewTask,
    PhoenixResult, TaskAction, TaskKind,
};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

pub struct DeploymentService {
    deployments: Arc<dyn DeploymentRepository>,
    agents: Arc<dyn AgentRepository>,
    queue: Arc<TaskQueue>,
    clock: Arc<dyn Clock>,
}

impl DeploymentService {
    pub fn new(
        deployments: Arc<dyn DeploymentRepository>,
        agents: Arc<dyn AgentRepository>,
        queue: Arc<TaskQueue>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            deployments,
            agents,
            queue,
            clock,
        }
    }

    pub async fn create(&self, new: NewDeployment) -> PhoenixResult<Deployment> {
        self.deployments.create(new).await
    }

    pub async fn get(&self, id: Uuid) -> PhoenixResult<Option<Deployment>> {
        self.deployments.get(id).await
    }

    pub async fn list(&self) -> PhoenixResult<Vec<Deployment>> {
        self.deployments.list().await
    }

    pub async fn list_page(&self, limit: i64, offset: i64) -> PhoenixResult<(Vec<Deployment>, i64)> {
        self.deployments.list_page(limit, offset).await
    }

    pub async fn list_versions_page(
        &self,
        deployment_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> PhoenixResult<(Vec<DeploymentVersion>, i64)> {
        self.deployments.list_versions_page(deployment_id, limit, offset).await
    }

    /// Renders `pipeline_template` against `parameters`, stores the result as
    /// the new active version, and enqueues `update` tasks to every host
    /// matched by `target_selector`.
    pub async fn deploy(
        &self,
        deployment_id: Uuid,
        pipeline_template_body: &str,
        parameters: HashMap<String, String>,
        deployed_by: &str,
    ) -> PhoenixResult<DeploymentVersion> {
        let deployment = self
            .deployments
            .get(deployment_id)
            .await?
            .ok_or_else(|| phoenix_types::PhoenixError::NotFound(format!("deployment {deployment_id} not found")))?;

        let allowed_params: Vec<&str> = parameters.keys().map(String::as_str).collect();
        let rendered = template::render_template(pipeline_template_body, &allowed_params, &parameters)?;

        let now = self.clock.now();
        let version = self
            .deployments
            .deploy_version(deployment_id, &rendered, parameters, deployed_by, now)
            .await?;

        self.enqueue_update(&deployment, &rendered, version.version).await?;
        Ok(version)
    }

    /// Copies `target_version`'s rendered config into a new version on top
    /// and re-enqueues the update to the deployment's matched hosts.
    pub async fn rollback(
        &self,
        deployment_id: Uuid,
        target_version: i32,
        deployed_by: &str,
    ) -> PhoenixResult<DeploymentVersion> {
        let deployment = self
            .deployments
            .get(deployment_id)
            .await?
            .ok_or_else(|| phoenix_types::PhoenixError::NotFound(format!("deployment {deployment_id} not found")))?;

        let now = self.clock.now();
        let version = self
            .deployments
            .rollback_to(deployment_id, target_version, deployed_by, now)
            .await?;

        self.enqueue_update(&deployment, &version.pipeline_config, version.version)
            .await?;
        Ok(version)
    }

    pub async fn list_versions(&self, deployment_id: Uuid) -> PhoenixResult<Vec<DeploymentVersion>> {
        self.deployments.list_versions(deployment_id).await
    }

    /// Returns the currently active rendered YAML, per spec §4.5's `get_config`.
    pub async fn get_config(&self, deployment_id: Uuid) -> PhoenixResult<Option<String>> {
        Ok(self
            .deployments
            .get_active_version(deployment_id)
            .await?
            .map(|v| v.pipeline_config))
    }

    async fn enqueue_update(&self, deployment: &Deployment, rendered_config: &str, version: i32) -> PhoenixResult<()> {
        let all_agents = self.agents.list().await?;
        let selector = HostSelector(deployment.target_selector.clone());
        let hosts = resolve_selectors(&[selector], &all_agents);

        for host_id in hosts {
            self.queue
                .enqueue(NewTask {
                    kind: TaskKind::Collector,
                    action: TaskAction::Update,
                    host_id,
                    experiment_id: None,
                    deployment_id: Some(deployment.id),
                    variant: None,
                    config: serde_json::json!({ "pipeline_config": rendered_config, "version": version }),
                    priority: 5,
                })
                .await?;
        }
        Ok(())
    }
}
