//! Experiment Engine (C4, spec §4.4): the A/B pipeline rollout state machine.
//!
//! `ExperimentEngine` drives `start`/`stop`/`rollback`/`promote` and the
//! idempotent, restartable `reconcile` step. `reconcile` is safe to call
//! repeatedly and from two triggers -- a phase-change event and a periodic
//! tick from `phoenix-workers` -- because every branch first re-reads current
//! state and only acts on the delta.
//!
//! Convention (not in the distilled spec, decided here): a pipeline instance's
//! metric `source_id` is `"{host_id}:{variant}"`, so baseline and candidate
//! samples from the same host are distinguishable in the metric store.

pub mod overlap;

use phoenix_db::{
    ActivePipelineRepository, AgentRepository, DeploymentRepository, ExperimentEventRepository,
    ExperimentRepository,
};
use phoenix_events::EventHub;
use phoenix_metrics::MetricService;
use phoenix_platform::{template, Clock};
use phoenix_queue::TaskQueue;
use phoenix_types::{
    resolve_selectors, AgentStatus, Deployment, Experiment, ExperimentKpis, NewDeployment, NewTask,
    OverlapReport, Phase, PhoenixError, PhoenixResult, PipelineStatus, TaskAction, TaskKind, Variant,
};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

pub use overlap::check_overlap;

/// Priority used for stop tasks issued by `stop`/`rollback`/the reconciler's
/// scheduled-stop branch: these must jump the queue ahead of whatever the
/// experiment itself was running at.
const STOP_PRIORITY: i32 = 10;

/// Default fraction of expected metric windows that must have arrived during
/// `[started_at, started_at + duration]` for analysis to succeed (spec §4.4).
pub const DEFAULT_MIN_DATA_FRACTION: f64 = 0.6;

fn source_id(host_id: &str, variant: Variant) -> String {
    format!("{host_id}:{}", variant_label(variant))
}

fn variant_label(variant: Variant) -> &'static str {
    match variant {
        Variant::Baseline => "baseline",
        Variant::Candidate => "candidate",
        Variant::Standalone => "standalone",
    }
}

pub struct ExperimentEngine {
    experiments: Arc<dyn ExperimentRepository>,
    agents: Arc<dyn AgentRepository>,
    pipelines: Arc<dyn ActivePipelineRepository>,
    deployments: Arc<dyn DeploymentRepository>,
    queue: Arc<TaskQueue>,
    metrics: Arc<MetricService>,
    events: Arc<EventHub>,
    event_log: Arc<dyn ExperimentEventRepository>,
    clock: Arc<dyn Clock>,
    min_data_fraction: f64,
}

impl ExperimentEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        experiments: Arc<dyn ExperimentRepository>,
        agents: Arc<dyn AgentRepository>,
        pipelines: Arc<dyn ActivePipelineRepository>,
        deployments: Arc<dyn DeploymentRepository>,
        queue: Arc<TaskQueue>,
        metrics: Arc<MetricService>,
        events: Arc<EventHub>,
        event_log: Arc<dyn ExperimentEventRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            experiments,
            agents,
            pipelines,
            deployments,
            queue,
            metrics,
            events,
            event_log,
            clock,
            min_data_fraction: DEFAULT_MIN_DATA_FRACTION,
        }
    }

    pub fn with_min_data_fraction(mut self, fraction: f64) -> Self {
        self.min_data_fraction = fraction;
        self
    }

    pub async fn get(&self, id: Uuid) -> PhoenixResult<Option<Experiment>> {
        self.experiments.get(id).await
    }

    pub async fn list(&self) -> PhoenixResult<Vec<Experiment>> {
        self.experiments.list().await
    }

    pub async fn list_page(&self, limit: i64, offset: i64) -> PhoenixResult<(Vec<Experiment>, i64)> {
        self.experiments.list_page(limit, offset).await
    }

    /// Publishes to the in-memory hub for live WebSocket fan-out and appends
    /// to the durable per-experiment log the reconciler can replay after a
    /// restart. The durable append is best-effort: a write failure is logged
    /// and swallowed rather than failing the state transition that triggered it.
    async fn emit(&self, experiment_id: Uuid, kind: phoenix_types::EventKind) {
        let now = self.clock.now();
        if let Err(err) = self.event_log.append(experiment_id, &kind, now).await {
            tracing::warn!(error = %err, %experiment_id, "failed to append durable experiment event");
        }
        self.events.publish(kind, now);
    }

    /// Overlap check against every other non-terminal, non-`Created`
    /// experiment, per spec §4.4 step 1 / scenario S6. See [`overlap`] for the
    /// host-intersection heuristic this uses in place of a tracked metric
    /// namespace.
    pub async fn check_overlap(&self, experiment_id: Uuid, candidate_hosts: &[String]) -> PhoenixResult<OverlapReport> {
        let active = self.experiments.list_active().await?;
        Ok(overlap::check_overlap(experiment_id, candidate_hosts, &active))
    }

    /// Start flow (spec §4.4). Idempotent: an experiment already past
    /// `Created` is returned unchanged with no side effects.
    pub async fn start(
        &self,
        experiment_id: Uuid,
        baseline_template_body: &str,
        candidate_template_body: &str,
        parameters: HashMap<String, String>,
    ) -> PhoenixResult<Experiment> {
        let experiment = self
            .experiments
            .get(experiment_id)
            .await?
            .ok_or_else(|| PhoenixError::NotFound(format!("experiment {experiment_id} not found")))?;

        if experiment.phase != Phase::Created {
            return Ok(experiment);
        }
        experiment.validate()?;

        let all_agents = self.agents.list().await?;
        let resolved = resolve_selectors(&experiment.target_hosts, &all_agents);
        let healthy_hosts: Vec<String> = resolved
            .into_iter()
            .filter(|host_id| {
                all_agents
                    .iter()
                    .find(|a| &a.host_id == host_id)
                    .map(|a| a.status == AgentStatus::Healthy)
                    .unwrap_or(false)
            })
            .collect();
        if healthy_hosts.is_empty() {
            return Err(PhoenixError::Validation(
                "target_hosts resolved to no healthy agent".to_string(),
            ));
        }

        let overlap = self.check_overlap(experiment_id, &healthy_hosts).await?;
        if overlap.severity == phoenix_types::OverlapSeverity::High {
            return Err(PhoenixError::Conflict(format!(
                "overlaps in-flight experiment(s) {:?} on the same hosts",
                overlap.conflicting_exp_ids
            )));
        }

        let allowed_params: Vec<&str> = parameters.keys().map(String::as_str).collect();
        let baseline_config = template::render_template(baseline_template_body, &allowed_params, &parameters)?;
        let candidate_config = template::render_template(candidate_template_body, &allowed_params, &parameters)?;
        let baseline_hash = template::config_hash(&baseline_config);
        let candidate_hash = template::config_hash(&candidate_config);

        let mut batch = Vec::with_capacity(healthy_hosts.len() * 2);
        for host_id in &healthy_hosts {
            batch.push(NewTask {
                kind: TaskKind::Collector,
                action: TaskAction::Start,
                host_id: host_id.clone(),
                experiment_id: Some(experiment_id),
                deployment_id: None,
                variant: Some(Variant::Baseline),
                config: serde_json::json!({ "pipeline_config": baseline_config, "config_hash": baseline_hash }),
                priority: experiment.priority,
            });
            batch.push(NewTask {
                kind: TaskKind::Collector,
                action: TaskAction::Start,
                host_id: host_id.clone(),
                experiment_id: Some(experiment_id),
                deployment_id: None,
                variant: Some(Variant::Candidate),
                config: serde_json::json!({ "pipeline_config": candidate_config, "config_hash": candidate_hash }),
                priority: experiment.priority,
            });
        }
        self.queue.enqueue_batch(batch).await?;

        self.experiments
            .merge_metadata(
                experiment_id,
                HashMap::from([
                    ("_rendered_baseline_config".to_string(), baseline_config),
                    ("_rendered_candidate_config".to_string(), candidate_config),
                ]),
            )
            .await?;

        let updated = self
            .experiments
            .transition(experiment_id, Phase::Initializing, Some(healthy_hosts), self.clock.now())
            .await?;
        self.emit(experiment_id, phoenix_types::EventKind::ExperimentStarted { experiment_id }).await;
        Ok(updated)
    }

    /// Idempotent, restartable reconciliation step. Call after any
    /// phase-change event and from a periodic tick; every branch re-derives
    /// state from `ActivePipeline` rows rather than trusting in-memory state.
    pub async fn reconcile(&self, experiment_id: Uuid) -> PhoenixResult<Experiment> {
        let experiment = self
            .experiments
            .get(experiment_id)
            .await?
            .ok_or_else(|| PhoenixError::NotFound(format!("experiment {experiment_id} not found")))?;

        match experiment.phase {
            Phase::Initializing => self.reconcile_initializing(experiment).await,
            Phase::Running => self.reconcile_running(experiment).await,
            Phase::Analyzing => self.reconcile_analyzing(experiment).await,
            Phase::Stopping => self.reconcile_stopping(experiment).await,
            _ => Ok(experiment),
        }
    }

    async fn reconcile_initializing(&self, experiment: Experiment) -> PhoenixResult<Experiment> {
        let pipelines = self.pipelines.list_for_experiment(experiment.id).await?;

        if pipelines.iter().any(|p| p.status == PipelineStatus::Failed) {
            return self.fail_from_initializing(experiment, &pipelines).await;
        }

        let all_ready = !experiment.resolved_hosts.is_empty()
            && experiment.resolved_hosts.iter().all(|host| {
                let mut baseline_running = false;
                let mut candidate_running = false;
                for p in &pipelines {
                    if &p.host_id != host || p.status != PipelineStatus::Running {
                        continue;
                    }
                    match p.variant {
                        Variant::Baseline => baseline_running = true,
                        Variant::Candidate => candidate_running = true,
                        Variant::Standalone => {}
                    }
                }
                baseline_running && candidate_running
            });

        if !all_ready {
            return Ok(experiment);
        }

        let updated = self
            .experiments
            .transition(experiment.id, Phase::Running, None, self.clock.now())
            .await?;
        self.emit(
            experiment.id,
            phoenix_types::EventKind::ExperimentUpdated {
                experiment_id: experiment.id,
                phase: "running".to_string(),
            },
        )
        .await;
        Ok(updated)
    }

    async fn fail_from_initializing(
        &self,
        experiment: Experiment,
        pipelines: &[phoenix_types::ActivePipeline],
    ) -> PhoenixResult<Experiment> {
        self.enqueue_stop_for_running(&experiment, pipelines).await?;
        let updated = self
            .experiments
            .transition(experiment.id, Phase::Failed, None, self.clock.now())
            .await?;
        self.emit(
            experiment.id,
            phoenix_types::EventKind::ExperimentFailed {
                experiment_id: experiment.id,
                reason: "pipeline failed during initialization".to_string(),
            },
        )
        .await;
        Ok(updated)
    }

    async fn reconcile_running(&self, experiment: Experiment) -> PhoenixResult<Experiment> {
        let now = self.clock.now();
        let started_at = experiment
            .started_at
            .ok_or_else(|| PhoenixError::internal(anyhow::anyhow!("running experiment missing started_at")))?;

        if now >= started_at + experiment.duration() {
            let pipelines = self.pipelines.list_for_experiment(experiment.id).await?;
            self.enqueue_stop_for_running(&experiment, &pipelines).await?;
            let updated = self
                .experiments
                .transition(experiment.id, Phase::Analyzing, None, now)
                .await?;
            self.emit(
                experiment.id,
                phoenix_types::EventKind::ExperimentUpdated {
                    experiment_id: experiment.id,
                    phase: "analyzing".to_string(),
                },
            )
            .await;
            return Ok(updated);
        }

        let pipelines = self.pipelines.list_for_experiment(experiment.id).await?;
        let failed_hosts: std::collections::HashSet<&str> = pipelines
            .iter()
            .filter(|p| p.status == PipelineStatus::Failed)
            .map(|p| p.host_id.as_str())
            .collect();
        let healthy_count = experiment.resolved_hosts.len() - failed_hosts.len();
        if healthy_count < experiment.min_hosts() {
            self.enqueue_stop_for_running(&experiment, &pipelines).await?;
            let updated = self
                .experiments
                .transition(experiment.id, Phase::Failed, None, now)
                .await?;
            self.emit(
                experiment.id,
                phoenix_types::EventKind::ExperimentFailed {
                    experiment_id: experiment.id,
                    reason: format!(
                        "healthy host count {healthy_count} fell below min_hosts {}",
                        experiment.min_hosts()
                    ),
                },
            )
            .await;
            return Ok(updated);
        }

        Ok(experiment)
    }

    async fn reconcile_analyzing(&self, experiment: Experiment) -> PhoenixResult<Experiment> {
        let started_at = experiment
            .started_at
            .ok_or_else(|| PhoenixError::internal(anyhow::anyhow!("analyzing experiment missing started_at")))?;
        let window_end = started_at + experiment.duration();
        let now = self.clock.now();

        let baseline_sources: Vec<String> = experiment
            .resolved_hosts
            .iter()
            .map(|h| source_id(h, Variant::Baseline))
            .collect();
        let candidate_sources: Vec<String> = experiment
            .resolved_hosts
            .iter()
            .map(|h| source_id(h, Variant::Candidate))
            .collect();

        let fraction = self
            .metrics
            .data_fraction(&baseline_sources, &candidate_sources, started_at, window_end)
            .await?;

        if fraction < self.min_data_fraction {
            let updated = self
                .experiments
                .transition(experiment.id, Phase::Failed, None, now)
                .await?;
            self.emit(
                experiment.id,
                phoenix_types::EventKind::ExperimentFailed {
                    experiment_id: experiment.id,
                    reason: "insufficient_data".to_string(),
                },
            )
            .await;
            return Ok(updated);
        }

        let _kpis: ExperimentKpis = self
            .metrics
            .refresh_experiment_kpis(experiment.id, "error_rate", &baseline_sources, &candidate_sources, now)
            .await?;

        let updated = self
            .experiments
            .transition(experiment.id, Phase::Completed, None, now)
            .await?;
        self.emit(
            experiment.id,
            phoenix_types::EventKind::ExperimentCompleted { experiment_id: experiment.id },
        )
        .await;
        Ok(updated)
    }

    async fn reconcile_stopping(&self, experiment: Experiment) -> PhoenixResult<Experiment> {
        let pipelines = self.pipelines.list_for_experiment(experiment.id).await?;
        let all_stopped = pipelines
            .iter()
            .all(|p| matches!(p.status, PipelineStatus::Stopped | PipelineStatus::Failed));
        if !all_stopped {
            return Ok(experiment);
        }
        let updated = self
            .experiments
            .transition(experiment.id, Phase::Stopped, None, self.clock.now())
            .await?;
        self.emit(
            experiment.id,
            phoenix_types::EventKind::ExperimentUpdated {
                experiment_id: experiment.id,
                phase: "stopped".to_string(),
            },
        )
        .await;
        Ok(updated)
    }

    /// Idempotent: already-terminal experiments are returned unchanged. An
    /// experiment that never started is cancelled outright, since there is
    /// nothing running to stop.
    pub async fn stop(&self, experiment_id: Uuid) -> PhoenixResult<Experiment> {
        let experiment = self
            .experiments
            .get(experiment_id)
            .await?
            .ok_or_else(|| PhoenixError::NotFound(format!("experiment {experiment_id} not found")))?;

        if experiment.phase.is_terminal() {
            return Ok(experiment);
        }
        if experiment.phase == Phase::Created {
            return self
                .experiments
                .transition(experiment_id, Phase::Cancelled, None, self.clock.now())
                .await;
        }

        let pipelines = self.pipelines.list_for_experiment(experiment_id).await?;
        self.enqueue_stop_for_running(&experiment, &pipelines).await?;
        let updated = self
            .experiments
            .transition(experiment_id, Phase::Stopping, None, self.clock.now())
            .await?;
        self.emit(
            experiment_id,
            phoenix_types::EventKind::ExperimentUpdated {
                experiment_id,
                phase: "stopping".to_string(),
            },
        )
        .await;
        Ok(updated)
    }

    /// Instant, non-blocking rollback: enqueues highest-priority stop tasks
    /// and transitions straight to `RolledBack` without waiting on `Stopping`.
    pub async fn rollback(&self, experiment_id: Uuid) -> PhoenixResult<Experiment> {
        let experiment = self
            .experiments
            .get(experiment_id)
            .await?
            .ok_or_else(|| PhoenixError::NotFound(format!("experiment {experiment_id} not found")))?;

        if experiment.phase.is_terminal() {
            return Ok(experiment);
        }
        if experiment.phase == Phase::Created {
            return Err(PhoenixError::Validation(
                "cannot roll back an experiment that has not started".to_string(),
            ));
        }

        let pipelines = self.pipelines.list_for_experiment(experiment_id).await?;
        self.enqueue_stop_for_running(&experiment, &pipelines).await?;
        let updated = self
            .experiments
            .transition(experiment_id, Phase::RolledBack, None, self.clock.now())
            .await?;
        self.emit(
            experiment_id,
            phoenix_types::EventKind::ExperimentRolledBack { experiment_id },
        )
        .await;
        Ok(updated)
    }

    /// Removes an experiment that was created but never started (spec §4.4's
    /// `Created -> Deleted` transition). Rejects anything past `Created` with
    /// a `Conflict` rather than silently stopping a running experiment first.
    pub async fn delete(&self, experiment_id: Uuid) -> PhoenixResult<()> {
        let experiment = self
            .experiments
            .get(experiment_id)
            .await?
            .ok_or_else(|| PhoenixError::NotFound(format!("experiment {experiment_id} not found")))?;

        if experiment.phase != Phase::Created {
            return Err(PhoenixError::Conflict(format!(
                "cannot delete experiment in phase {:?}, only {:?} experiments can be deleted",
                experiment.phase,
                Phase::Created
            )));
        }

        self.experiments.delete(experiment_id).await?;
        self.emit(
            experiment_id,
            phoenix_types::EventKind::ExperimentUpdated {
                experiment_id,
                phase: "deleted".to_string(),
            },
        )
        .await;
        Ok(())
    }

    /// Creates a standalone `Deployment` seeded with `variant`'s rendered
    /// config and relabels the already-running pipelines of that variant to
    /// `standalone`; the collector process itself is not restarted.
    pub async fn promote(&self, experiment_id: Uuid, variant: Variant) -> PhoenixResult<Deployment> {
        if variant == Variant::Standalone {
            return Err(PhoenixError::Validation("cannot promote the standalone variant".to_string()));
        }
        let experiment = self
            .experiments
            .get(experiment_id)
            .await?
            .ok_or_else(|| PhoenixError::NotFound(format!("experiment {experiment_id} not found")))?;
        if experiment.phase != Phase::Completed {
            return Err(PhoenixError::Conflict(
                "promotion is only valid for a completed experiment".to_string(),
            ));
        }

        let config_key = match variant {
            Variant::Baseline => "_rendered_baseline_config",
            Variant::Candidate => "_rendered_candidate_config",
            Variant::Standalone => unreachable!(),
        };
        let rendered_config = experiment
            .metadata
            .get(config_key)
            .cloned()
            .ok_or_else(|| PhoenixError::internal(anyhow::anyhow!("rendered config missing from experiment metadata")))?;

        let promoted_pipelines = self.pipelines.promote_variant(experiment_id, variant).await?;
        if promoted_pipelines.is_empty() {
            return Err(PhoenixError::Conflict(format!(
                "no running {variant:?} pipelines to promote"
            )));
        }

        let deployment = self
            .deployments
            .create(NewDeployment {
                name: format!("{}-{}", experiment.name, variant_label(variant)),
                namespace: "experiments".to_string(),
                pipeline_template: rendered_config.clone(),
                target_selector: promoted_pipelines
                    .iter()
                    .map(|p| p.host_id.clone())
                    .collect::<Vec<_>>()
                    .join(","),
                parameters: HashMap::new(),
            })
            .await?;

        let version = self
            .deployments
            .deploy_version(deployment.id, &rendered_config, HashMap::new(), "experiment-promotion", self.clock.now())
            .await?;

        for pipeline in &promoted_pipelines {
            self.queue
                .enqueue(NewTask {
                    kind: TaskKind::Collector,
                    action: TaskAction::Update,
                    host_id: pipeline.host_id.clone(),
                    experiment_id: None,
                    deployment_id: Some(deployment.id),
                    variant: Some(Variant::Standalone),
                    config: serde_json::json!({ "pipeline_config": rendered_config, "version": version.version }),
                    priority: experiment.priority,
                })
                .await?;
        }

        Ok(deployment)
    }

    async fn enqueue_stop_for_running(
        &self,
        experiment: &Experiment,
        pipelines: &[phoenix_types::ActivePipeline],
    ) -> PhoenixResult<()> {
        let mut batch = Vec::new();
        for pipeline in pipelines {
            if !matches!(pipeline.status, PipelineStatus::Starting | PipelineStatus::Running) {
                continue;
            }
            batch.push(NewTask {
                kind: TaskKind::Collector,
                action: TaskAction::Stop,
                host_id: pipeline.host_id.clone(),
                experiment_id: Some(experiment.id),
                deployment_id: None,
                variant: Some(pipeline.variant),
                config: serde_json::json!({}),
                priority: STOP_PRIORITY,
            });
        }
        if !batch.is_empty() {
            self.queue.enqueue_batch(batch).await?;
        }
        Ok(())
    }
}

/// The reconciler's second trigger per spec §9: sweep every experiment whose
/// phase demands one and reconcile each. Intended to be called on a periodic
/// tick from `phoenix-workers`; errors for a single experiment are logged and
/// do not stop the sweep.
pub async fn reconcile_all(engine: &ExperimentEngine) -> PhoenixResult<usize> {
    let active = engine.experiments.list_active().await?;
    let mut reconciled = 0;
    for experiment in active {
        match engine.reconcile(experiment.id).await {
            Ok(_) => reconciled += 1,
            Err(err) => tracing::warn!(experiment_id = %experiment.id, error = %err, "reconcile failed"),
        }
    }
    Ok(reconciled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_id_distinguishes_variant() {
        assert_eq!(source_id("host-1", Variant::Baseline), "host-1:baseline");
        assert_eq!(source_id("host-1", Variant::Candidate), "host-1:candidate");
        assert_ne!(source_id("host-1", Variant::Baseline), source_id("host-1", Variant::Candidate));
    }
}
