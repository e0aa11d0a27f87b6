//! Shared domain types for the Phoenix observability cost-optimization
//! control plane: the vocabulary every other crate in the workspace builds
//! requests, repositories, and events out of.

pub mod agent;
pub mod auth;
pub mod deployment;
pub mod error;
pub mod event;
pub mod experiment;
pub mod metric;
pub mod pagination;
pub mod pipeline;
pub mod task;

pub use agent::{resolve_selectors, Agent, AgentStatus, HeartbeatRequest, HostSelector, ResourceUsage};
pub use auth::{Claims, RevokedToken};
pub use deployment::{
    Deployment, DeploymentStatus, DeploymentVersion, NewDeployment, VersionStatus,
};
pub use error::{ErrorEnvelope, PhoenixError, PhoenixResult, ResponseMeta};
pub use event::{Channel, Event, EventKind};
pub use experiment::{
    CollectorType, Experiment, ExperimentKpis, NewExperiment, OverlapReport, OverlapSeverity, Phase,
};
pub use metric::{
    fingerprint, AggPeriod, AggregatedMetric, AggregatedStats, CostFlowEntry, Labels, MetricBatch,
    MetricSample, MetricType,
};
pub use pagination::{Page, PageMeta, PageParams};
pub use pipeline::{ActivePipeline, PipelineStatus};
pub use task::{NewTask, Task, TaskAction, TaskKind, TaskStatus, Variant};
