use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Every channel an event can be published to; WebSocket subscribers filter by
/// these same strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Agents,
    Experiments,
    Tasks,
    Deployments,
    Metrics,
    Alerts,
    Cost,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    AgentStatus { host_id: String, status: String },
    AgentHeartbeat { host_id: String },
    AgentConnected { host_id: String },
    AgentDisconnected { host_id: String },
    ExperimentCreated { experiment_id: uuid::Uuid },
    ExperimentStarted { experiment_id: uuid::Uuid },
    ExperimentUpdated { experiment_id: uuid::Uuid, phase: String },
    ExperimentCompleted { experiment_id: uuid::Uuid },
    ExperimentFailed { experiment_id: uuid::Uuid, reason: String },
    ExperimentRolledBack { experiment_id: uuid::Uuid },
    TaskCreated { task_id: uuid::Uuid, host_id: String },
    TaskAssigned { task_id: uuid::Uuid, host_id: String },
    TaskRunning { task_id: uuid::Uuid },
    TaskCompleted { task_id: uuid::Uuid },
    TaskFailed { task_id: uuid::Uuid, error: String },
    TaskProgress { task_id: uuid::Uuid, percent: f32 },
    DeploymentStarted { deployment_id: uuid::Uuid },
    DeploymentProgress { deployment_id: uuid::Uuid, percent: f32 },
    DeploymentCompleted { deployment_id: uuid::Uuid },
    DeploymentRolledBack { deployment_id: uuid::Uuid },
    MetricFlow { source_id: String },
    AlertTriggered { alert: String },
    AlertResolved { alert: String },
    CostUpdate { cost_per_minute: f64 },
}

impl EventKind {
    pub fn channel(&self) -> Channel {
        use EventKind::*;
        match self {
            AgentStatus { .. } | AgentHeartbeat { .. } | AgentConnected { .. }
            | AgentDisconnected { .. } => Channel::Agents,
            ExperimentCreated { .. }
            | ExperimentStarted { .. }
            | ExperimentUpdated { .. }
            | ExperimentCompleted { .. }
            | ExperimentFailed { .. }
            | ExperimentRolledBack { .. } => Channel::Experiments,
            TaskCreated { .. }
            | TaskAssigned { .. }
            | TaskRunning { .. }
            | TaskCompleted { .. }
            | TaskFailed { .. }
            | TaskProgress { .. } => Channel::Tasks,
            DeploymentStarted { .. }
            | DeploymentProgress { .. }
            | DeploymentCompleted { .. }
            | DeploymentRolledBack { .. } => Channel::Deployments,
            MetricFlow { .. } => Channel::Metrics,
            AlertTriggered { .. } | AlertResolved { .. } => Channel::Alerts,
            CostUpdate { .. } => Channel::Cost,
        }
    }
}

/// An envelope stamped with a monotonically increasing sequence number,
/// appended to the hub's ring buffer and fanned out to matching subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}
