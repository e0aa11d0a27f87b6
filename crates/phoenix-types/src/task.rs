use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "task_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Collector,
    Loadsim,
    Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "task_action", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskAction {
    Start,
    Stop,
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "task_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Assigned,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "variant", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Baseline,
    Candidate,
    Standalone,
}

/// One unit of work claimed by a single host.
///
/// Invariant: at most one task with a given `host_id` is `assigned` or
/// `running` at any instant (enforced by the assignment algorithm, not here).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub kind: TaskKind,
    pub action: TaskAction,
    pub host_id: String,
    pub experiment_id: Option<Uuid>,
    pub deployment_id: Option<Uuid>,
    pub variant: Option<Variant>,
    pub config: serde_json::Value,
    pub priority: i32,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

/// Fields needed to enqueue a new task; the queue assigns id/status/timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub kind: TaskKind,
    pub action: TaskAction,
    pub host_id: String,
    pub experiment_id: Option<Uuid>,
    pub deployment_id: Option<Uuid>,
    pub variant: Option<Variant>,
    pub config: serde_json::Value,
    pub priority: i32,
}

impl NewTask {
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}
