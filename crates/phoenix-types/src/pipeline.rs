use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::task::Variant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "pipeline_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

/// A running collector instance, identified by `(host_id, experiment_id, variant)`.
///
/// Invariant: at most one `running` row per `(host_id, experiment_id, variant)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivePipeline {
    pub id: Uuid,
    pub host_id: String,
    pub experiment_id: Uuid,
    pub variant: Variant,
    pub status: PipelineStatus,
    pub config_hash: String,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
}
