use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "deployment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Deploying,
    Active,
    Failed,
    RolledBack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "version_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum VersionStatus {
    Active,
    Superseded,
    RolledBack,
}

/// A direct (experiment-less) pipeline rollout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: Uuid,
    pub name: String,
    pub namespace: String,
    pub pipeline_template: String,
    pub target_selector: String,
    pub parameters: HashMap<String, String>,
    pub status: DeploymentStatus,
    pub current_version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewDeployment {
    pub name: String,
    pub namespace: String,
    pub pipeline_template: String,
    pub target_selector: String,
    pub parameters: HashMap<String, String>,
}

/// An immutable snapshot of a deployment's rendered config at a version.
///
/// Invariant: exactly one `active` row per `deployment_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentVersion {
    pub deployment_id: Uuid,
    pub version: i32,
    pub pipeline_config: String,
    pub parameters: HashMap<String, String>,
    pub deployed_by: String,
    pub deployed_at: DateTime<Utc>,
    pub status: VersionStatus,
}
