use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::agent::HostSelector;
use crate::error::{PhoenixError, PhoenixResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "collector_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CollectorType {
    Otel,
    Nrdot,
}

/// Experiment lifecycle phase. See spec §4.4 for the full transition diagram.
///
/// Terminal phases: `Completed`, `Failed`, `Stopped`, `RolledBack`, `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "experiment_phase", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Created,
    Initializing,
    Running,
    Analyzing,
    Completed,
    Stopping,
    Stopped,
    Failed,
    RolledBack,
    Cancelled,
    Deleted,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Phase::Completed
                | Phase::Failed
                | Phase::Stopped
                | Phase::RolledBack
                | Phase::Cancelled
                | Phase::Deleted
        )
    }

    /// Whether `next` is a legal transition from `self`. Cancel/rollback are the
    /// only non-monotonic escapes allowed from any non-terminal phase; `Created
    /// -> Deleted` is the one transition a terminal check alone wouldn't allow.
    pub fn can_transition_to(self, next: Phase) -> bool {
        use Phase::*;
        if self == Created && next == Deleted {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (Created, Initializing) => true,
            (Initializing, Running) => true,
            (Running, Analyzing) => true,
            (Analyzing, Completed) => true,
            (Analyzing, Failed) => true,
            (Initializing, Failed) => true,
            (Running, Failed) => true,
            (_, Stopping) if self != Created => true,
            (Stopping, Stopped) => true,
            (_, RolledBack) if self != Created => true,
            (_, Cancelled) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub baseline_pipeline: String,
    pub candidate_pipeline: String,
    pub target_hosts: Vec<HostSelector>,
    pub duration_seconds: i64,
    pub collector_type: CollectorType,
    pub phase: Phase,
    pub config: serde_json::Value,
    pub metadata: HashMap<String, String>,
    pub priority: i32,
    /// Host set resolved at start time, frozen for the experiment's lifetime.
    pub resolved_hosts: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Experiment {
    pub fn duration(&self) -> Duration {
        Duration::seconds(self.duration_seconds)
    }

    pub fn validate(&self) -> PhoenixResult<()> {
        if self.baseline_pipeline == self.candidate_pipeline {
            return Err(PhoenixError::Validation(
                "baseline_pipeline must differ from candidate_pipeline".to_string(),
            ));
        }
        if self.target_hosts.is_empty() {
            return Err(PhoenixError::Validation(
                "target_hosts must contain at least one selector".to_string(),
            ));
        }
        Ok(())
    }

    /// Default per spec §4.4: `ceil(|resolved_hosts| / 2)`.
    pub fn min_hosts(&self) -> usize {
        (self.resolved_hosts.len() + 1) / 2
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewExperiment {
    pub name: String,
    pub description: Option<String>,
    pub baseline_pipeline: String,
    pub candidate_pipeline: String,
    pub target_hosts: Vec<HostSelector>,
    pub duration_seconds: i64,
    pub collector_type: CollectorType,
    pub config: serde_json::Value,
    pub metadata: HashMap<String, String>,
    #[serde(default = "default_priority")]
    pub priority: i32,
}

fn default_priority() -> i32 {
    5
}

#[derive(Debug, Clone, Serialize)]
pub struct OverlapReport {
    pub has_overlap: bool,
    pub conflicting_exp_ids: Vec<Uuid>,
    pub severity: OverlapSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlapSeverity {
    None,
    Low,
    High,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ExperimentKpis {
    pub cardinality_baseline: i64,
    pub cardinality_candidate: i64,
    pub reduction_ratio: f64,
    pub cost_reduction_percent: f64,
    pub error_rate_delta: f64,
    pub data_loss_percent: f64,
}
