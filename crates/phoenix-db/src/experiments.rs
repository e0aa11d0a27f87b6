use async_trait::async_trait;
use chrono::{DateTime, Utc};
use phoenix_types::{
    CollectorType, Experiment, HostSelector, NewExperiment, Phase, PhoenixError, PhoenixResult,
};
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

#[async_trait]
pub trait ExperimentRepository: Send + Sync {
    async fn create(&self, new: NewExperiment) -> PhoenixResult<Experiment>;
    async fn get(&self, id: Uuid) -> PhoenixResult<Option<Experiment>>;
    async fn list(&self) -> PhoenixResult<Vec<Experiment>>;

    /// Page of experiments plus the total row count, for the v2 list
    /// endpoint's `meta: { total, limit, offset }` contract.
    async fn list_page(&self, limit: i64, offset: i64) -> PhoenixResult<(Vec<Experiment>, i64)>;

    /// Experiments whose phase is neither terminal nor `Created`; candidates
    /// for overlap checks and the reconciler's periodic tick.
    async fn list_active(&self) -> PhoenixResult<Vec<Experiment>>;

    /// Advances `phase`, stamping `resolved_hosts`/`started_at`/`ended_at` as
    /// appropriate. Rejects illegal transitions with a `Conflict` error.
    async fn transition(
        &self,
        id: Uuid,
        next: Phase,
        resolved_hosts: Option<Vec<String>>,
        now: DateTime<Utc>,
    ) -> PhoenixResult<Experiment>;

    async fn delete(&self, id: Uuid) -> PhoenixResult<()>;

    /// Merges `entries` into the experiment's `metadata` JSONB map. Used to
    /// stash the rendered baseline/candidate configs at start time so
    /// `promote` has something to seed a `Deployment` with later, without a
    /// dedicated rendered-config column.
    async fn merge_metadata(&self, id: Uuid, entries: HashMap<String, String>) -> PhoenixResult<()>;
}

pub struct PgExperimentRepository {
    pool: PgPool,
}

impl PgExperimentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ExperimentRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    baseline_pipeline: String,
    candidate_pipeline: String,
    target_hosts: serde_json::Value,
    duration_seconds: i64,
    collector_type: CollectorType,
    phase: Phase,
    config: serde_json::Value,
    metadata: serde_json::Value,
    priority: i32,
    resolved_hosts: serde_json::Value,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
}

impl From<ExperimentRow> for Experiment {
    fn from(row: ExperimentRow) -> Self {
        let target_hosts: Vec<String> = serde_json::from_value(row.target_hosts).unwrap_or_default();
        Experiment {
            id: row.id,
            name: row.name,
            description: row.description,
            created_at: row.created_at,
            updated_at: row.updated_at,
            baseline_pipeline: row.baseline_pipeline,
            candidate_pipeline: row.candidate_pipeline,
            target_hosts: target_hosts.into_iter().map(HostSelector).collect(),
            duration_seconds: row.duration_seconds,
            collector_type: row.collector_type,
            phase: row.phase,
            config: row.config,
            metadata: serde_json::from_value(row.metadata).unwrap_or_default(),
            priority: row.priority,
            resolved_hosts: serde_json::from_value(row.resolved_hosts).unwrap_or_default(),
            started_at: row.started_at,
            ended_at: row.ended_at,
        }
    }
}

const EXPERIMENT_COLUMNS: &str = "id, name, description, created_at, updated_at, baseline_pipeline, \
     candidate_pipeline, target_hosts, duration_seconds, collector_type, phase, config, metadata, \
     priority, resolved_hosts, started_at, ended_at";

#[async_trait]
impl ExperimentRepository for PgExperimentRepository {
    async fn create(&self, new: NewExperiment) -> PhoenixResult<Experiment> {
        let id = Uuid::new_v4();
        let target_hosts: Vec<String> = new.target_hosts.iter().map(|h| h.as_str().to_string()).collect();
        let metadata: HashMap<String, String> = new.metadata;
        let row = sqlx::query_as::<_, ExperimentRow>(&format!(
            "INSERT INTO experiments
                (id, name, description, baseline_pipeline, candidate_pipeline, target_hosts,
                 duration_seconds, collector_type, config, metadata, priority)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             RETURNING {EXPERIMENT_COLUMNS}"
        ))
        .bind(id)
        .bind(&new.name)
        .bind(&new.description)
        .bind(&new.baseline_pipeline)
        .bind(&new.candidate_pipeline)
        .bind(serde_json::to_value(&target_hosts).unwrap())
        .bind(new.duration_seconds)
        .bind(new.collector_type)
        .bind(&new.config)
        .bind(serde_json::to_value(&metadata).unwrap())
        .bind(new.priority)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.constraint() == Some("idx_experiments_name") => {
                PhoenixError::Conflict(format!("experiment name '{}' already exists", new.name))
            }
            other => other.into(),
        })?;
        Ok(row.into())
    }

    async fn get(&self, id: Uuid) -> PhoenixResult<Option<Experiment>> {
        let row = sqlx::query_as::<_, ExperimentRow>(&format!(
            "SELECT {EXPERIMENT_COLUMNS} FROM experiments WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn list(&self) -> PhoenixResult<Vec<Experiment>> {
        let rows = sqlx::query_as::<_, ExperimentRow>(&format!(
            "SELECT {EXPERIMENT_COLUMNS} FROM experiments ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_page(&self, limit: i64, offset: i64) -> PhoenixResult<(Vec<Experiment>, i64)> {
        let rows = sqlx::query_as::<_, ExperimentRow>(&format!(
            "SELECT {EXPERIMENT_COLUMNS} FROM experiments ORDER BY created_at DESC LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM experiments")
            .fetch_one(&self.pool)
            .await?;
        Ok((rows.into_iter().map(Into::into).collect(), total))
    }

    async fn list_active(&self) -> PhoenixResult<Vec<Experiment>> {
        let rows = sqlx::query_as::<_, ExperimentRow>(&format!(
            "SELECT {EXPERIMENT_COLUMNS} FROM experiments
             WHERE phase NOT IN ('created', 'completed', 'failed', 'stopped', 'rolled_back', 'cancelled', 'deleted')
             ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn transition(
        &self,
        id: Uuid,
        next: Phase,
        resolved_hosts: Option<Vec<String>>,
        now: DateTime<Utc>,
    ) -> PhoenixResult<Experiment> {
        let mut tx = self.pool.begin().await?;
        let current = sqlx::query_as::<_, ExperimentRow>(&format!(
            "SELECT {EXPERIMENT_COLUMNS} FROM experiments WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| PhoenixError::NotFound(format!("experiment {id} not found")))?;

        let current_phase: Phase = current.phase;
        if !current_phase.can_transition_to(next) {
            return Err(PhoenixError::Conflict(format!(
                "cannot transition experiment from {current_phase:?} to {next:?}"
            )));
        }

        let started_at = if next == Phase::Running && current.started_at.is_none() {
            Some(now)
        } else {
            current.started_at
        };
        let ended_at = if next.is_terminal() {
            Some(now)
        } else {
            current.ended_at
        };
        let resolved = resolved_hosts
            .map(|h| serde_json::to_value(h).unwrap())
            .unwrap_or(current.resolved_hosts);

        let row = sqlx::query_as::<_, ExperimentRow>(&format!(
            "UPDATE experiments SET phase = $2, started_at = $3, ended_at = $4,
             resolved_hosts = $5, updated_at = $6
             WHERE id = $1 RETURNING {EXPERIMENT_COLUMNS}"
        ))
        .bind(id)
        .bind(next)
        .bind(started_at)
        .bind(ended_at)
        .bind(resolved)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row.into())
    }

    async fn delete(&self, id: Uuid) -> PhoenixResult<()> {
        sqlx::query("UPDATE experiments SET phase = 'deleted' WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn merge_metadata(&self, id: Uuid, entries: HashMap<String, String>) -> PhoenixResult<()> {
        let mut tx = self.pool.begin().await?;
        let current: serde_json::Value =
            sqlx::query_scalar("SELECT metadata FROM experiments WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| PhoenixError::NotFound(format!("experiment {id} not found")))?;

        let mut merged: HashMap<String, String> = serde_json::from_value(current).unwrap_or_default();
        merged.extend(entries);

        sqlx::query("UPDATE experiments SET metadata = $2 WHERE id = $1")
            .bind(id)
            .bind(serde_json::to_value(&merged).unwrap())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}
