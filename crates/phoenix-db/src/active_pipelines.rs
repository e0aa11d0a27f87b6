use async_trait::async_trait;
use chrono::{DateTime, Utc};
use phoenix_types::{ActivePipeline, PhoenixError, PhoenixResult, PipelineStatus, Variant};
use sqlx::PgPool;
use uuid::Uuid;

#[async_trait]
pub trait ActivePipelineRepository: Send + Sync {
    /// Fails with `Conflict` if the partial unique index on
    /// `(host_id, experiment_id, variant)` rejects a second `running` row.
    async fn start(
        &self,
        host_id: &str,
        experiment_id: Uuid,
        variant: Variant,
        config_hash: &str,
        now: DateTime<Utc>,
    ) -> PhoenixResult<ActivePipeline>;

    async fn set_status(
        &self,
        id: Uuid,
        status: PipelineStatus,
        now: DateTime<Utc>,
    ) -> PhoenixResult<ActivePipeline>;

    async fn get(&self, id: Uuid) -> PhoenixResult<Option<ActivePipeline>>;
    async fn list_for_experiment(&self, experiment_id: Uuid) -> PhoenixResult<Vec<ActivePipeline>>;
    async fn list_for_host(&self, host_id: &str) -> PhoenixResult<Vec<ActivePipeline>>;

    /// Relabels every `running` row for `(experiment_id, variant)` to
    /// `standalone` in place, returning the affected rows. Used by promotion:
    /// the collector keeps running, only its bookkeeping variant changes.
    async fn promote_variant(
        &self,
        experiment_id: Uuid,
        variant: Variant,
    ) -> PhoenixResult<Vec<ActivePipeline>>;
}

pub struct PgActivePipelineRepository {
    pool: PgPool,
}

impl PgActivePipelineRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct PipelineRow {
    id: Uuid,
    host_id: String,
    experiment_id: Uuid,
    variant: Variant,
    status: PipelineStatus,
    config_hash: String,
    started_at: DateTime<Utc>,
    stopped_at: Option<DateTime<Utc>>,
}

impl From<PipelineRow> for ActivePipeline {
    fn from(row: PipelineRow) -> Self {
        ActivePipeline {
            id: row.id,
            host_id: row.host_id,
            experiment_id: row.experiment_id,
            variant: row.variant,
            status: row.status,
            config_hash: row.config_hash,
            started_at: row.started_at,
            stopped_at: row.stopped_at,
        }
    }
}

const PIPELINE_COLUMNS: &str =
    "id, host_id, experiment_id, variant, status, config_hash, started_at, stopped_at";

#[async_trait]
impl ActivePipelineRepository for PgActivePipelineRepository {
    async fn start(
        &self,
        host_id: &str,
        experiment_id: Uuid,
        variant: Variant,
        config_hash: &str,
        now: DateTime<Utc>,
    ) -> PhoenixResult<ActivePipeline> {
        let id = Uuid::new_v4();
        let row = sqlx::query_as::<_, PipelineRow>(&format!(
            "INSERT INTO active_pipelines (id, host_id, experiment_id, variant, status, config_hash, started_at)
             VALUES ($1, $2, $3, $4, 'starting', $5, $6)
             RETURNING {PIPELINE_COLUMNS}"
        ))
        .bind(id)
        .bind(host_id)
        .bind(experiment_id)
        .bind(variant)
        .bind(config_hash)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db)
                if db.constraint() == Some("idx_active_pipelines_running") =>
            {
                PhoenixError::Conflict(format!(
                    "a running pipeline already exists for host {host_id} variant {variant:?}"
                ))
            }
            other => other.into(),
        })?;
        Ok(row.into())
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: PipelineStatus,
        now: DateTime<Utc>,
    ) -> PhoenixResult<ActivePipeline> {
        let stopped_at = matches!(status, PipelineStatus::Stopped | PipelineStatus::Failed)
            .then_some(now);
        let row = sqlx::query_as::<_, PipelineRow>(&format!(
            "UPDATE active_pipelines SET status = $2, stopped_at = COALESCE(stopped_at, $3)
             WHERE id = $1 RETURNING {PIPELINE_COLUMNS}"
        ))
        .bind(id)
        .bind(status)
        .bind(stopped_at)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| PhoenixError::NotFound(format!("active pipeline {id} not found")))?;
        Ok(row.into())
    }

    async fn get(&self, id: Uuid) -> PhoenixResult<Option<ActivePipeline>> {
        let row = sqlx::query_as::<_, PipelineRow>(&format!(
            "SELECT {PIPELINE_COLUMNS} FROM active_pipelines WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn list_for_experiment(&self, experiment_id: Uuid) -> PhoenixResult<Vec<ActivePipeline>> {
        let rows = sqlx::query_as::<_, PipelineRow>(&format!(
            "SELECT {PIPELINE_COLUMNS} FROM active_pipelines WHERE experiment_id = $1 ORDER BY started_at"
        ))
        .bind(experiment_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_for_host(&self, host_id: &str) -> PhoenixResult<Vec<ActivePipeline>> {
        let rows = sqlx::query_as::<_, PipelineRow>(&format!(
            "SELECT {PIPELINE_COLUMNS} FROM active_pipelines WHERE host_id = $1 AND status = 'running'"
        ))
        .bind(host_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn promote_variant(
        &self,
        experiment_id: Uuid,
        variant: Variant,
    ) -> PhoenixResult<Vec<ActivePipeline>> {
        let rows = sqlx::query_as::<_, PipelineRow>(&format!(
            "UPDATE active_pipelines SET variant = 'standalone'
             WHERE experiment_id = $1 AND variant = $2 AND status = 'running'
             RETURNING {PIPELINE_COLUMNS}"
        ))
        .bind(experiment_id)
        .bind(variant)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}
