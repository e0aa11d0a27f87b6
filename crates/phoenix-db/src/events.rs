use async_trait::async_trait;
use chrono::{DateTime, Utc};
use phoenix_types::{EventKind, PhoenixResult};
use sqlx::PgPool;
use uuid::Uuid;

/// Durable, per-experiment append-only log backing the reconciler: unlike the
/// in-memory event hub's ring buffer, this survives restarts so a reconcile
/// pass can replay everything that happened to an experiment.
#[async_trait]
pub trait ExperimentEventRepository: Send + Sync {
    async fn append(&self, experiment_id: Uuid, kind: &EventKind, now: DateTime<Utc>) -> PhoenixResult<i64>;
    async fn list_since(&self, experiment_id: Uuid, since_sequence: i64) -> PhoenixResult<Vec<(i64, EventKind)>>;
    async fn next_sequence(&self, experiment_id: Uuid) -> PhoenixResult<i64>;
}

pub struct PgExperimentEventRepository {
    pool: PgPool,
}

impl PgExperimentEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExperimentEventRepository for PgExperimentEventRepository {
    async fn append(&self, experiment_id: Uuid, kind: &EventKind, now: DateTime<Utc>) -> PhoenixResult<i64> {
        let mut tx = self.pool.begin().await?;
        let next_sequence: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(sequence), 0) + 1 FROM experiment_events WHERE experiment_id = $1",
        )
        .bind(experiment_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO experiment_events (experiment_id, sequence, event, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(experiment_id)
        .bind(next_sequence)
        .bind(serde_json::to_value(kind).unwrap())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(next_sequence)
    }

    async fn list_since(&self, experiment_id: Uuid, since_sequence: i64) -> PhoenixResult<Vec<(i64, EventKind)>> {
        let rows: Vec<(i64, serde_json::Value)> = sqlx::query_as(
            "SELECT sequence, event FROM experiment_events
             WHERE experiment_id = $1 AND sequence > $2 ORDER BY sequence",
        )
        .bind(experiment_id)
        .bind(since_sequence)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(seq, value)| Ok((seq, serde_json::from_value(value)?)))
            .collect()
    }

    async fn next_sequence(&self, experiment_id: Uuid) -> PhoenixResult<i64> {
        let seq: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(sequence), 0) + 1 FROM experiment_events WHERE experiment_id = $1",
        )
        .bind(experiment_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(seq)
    }
}
