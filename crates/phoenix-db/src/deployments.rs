use async_trait::async_trait;
use chrono::{DateTime, Utc};
use phoenix_types::{
    Deployment, DeploymentStatus, DeploymentVersion, NewDeployment, PhoenixError, PhoenixResult,
    VersionStatus,
};
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

#[async_trait]
pub trait DeploymentRepository: Send + Sync {
    async fn create(&self, new: NewDeployment) -> PhoenixResult<Deployment>;
    async fn get(&self, id: Uuid) -> PhoenixResult<Option<Deployment>>;
    async fn list(&self) -> PhoenixResult<Vec<Deployment>>;

    /// Page of deployments plus the total row count, for the v2 list
    /// endpoint's `meta: { total, limit, offset }` contract.
    async fn list_page(&self, limit: i64, offset: i64) -> PhoenixResult<(Vec<Deployment>, i64)>;

    /// Inserts version `current_version + 1`, marks it `active`, supersedes
    /// the previous active row, and bumps `current_version`. Atomic.
    async fn deploy_version(
        &self,
        deployment_id: Uuid,
        pipeline_config: &str,
        parameters: HashMap<String, String>,
        deployed_by: &str,
        now: DateTime<Utc>,
    ) -> PhoenixResult<DeploymentVersion>;

    /// Copies `target_version`'s config into a new version on top, marks the
    /// previously active version `rolled_back`.
    async fn rollback_to(
        &self,
        deployment_id: Uuid,
        target_version: i32,
        deployed_by: &str,
        now: DateTime<Utc>,
    ) -> PhoenixResult<DeploymentVersion>;

    async fn list_versions(&self, deployment_id: Uuid) -> PhoenixResult<Vec<DeploymentVersion>>;

    /// Page of a deployment's versions plus the total row count, for the v2
    /// list endpoint's `meta: { total, limit, offset }` contract.
    async fn list_versions_page(
        &self,
        deployment_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> PhoenixResult<(Vec<DeploymentVersion>, i64)>;

    async fn get_active_version(&self, deployment_id: Uuid) -> PhoenixResult<Option<DeploymentVersion>>;
    async fn set_status(&self, id: Uuid, status: DeploymentStatus, now: DateTime<Utc>) -> PhoenixResult<()>;
}

pub struct PgDeploymentRepository {
    pool: PgPool,
}

impl PgDeploymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct DeploymentRow {
    id: Uuid,
    name: String,
    namespace: String,
    pipeline_template: String,
    target_selector: String,
    parameters: serde_json::Value,
    status: DeploymentStatus,
    current_version: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<DeploymentRow> for Deployment {
    fn from(row: DeploymentRow) -> Self {
        Deployment {
            id: row.id,
            name: row.name,
            namespace: row.namespace,
            pipeline_template: row.pipeline_template,
            target_selector: row.target_selector,
            parameters: serde_json::from_value(row.parameters).unwrap_or_default(),
            status: row.status,
            current_version: row.current_version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct VersionRow {
    deployment_id: Uuid,
    version: i32,
    pipeline_config: String,
    parameters: serde_json::Value,
    deployed_by: String,
    deployed_at: DateTime<Utc>,
    status: VersionStatus,
}

impl From<VersionRow> for DeploymentVersion {
    fn from(row: VersionRow) -> Self {
        DeploymentVersion {
            deployment_id: row.deployment_id,
            version: row.version,
            pipeline_config: row.pipeline_config,
            parameters: serde_json::from_value(row.parameters).unwrap_or_default(),
            deployed_by: row.deployed_by,
            deployed_at: row.deployed_at,
            status: row.status,
        }
    }
}

const DEPLOYMENT_COLUMNS: &str = "id, name, namespace, pipeline_template, target_selector, \
     parameters, status, current_version, created_at, updated_at";
const VERSION_COLUMNS: &str =
    "deployment_id, version, pipeline_config, parameters, deployed_by, deployed_at, status";

#[async_trait]
impl DeploymentRepository for PgDeploymentRepository {
    async fn create(&self, new: NewDeployment) -> PhoenixResult<Deployment> {
        let id = Uuid::new_v4();
        let row = sqlx::query_as::<_, DeploymentRow>(&format!(
            "INSERT INTO pipeline_deployments (id, name, namespace, pipeline_template, target_selector, parameters)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {DEPLOYMENT_COLUMNS}"
        ))
        .bind(id)
        .bind(&new.name)
        .bind(&new.namespace)
        .bind(&new.pipeline_template)
        .bind(&new.target_selector)
        .bind(serde_json::to_value(&new.parameters).unwrap())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db)
                if db.constraint() == Some("idx_deployments_namespace_name") =>
            {
                PhoenixError::Conflict(format!(
                    "deployment '{}/{}' already exists",
                    new.namespace, new.name
                ))
            }
            other => other.into(),
        })?;
        Ok(row.into())
    }

    async fn get(&self, id: Uuid) -> PhoenixResult<Option<Deployment>> {
        let row = sqlx::query_as::<_, DeploymentRow>(&format!(
            "SELECT {DEPLOYMENT_COLUMNS} FROM pipeline_deployments WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn list(&self) -> PhoenixResult<Vec<Deployment>> {
        let rows = sqlx::query_as::<_, DeploymentRow>(&format!(
            "SELECT {DEPLOYMENT_COLUMNS} FROM pipeline_deployments ORDER BY namespace, name"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_page(&self, limit: i64, offset: i64) -> PhoenixResult<(Vec<Deployment>, i64)> {
        let rows = sqlx::query_as::<_, DeploymentRow>(&format!(
            "SELECT {DEPLOYMENT_COLUMNS} FROM pipeline_deployments ORDER BY namespace, name LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pipeline_deployments")
            .fetch_one(&self.pool)
            .await?;
        Ok((rows.into_iter().map(Into::into).collect(), total))
    }

    async fn deploy_version(
        &self,
        deployment_id: Uuid,
        pipeline_config: &str,
        parameters: HashMap<String, String>,
        deployed_by: &str,
        now: DateTime<Utc>,
    ) -> PhoenixResult<DeploymentVersion> {
        let mut tx = self.pool.begin().await?;
        let dep = sqlx::query_as::<_, DeploymentRow>(&format!(
            "SELECT {DEPLOYMENT_COLUMNS} FROM pipeline_deployments WHERE id = $1 FOR UPDATE"
        ))
        .bind(deployment_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| PhoenixError::NotFound(format!("deployment {deployment_id} not found")))?;

        let next_version = dep.current_version + 1;

        sqlx::query(
            "UPDATE deployment_versions SET status = 'superseded'
             WHERE deployment_id = $1 AND status = 'active'",
        )
        .bind(deployment_id)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query_as::<_, VersionRow>(&format!(
            "INSERT INTO deployment_versions (deployment_id, version, pipeline_config, parameters, deployed_by, deployed_at, status)
             VALUES ($1, $2, $3, $4, $5, $6, 'active')
             RETURNING {VERSION_COLUMNS}"
        ))
        .bind(deployment_id)
        .bind(next_version)
        .bind(pipeline_config)
        .bind(serde_json::to_value(&parameters).unwrap())
        .bind(deployed_by)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE pipeline_deployments SET current_version = $2, status = 'deploying', updated_at = $3 WHERE id = $1",
        )
        .bind(deployment_id)
        .bind(next_version)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row.into())
    }

    async fn rollback_to(
        &self,
        deployment_id: Uuid,
        target_version: i32,
        deployed_by: &str,
        now: DateTime<Utc>,
    ) -> PhoenixResult<DeploymentVersion> {
        let mut tx = self.pool.begin().await?;
        let target = sqlx::query_as::<_, VersionRow>(&format!(
            "SELECT {VERSION_COLUMNS} FROM deployment_versions WHERE deployment_id = $1 AND version = $2"
        ))
        .bind(deployment_id)
        .bind(target_version)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            PhoenixError::NotFound(format!(
                "deployment {deployment_id} has no version {target_version}"
            ))
        })?;

        let dep = sqlx::query_as::<_, DeploymentRow>(&format!(
            "SELECT {DEPLOYMENT_COLUMNS} FROM pipeline_deployments WHERE id = $1 FOR UPDATE"
        ))
        .bind(deployment_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| PhoenixError::NotFound(format!("deployment {deployment_id} not found")))?;

        let next_version = dep.current_version + 1;

        sqlx::query(
            "UPDATE deployment_versions SET status = 'rolled_back'
             WHERE deployment_id = $1 AND status = 'active'",
        )
        .bind(deployment_id)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query_as::<_, VersionRow>(&format!(
            "INSERT INTO deployment_versions (deployment_id, version, pipeline_config, parameters, deployed_by, deployed_at, status)
             VALUES ($1, $2, $3, $4, $5, $6, 'active')
             RETURNING {VERSION_COLUMNS}"
        ))
        .bind(deployment_id)
        .bind(next_version)
        .bind(&target.pipeline_config)
        .bind(&target.parameters)
        .bind(deployed_by)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE pipeline_deployments SET current_version = $2, status = 'rolled_back', updated_at = $3 WHERE id = $1",
        )
        .bind(deployment_id)
        .bind(next_version)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row.into())
    }

    async fn list_versions(&self, deployment_id: Uuid) -> PhoenixResult<Vec<DeploymentVersion>> {
        let rows = sqlx::query_as::<_, VersionRow>(&format!(
            "SELECT {VERSION_COLUMNS} FROM deployment_versions WHERE deployment_id = $1 ORDER BY version DESC"
        ))
        .bind(deployment_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_versions_page(
        &self,
        deployment_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> PhoenixResult<(Vec<DeploymentVersion>, i64)> {
        let rows = sqlx::query_as::<_, VersionRow>(&format!(
            "SELECT {VERSION_COLUMNS} FROM deployment_versions WHERE deployment_id = $1 \
             ORDER BY version DESC LIMIT $2 OFFSET $3"
        ))
        .bind(deployment_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM deployment_versions WHERE deployment_id = $1")
                .bind(deployment_id)
                .fetch_one(&self.pool)
                .await?;
        Ok((rows.into_iter().map(Into::into).collect(), total))
    }

    async fn get_active_version(&self, deployment_id: Uuid) -> PhoenixResult<Option<DeploymentVersion>> {
        let row = sqlx::query_as::<_, VersionRow>(&format!(
            "SELECT {VERSION_COLUMNS} FROM deployment_versions WHERE deployment_id = $1 AND status = 'active'"
        ))
        .bind(deployment_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn set_status(&self, id: Uuid, status: DeploymentStatus, now: DateTime<Utc>) -> PhoenixResult<()> {
        sqlx::query("UPDATE pipeline_deployments SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(status)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
