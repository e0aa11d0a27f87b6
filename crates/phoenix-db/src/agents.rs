use async_trait::async_trait;
use chrono::{DateTime, Utc};
use phoenix_types::{Agent, AgentStatus, PhoenixResult, ResourceUsage};
use sqlx::PgPool;

#[async_trait]
pub trait AgentRepository: Send + Sync {
    /// Upserts the agent row, stamping `last_heartbeat = now`. Implicit
    /// registration on first heartbeat happens here (insert-or-update).
    async fn upsert_heartbeat(
        &self,
        host_id: &str,
        hostname: &str,
        address: &str,
        version: &str,
        status: AgentStatus,
        resource_usage: &ResourceUsage,
        active_tasks: &[String],
        now: DateTime<Utc>,
    ) -> PhoenixResult<()>;

    async fn get(&self, host_id: &str) -> PhoenixResult<Option<Agent>>;
    async fn list(&self) -> PhoenixResult<Vec<Agent>>;

    /// Page of agents plus the total row count, for the v2 list endpoint's
    /// `meta: { total, limit, offset }` contract.
    async fn list_page(&self, limit: i64, offset: i64) -> PhoenixResult<(Vec<Agent>, i64)>;

    /// Agents with `last_heartbeat` older than `threshold` and not already
    /// `offline`; returned so the caller can emit `agent.disconnected`.
    async fn mark_stale_offline(&self, threshold: DateTime<Utc>) -> PhoenixResult<Vec<String>>;
}

pub struct PgAgentRepository {
    pool: PgPool,
}

impl PgAgentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct AgentRow {
    host_id: String,
    hostname: String,
    address: String,
    version: String,
    capabilities: serde_json::Value,
    group_name: Option<String>,
    location: Option<String>,
    status: AgentStatus,
    last_heartbeat: DateTime<Utc>,
    resource_usage: serde_json::Value,
    active_tasks: serde_json::Value,
}

impl AgentRow {
    fn into_domain(self) -> Agent {
        Agent {
            host_id: self.host_id,
            hostname: self.hostname,
            address: self.address,
            version: self.version,
            capabilities: serde_json::from_value(self.capabilities).unwrap_or_default(),
            group: self.group_name,
            location: self.location,
            status: self.status,
            last_heartbeat: self.last_heartbeat,
            resource_usage: serde_json::from_value(self.resource_usage).unwrap_or_default(),
            active_tasks: serde_json::from_value(self.active_tasks).unwrap_or_default(),
        }
    }
}

#[async_trait]
impl AgentRepository for PgAgentRepository {
    async fn upsert_heartbeat(
        &self,
        host_id: &str,
        hostname: &str,
        address: &str,
        version: &str,
        status: AgentStatus,
        resource_usage: &ResourceUsage,
        active_tasks: &[String],
        now: DateTime<Utc>,
    ) -> PhoenixResult<()> {
        sqlx::query(
            r#"
            INSERT INTO agents (host_id, hostname, address, version, status, last_heartbeat, resource_usage, active_tasks)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (host_id) DO UPDATE SET
                hostname = EXCLUDED.hostname,
                address = EXCLUDED.address,
                version = EXCLUDED.version,
                status = EXCLUDED.status,
                last_heartbeat = EXCLUDED.last_heartbeat,
                resource_usage = EXCLUDED.resource_usage,
                active_tasks = EXCLUDED.active_tasks
            "#,
        )
        .bind(host_id)
        .bind(hostname)
        .bind(address)
        .bind(version)
        .bind(status)
        .bind(now)
        .bind(serde_json::to_value(resource_usage).unwrap_or_default())
        .bind(serde_json::to_value(active_tasks).unwrap_or_default())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, host_id: &str) -> PhoenixResult<Option<Agent>> {
        let row = sqlx::query_as::<_, AgentRow>(
            r#"SELECT host_id, hostname, address, version, capabilities,
               "group" AS group_name, location, status, last_heartbeat,
               resource_usage, active_tasks FROM agents WHERE host_id = $1"#,
        )
        .bind(host_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(AgentRow::into_domain))
    }

    async fn list(&self) -> PhoenixResult<Vec<Agent>> {
        let rows = sqlx::query_as::<_, AgentRow>(
            r#"SELECT host_id, hostname, address, version, capabilities,
               "group" AS group_name, location, status, last_heartbeat,
               resource_usage, active_tasks FROM agents ORDER BY host_id"#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(AgentRow::into_domain).collect())
    }

    async fn list_page(&self, limit: i64, offset: i64) -> PhoenixResult<(Vec<Agent>, i64)> {
        let rows = sqlx::query_as::<_, AgentRow>(
            r#"SELECT host_id, hostname, address, version, capabilities,
               "group" AS group_name, location, status, last_heartbeat,
               resource_usage, active_tasks FROM agents ORDER BY host_id LIMIT $1 OFFSET $2"#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM agents")
            .fetch_one(&self.pool)
            .await?;
        Ok((rows.into_iter().map(AgentRow::into_domain).collect(), total))
    }

    async fn mark_stale_offline(&self, threshold: DateTime<Utc>) -> PhoenixResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            UPDATE agents SET status = 'offline'
            WHERE last_heartbeat < $1 AND status <> 'offline'
            RETURNING host_id
            "#,
        )
        .bind(threshold)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}
