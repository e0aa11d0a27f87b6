use async_trait::async_trait;
use chrono::{DateTime, Utc};
use phoenix_types::{NewTask, PhoenixError, PhoenixResult, Task, TaskAction, TaskKind, TaskStatus, Variant};
use sqlx::PgPool;
use uuid::Uuid;

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn enqueue(&self, task: NewTask) -> PhoenixResult<Task>;
    async fn enqueue_batch(&self, tasks: Vec<NewTask>) -> PhoenixResult<Vec<Task>>;

    /// Assignment algorithm (spec §4.2): locks and claims the single
    /// highest-priority pending row for `host_id`, or returns `None`.
    async fn try_assign(&self, host_id: &str, now: DateTime<Utc>) -> PhoenixResult<Option<Task>>;

    async fn report(
        &self,
        task_id: Uuid,
        host_id: &str,
        status: TaskStatus,
        result: Option<serde_json::Value>,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> PhoenixResult<Task>;

    async fn cancel(&self, task_id: Uuid) -> PhoenixResult<()>;
    async fn get(&self, task_id: Uuid) -> PhoenixResult<Option<Task>>;
    async fn list_for_experiment(&self, experiment_id: Uuid) -> PhoenixResult<Vec<Task>>;

    /// Rows stuck in `assigned` past `assign_timeout`, or `running` past
    /// `run_timeout`; returned to the scanner which resets or fails them.
    async fn find_timed_out(
        &self,
        assign_cutoff: DateTime<Utc>,
        run_cutoff: DateTime<Utc>,
    ) -> PhoenixResult<Vec<Task>>;

    async fn reset_to_pending(&self, task_id: Uuid) -> PhoenixResult<()>;
    async fn mark_failed(&self, task_id: Uuid, error: &str) -> PhoenixResult<()>;
}

pub struct PgTaskRepository {
    pool: PgPool,
    max_retries: i32,
}

impl PgTaskRepository {
    pub fn new(pool: PgPool, max_retries: i32) -> Self {
        Self { pool, max_retries }
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: Uuid,
    kind: TaskKind,
    action: TaskAction,
    host_id: String,
    experiment_id: Option<Uuid>,
    deployment_id: Option<Uuid>,
    variant: Option<Variant>,
    config: serde_json::Value,
    priority: i32,
    status: TaskStatus,
    created_at: DateTime<Utc>,
    assigned_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    retry_count: i32,
    result: Option<serde_json::Value>,
    error: Option<String>,
}

impl From<TaskRow> for Task {
    fn from(row: TaskRow) -> Self {
        Task {
            id: row.id,
            kind: row.kind,
            action: row.action,
            host_id: row.host_id,
            experiment_id: row.experiment_id,
            deployment_id: row.deployment_id,
            variant: row.variant,
            config: row.config,
            priority: row.priority,
            status: row.status,
            created_at: row.created_at,
            assigned_at: row.assigned_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            retry_count: row.retry_count,
            result: row.result,
            error: row.error,
        }
    }
}

const TASK_COLUMNS: &str = "id, kind, action, host_id, experiment_id, deployment_id, variant, \
     config, priority, status, created_at, assigned_at, started_at, completed_at, retry_count, \
     result, error";

#[async_trait]
impl TaskRepository for PgTaskRepository {
    async fn enqueue(&self, task: NewTask) -> PhoenixResult<Task> {
        let id = Uuid::new_v4();
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "INSERT INTO tasks (id, kind, action, host_id, experiment_id, deployment_id, variant, config, priority)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(id)
        .bind(task.kind)
        .bind(task.action)
        .bind(&task.host_id)
        .bind(task.experiment_id)
        .bind(task.deployment_id)
        .bind(task.variant)
        .bind(task.config)
        .bind(task.priority)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn enqueue_batch(&self, tasks: Vec<NewTask>) -> PhoenixResult<Vec<Task>> {
        let mut tx = self.pool.begin().await?;
        let mut out = Vec::with_capacity(tasks.len());
        for task in tasks {
            let id = Uuid::new_v4();
            let row = sqlx::query_as::<_, TaskRow>(&format!(
                "INSERT INTO tasks (id, kind, action, host_id, experiment_id, deployment_id, variant, config, priority)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                 RETURNING {TASK_COLUMNS}"
            ))
            .bind(id)
            .bind(task.kind)
            .bind(task.action)
            .bind(&task.host_id)
            .bind(task.experiment_id)
            .bind(task.deployment_id)
            .bind(task.variant)
            .bind(task.config)
            .bind(task.priority)
            .fetch_one(&mut *tx)
            .await?;
            out.push(row.into());
        }
        tx.commit().await?;
        Ok(out)
    }

    async fn try_assign(&self, host_id: &str, now: DateTime<Utc>) -> PhoenixResult<Option<Task>> {
        let mut tx = self.pool.begin().await?;
        let candidate = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE host_id = $1 AND status = 'pending'
             ORDER BY priority DESC, created_at ASC
             FOR UPDATE SKIP LOCKED
             LIMIT 1"
        ))
        .bind(host_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(candidate) = candidate else {
            tx.commit().await?;
            return Ok(None);
        };

        let updated = sqlx::query_as::<_, TaskRow>(&format!(
            "UPDATE tasks SET status = 'assigned', assigned_at = $2
             WHERE id = $1 RETURNING {TASK_COLUMNS}"
        ))
        .bind(candidate.id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(updated.into()))
    }

    async fn report(
        &self,
        task_id: Uuid,
        host_id: &str,
        status: TaskStatus,
        result: Option<serde_json::Value>,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> PhoenixResult<Task> {
        let mut tx = self.pool.begin().await?;
        let current = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1 FOR UPDATE"
        ))
        .bind(task_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| PhoenixError::NotFound(format!("task {task_id} not found")))?;

        if current.host_id != host_id {
            return Err(PhoenixError::Conflict(
                "caller is not the task's assignee".to_string(),
            ));
        }

        // Idempotent by (task_id, status): reporting the same terminal status twice is a no-op.
        if current.status == status {
            tx.commit().await?;
            return Ok(current.into());
        }

        let (started_at, completed_at) = match status {
            TaskStatus::Running => (Some(now), current.completed_at),
            TaskStatus::Completed | TaskStatus::Failed => {
                (current.started_at.or(Some(now)), Some(now))
            }
            _ => (current.started_at, current.completed_at),
        };

        let updated = sqlx::query_as::<_, TaskRow>(&format!(
            "UPDATE tasks SET status = $2, started_at = $3, completed_at = $4, result = $5, error = $6
             WHERE id = $1 RETURNING {TASK_COLUMNS}"
        ))
        .bind(task_id)
        .bind(status)
        .bind(started_at)
        .bind(completed_at)
        .bind(result)
        .bind(error)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated.into())
    }

    async fn cancel(&self, task_id: Uuid) -> PhoenixResult<()> {
        let mut tx = self.pool.begin().await?;
        let current = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1 FOR UPDATE"
        ))
        .bind(task_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| PhoenixError::NotFound(format!("task {task_id} not found")))?;

        if !matches!(current.status, TaskStatus::Pending | TaskStatus::Assigned) {
            return Err(PhoenixError::Conflict(
                "cannot cancel a task that is running or terminal; use a stop action instead"
                    .to_string(),
            ));
        }

        sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(task_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, task_id: Uuid) -> PhoenixResult<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"
        ))
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn list_for_experiment(&self, experiment_id: Uuid) -> PhoenixResult<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE experiment_id = $1 ORDER BY created_at"
        ))
        .bind(experiment_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn find_timed_out(
        &self,
        assign_cutoff: DateTime<Utc>,
        run_cutoff: DateTime<Utc>,
    ) -> PhoenixResult<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE (status = 'assigned' AND assigned_at < $1)
                OR (status = 'running' AND started_at < $2)"
        ))
        .bind(assign_cutoff)
        .bind(run_cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn reset_to_pending(&self, task_id: Uuid) -> PhoenixResult<()> {
        let mut tx = self.pool.begin().await?;
        let current = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1 FOR UPDATE"
        ))
        .bind(task_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| PhoenixError::NotFound(format!("task {task_id} not found")))?;

        if current.retry_count + 1 >= self.max_retries {
            sqlx::query(
                "UPDATE tasks SET status = 'failed', error = 'exceeded max retries', retry_count = retry_count + 1
                 WHERE id = $1",
            )
            .bind(task_id)
            .execute(&mut *tx)
            .await?;
        } else {
            sqlx::query(
                "UPDATE tasks SET status = 'pending', assigned_at = NULL, started_at = NULL,
                 retry_count = retry_count + 1 WHERE id = $1",
            )
            .bind(task_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn mark_failed(&self, task_id: Uuid, error: &str) -> PhoenixResult<()> {
        sqlx::query("UPDATE tasks SET status = 'failed', error = $2 WHERE id = $1")
            .bind(task_id)
            .bind(error)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
