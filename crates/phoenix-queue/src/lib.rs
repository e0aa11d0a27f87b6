//! Long-poll task queue (spec §4.2): agents block on `poll` until a task is
//! assigned to them or `long_poll_max_seconds` elapses. Persistence and the
//! single-assignment algorithm itself live in [`phoenix_db::tasks`]; this
//! crate adds the wakeup fan-out so a poller doesn't have to busy-loop
//! against Postgres.

use phoenix_db::TaskRepository;
use phoenix_platform::Clock;
use phoenix_types::{NewTask, PhoenixResult, Task};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

/// Wakes a single host's pollers whenever a task is enqueued or freed for it.
#[derive(Default)]
struct NotifyBoard {
    per_host: AsyncMutex<HashMap<String, Arc<Notify>>>,
}

impl NotifyBoard {
    async fn notify(&self, host_id: &str) {
        let guard = self.per_host.lock().await;
        if let Some(n) = guard.get(host_id) {
            n.notify_waiters();
        }
    }

    async fn handle_for(&self, host_id: &str) -> Arc<Notify> {
        let mut guard = self.per_host.lock().await;
        guard
            .entry(host_id.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }
}

pub struct TaskQueue {
    repo: Arc<dyn TaskRepository>,
    clock: Arc<dyn Clock>,
    board: NotifyBoard,
    long_poll_max: Duration,
}

impl TaskQueue {
    pub fn new(repo: Arc<dyn TaskRepository>, clock: Arc<dyn Clock>, long_poll_max: Duration) -> Self {
        Self {
            repo,
            clock,
            board: NotifyBoard::default(),
            long_poll_max,
        }
    }

    pub async fn enqueue(&self, task: NewTask) -> PhoenixResult<Task> {
        let host_id = task.host_id.clone();
        let created = self.repo.enqueue(task).await?;
        self.board.notify(&host_id).await;
        Ok(created)
    }

    pub async fn enqueue_batch(&self, tasks: Vec<NewTask>) -> PhoenixResult<Vec<Task>> {
        let hosts: Vec<String> = tasks.iter().map(|t| t.host_id.clone()).collect();
        let created = self.repo.enqueue_batch(tasks).await?;
        for host_id in hosts {
            self.board.notify(&host_id).await;
        }
        Ok(created)
    }

    /// Blocks until a task is available for `host_id` or `long_poll_max` (capped
    /// at the configured ceiling) elapses, whichever is first.
    pub async fn poll(&self, host_id: &str, wait: Option<Duration>) -> PhoenixResult<Option<Task>> {
        let wait = wait.unwrap_or(self.long_poll_max).min(self.long_poll_max);
        let deadline = tokio::time::Instant::now() + wait;

        if let Some(task) = self.repo.try_assign(host_id, self.clock.now()).await? {
            return Ok(Some(task));
        }

        let notify = self.board.handle_for(host_id).await;
        loop {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let remaining = deadline - now;
            tokio::select! {
                _ = notify.notified() => {}
                _ = tokio::time::sleep(remaining) => return Ok(None),
            }
            if let Some(task) = self.repo.try_assign(host_id, self.clock.now()).await? {
                return Ok(Some(task));
            }
        }
    }

    pub async fn report(
        &self,
        task_id: Uuid,
        host_id: &str,
        status: phoenix_types::TaskStatus,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> PhoenixResult<Task> {
        self.repo
            .report(task_id, host_id, status, result, error, self.clock.now())
            .await
    }

    pub async fn cancel(&self, task_id: Uuid) -> PhoenixResult<()> {
        self.repo.cancel(task_id).await
    }

    pub async fn get(&self, task_id: Uuid) -> PhoenixResult<Option<Task>> {
        self.repo.get(task_id).await
    }

    pub async fn list_for_experiment(&self, experiment_id: Uuid) -> PhoenixResult<Vec<Task>> {
        self.repo.list_for_experiment(experiment_id).await
    }

    /// Notifies a host's waiting pollers without touching storage; used after
    /// an out-of-band change (e.g. a manual requeue) makes work available.
    pub async fn wake(&self, host_id: &str) {
        self.board.notify(host_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use phoenix_platform::FrozenClock;
    use phoenix_types::{PhoenixError, TaskAction, TaskKind, TaskStatus};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeTaskRepository {
        tasks: Mutex<HashMap<Uuid, Task>>,
    }

    #[async_trait]
    impl TaskRepository for FakeTaskRepository {
        async fn enqueue(&self, task: NewTask) -> PhoenixResult<Task> {
            let id = Uuid::new_v4();
            let created = Task {
                id,
                kind: task.kind,
                action: task.action,
                host_id: task.host_id,
                experiment_id: task.experiment_id,
                deployment_id: task.deployment_id,
                variant: task.variant,
                config: task.config,
                priority: task.priority,
                status: TaskStatus::Pending,
                created_at: Utc::now(),
                assigned_at: None,
                started_at: None,
                completed_at: None,
                retry_count: 0,
                result: None,
                error: None,
            };
            self.tasks.lock().unwrap().insert(id, created.clone());
            Ok(created)
        }

        async fn enqueue_batch(&self, tasks: Vec<NewTask>) -> PhoenixResult<Vec<Task>> {
            let mut out = Vec::new();
            for t in tasks {
                out.push(self.enqueue(t).await?);
            }
            Ok(out)
        }

        async fn try_assign(&self, host_id: &str, now: DateTime<Utc>) -> PhoenixResult<Option<Task>> {
            let mut guard = self.tasks.lock().unwrap();
            let candidate = guard
                .values_mut()
                .filter(|t| t.host_id == host_id && t.status == TaskStatus::Pending)
                .max_by_key(|t| (t.priority, std::cmp::Reverse(t.created_at)));
            if let Some(task) = candidate {
                task.status = TaskStatus::Assigned;
                task.assigned_at = Some(now);
                Ok(Some(task.clone()))
            } else {
                Ok(None)
            }
        }

        async fn report(
            &self,
            task_id: Uuid,
            host_id: &str,
            status: TaskStatus,
            result: Option<serde_json::Value>,
            error: Option<String>,
            _now: DateTime<Utc>,
        ) -> PhoenixResult<Task> {
            let mut guard = self.tasks.lock().unwrap();
            let task = guard
                .get_mut(&task_id)
                .ok_or_else(|| PhoenixError::NotFound("task".into()))?;
            if task.host_id != host_id {
                return Err(PhoenixError::Conflict("not assignee".into()));
            }
            task.status = status;
            task.result = result;
            task.error = error;
            Ok(task.clone())
        }

        async fn cancel(&self, task_id: Uuid) -> PhoenixResult<()> {
            self.tasks.lock().unwrap().remove(&task_id);
            Ok(())
        }

        async fn get(&self, task_id: Uuid) -> PhoenixResult<Option<Task>> {
            Ok(self.tasks.lock().unwrap().get(&task_id).cloned())
        }

        async fn list_for_experiment(&self, experiment_id: Uuid) -> PhoenixResult<Vec<Task>> {
            Ok(self
                .tasks
                .lock()
                .unwrap()
                .values()
                .filter(|t| t.experiment_id == Some(experiment_id))
                .cloned()
                .collect())
        }

        async fn find_timed_out(
            &self,
            _assign_cutoff: DateTime<Utc>,
            _run_cutoff: DateTime<Utc>,
        ) -> PhoenixResult<Vec<Task>> {
            Ok(Vec::new())
        }

        async fn reset_to_pending(&self, task_id: Uuid) -> PhoenixResult<()> {
            if let Some(t) = self.tasks.lock().unwrap().get_mut(&task_id) {
                t.status = TaskStatus::Pending;
            }
            Ok(())
        }

        async fn mark_failed(&self, task_id: Uuid, error: &str) -> PhoenixResult<()> {
            if let Some(t) = self.tasks.lock().unwrap().get_mut(&task_id) {
                t.status = TaskStatus::Failed;
                t.error = Some(error.to_string());
            }
            Ok(())
        }
    }

    fn new_task(host_id: &str) -> NewTask {
        NewTask {
            kind: TaskKind::Collector,
            action: TaskAction::Start,
            host_id: host_id.to_string(),
            experiment_id: None,
            deployment_id: None,
            variant: None,
            config: serde_json::json!({}),
            priority: 0,
        }
    }

    #[tokio::test]
    async fn poll_returns_immediately_when_work_already_pending() {
        let repo = Arc::new(FakeTaskRepository::default());
        let clock = Arc::new(FrozenClock::at(Utc::now()));
        let queue = TaskQueue::new(repo.clone(), clock, Duration::from_secs(5));

        queue.enqueue(new_task("host-1")).await.unwrap();
        let task = queue.poll("host-1", Some(Duration::from_millis(50))).await.unwrap();
        assert!(task.is_some());
    }

    #[tokio::test]
    async fn poll_times_out_with_no_work() {
        let repo = Arc::new(FakeTaskRepository::default());
        let clock = Arc::new(FrozenClock::at(Utc::now()));
        let queue = TaskQueue::new(repo, clock, Duration::from_secs(5));

        let task = queue.poll("host-1", Some(Duration::from_millis(30))).await.unwrap();
        assert!(task.is_none());
    }

    #[tokio::test]
    async fn poll_wakes_up_when_task_enqueued_mid_wait() {
        let repo = Arc::new(FakeTaskRepository::default());
        let clock = Arc::new(FrozenClock::at(Utc::now()));
        let queue = Arc::new(TaskQueue::new(repo, clock, Duration::from_secs(5)));

        let poller = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.poll("host-1", Some(Duration::from_secs(2))).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.enqueue(new_task("host-1")).await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), poller)
            .await
            .expect("poller should wake promptly")
            .unwrap()
            .unwrap();
        assert!(result.is_some());
    }
}
