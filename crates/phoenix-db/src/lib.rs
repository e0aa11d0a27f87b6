//! Transactional Postgres persistence for every table in spec §6's persisted
//! state layout. Each component is given a narrow repository trait; the
//! Postgres implementation lives alongside it. All state-changing operations
//! happen inside a single transaction per request, per spec §4.1.

pub mod active_pipelines;
pub mod agents;
pub mod deployments;
pub mod events;
pub mod experiments;
pub mod metrics;
pub mod tasks;
pub mod tokens;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub use active_pipelines::{ActivePipelineRepository, PgActivePipelineRepository};
pub use agents::{AgentRepository, PgAgentRepository};
pub use deployments::{DeploymentRepository, PgDeploymentRepository};
pub use events::{ExperimentEventRepository, PgExperimentEventRepository};
pub use experiments::{ExperimentRepository, PgExperimentRepository};
pub use metrics::{MetricRepository, PgMetricRepository};
pub use tasks::{PgTaskRepository, TaskRepository};
pub use tokens::{PgTokenRepository, TokenRepository};

pub async fn connect(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
