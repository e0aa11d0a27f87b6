//! Entrypoint (spec §5/§6): loads config, connects Postgres, assembles the
//! domain services, mounts the HTTP/WebSocket router as one more
//! `ServiceRegistration` alongside the background workers, and runs until
//! `ctrl_c` with a 30s shutdown grace window.

use clap::Parser;
use dotenvy::dotenv;
use phoenix_api::AppState;
use phoenix_auth::TokenVerifier;
use phoenix_db::{
    PgActivePipelineRepository, PgAgentRepository, PgDeploymentRepository,
    PgExperimentEventRepository, PgExperimentRepository, PgTaskRepository, PgTokenRepository,
};
use phoenix_deployments::DeploymentService;
use phoenix_events::EventHub;
use phoenix_experiments::ExperimentEngine;
use phoenix_metrics::MetricService;
use phoenix_platform::{Platform, PlatformConfig};
use phoenix_queue::TaskQueue;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser)]
#[command(author, version, about = "Phoenix control plane server", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Override the listen address from config
    #[arg(short, long)]
    listen: Option<String>,
}

const CONFIG_ERROR: u8 = 1;
const DB_CONNECT_ERROR: u8 = 2;
const INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    let args = Args::parse();

    let mut config = match PlatformConfig::load_from_path(args.config.clone()) {
        Ok(c) => c,
        Err(err) => {
            eprintln!("invalid configuration: {err:#}");
            return ExitCode::from(CONFIG_ERROR);
        }
    };
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }

    let db = match phoenix_db::connect(&config.database_url).await {
        Ok(pool) => pool,
        Err(err) => {
            eprintln!("failed to connect to database: {err:#}");
            return ExitCode::from(DB_CONNECT_ERROR);
        }
    };
    if let Err(err) = phoenix_db::run_migrations(&db).await {
        eprintln!("failed to run migrations: {err:#}");
        return ExitCode::from(DB_CONNECT_ERROR);
    }

    let events = Arc::new(EventHub::new());
    let clock: Arc<dyn phoenix_platform::Clock> = Arc::new(phoenix_platform::SystemClock);

    let tasks: Arc<dyn phoenix_db::TaskRepository> =
        Arc::new(PgTaskRepository::new(db.clone(), config.max_retries as i32));
    let queue = Arc::new(TaskQueue::new(
        tasks,
        clock.clone(),
        Duration::from_secs(config.long_poll_max_seconds),
    ));

    let agents: Arc<dyn phoenix_db::AgentRepository> = Arc::new(PgAgentRepository::new(db.clone()));
    let tokens: Arc<dyn phoenix_db::TokenRepository> = Arc::new(PgTokenRepository::new(db.clone()));
    let auth = Arc::new(TokenVerifier::new(&config.jwt_secret, tokens));

    let metric_repo: Arc<dyn phoenix_db::MetricRepository> = Arc::new(phoenix_db::PgMetricRepository::new(db.clone()));
    let metrics = Arc::new(MetricService::new(metric_repo));

    let deployment_repo: Arc<dyn phoenix_db::DeploymentRepository> =
        Arc::new(PgDeploymentRepository::new(db.clone()));
    let deployments = Arc::new(DeploymentService::new(
        deployment_repo.clone(),
        agents.clone(),
        queue.clone(),
        clock.clone(),
    ));

    let experiment_repo: Arc<dyn phoenix_db::ExperimentRepository> =
        Arc::new(PgExperimentRepository::new(db.clone()));
    let pipelines: Arc<dyn phoenix_db::ActivePipelineRepository> =
        Arc::new(PgActivePipelineRepository::new(db.clone()));
    let event_log: Arc<dyn phoenix_db::ExperimentEventRepository> =
        Arc::new(PgExperimentEventRepository::new(db.clone()));
    let experiments = Arc::new(
        ExperimentEngine::new(
            experiment_repo,
            agents.clone(),
            pipelines,
            deployment_repo,
            queue.clone(),
            metrics.clone(),
            events.clone(),
            event_log,
            clock.clone(),
        )
        .with_min_data_fraction(config.min_data_fraction),
    );

    let state = AppState::new(
        config.clone(),
        clock.clone(),
        events.clone(),
        queue.clone(),
        auth,
        agents.clone(),
        metrics.clone(),
        deployments,
        experiments.clone(),
    );
    let router = phoenix_api::build_router(state);

    let mut platform = Platform::new(config.clone(), db).with_clock(clock);
    platform.register_service(phoenix_workers::heartbeat_scanner_service(
        Duration::from_secs(config.agent_offline_seconds),
        events.clone(),
    ));
    platform.register_service(phoenix_workers::task_timeout_scanner_service(
        Duration::from_secs(config.assign_timeout_seconds),
        Duration::from_secs(config.run_timeout_seconds),
        config.max_retries as i32,
        queue,
    ));
    platform.register_service(phoenix_workers::metric_aggregator_service(metrics.clone()));
    platform.register_service(phoenix_workers::token_gc_service());
    platform.register_service(phoenix_workers::retention_gc_service(
        config.retention_days as i64,
        metrics,
    ));
    platform.register_service(phoenix_workers::experiment_reconciler_service(experiments));
    platform.register_service(http_service(router, config.listen_addr.clone()));

    let runtime = match platform.start().await {
        Ok(rt) => rt,
        Err(err) => {
            error!(error = %err, "platform failed to start");
            return ExitCode::from(CONFIG_ERROR);
        }
    };

    let interrupted = match tokio::signal::ctrl_c().await {
        Ok(()) => true,
        Err(err) => {
            error!(error = %err, "failed to listen for shutdown signal, shutting down anyway");
            false
        }
    };
    info!("shutdown signal received, draining services");

    let grace = Duration::from_secs(config.grace_stop_seconds);
    match tokio::time::timeout(grace, runtime.shutdown()).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!(error = %err, "service exited with error during shutdown"),
        Err(_) => error!("shutdown grace window elapsed before all services drained"),
    }

    if interrupted {
        ExitCode::from(INTERRUPTED)
    } else {
        ExitCode::SUCCESS
    }
}

/// Wraps `axum::serve` as one more `ServiceRegistration` so it shares the
/// runtime's shutdown-token draining instead of being a bare `tokio::spawn`
/// the platform doesn't know about.
fn http_service(router: axum::Router, listen_addr: String) -> phoenix_platform::ServiceRegistration {
    phoenix_platform::ServiceRegistration::new(
        "http-server",
        Arc::new(move |_ctx, token| {
            let router = router.clone();
            let listen_addr = listen_addr.clone();
            tokio::spawn(async move {
                let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
                info!(addr = %listen_addr, "http server listening");
                axum::serve(listener, router)
                    .with_graceful_shutdown(async move { token.cancelled().await })
                    .await?;
                Ok(())
            })
        }),
    )
}
