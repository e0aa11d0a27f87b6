pub mod agent;
pub mod agents;
pub mod auth;
pub mod deployments;
pub mod experiments;
pub mod health;
pub mod metrics;
pub mod openapi;
pub mod ws;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::middleware::request_id_middleware;
use crate::AppState;

pub fn router(state: AppState) -> Router {
    let v1 = Router::new()
        .route("/tasks", get(agent::poll_tasks))
        .route("/tasks/:id/status", post(agent::report_task_status))
        .route("/heartbeat", post(agent::heartbeat))
        .route("/metrics", post(agent::ingest_metrics))
        .route("/logs", post(agent::ingest_logs));

    let v2 = Router::new()
        .route("/logout", post(auth::logout))
        .route(
            "/experiments",
            get(experiments::list).post(experiments::create),
        )
        .route(
            "/experiments/:id",
            get(experiments::get).delete(experiments::delete),
        )
        .route("/experiments/:id/overlap", post(experiments::check_overlap))
        .route("/experiments/:id/start", post(experiments::start))
        .route("/experiments/:id/stop", post(experiments::stop))
        .route("/experiments/:id/rollback", post(experiments::rollback))
        .route("/experiments/:id/promote", post(experiments::promote))
        .route("/experiments/:id/kpis", get(experiments::kpis))
        .route(
            "/deployments",
            get(deployments::list).post(deployments::create),
        )
        .route("/deployments/:id", get(deployments::get))
        .route("/deployments/:id/deploy", post(deployments::deploy))
        .route("/deployments/:id/rollback", post(deployments::rollback))
        .route("/deployments/:id/versions", get(deployments::list_versions))
        .route("/deployments/:id/config", get(deployments::get_config))
        .route("/agents", get(agents::list))
        .route("/agents/:host_id", get(agents::get))
        .route("/cost-flows", get(metrics::top_cost_flows))
        .route("/openapi.json", get(openapi::document));

    Router::new()
        .route("/health", get(health::health))
        .route("/ws", get(ws::upgrade))
        .nest("/api/v1", v1)
        .nest("/api/v2", v2)
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
