//! HTTP/WebSocket surface (C8, spec §4.8): the axum router wiring the agent
//! protocol (C3), the user v2 CRUD surface, the WebSocket event fan-out
//! (C7), rate limiting (§4.8) and token auth (§4.9) middleware, and the
//! static OpenAPI document.
//!
//! `AppState` is the handler-facing counterpart to `phoenix_platform::AppContext`:
//! where `AppContext` carries the raw DB pool and config for workers, `AppState`
//! carries the already-assembled domain services (`TaskQueue`, `EventHub`,
//! `ExperimentEngine`, ...) that handlers call into directly.

pub mod error;
pub mod middleware;
pub mod routes;

use phoenix_auth::TokenVerifier;
use phoenix_db::AgentRepository;
use phoenix_deployments::DeploymentService;
use phoenix_events::EventHub;
use phoenix_experiments::ExperimentEngine;
use phoenix_metrics::MetricService;
use phoenix_platform::{Clock, PlatformConfig};
use phoenix_queue::TaskQueue;
use std::sync::Arc;

use middleware::RateLimiter;

struct Inner {
    config: PlatformConfig,
    clock: Arc<dyn Clock>,
    events: Arc<EventHub>,
    queue: Arc<TaskQueue>,
    auth: Arc<TokenVerifier>,
    agents: Arc<dyn AgentRepository>,
    metrics: Arc<MetricService>,
    deployments: Arc<DeploymentService>,
    experiments: Arc<ExperimentEngine>,
    rate_limit_user: RateLimiter,
    rate_limit_agent: RateLimiter,
}

#[derive(Clone)]
pub struct AppState(Arc<Inner>);

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: PlatformConfig,
        clock: Arc<dyn Clock>,
        events: Arc<EventHub>,
        queue: Arc<TaskQueue>,
        auth: Arc<TokenVerifier>,
        agents: Arc<dyn AgentRepository>,
        metrics: Arc<MetricService>,
        deployments: Arc<DeploymentService>,
        experiments: Arc<ExperimentEngine>,
    ) -> Self {
        let rate_limit_user = RateLimiter::new(config.rate_limit_user, std::time::Duration::from_secs(60));
        let rate_limit_agent = RateLimiter::new(config.rate_limit_agent, std::time::Duration::from_secs(60));
        Self(Arc::new(Inner {
            config,
            clock,
            events,
            queue,
            auth,
            agents,
            metrics,
            deployments,
            experiments,
            rate_limit_user,
            rate_limit_agent,
        }))
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.0.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.0.clock
    }

    pub fn events(&self) -> &Arc<EventHub> {
        &self.0.events
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.0.queue
    }

    pub fn auth(&self) -> &Arc<TokenVerifier> {
        &self.0.auth
    }

    pub fn agents(&self) -> &Arc<dyn AgentRepository> {
        &self.0.agents
    }

    pub fn metrics(&self) -> &Arc<MetricService> {
        &self.0.metrics
    }

    pub fn deployments(&self) -> &Arc<DeploymentService> {
        &self.0.deployments
    }

    pub fn experiments(&self) -> &Arc<ExperimentEngine> {
        &self.0.experiments
    }

    pub fn rate_limit_user(&self) -> &RateLimiter {
        &self.0.rate_limit_user
    }

    pub fn rate_limit_agent(&self) -> &RateLimiter {
        &self.0.rate_limit_agent
    }
}

pub fn build_router(state: AppState) -> axum::Router {
    routes::router(state)
}
