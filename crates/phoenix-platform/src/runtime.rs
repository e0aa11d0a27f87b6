use std::sync::Arc;

use anyhow::Result;
use sqlx::PgPool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::config::PlatformConfig;
use crate::context::AppContext;
use crate::service::ServiceRegistration;
use crate::telemetry::telemetry_service;

/// Builds the set of services to run, then hands off to `PlatformRuntime`
/// which owns their lifecycle and drains them on shutdown.
pub struct Platform {
    config: PlatformConfig,
    db: PgPool,
    clock: Arc<dyn Clock>,
    services: Vec<ServiceRegistration>,
}

impl Platform {
    pub fn new(config: PlatformConfig, db: PgPool) -> Self {
        let mut services = Vec::new();
        services.push(telemetry_service(config.observability.clone()));

        Self {
            config,
            db,
            clock: Arc::new(SystemClock),
            services,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn register_service(&mut self, service: ServiceRegistration) {
        self.services.push(service);
    }

    pub fn context_preview(&self, token: CancellationToken) -> AppContext {
        AppContext::new(self.config.clone(), self.db.clone(), self.clock.clone(), token)
    }

    pub async fn start(self) -> Result<PlatformRuntime> {
        initialize_logging(&self.config);

        let root_token = CancellationToken::new();
        let context = AppContext::new(
            self.config.clone(),
            self.db.clone(),
            self.clock.clone(),
            root_token.child_token(),
        );

        let mut tasks = Vec::new();
        for service in self.services {
            let handle = service.spawn(context.clone(), root_token.child_token());
            tasks.push((service.name().to_string(), handle));
        }

        info!("platform boot completed");

        Ok(PlatformRuntime {
            context,
            cancel_token: root_token,
            tasks,
        })
    }
}

pub struct PlatformRuntime {
    context: AppContext,
    cancel_token: CancellationToken,
    tasks: Vec<(String, JoinHandle<Result<()>>)>,
}

impl PlatformRuntime {
    pub fn context(&self) -> AppContext {
        self.context.clone()
    }

    /// Cancels every service's token and waits for all of them to drain,
    /// matching spec §5's 30s shutdown grace window (enforced by callers
    /// wrapping this in a timeout).
    pub async fn shutdown(self) -> Result<()> {
        self.cancel_token.cancel();

        for (name, handle) in self.tasks {
            match handle.await {
                Ok(Ok(())) => info!(service = %name, "service shutdown cleanly"),
                Ok(Err(err)) => return Err(err),
                Err(err) => return Err(err.into()),
            }
        }

        Ok(())
    }
}

fn initialize_logging(config: &PlatformConfig) {
    let filter = &config.observability.log_level;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter.as_str())
        .try_init();
}
