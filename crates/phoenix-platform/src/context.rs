use std::sync::Arc;

use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::config::PlatformConfig;

/// Explicit, injected application context — carries the DB pool, a handle
/// back to whatever publishes events, the clock, and config. Replaces the
/// implicit global singletons (`lazy_static!` logger registries, ambient
/// `localStorage`-style auth state) that the upstream pattern reaches for;
/// every handler and worker receives this instead of reaching for statics.
#[derive(Clone)]
pub struct AppContext {
    shared: Arc<SharedState>,
    shutdown: CancellationToken,
}

struct SharedState {
    config: PlatformConfig,
    db: PgPool,
    clock: Arc<dyn Clock>,
}

impl AppContext {
    pub fn new(
        config: PlatformConfig,
        db: PgPool,
        clock: Arc<dyn Clock>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            shared: Arc::new(SharedState { config, db, clock }),
            shutdown,
        }
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.shared.config
    }

    pub fn db(&self) -> &PgPool {
        &self.shared.db
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.shared.clock)
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}
