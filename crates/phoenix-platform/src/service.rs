use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::context::AppContext;

pub type ServiceSpawner =
    Arc<dyn Fn(AppContext, CancellationToken) -> JoinHandle<Result<()>> + Send + Sync + 'static>;

/// A named background service (HTTP listener, WebSocket hub pump, scanner
/// tick loop) that `PlatformRuntime` owns the lifecycle of.
pub struct ServiceRegistration {
    name: String,
    spawner: ServiceSpawner,
}

impl ServiceRegistration {
    pub fn new<N: Into<String>>(name: N, spawner: ServiceSpawner) -> Self {
        Self {
            name: name.into(),
            spawner,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spawn(&self, context: AppContext, token: CancellationToken) -> JoinHandle<Result<()>> {
        (self.spawner)(context, token)
    }
}
