use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ObservabilitySettings;
use crate::service::ServiceRegistration;

/// Spawns the `/metrics` Prometheus exposition endpoint as its own service,
/// backed by the `metrics` facade instead of a hand-rolled text body.
pub fn telemetry_service(settings: ObservabilitySettings) -> ServiceRegistration {
    ServiceRegistration::new(
        "telemetry",
        Arc::new(move |_ctx, token: CancellationToken| {
            let settings = settings.clone();
            tokio::spawn(async move {
                if !settings.enable_metrics {
                    return Ok(());
                }

                let addr: SocketAddr = ([0, 0, 0, 0], settings.metrics_port).into();
                let builder = PrometheusBuilder::new().with_http_listener(addr);
                builder
                    .install()
                    .map_err(|err| anyhow::anyhow!("failed to install prometheus exporter: {err}"))?;

                info!(port = settings.metrics_port, "telemetry server started");
                token.cancelled().await;
                info!("shutting down telemetry server");
                Ok(())
            })
        }),
    )
}
