//! Background service loops (C10, spec §4.8/§9): the scanners and GC sweeps
//! that keep derived state honest without a request driving them. Each
//! function here builds one [`phoenix_platform::ServiceRegistration`], the
//! same shape the telemetry service uses -- a named `tokio::spawn` loop that
//! selects between its tick interval and the shutdown token.
//!
//! None of these own a repository; each tick opens its own `Pg*Repository`
//! against `ctx.db()` so the worker has no state beyond the pool and the
//! handles passed in at registration time.

use phoenix_db::{PgAgentRepository, PgTaskRepository, PgTokenRepository};
use phoenix_events::EventHub;
use phoenix_experiments::ExperimentEngine;
use phoenix_metrics::MetricService;
use phoenix_platform::ServiceRegistration;
use phoenix_queue::TaskQueue;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Runs `tick` on `interval`, stopping cleanly when `token` is cancelled.
/// The tick runs once immediately before the first wait, matching a scanner
/// that shouldn't sit idle for a full period after process start.
async fn run_loop<F, Fut>(name: &'static str, interval: Duration, token: CancellationToken, mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<()>>,
{
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                info!(service = name, "shutting down");
                return;
            }
            _ = ticker.tick() => {
                if let Err(err) = tick().await {
                    error!(service = name, error = %err, "tick failed");
                }
            }
        }
    }
}

/// Marks agents offline after `offline_threshold` without a heartbeat (spec
/// §4.1, default 90s) and emits `agent.disconnected` for each. Ticks every 15s.
pub fn heartbeat_scanner_service(offline_threshold: Duration, events: Arc<EventHub>) -> ServiceRegistration {
    ServiceRegistration::new(
        "heartbeat-scanner",
        Arc::new(move |ctx, token| {
            let events = events.clone();
            tokio::spawn(async move {
                let repo = PgAgentRepository::new(ctx.db().clone());
                run_loop("heartbeat-scanner", Duration::from_secs(15), token, || {
                    let repo = &repo;
                    let events = &events;
                    let clock = ctx.clock();
                    async move {
                        let now = clock.now();
                        let threshold = now - chrono::Duration::from_std(offline_threshold)?;
                        let gone_offline = repo.mark_stale_offline(threshold).await?;
                        for host_id in gone_offline {
                            warn!(host_id = %host_id, "agent marked offline");
                            events.publish(
                                phoenix_types::EventKind::AgentDisconnected { host_id },
                                now,
                            );
                        }
                        Ok(())
                    }
                })
                .await;
                Ok(())
            })
        }),
    )
}

/// Resets/fails tasks stuck past `assign_timeout`/`run_timeout` (spec §4.2)
/// and wakes the host's long-poller so a reset task is picked up immediately.
/// Ticks every 10s.
pub fn task_timeout_scanner_service(
    assign_timeout: Duration,
    run_timeout: Duration,
    max_retries: i32,
    queue: Arc<TaskQueue>,
) -> ServiceRegistration {
    ServiceRegistration::new(
        "task-timeout-scanner",
        Arc::new(move |ctx, token| {
            let queue = queue.clone();
            tokio::spawn(async move {
                let repo = PgTaskRepository::new(ctx.db().clone(), max_retries);
                run_loop("task-timeout-scanner", Duration::from_secs(10), token, || {
                    let repo = &repo;
                    let queue = &queue;
                    let clock = ctx.clock();
                    async move {
                        let now = clock.now();
                        let assign_cutoff = now - chrono::Duration::from_std(assign_timeout)?;
                        let run_cutoff = now - chrono::Duration::from_std(run_timeout)?;
                        let timed_out = repo.find_timed_out(assign_cutoff, run_cutoff).await?;
                        for task in timed_out {
                            warn!(task_id = %task.id, host_id = %task.host_id, "task timed out");
                            repo.reset_to_pending(task.id).await?;
                            queue.wake(&task.host_id).await;
                        }
                        Ok(())
                    }
                })
                .await;
                Ok(())
            })
        }),
    )
}

/// Drives `MetricService::run_aggregation_pass` every 60s (spec §4.6).
pub fn metric_aggregator_service(metrics: Arc<MetricService>) -> ServiceRegistration {
    ServiceRegistration::new(
        "metric-aggregator",
        Arc::new(move |ctx, token| {
            let metrics = metrics.clone();
            tokio::spawn(async move {
                run_loop("metric-aggregator", Duration::from_secs(60), token, || {
                    let metrics = &metrics;
                    let clock = ctx.clock();
                    async move {
                        let written = metrics.run_aggregation_pass(clock.now()).await?;
                        if written > 0 {
                            info!(windows_written = written, "aggregation pass complete");
                        }
                        Ok(())
                    }
                })
                .await;
                Ok(())
            })
        }),
    )
}

/// Purges expired `token_blacklist` rows every 5 minutes.
pub fn token_gc_service() -> ServiceRegistration {
    ServiceRegistration::new(
        "token-gc",
        Arc::new(move |ctx, token| {
            tokio::spawn(async move {
                let repo = PgTokenRepository::new(ctx.db().clone());
                run_loop("token-gc", Duration::from_secs(5 * 60), token, || {
                    let repo = &repo;
                    let clock = ctx.clock();
                    async move {
                        let purged = repo.purge_expired(clock.now()).await?;
                        if purged > 0 {
                            info!(purged, "token blacklist gc");
                        }
                        Ok(())
                    }
                })
                .await;
                Ok(())
            })
        }),
    )
}

/// Runs `MetricService::run_retention_gc` hourly, using `retention_days` for
/// the raw-sample cutoff (spec §4.6; aggregate/batch cutoffs are fixed).
pub fn retention_gc_service(retention_days: i64, metrics: Arc<MetricService>) -> ServiceRegistration {
    ServiceRegistration::new(
        "retention-gc",
        Arc::new(move |ctx, token| {
            let metrics = metrics.clone();
            tokio::spawn(async move {
                run_loop("retention-gc", Duration::from_secs(60 * 60), token, || {
                    let metrics = &metrics;
                    let clock = ctx.clock();
                    async move {
                        let purged = metrics.run_retention_gc(clock.now(), retention_days).await?;
                        if purged > 0 {
                            info!(purged, "retention gc");
                        }
                        Ok(())
                    }
                })
                .await;
                Ok(())
            })
        }),
    )
}

/// Periodic half of the reconciler (spec §9): sweeps every active experiment
/// and reconciles it, independent of the phase-change-event trigger that the
/// API layer fires inline after a mutating call. Ticks every 10s so a stuck
/// experiment is never more than one tick away from progressing.
pub fn experiment_reconciler_service(engine: Arc<ExperimentEngine>) -> ServiceRegistration {
    ServiceRegistration::new(
        "experiment-reconciler",
        Arc::new(move |_ctx, token| {
            let engine = engine.clone();
            tokio::spawn(async move {
                run_loop("experiment-reconciler", Duration::from_secs(10), token, || {
                    let engine = &engine;
                    async move {
                        let reconciled = phoenix_experiments::reconcile_all(engine).await?;
                        if reconciled > 0 {
                            info!(reconciled, "reconcile sweep complete");
                        }
                        Ok(())
                    }
                })
                .await;
                Ok(())
            })
        }),
    )
}
