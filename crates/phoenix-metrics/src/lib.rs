//! Metric Store (C6, spec §4.6): batched ingestion with dedup, periodic
//! aggregation into fixed windows, cardinality/cost KPIs per experiment, and
//! a cost-flow rollup. Database access goes through [`phoenix_db::MetricRepository`];
//! this crate holds the arithmetic and scheduling-independent orchestration.

pub mod aggregate;
pub mod cost;
pub mod kpi;

use chrono::{DateTime, Utc};
use phoenix_db::MetricRepository;
use phoenix_types::{AggPeriod, AggregatedMetric, MetricBatch, MetricSample, PhoenixResult};
use std::sync::Arc;
use uuid::Uuid;

pub use kpi::VariantSample;

pub struct MetricService {
    repo: Arc<dyn MetricRepository>,
}

impl MetricService {
    pub fn new(repo: Arc<dyn MetricRepository>) -> Self {
        Self { repo }
    }

    pub async fn ingest(&self, batch: MetricBatch) -> PhoenixResult<bool> {
        self.repo.ingest_batch(&batch.batch_id, &batch.metrics).await
    }

    /// Runs one aggregation pass: for every period and every series with
    /// data in that period's most recently closed window, compute stats and
    /// upsert. Call every 60s from a worker driver.
    pub async fn run_aggregation_pass(&self, now: DateTime<Utc>) -> PhoenixResult<usize> {
        let mut windows_written = 0;
        for period in AggPeriod::all() {
            let current_window_start = aggregate::window_start(now, period);
            let window_start = current_window_start - period.duration();
            let window_end = current_window_start;

            let series = self
                .repo
                .distinct_series_in_window(window_start, window_end)
                .await?;

            for (source, name, metric_type) in series {
                let values = self
                    .repo
                    .samples_in_window(&source, &name, window_start, window_end)
                    .await?;
                if values.is_empty() {
                    continue;
                }
                let stats = aggregate::compute_stats(&values);
                self.repo
                    .upsert_aggregate(&AggregatedMetric {
                        source,
                        metric_type,
                        name,
                        period,
                        window_start,
                        stats,
                    })
                    .await?;
                windows_written += 1;
            }
        }
        Ok(windows_written)
    }

    /// Computes and stores cardinality/error/throughput KPIs for `metric_name`
    /// comparing `baseline_hosts` against `candidate_hosts`, over a 5 minute
    /// lookback window ending at `now`.
    pub async fn refresh_experiment_kpis(
        &self,
        experiment_id: Uuid,
        metric_name: &str,
        baseline_hosts: &[String],
        candidate_hosts: &[String],
        now: DateTime<Utc>,
    ) -> PhoenixResult<phoenix_types::ExperimentKpis> {
        let since = now - chrono::Duration::minutes(5);

        let baseline = self.gather_variant_sample(baseline_hosts, metric_name, since).await?;
        let candidate = self.gather_variant_sample(candidate_hosts, metric_name, since).await?;

        let kpis = kpi::compute_kpis(&baseline, &candidate);
        self.repo
            .upsert_cardinality(experiment_id, metric_name, &kpis, now)
            .await?;
        Ok(kpis)
    }

    async fn gather_variant_sample(
        &self,
        hosts: &[String],
        metric_name: &str,
        since: DateTime<Utc>,
    ) -> PhoenixResult<VariantSample> {
        let cardinality = self
            .repo
            .distinct_fingerprint_count(hosts, metric_name, since)
            .await?;
        let error_rate = self
            .repo
            .average_latest_value(hosts, kpi::ERROR_RATE_METRIC, since)
            .await?;
        let throughput = self
            .repo
            .average_latest_value(hosts, kpi::THROUGHPUT_METRIC, since)
            .await?;
        Ok(VariantSample {
            cardinality,
            error_rate,
            throughput,
        })
    }

    pub async fn experiment_kpis(&self, experiment_id: Uuid) -> PhoenixResult<phoenix_types::ExperimentKpis> {
        self.repo.experiment_kpis(experiment_id).await
    }

    /// Fraction of `baseline_sources ++ candidate_sources` that reported at
    /// least one sample in `[window_start, window_end]`. Used by the
    /// experiment engine's analysis gate (`min_data_fraction`, spec §4.4).
    pub async fn data_fraction(
        &self,
        baseline_sources: &[String],
        candidate_sources: &[String],
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> PhoenixResult<f64> {
        let expected = baseline_sources.len() + candidate_sources.len();
        if expected == 0 {
            return Ok(0.0);
        }
        let mut with_data = 0;
        for source in baseline_sources.iter().chain(candidate_sources.iter()) {
            let samples = self
                .repo
                .samples_in_window(source, kpi::THROUGHPUT_METRIC, window_start, window_end)
                .await?;
            if !samples.is_empty() {
                with_data += 1;
            }
        }
        Ok(with_data as f64 / expected as f64)
    }

    /// Recomputes the cost-flow cache from the last 5 minutes of samples and
    /// returns the top `limit` entries by `cost_per_minute`.
    pub async fn refresh_cost_flows(
        &self,
        rate_per_million: f64,
        now: DateTime<Utc>,
        limit: i64,
    ) -> PhoenixResult<Vec<phoenix_types::CostFlowEntry>> {
        let since = now - chrono::Duration::minutes(5);
        let entries = self.repo.cardinality_by_service_namespace(since).await?;
        for mut entry in entries {
            entry.cost_per_minute = cost::cost_per_minute(entry.cardinality, rate_per_million);
            self.repo.upsert_cost_cache(&entry, now).await?;
        }
        self.repo.top_cost_flows(limit).await
    }

    pub async fn top_cost_flows(&self, limit: i64) -> PhoenixResult<Vec<phoenix_types::CostFlowEntry>> {
        self.repo.top_cost_flows(limit).await
    }

    /// Purges raw samples older than `retention_days`, aggregates older than
    /// 90 days, and batch-dedup rows older than 24h (spec §4.6).
    pub async fn run_retention_gc(&self, now: DateTime<Utc>, retention_days: i64) -> PhoenixResult<u64> {
        let sample_cutoff = now - chrono::Duration::days(retention_days);
        let aggregate_cutoff = now - chrono::Duration::days(90);
        let batch_cutoff = now - chrono::Duration::hours(24);
        self.repo
            .purge_older_than(sample_cutoff, aggregate_cutoff, batch_cutoff)
            .await
    }

    pub fn validate_sample(sample: &MetricSample) -> PhoenixResult<()> {
        if sample.metric_name.trim().is_empty() {
            return Err(phoenix_types::PhoenixError::Validation(
                "metric_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
