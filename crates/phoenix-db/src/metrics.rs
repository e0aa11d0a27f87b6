use async_trait::async_trait;
use chrono::{DateTime, Utc};
use phoenix_types::{
    fingerprint, AggPeriod, AggregatedMetric, AggregatedStats, CostFlowEntry, ExperimentKpis,
    MetricSample, MetricType, PhoenixResult,
};
use sqlx::PgPool;
use uuid::Uuid;

#[async_trait]
pub trait MetricRepository: Send + Sync {
    /// Returns `false` without writing anything if `batch_id` was already
    /// seen within the last 24h (spec §4.6 batch dedup).
    async fn ingest_batch(&self, batch_id: &str, samples: &[MetricSample]) -> PhoenixResult<bool>;

    /// Raw samples for `source_id`/`metric_name` in `[window_start, window_end)`,
    /// used by the aggregator to compute percentiles per period.
    async fn samples_in_window(
        &self,
        source_id: &str,
        metric_name: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> PhoenixResult<Vec<f64>>;

    /// Distinct `(source_id, metric_name)` pairs with at least one sample
    /// inside the window, the unit of work the aggregator iterates over.
    async fn distinct_series_in_window(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> PhoenixResult<Vec<(String, String, MetricType)>>;

    /// Distinct label-fingerprint count across `source_ids` for `metric_name`
    /// since `since`; the cardinality half of the KPI calc (spec §4.6).
    async fn distinct_fingerprint_count(
        &self,
        source_ids: &[String],
        metric_name: &str,
        since: DateTime<Utc>,
    ) -> PhoenixResult<i64>;

    /// Mean of the most recent sample per source for a conventionally-named
    /// gauge (`error_rate`, `throughput`) across `source_ids`.
    async fn average_latest_value(
        &self,
        source_ids: &[String],
        metric_name: &str,
        since: DateTime<Utc>,
    ) -> PhoenixResult<Option<f64>>;

    async fn upsert_aggregate(&self, metric: &AggregatedMetric) -> PhoenixResult<()>;
    async fn list_aggregates(
        &self,
        source: &str,
        name: &str,
        period: AggPeriod,
        since: DateTime<Utc>,
    ) -> PhoenixResult<Vec<AggregatedMetric>>;

    async fn upsert_cardinality(
        &self,
        experiment_id: Uuid,
        metric_name: &str,
        kpis: &ExperimentKpis,
        now: DateTime<Utc>,
    ) -> PhoenixResult<()>;
    async fn experiment_kpis(&self, experiment_id: Uuid) -> PhoenixResult<ExperimentKpis>;

    async fn upsert_cost_cache(&self, entry: &CostFlowEntry, now: DateTime<Utc>) -> PhoenixResult<()>;
    async fn top_cost_flows(&self, limit: i64) -> PhoenixResult<Vec<CostFlowEntry>>;

    /// Per-`(metric_name, service, namespace)` distinct-fingerprint counts
    /// over samples seen since `since`; the grouping half of the cost-flow
    /// query. `cost_per_minute` is left at 0 for the caller to fill in using
    /// `rate_per_million`, since that rate is a deployment-level constant.
    async fn cardinality_by_service_namespace(
        &self,
        since: DateTime<Utc>,
    ) -> PhoenixResult<Vec<CostFlowEntry>>;

    /// Deletes raw samples older than `sample_cutoff`, aggregates older than
    /// `aggregate_cutoff`, and seen-batch rows older than `batch_cutoff`
    /// (spec §4.6's three distinct retention windows). Returns rows removed.
    async fn purge_older_than(
        &self,
        sample_cutoff: DateTime<Utc>,
        aggregate_cutoff: DateTime<Utc>,
        batch_cutoff: DateTime<Utc>,
    ) -> PhoenixResult<u64>;
}

pub struct PgMetricRepository {
    pool: PgPool,
}

impl PgMetricRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MetricRepository for PgMetricRepository {
    async fn ingest_batch(&self, batch_id: &str, samples: &[MetricSample]) -> PhoenixResult<bool> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO metric_batches_seen (batch_id) VALUES ($1) ON CONFLICT (batch_id) DO NOTHING",
        )
        .bind(batch_id)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        for sample in samples {
            let fp = fingerprint(&sample.source_id, &sample.metric_name, &sample.labels);
            sqlx::query(
                "INSERT INTO metrics (source_id, metric_name, labels, label_fp, timestamp, value, unit, metric_type)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                 ON CONFLICT (source_id, metric_name, label_fp, timestamp) DO UPDATE SET value = EXCLUDED.value",
            )
            .bind(&sample.source_id)
            .bind(&sample.metric_name)
            .bind(serde_json::to_value(&sample.labels).unwrap())
            .bind(&fp)
            .bind(sample.timestamp)
            .bind(sample.value)
            .bind(&sample.unit)
            .bind(sample.metric_type)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn samples_in_window(
        &self,
        source_id: &str,
        metric_name: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> PhoenixResult<Vec<f64>> {
        let rows: Vec<(f64,)> = sqlx::query_as(
            "SELECT value FROM metrics
             WHERE source_id = $1 AND metric_name = $2 AND timestamp >= $3 AND timestamp < $4
             ORDER BY value",
        )
        .bind(source_id)
        .bind(metric_name)
        .bind(window_start)
        .bind(window_end)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(v,)| v).collect())
    }

    async fn distinct_series_in_window(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> PhoenixResult<Vec<(String, String, MetricType)>> {
        let rows: Vec<(String, String, MetricType)> = sqlx::query_as(
            "SELECT DISTINCT source_id, metric_name, metric_type FROM metrics
             WHERE timestamp >= $1 AND timestamp < $2",
        )
        .bind(window_start)
        .bind(window_end)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn distinct_fingerprint_count(
        &self,
        source_ids: &[String],
        metric_name: &str,
        since: DateTime<Utc>,
    ) -> PhoenixResult<i64> {
        if source_ids.is_empty() {
            return Ok(0);
        }
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(DISTINCT label_fp) FROM metrics
             WHERE source_id = ANY($1) AND metric_name = $2 AND timestamp >= $3",
        )
        .bind(source_ids)
        .bind(metric_name)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn average_latest_value(
        &self,
        source_ids: &[String],
        metric_name: &str,
        since: DateTime<Utc>,
    ) -> PhoenixResult<Option<f64>> {
        if source_ids.is_empty() {
            return Ok(None);
        }
        let row: (Option<f64>,) = sqlx::query_as(
            "SELECT AVG(value) FROM (
                SELECT DISTINCT ON (source_id) value FROM metrics
                WHERE source_id = ANY($1) AND metric_name = $2 AND timestamp >= $3
                ORDER BY source_id, timestamp DESC
             ) latest",
        )
        .bind(source_ids)
        .bind(metric_name)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    async fn upsert_aggregate(&self, metric: &AggregatedMetric) -> PhoenixResult<()> {
        sqlx::query(
            "INSERT INTO metrics_aggregated
                (source, metric_type, name, period, window_start, count, sum, min, max, avg, p50, p90, p95, p99)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
             ON CONFLICT (source, name, period, window_start) DO UPDATE SET
                count = EXCLUDED.count, sum = EXCLUDED.sum, min = EXCLUDED.min, max = EXCLUDED.max,
                avg = EXCLUDED.avg, p50 = EXCLUDED.p50, p90 = EXCLUDED.p90, p95 = EXCLUDED.p95, p99 = EXCLUDED.p99",
        )
        .bind(&metric.source)
        .bind(metric.metric_type)
        .bind(&metric.name)
        .bind(metric.period)
        .bind(metric.window_start)
        .bind(metric.stats.count)
        .bind(metric.stats.sum)
        .bind(metric.stats.min)
        .bind(metric.stats.max)
        .bind(metric.stats.avg)
        .bind(metric.stats.p50)
        .bind(metric.stats.p90)
        .bind(metric.stats.p95)
        .bind(metric.stats.p99)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_aggregates(
        &self,
        source: &str,
        name: &str,
        period: AggPeriod,
        since: DateTime<Utc>,
    ) -> PhoenixResult<Vec<AggregatedMetric>> {
        #[derive(sqlx::FromRow)]
        struct Row {
            source: String,
            metric_type: MetricType,
            name: String,
            period: AggPeriod,
            window_start: DateTime<Utc>,
            count: i64,
            sum: f64,
            min: f64,
            max: f64,
            avg: f64,
            p50: Option<f64>,
            p90: Option<f64>,
            p95: Option<f64>,
            p99: Option<f64>,
        }
        let rows = sqlx::query_as::<_, Row>(
            "SELECT source, metric_type, name, period, window_start, count, sum, min, max, avg, p50, p90, p95, p99
             FROM metrics_aggregated
             WHERE source = $1 AND name = $2 AND period = $3 AND window_start >= $4
             ORDER BY window_start",
        )
        .bind(source)
        .bind(name)
        .bind(period)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| AggregatedMetric {
                source: r.source,
                metric_type: r.metric_type,
                name: r.name,
                period: r.period,
                window_start: r.window_start,
                stats: AggregatedStats {
                    count: r.count,
                    sum: r.sum,
                    min: r.min,
                    max: r.max,
                    avg: r.avg,
                    p50: r.p50,
                    p90: r.p90,
                    p95: r.p95,
                    p99: r.p99,
                },
            })
            .collect())
    }

    async fn upsert_cardinality(
        &self,
        experiment_id: Uuid,
        metric_name: &str,
        kpis: &ExperimentKpis,
        now: DateTime<Utc>,
    ) -> PhoenixResult<()> {
        sqlx::query(
            "INSERT INTO cardinality_analysis
                (experiment_id, metric_name, cardinality_baseline, cardinality_candidate,
                 reduction_ratio, cost_reduction_percent, error_rate_delta, data_loss_percent, computed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (experiment_id, metric_name) DO UPDATE SET
                cardinality_baseline = EXCLUDED.cardinality_baseline,
                cardinality_candidate = EXCLUDED.cardinality_candidate,
                reduction_ratio = EXCLUDED.reduction_ratio,
                cost_reduction_percent = EXCLUDED.cost_reduction_percent,
                error_rate_delta = EXCLUDED.error_rate_delta,
                data_loss_percent = EXCLUDED.data_loss_percent,
                computed_at = EXCLUDED.computed_at",
        )
        .bind(experiment_id)
        .bind(metric_name)
        .bind(kpis.cardinality_baseline)
        .bind(kpis.cardinality_candidate)
        .bind(kpis.reduction_ratio)
        .bind(kpis.cost_reduction_percent)
        .bind(kpis.error_rate_delta)
        .bind(kpis.data_loss_percent)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn experiment_kpis(&self, experiment_id: Uuid) -> PhoenixResult<ExperimentKpis> {
        #[derive(sqlx::FromRow)]
        struct Row {
            cardinality_baseline: i64,
            cardinality_candidate: i64,
            reduction_ratio: f64,
            cost_reduction_percent: f64,
            error_rate_delta: f64,
            data_loss_percent: f64,
        }
        let rows = sqlx::query_as::<_, Row>(
            "SELECT cardinality_baseline, cardinality_candidate, reduction_ratio,
                    cost_reduction_percent, error_rate_delta, data_loss_percent
             FROM cardinality_analysis WHERE experiment_id = $1",
        )
        .bind(experiment_id)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(ExperimentKpis::default());
        }

        let n = rows.len() as f64;
        let mut out = ExperimentKpis::default();
        for r in &rows {
            out.cardinality_baseline += r.cardinality_baseline;
            out.cardinality_candidate += r.cardinality_candidate;
            out.reduction_ratio += r.reduction_ratio / n;
            out.cost_reduction_percent += r.cost_reduction_percent / n;
            out.error_rate_delta += r.error_rate_delta / n;
            out.data_loss_percent += r.data_loss_percent / n;
        }
        Ok(out)
    }

    async fn upsert_cost_cache(&self, entry: &CostFlowEntry, now: DateTime<Utc>) -> PhoenixResult<()> {
        sqlx::query(
            "INSERT INTO metric_cost_cache (metric_name, service, namespace, cardinality, cost_per_minute, computed_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (metric_name, service, namespace) DO UPDATE SET
                cardinality = EXCLUDED.cardinality, cost_per_minute = EXCLUDED.cost_per_minute,
                computed_at = EXCLUDED.computed_at",
        )
        .bind(&entry.metric_name)
        .bind(&entry.service)
        .bind(&entry.namespace)
        .bind(entry.cardinality)
        .bind(entry.cost_per_minute)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn cardinality_by_service_namespace(
        &self,
        since: DateTime<Utc>,
    ) -> PhoenixResult<Vec<CostFlowEntry>> {
        #[derive(sqlx::FromRow)]
        struct Row {
            metric_name: String,
            service: Option<String>,
            namespace: Option<String>,
            cardinality: i64,
        }
        let rows = sqlx::query_as::<_, Row>(
            "SELECT metric_name,
                    labels->>'service' AS service,
                    labels->>'namespace' AS namespace,
                    COUNT(DISTINCT label_fp) AS cardinality
             FROM metrics
             WHERE timestamp >= $1
             GROUP BY metric_name, labels->>'service', labels->>'namespace'",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| CostFlowEntry {
                metric_name: r.metric_name,
                service: r.service,
                namespace: r.namespace,
                cardinality: r.cardinality,
                cost_per_minute: 0.0,
            })
            .collect())
    }

    async fn top_cost_flows(&self, limit: i64) -> PhoenixResult<Vec<CostFlowEntry>> {
        #[derive(sqlx::FromRow)]
        struct Row {
            metric_name: String,
            service: Option<String>,
            namespace: Option<String>,
            cardinality: i64,
            cost_per_minute: f64,
        }
        let rows = sqlx::query_as::<_, Row>(
            "SELECT metric_name, service, namespace, cardinality, cost_per_minute
             FROM metric_cost_cache ORDER BY cost_per_minute DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| CostFlowEntry {
                metric_name: r.metric_name,
                service: r.service,
                namespace: r.namespace,
                cardinality: r.cardinality,
                cost_per_minute: r.cost_per_minute,
            })
            .collect())
    }

    async fn purge_older_than(
        &self,
        sample_cutoff: DateTime<Utc>,
        aggregate_cutoff: DateTime<Utc>,
        batch_cutoff: DateTime<Utc>,
    ) -> PhoenixResult<u64> {
        let samples = sqlx::query("DELETE FROM metrics WHERE timestamp < $1")
            .bind(sample_cutoff)
            .execute(&self.pool)
            .await?;
        let aggregates = sqlx::query("DELETE FROM metrics_aggregated WHERE window_start < $1")
            .bind(aggregate_cutoff)
            .execute(&self.pool)
            .await?;
        let batches = sqlx::query("DELETE FROM metric_batches_seen WHERE received_at < $1")
            .bind(batch_cutoff)
            .execute(&self.pool)
            .await?;
        Ok(samples.rows_affected() + aggregates.rows_affected() + batches.rows_affected())
    }
}
