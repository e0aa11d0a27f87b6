use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "metric_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "agg_period", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AggPeriod {
    #[sqlx(rename = "1m")]
    #[serde(rename = "1m")]
    OneMinute,
    #[sqlx(rename = "5m")]
    #[serde(rename = "5m")]
    FiveMinutes,
    #[sqlx(rename = "1h")]
    #[serde(rename = "1h")]
    OneHour,
    #[sqlx(rename = "1d")]
    #[serde(rename = "1d")]
    OneDay,
}

impl AggPeriod {
    pub fn duration(self) -> chrono::Duration {
        match self {
            AggPeriod::OneMinute => chrono::Duration::minutes(1),
            AggPeriod::FiveMinutes => chrono::Duration::minutes(5),
            AggPeriod::OneHour => chrono::Duration::hours(1),
            AggPeriod::OneDay => chrono::Duration::days(1),
        }
    }

    pub fn all() -> [AggPeriod; 4] {
        [
            AggPeriod::OneMinute,
            AggPeriod::FiveMinutes,
            AggPeriod::OneHour,
            AggPeriod::OneDay,
        ]
    }
}

/// Labels are compared by value; `fingerprint` gives a stable string key for
/// cardinality counting and upsert matching.
pub type Labels = BTreeMap<String, String>;

pub fn fingerprint(source_id: &str, metric_name: &str, labels: &Labels) -> String {
    let mut out = format!("{source_id}|{metric_name}|");
    for (k, v) in labels {
        out.push_str(k);
        out.push('=');
        out.push_str(v);
        out.push(';');
    }
    out
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSample {
    pub source_id: String,
    pub metric_name: String,
    pub labels: Labels,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub unit: Option<String>,
    pub metric_type: MetricType,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricBatch {
    pub batch_id: String,
    pub metrics: Vec<MetricSample>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct AggregatedStats {
    pub count: i64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub p50: Option<f64>,
    pub p90: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregatedMetric {
    pub source: String,
    pub metric_type: MetricType,
    pub name: String,
    pub period: AggPeriod,
    pub window_start: DateTime<Utc>,
    pub stats: AggregatedStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct CostFlowEntry {
    pub metric_name: String,
    pub service: Option<String>,
    pub namespace: Option<String>,
    pub cardinality: i64,
    pub cost_per_minute: f64,
}
