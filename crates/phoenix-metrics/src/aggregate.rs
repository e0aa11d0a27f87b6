use chrono::{DateTime, Utc};
use phoenix_types::AggregatedStats;

/// Nearest-rank percentile over already-sorted values; `None` if `values` is
/// empty. Callers null the result out separately when `count < 20`.
fn percentile(sorted_values: &[f64], p: f64) -> Option<f64> {
    if sorted_values.is_empty() {
        return None;
    }
    let rank = (p * sorted_values.len() as f64).ceil() as usize;
    let index = rank.saturating_sub(1).min(sorted_values.len() - 1);
    Some(sorted_values[index])
}

/// `sorted_values` must already be sorted ascending (the repository layer
/// does this with `ORDER BY value`). Percentiles are reported `null` under a
/// sample count of 20 per spec §4.6; count/sum/min/max are always stored.
pub fn compute_stats(sorted_values: &[f64]) -> AggregatedStats {
    if sorted_values.is_empty() {
        return AggregatedStats::default();
    }

    let count = sorted_values.len() as i64;
    let sum: f64 = sorted_values.iter().sum();
    let min = sorted_values[0];
    let max = sorted_values[sorted_values.len() - 1];
    let avg = sum / sorted_values.len() as f64;

    let enough_for_percentiles = sorted_values.len() >= 20;
    AggregatedStats {
        count,
        sum,
        min,
        max,
        avg,
        p50: enough_for_percentiles.then(|| percentile(sorted_values, 0.50)).flatten(),
        p90: enough_for_percentiles.then(|| percentile(sorted_values, 0.90)).flatten(),
        p95: enough_for_percentiles.then(|| percentile(sorted_values, 0.95)).flatten(),
        p99: enough_for_percentiles.then(|| percentile(sorted_values, 0.99)).flatten(),
    }
}

/// Floors `timestamp` to the start of the period's window containing it.
pub fn window_start(timestamp: DateTime<Utc>, period: phoenix_types::AggPeriod) -> DateTime<Utc> {
    let epoch_seconds = timestamp.timestamp();
    let period_seconds = period.duration().num_seconds();
    let floored = (epoch_seconds / period_seconds) * period_seconds;
    DateTime::from_timestamp(floored, 0).unwrap_or(timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_null_percentiles_below_twenty_samples() {
        let values: Vec<f64> = (0..10).map(|v| v as f64).collect();
        let stats = compute_stats(&values);
        assert_eq!(stats.count, 10);
        assert!(stats.p50.is_none());
        assert_eq!(stats.min, 0.0);
        assert_eq!(stats.max, 9.0);
    }

    #[test]
    fn stats_compute_percentiles_at_twenty_samples() {
        let values: Vec<f64> = (1..=20).map(|v| v as f64).collect();
        let stats = compute_stats(&values);
        assert_eq!(stats.count, 20);
        assert!(stats.p50.is_some());
        assert_eq!(stats.p99, Some(20.0));
    }

    #[test]
    fn window_start_floors_to_period_boundary() {
        let ts = DateTime::parse_from_rfc3339("2026-01-01T00:03:27Z")
            .unwrap()
            .with_timezone(&Utc);
        let start = window_start(ts, phoenix_types::AggPeriod::OneMinute);
        assert_eq!(start.timestamp(), ts.timestamp() - 27);
    }
}
