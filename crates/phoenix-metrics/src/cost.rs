/// Default USD cost per million ingested data points; overridable via config
/// for deployments with a different vendor pricing tier.
pub const DEFAULT_RATE_PER_MILLION: f64 = 1.0;
const MINUTES_PER_30_DAYS: f64 = 30.0 * 24.0 * 60.0;

/// `cost_per_minute = cardinality * rate_per_million / (30 * 24 * 60)`, per spec §4.6.
pub fn cost_per_minute(cardinality: i64, rate_per_million: f64) -> f64 {
    (cardinality as f64) * rate_per_million / MINUTES_PER_30_DAYS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_scales_linearly_with_cardinality() {
        let low = cost_per_minute(1_000_000, DEFAULT_RATE_PER_MILLION);
        let high = cost_per_minute(2_000_000, DEFAULT_RATE_PER_MILLION);
        assert!((high - 2.0 * low).abs() < 1e-9);
    }
}
