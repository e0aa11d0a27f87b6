use phoenix_types::ExperimentKpis;

/// `error_rate` and `throughput` gauges are read by convention from
/// whatever the agent reports under those exact metric names; the KPI
/// engine does not interpret arbitrary metric families.
pub const ERROR_RATE_METRIC: &str = "error_rate";
pub const THROUGHPUT_METRIC: &str = "throughput";

pub struct VariantSample {
    pub cardinality: i64,
    pub error_rate: Option<f64>,
    pub throughput: Option<f64>,
}

/// Pure computation from spec §4.6's KPI formulas, isolated from the
/// database so it can be unit tested without a pool.
pub fn compute_kpis(baseline: &VariantSample, candidate: &VariantSample) -> ExperimentKpis {
    let reduction_ratio = if baseline.cardinality > 0 {
        1.0 - (candidate.cardinality as f64 / baseline.cardinality as f64)
    } else {
        0.0
    };

    let error_rate_delta = match (baseline.error_rate, candidate.error_rate) {
        (Some(b), Some(c)) => c - b,
        _ => 0.0,
    };

    let data_loss_percent = match (baseline.throughput, candidate.throughput) {
        (Some(b), Some(c)) if b > 0.0 => (1.0 - (c / b)).max(0.0) * 100.0,
        _ => 0.0,
    };

    ExperimentKpis {
        cardinality_baseline: baseline.cardinality,
        cardinality_candidate: candidate.cardinality,
        reduction_ratio,
        cost_reduction_percent: reduction_ratio * 100.0,
        error_rate_delta,
        data_loss_percent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reduction_ratio_reflects_cardinality_drop() {
        let baseline = VariantSample {
            cardinality: 1000,
            error_rate: Some(0.01),
            throughput: Some(500.0),
        };
        let candidate = VariantSample {
            cardinality: 400,
            error_rate: Some(0.012),
            throughput: Some(480.0),
        };
        let kpis = compute_kpis(&baseline, &candidate);
        assert!((kpis.reduction_ratio - 0.6).abs() < 1e-9);
        assert!((kpis.cost_reduction_percent - 60.0).abs() < 1e-9);
        assert!((kpis.error_rate_delta - 0.002).abs() < 1e-9);
        assert!(kpis.data_loss_percent > 0.0);
    }

    #[test]
    fn zero_baseline_cardinality_avoids_division_by_zero() {
        let baseline = VariantSample {
            cardinality: 0,
            error_rate: None,
            throughput: None,
        };
        let candidate = VariantSample {
            cardinality: 10,
            error_rate: None,
            throughput: None,
        };
        let kpis = compute_kpis(&baseline, &candidate);
        assert_eq!(kpis.reduction_ratio, 0.0);
        assert_eq!(kpis.data_loss_percent, 0.0);
    }
}
