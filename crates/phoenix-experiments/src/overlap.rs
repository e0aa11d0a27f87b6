//! Overlap detection (spec §4.4 step 1, scenario S6).
//!
//! The distilled spec keys overlap on `(host, metric-namespace)`, but no
//! metric-namespace concept survived into [`phoenix_types::Experiment`] --
//! pipelines choose what they emit, the control plane doesn't catalog it
//! ahead of time. This conservatively keys on host overlap alone instead,
//! which is a superset of the namespace-scoped check: two experiments that
//! share a host are always flagged, even if their pipelines happen to emit
//! disjoint metrics. Recorded as an open decision in `DESIGN.md`.

use phoenix_types::{Experiment, OverlapReport, OverlapSeverity};
use std::collections::HashSet;
use uuid::Uuid;

pub fn check_overlap(
    candidate_id: Uuid,
    candidate_hosts: &[String],
    active_experiments: &[Experiment],
) -> OverlapReport {
    let candidate_set: HashSet<&str> = candidate_hosts.iter().map(String::as_str).collect();
    let mut conflicting_exp_ids = Vec::new();
    let mut max_overlap_fraction = 0.0_f64;

    for other in active_experiments {
        if other.id == candidate_id || other.resolved_hosts.is_empty() {
            continue;
        }
        let overlap_count = other
            .resolved_hosts
            .iter()
            .filter(|h| candidate_set.contains(h.as_str()))
            .count();
        if overlap_count == 0 {
            continue;
        }
        conflicting_exp_ids.push(other.id);
        let fraction = overlap_count as f64 / candidate_set.len().max(1) as f64;
        max_overlap_fraction = max_overlap_fraction.max(fraction);
    }

    let has_overlap = !conflicting_exp_ids.is_empty();
    let severity = if !has_overlap {
        OverlapSeverity::None
    } else if max_overlap_fraction >= 0.5 {
        OverlapSeverity::High
    } else {
        OverlapSeverity::Low
    };

    OverlapReport {
        has_overlap,
        conflicting_exp_ids,
        severity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use phoenix_types::{CollectorType, Phase};
    use std::collections::HashMap;

    fn experiment(id: Uuid, hosts: &[&str]) -> Experiment {
        Experiment {
            id,
            name: format!("exp-{id}"),
            description: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            baseline_pipeline: "otel-baseline".to_string(),
            candidate_pipeline: "otel-candidate".to_string(),
            target_hosts: Vec::new(),
            duration_seconds: 3600,
            collector_type: CollectorType::Otel,
            phase: Phase::Running,
            config: serde_json::json!({}),
            metadata: HashMap::new(),
            priority: 5,
            resolved_hosts: hosts.iter().map(|h| h.to_string()).collect(),
            started_at: Some(Utc::now()),
            ended_at: None,
        }
    }

    #[test]
    fn no_overlap_when_host_sets_disjoint() {
        let other = experiment(Uuid::new_v4(), &["host-a", "host-b"]);
        let report = check_overlap(Uuid::new_v4(), &["host-c".to_string()], &[other]);
        assert!(!report.has_overlap);
        assert_eq!(report.severity, OverlapSeverity::None);
    }

    #[test]
    fn majority_host_overlap_is_high_severity() {
        let other_id = Uuid::new_v4();
        let other = experiment(other_id, &["host-a", "host-b"]);
        let candidate_hosts = vec!["host-a".to_string(), "host-b".to_string()];
        let report = check_overlap(Uuid::new_v4(), &candidate_hosts, &[other]);
        assert!(report.has_overlap);
        assert_eq!(report.severity, OverlapSeverity::High);
        assert_eq!(report.conflicting_exp_ids, vec![other_id]);
    }

    #[test]
    fn minority_host_overlap_is_low_severity() {
        let other = experiment(Uuid::new_v4(), &["host-a"]);
        let candidate_hosts = vec!["host-a".to_string(), "host-b".to_string(), "host-c".to_string(), "host-d".to_string()];
        let report = check_overlap(Uuid::new_v4(), &candidate_hosts, &[other]);
        assert!(report.has_overlap);
        assert_eq!(report.severity, OverlapSeverity::Low);
    }

    #[test]
    fn self_is_excluded_from_conflict_set() {
        let id = Uuid::new_v4();
        let me = experiment(id, &["host-a"]);
        let report = check_overlap(id, &["host-a".to_string()], &[me]);
        assert!(!report.has_overlap);
    }
}
