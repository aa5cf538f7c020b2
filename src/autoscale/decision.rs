//! Scale-decision engine: per-role weighted metric scoring, odd-replica
//! enforcement, quorum protection, and zone-aware secondary distribution
//! (spec.md §4.H, tested against §8 S1-S3/S6-invariant-6).

use std::collections::BTreeMap;

use crate::crd::{MetricSpec, MetricType, QuorumProtection, ZoneAwareness};
use crate::error::{Error, Result};

use super::collector::{NodeMetrics, Trend};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleAction {
    ScaleUp,
    ScaleDown,
    None,
}

#[derive(Debug, Clone)]
pub struct ScaleDecision {
    pub action: ScaleAction,
    pub target_replicas: i32,
    pub reason: String,
}

/// Score a single metric entry: positive score means "scale up", negative
/// means "scale down", magnitude scaled by the entry's configured weight.
fn score_metric(metric: &MetricSpec, current: f64, trend: Trend) -> (f64, String) {
    let deviation = (current - metric.target) / metric.target.max(1.0);
    let trend_bias = match trend {
        Trend::Increasing => 0.1,
        Trend::Decreasing => -0.1,
        Trend::Stable => 0.0,
    };
    let score = (deviation + trend_bias) * metric.weight;
    let label = match metric.metric_type {
        MetricType::Cpu => "cpu",
        MetricType::Memory => "memory",
    };
    let reason = format!(
        "{label}: current={current:.1} target={target:.1} trend={trend:?} score={score:.3}",
        target = metric.target
    );
    (score, reason)
}

const SCALE_UP_THRESHOLD: f64 = 0.15;
const SCALE_DOWN_THRESHOLD: f64 = -0.15;

/// Raise an even candidate to the next odd value within `[min, max]`; at
/// the max boundary snap down one step instead to preserve oddness
/// (spec.md §8 S1).
pub fn ensure_odd_replicas(candidate: i32, min: i32, max: i32) -> i32 {
    let clamped = candidate.clamp(min, max);
    if clamped % 2 != 0 {
        return clamped;
    }
    if clamped >= max {
        clamped - 1
    } else {
        clamped + 1
    }
}

/// Decide a scale action for one role given its current replica count,
/// metric entries, and measured values (ordered to match `metrics`).
/// `min`/`max` bound the result; `enforce_odd` is set for primaries.
pub fn decide_scale(
    current_replicas: i32,
    metrics: &[MetricSpec],
    measurements: &[(f64, Trend)],
    min: i32,
    max: i32,
    enforce_odd: bool,
) -> ScaleDecision {
    let mut total_score = 0.0;
    let mut reasons = Vec::new();
    for (metric, (value, trend)) in metrics.iter().zip(measurements.iter()) {
        let (score, reason) = score_metric(metric, *value, *trend);
        total_score += score;
        reasons.push(reason);
    }

    let (action, delta): (ScaleAction, i32) = if total_score >= SCALE_UP_THRESHOLD {
        (ScaleAction::ScaleUp, 1)
    } else if total_score <= SCALE_DOWN_THRESHOLD {
        (ScaleAction::ScaleDown, -1)
    } else {
        (ScaleAction::None, 0)
    };

    let mut target = (current_replicas + delta).clamp(min, max);
    if enforce_odd && target >= 3 {
        target = ensure_odd_replicas(target, min.max(3), max);
    }
    if target == current_replicas {
        return ScaleDecision {
            action: ScaleAction::None,
            target_replicas: current_replicas,
            reason: format!("no action (score={total_score:.3}); {}", reasons.join(", ")),
        };
    }

    ScaleDecision {
        action,
        target_replicas: target,
        reason: reasons.join(", "),
    }
}

/// Quorum protection veto (spec.md §4.H, tested against §8 S2): reject a
/// primary scale-down that would drop healthy primaries below the
/// configured floor.
pub fn check_quorum_protection(
    protection: &QuorumProtection,
    metrics: &NodeMetrics,
    proposed_total: i32,
) -> Result<()> {
    if protection.min_healthy_primaries <= 0 {
        return Ok(());
    }
    let healthy_after_scale = metrics.healthy.min(proposed_total);
    if healthy_after_scale < protection.min_healthy_primaries {
        return Err(Error::PolicyViolation(format!(
            "scale to {proposed_total} would leave {healthy_after_scale} healthy primaries, below minHealthyPrimaries={}",
            protection.min_healthy_primaries
        )));
    }
    Ok(())
}

/// Redistribute secondaries across zones honoring `minReplicasPerZone` and
/// `maxZoneSkew`, summing to `target` (spec.md §8 S3). Deterministic:
/// always adds/removes from the zone currently furthest from the mean.
pub fn rebalance_zones(
    current: &BTreeMap<String, i32>,
    target: i32,
    awareness: &ZoneAwareness,
) -> BTreeMap<String, i32> {
    let zones: Vec<String> = current.keys().cloned().collect();
    if zones.is_empty() {
        return BTreeMap::new();
    }

    let mut counts: BTreeMap<String, i32> = zones
        .iter()
        .map(|z| (z.clone(), awareness.min_replicas_per_zone.max(0)))
        .collect();

    let mut remaining = target - counts.values().sum::<i32>();

    while remaining > 0 {
        let zone = counts
            .iter()
            .min_by_key(|(_, count)| **count)
            .map(|(z, _)| z.clone())
            .expect("zones is non-empty");
        *counts.get_mut(&zone).unwrap() += 1;
        remaining -= 1;
    }
    while remaining < 0 {
        let zone = counts
            .iter()
            .filter(|(_, count)| **count > awareness.min_replicas_per_zone.max(0))
            .max_by_key(|(_, count)| **count)
            .map(|(z, _)| z.clone());
        let Some(zone) = zone else { break };
        *counts.get_mut(&zone).unwrap() -= 1;
        remaining += 1;
    }

    if awareness.max_zone_skew > 0 {
        loop {
            let max = *counts.values().max().unwrap();
            let min = *counts.values().min().unwrap();
            if max - min <= awareness.max_zone_skew {
                break;
            }
            let high_zone = counts.iter().max_by_key(|(_, c)| **c).map(|(z, _)| z.clone()).unwrap();
            let low_zone = counts.iter().min_by_key(|(_, c)| **c).map(|(z, _)| z.clone()).unwrap();
            if high_zone == low_zone {
                break;
            }
            *counts.get_mut(&high_zone).unwrap() -= 1;
            *counts.get_mut(&low_zone).unwrap() += 1;
        }
    }

    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    // S1 from spec.md §8.
    #[test]
    fn s1_ensure_odd_replicas() {
        assert_eq!(ensure_odd_replicas(4, 1, 7), 5);
        assert_eq!(ensure_odd_replicas(6, 1, 7), 7);
        assert_eq!(ensure_odd_replicas(2, 1, 7), 3);
    }

    #[test]
    fn ensure_odd_snaps_down_at_max_when_max_is_even() {
        assert_eq!(ensure_odd_replicas(8, 1, 8), 7);
    }

    // S2 from spec.md §8.
    #[test]
    fn s2_quorum_protection() {
        let protection = QuorumProtection { min_healthy_primaries: 2 };
        let healthy_metrics = NodeMetrics {
            total: 3,
            healthy: 3,
            cpu: super::super::collector::MetricSample { current: 10.0, trend: Trend::Stable },
            memory: super::super::collector::MetricSample { current: 10.0, trend: Trend::Stable },
        };
        assert!(check_quorum_protection(&protection, &healthy_metrics, 3).is_ok());

        let degraded_metrics = NodeMetrics { healthy: 1, ..healthy_metrics };
        assert!(check_quorum_protection(&protection, &degraded_metrics, 3).is_err());
    }

    // S3 from spec.md §8.
    #[test]
    fn s3_zone_target_distribution() {
        let mut current = BTreeMap::new();
        current.insert("a".to_string(), 2);
        current.insert("b".to_string(), 1);
        current.insert("c".to_string(), 0);
        let awareness = ZoneAwareness {
            min_replicas_per_zone: 1,
            max_zone_skew: 2,
        };
        let result = rebalance_zones(&current, 6, &awareness);
        assert_eq!(result.values().sum::<i32>(), 6);
        assert!(result.values().all(|&c| c >= 1));
        let max = *result.values().max().unwrap();
        let min = *result.values().min().unwrap();
        assert!(max - min <= 2);
    }

    #[test]
    fn scale_up_triggered_by_high_cpu() {
        let metrics = vec![MetricSpec {
            metric_type: MetricType::Cpu,
            target: 50.0,
            weight: 1.0,
        }];
        let decision = decide_scale(3, &metrics, &[(90.0, Trend::Increasing)], 1, 7, true);
        assert_eq!(decision.action, ScaleAction::ScaleUp);
        assert!(decision.target_replicas % 2 != 0);
    }

    #[test]
    fn scale_down_triggered_by_low_utilization() {
        let metrics = vec![MetricSpec {
            metric_type: MetricType::Memory,
            target: 50.0,
            weight: 1.0,
        }];
        let decision = decide_scale(3, &metrics, &[(5.0, Trend::Decreasing)], 1, 7, false);
        assert_eq!(decision.action, ScaleAction::ScaleDown);
        assert_eq!(decision.target_replicas, 2);
    }

    #[test]
    fn within_band_takes_no_action() {
        let metrics = vec![MetricSpec {
            metric_type: MetricType::Cpu,
            target: 50.0,
            weight: 1.0,
        }];
        let decision = decide_scale(3, &metrics, &[(52.0, Trend::Stable)], 1, 7, false);
        assert_eq!(decision.action, ScaleAction::None);
        assert_eq!(decision.target_replicas, 3);
    }
}
