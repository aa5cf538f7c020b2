//! Autoscaler: metrics collector, scale-decision engine, and apply step
//! (spec.md §4.H). Grounded on the teacher's label-selector pod-listing
//! idiom (`controller/reconciler.rs`'s `Api::namespaced(...).list(...)`)
//! for the collector, and kept as pure, table-tested functions for the
//! decision engine so the quorum/odd-replica/zone-skew invariants (spec.md
//! §8 S1-S3) are directly testable without a live cluster.

mod apply;
mod collector;
mod decision;

pub use apply::apply_scale_decision;
pub use collector::{collect_node_metrics, MetricSample, NodeMetrics, Trend};
pub use decision::{
    check_quorum_protection, decide_scale, ensure_odd_replicas, rebalance_zones, ScaleAction,
    ScaleDecision,
};

use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Per-role scale-down rate limiter (spec.md §4.H "rate-limit scale-down
/// events"). One instance guards both roles via the map key.
pub struct RateLimiter {
    last_scale_down: Mutex<std::collections::HashMap<String, Instant>>,
    window: Duration,
}

impl RateLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            last_scale_down: Mutex::new(std::collections::HashMap::new()),
            window,
        }
    }

    pub fn default_window() -> Self {
        Self::new(Duration::from_secs(5 * 60))
    }

    /// Returns true if a scale-down for `role_key` is allowed right now,
    /// and if so records it as having just happened.
    pub async fn allow_scale_down(&self, role_key: &str) -> bool {
        let mut map = self.last_scale_down.lock().await;
        let now = Instant::now();
        match map.get(role_key) {
            Some(last) if now.duration_since(*last) < self.window => false,
            _ => {
                map.insert(role_key.to_string(), now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rate_limiter_blocks_within_window_and_allows_after() {
        let limiter = RateLimiter::new(Duration::from_millis(50));
        assert!(limiter.allow_scale_down("primary").await);
        assert!(!limiter.allow_scale_down("primary").await);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(limiter.allow_scale_down("primary").await);
    }
}
