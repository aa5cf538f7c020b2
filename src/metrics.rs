//! Prometheus metrics registry (spec.md §6).
//!
//! Grounded on the teacher's `rest_api` surface pattern of an
//! `axum`-served `/metrics` endpoint, generalized to use `prometheus-client`
//! (the crate the pack's metrics-carrying repos standardize on) instead of
//! hand-rolled text formatting.

#![cfg(feature = "metrics")]

use once_cell::sync::Lazy;
use prometheus_client::encoding::{EncodeLabelSet, text::encode};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;
use std::sync::Mutex;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ClusterOutcomeLabels {
    pub cluster: String,
    pub success: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ScaleActionLabels {
    pub role: String,
    pub direction: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReconcileErrorLabels {
    pub kind: String,
}

pub struct Metrics {
    pub upgrade_duration_seconds: Family<ClusterOutcomeLabels, Histogram>,
    pub scale_actions_total: Family<ScaleActionLabels, Counter>,
    pub split_brain_detections_total: Counter,
    pub reconcile_errors_total: Family<ReconcileErrorLabels, Counter>,
    pub cache_memory_bytes: Gauge,
}

impl Metrics {
    fn new(registry: &mut Registry) -> Self {
        let upgrade_duration_seconds = Family::<ClusterOutcomeLabels, Histogram>::new_with_constructor(|| {
            Histogram::new([5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0].into_iter())
        });
        let scale_actions_total = Family::<ScaleActionLabels, Counter>::default();
        let split_brain_detections_total = Counter::default();
        let reconcile_errors_total = Family::<ReconcileErrorLabels, Counter>::default();
        let cache_memory_bytes = Gauge::default();

        registry.register(
            "graphdb_operator_upgrade_duration_seconds",
            "Rolling-upgrade wall-clock duration",
            upgrade_duration_seconds.clone(),
        );
        registry.register(
            "graphdb_operator_scale_actions_total",
            "Autoscaler actions taken",
            scale_actions_total.clone(),
        );
        registry.register(
            "graphdb_operator_split_brain_detections_total",
            "Split-brain conditions detected",
            split_brain_detections_total.clone(),
        );
        registry.register(
            "graphdb_operator_reconcile_errors_total",
            "Reconcile errors by CR kind",
            reconcile_errors_total.clone(),
        );
        registry.register(
            "graphdb_operator_cache_memory_bytes",
            "Estimated in-process cache memory usage",
            cache_memory_bytes.clone(),
        );

        Self {
            upgrade_duration_seconds,
            scale_actions_total,
            split_brain_detections_total,
            reconcile_errors_total,
            cache_memory_bytes,
        }
    }
}

static REGISTRY: Lazy<Mutex<Registry>> = Lazy::new(|| Mutex::new(Registry::default()));
pub static METRICS: Lazy<Metrics> = Lazy::new(|| Metrics::new(&mut REGISTRY.lock().unwrap()));

/// Render the registry in Prometheus text-exposition format for `/metrics`.
pub fn render() -> String {
    Lazy::force(&METRICS);
    let registry = REGISTRY.lock().unwrap();
    let mut buf = String::new();
    encode(&mut buf, &registry).expect("prometheus encoding is infallible for in-memory buffers");
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendered_output_includes_registered_metric_names() {
        METRICS.split_brain_detections_total.inc();
        let rendered = render();
        assert!(rendered.contains("graphdb_operator_split_brain_detections_total"));
    }
}
