//! Metrics collector: lists member pods by role label and derives a
//! `NodeMetrics` snapshot per role (spec.md §4.H).

use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::Client;

use crate::builders::labels::standard_labels;
use crate::crd::{Cluster, Role};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Decreasing,
    Stable,
    Increasing,
}

#[derive(Debug, Clone, Copy)]
pub struct MetricSample {
    pub current: f64,
    pub trend: Trend,
}

#[derive(Debug, Clone, Copy)]
pub struct NodeMetrics {
    pub total: i32,
    pub healthy: i32,
    pub cpu: MetricSample,
    pub memory: MetricSample,
}

fn is_healthy(pod: &Pod) -> bool {
    let running = pod
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .map(|p| p == "Running")
        .unwrap_or(false);
    let ready = pod
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| conds.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
        .unwrap_or(false);
    running && ready
}

/// List member pods for a role and compute aggregate health. CPU/memory
/// sampling is sourced from the metrics backend (out of scope per spec.md
/// §1 Non-goals); `cpu_memory` supplies the already-sampled values so this
/// function stays a pure aggregator over live pod state.
pub async fn collect_node_metrics(
    client: &Client,
    cluster: &Cluster,
    role: Role,
    cpu_memory: (MetricSample, MetricSample),
) -> Result<NodeMetrics> {
    let namespace = cluster.metadata.namespace.clone().unwrap_or_else(|| "default".to_string());
    let api: Api<Pod> = Api::namespaced(client.clone(), &namespace);
    let labels = standard_labels(cluster, Some(role));
    let selector = labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",");

    let pods = api.list(&ListParams::default().labels(&selector)).await?;
    let total = pods.items.len() as i32;
    let healthy = pods.items.iter().filter(|p| is_healthy(p)).count() as i32;

    Ok(NodeMetrics {
        total,
        healthy,
        cpu: cpu_memory.0,
        memory: cpu_memory.1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{PodCondition, PodStatus};

    fn pod(phase: &str, ready: bool) -> Pod {
        Pod {
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                conditions: Some(vec![PodCondition {
                    type_: "Ready".to_string(),
                    status: if ready { "True" } else { "False" }.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn healthy_requires_running_and_ready() {
        assert!(is_healthy(&pod("Running", true)));
        assert!(!is_healthy(&pod("Running", false)));
        assert!(!is_healthy(&pod("Pending", true)));
    }
}
