//! Split-brain detector and repair planner (spec.md §4.I).
//!
//! The classification step is a pure function over collected `ClusterView`s
//! so it is directly testable against spec.md §8 S6; the surrounding I/O
//! (listing pods, calling `ListServers`, deleting pods) wraps it.

use std::collections::BTreeSet;

use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, ListParams};
use kube::runtime::events::Recorder;
use kube::Client;
use tracing::warn;

use crate::builders::labels::standard_labels;
use crate::crd::Cluster;
use crate::dbadmin::{ClusterView, DbAdminClient};
use crate::error::Result;
use crate::events;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairAction {
    None,
    Investigate,
    WaitForming,
    RestartPods { orphaned: Vec<String> },
    RestartAll,
}

/// One pod's view, or a recorded failure to obtain one.
pub enum ObservedView {
    Ok(ClusterView),
    Unreachable { observer: String },
}

fn similarity_group(views: &[&ClusterView]) -> Vec<Vec<usize>> {
    let sets: Vec<BTreeSet<String>> = views.iter().map(|v| v.enabled_available_addresses()).collect();
    let mut groups: Vec<Vec<usize>> = Vec::new();

    for (i, set) in sets.iter().enumerate() {
        let mut placed = false;
        for group in groups.iter_mut() {
            let rep = &sets[group[0]];
            let shared = set.intersection(rep).count();
            let half = set.len().max(rep.len()).div_ceil(2);
            if half > 0 && shared >= half {
                group.push(i);
                placed = true;
                break;
            }
        }
        if !placed {
            groups.push(vec![i]);
        }
    }
    groups
}

/// Classify an observation set into a repair action (spec.md §4.I.3,
/// tested against §8 S6).
pub fn classify(topology_size: i32, views: &[ObservedView]) -> RepairAction {
    if topology_size <= 1 {
        return RepairAction::None;
    }

    let ok_views: Vec<&ClusterView> = views
        .iter()
        .filter_map(|v| match v {
            ObservedView::Ok(cv) => Some(cv),
            ObservedView::Unreachable { .. } => None,
        })
        .collect();
    let failed = views.len() - ok_views.len();

    if ok_views.is_empty() {
        return RepairAction::RestartAll;
    }
    if failed > 0 && failed * 2 > views.len() {
        return RepairAction::Investigate;
    }

    let mut groups = similarity_group(&ok_views);
    if groups.len() >= 2 {
        groups.sort_by_key(|g| std::cmp::Reverse(g.len()));
        let orphaned: Vec<String> = groups[1..]
            .iter()
            .flatten()
            .map(|&idx| ok_views[idx].observer.clone())
            .collect();
        return RepairAction::RestartPods { orphaned };
    }

    let unique_available: BTreeSet<String> = ok_views.iter().flat_map(|v| v.enabled_available_addresses()).collect();
    if (unique_available.len() as i32) < topology_size {
        return RepairAction::WaitForming;
    }

    RepairAction::None
}

/// Run detection against the live cluster and return the classification,
/// without executing any repair.
pub async fn detect(client: &Client, cluster: &Cluster, dbadmin_for: &dyn Fn(&str) -> Option<Box<dyn DbAdminClient>>) -> Result<RepairAction> {
    let namespace = cluster.metadata.namespace.clone().unwrap_or_else(|| "default".to_string());
    let pod_api: Api<Pod> = Api::namespaced(client.clone(), &namespace);
    let labels = standard_labels(cluster, None);
    let selector = labels.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(",");
    let pods = pod_api.list(&ListParams::default().labels(&selector)).await?;

    let mut views = Vec::new();
    for pod in &pods.items {
        let name = pod.metadata.name.clone().unwrap_or_default();
        match dbadmin_for(&name) {
            Some(admin) => match admin.list_servers().await {
                Ok(servers) => views.push(ObservedView::Ok(ClusterView { observer: name, servers })),
                Err(e) => {
                    warn!(pod = %name, error = %e, "failed to collect cluster view");
                    views.push(ObservedView::Unreachable { observer: name });
                }
            },
            None => views.push(ObservedView::Unreachable { observer: name }),
        }
    }

    let topology_size = cluster.spec.topology.primaries + cluster.spec.topology.secondaries;
    Ok(classify(topology_size, &views))
}

/// Execute the repair: delete orphaned pods (RestartPods) or every member
/// pod (RestartAll). Every call emits an event and bumps the counter.
pub async fn repair(client: &Client, recorder: &Recorder, cluster: &Cluster, action: &RepairAction) -> Result<()> {
    match action {
        RepairAction::None | RepairAction::Investigate | RepairAction::WaitForming => return Ok(()),
        RepairAction::RestartPods { orphaned } => {
            let namespace = cluster.metadata.namespace.clone().unwrap_or_else(|| "default".to_string());
            let pod_api: Api<Pod> = Api::namespaced(client.clone(), &namespace);
            for name in orphaned {
                if let Err(e) = pod_api.delete(name, &DeleteParams::default()).await {
                    warn!(pod = %name, error = %e, "failed to delete orphaned pod");
                }
            }
            events::warning(recorder, events::reason::SPLIT_BRAIN_DETECTED, format!("restarted orphaned pods: {orphaned:?}")).await?;
        }
        RepairAction::RestartAll => {
            let namespace = cluster.metadata.namespace.clone().unwrap_or_else(|| "default".to_string());
            let pod_api: Api<Pod> = Api::namespaced(client.clone(), &namespace);
            let labels = standard_labels(cluster, None);
            let selector = labels.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(",");
            pod_api.delete_collection(&DeleteParams::default(), &ListParams::default().labels(&selector)).await?;
            events::warning(recorder, events::reason::SPLIT_BRAIN_DETECTED, "restarted all member pods: no reachable cluster view").await?;
        }
    }

    #[cfg(feature = "metrics")]
    crate::metrics::METRICS.split_brain_detections_total.inc();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dbadmin::{ServerHealth, ServerInfo, ServerRole, ServerState};

    fn server(addr: &str) -> ServerInfo {
        ServerInfo {
            address: addr.to_string(),
            role: ServerRole::Primary,
            state: ServerState::Enabled,
            health: ServerHealth::Available,
        }
    }

    fn view(observer: &str, addrs: &[&str]) -> ObservedView {
        ObservedView::Ok(ClusterView {
            observer: observer.to_string(),
            servers: addrs.iter().map(|a| server(a)).collect(),
        })
    }

    #[test]
    fn single_node_never_analyzes() {
        let action = classify(1, &[view("pod-0", &["pod-0"])]);
        assert_eq!(action, RepairAction::None);
    }

    #[test]
    fn no_reachable_view_restarts_all() {
        let action = classify(3, &[ObservedView::Unreachable { observer: "pod-0".into() }]);
        assert_eq!(action, RepairAction::RestartAll);
    }

    #[test]
    fn majority_unreachable_investigates() {
        let views = vec![
            view("pod-0", &["pod-0", "pod-1", "pod-2"]),
            ObservedView::Unreachable { observer: "pod-1".into() },
            ObservedView::Unreachable { observer: "pod-2".into() },
        ];
        assert_eq!(classify(3, &views), RepairAction::Investigate);
    }

    // S6 from spec.md §8: three views, two similar forming a majority, one
    // isolated -> RestartPods with that pod as the orphan.
    #[test]
    fn s6_minority_partition_restarts_orphan() {
        let views = vec![
            view("pod-0", &["pod-0", "pod-1"]),
            view("pod-1", &["pod-0", "pod-1"]),
            view("pod-2", &["pod-2"]),
        ];
        match classify(3, &views) {
            RepairAction::RestartPods { orphaned } => assert_eq!(orphaned, vec!["pod-2".to_string()]),
            other => panic!("expected RestartPods, got {other:?}"),
        }
    }

    #[test]
    fn partial_formation_waits() {
        let views = vec![view("pod-0", &["pod-0", "pod-1"]), view("pod-1", &["pod-0", "pod-1"])];
        assert_eq!(classify(3, &views), RepairAction::WaitForming);
    }

    #[test]
    fn fully_formed_cluster_takes_no_action() {
        let views = vec![
            view("pod-0", &["pod-0", "pod-1", "pod-2"]),
            view("pod-1", &["pod-0", "pod-1", "pod-2"]),
            view("pod-2", &["pod-0", "pod-1", "pod-2"]),
        ];
        assert_eq!(classify(3, &views), RepairAction::None);
    }
}
