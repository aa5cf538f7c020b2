//! Target resolution and member-pod selection (spec.md §4.K steps 1/3).

use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::Client;

use crate::builders::labels::standard_labels;
use crate::crd::{BackupTarget, Cluster, TargetKind};
use crate::error::{Error, Result};

/// Resolve the `ClusterCR` a `BackupTarget` points at. `Database` targets
/// resolve through their owning cluster (spec.md §3: `DatabaseCR` carries a
/// `clusterRef`); only the `Cluster` variant is handled directly here, since
/// database-scoped backups still run against the cluster's member pods.
pub async fn resolve_target_cluster(client: &Client, target: &BackupTarget, default_namespace: &str) -> Result<Cluster> {
    let namespace = target.namespace.as_deref().unwrap_or(default_namespace);
    let cluster_name = match target.kind {
        TargetKind::Cluster => target.name.clone(),
        TargetKind::Database => {
            let db_api: Api<crate::crd::Database> = Api::namespaced(client.clone(), namespace);
            let db = db_api.get(&target.name).await?;
            db.spec.cluster_ref.clone()
        }
    };

    let api: Api<Cluster> = Api::namespaced(client.clone(), namespace);
    api.get(&cluster_name)
        .await
        .map_err(|_| Error::NotFound(format!("target cluster '{cluster_name}' not found in namespace '{namespace}'")))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodCandidate {
    pub name: String,
    pub is_secondary: bool,
}

/// Prefer a secondary member; fall back to any primary (spec.md §4.K.3).
/// Deterministic among equally-eligible candidates: lowest pod name wins,
/// matching the ordinal-ascending StatefulSet naming.
pub fn select_backup_pod(candidates: &[PodCandidate]) -> Option<String> {
    let mut secondaries: Vec<&PodCandidate> = candidates.iter().filter(|c| c.is_secondary).collect();
    secondaries.sort_by(|a, b| a.name.cmp(&b.name));
    if let Some(chosen) = secondaries.first() {
        return Some(chosen.name.clone());
    }

    let mut primaries: Vec<&PodCandidate> = candidates.iter().filter(|c| !c.is_secondary).collect();
    primaries.sort_by(|a, b| a.name.cmp(&b.name));
    primaries.first().map(|c| c.name.clone())
}

/// List member pods for a cluster and classify each by its role label.
pub async fn list_pod_candidates(client: &Client, cluster: &Cluster) -> Result<Vec<PodCandidate>> {
    let namespace = cluster.metadata.namespace.clone().unwrap_or_else(|| "default".to_string());
    let api: Api<Pod> = Api::namespaced(client.clone(), &namespace);
    let labels = standard_labels(cluster, None);
    let selector = labels.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(",");
    let pods = api.list(&ListParams::default().labels(&selector)).await?;

    Ok(pods
        .items
        .iter()
        .filter_map(|p| {
            let name = p.metadata.name.clone()?;
            let is_secondary = p
                .metadata
                .labels
                .as_ref()
                .and_then(|l| l.get("role"))
                .map(|r| r == "secondary")
                .unwrap_or(false);
            Some(PodCandidate { name, is_secondary })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &str, is_secondary: bool) -> PodCandidate {
        PodCandidate {
            name: name.to_string(),
            is_secondary,
        }
    }

    #[test]
    fn prefers_secondary_when_present() {
        let candidates = vec![candidate("analytics-primary-0", false), candidate("analytics-secondary-1", true), candidate("analytics-secondary-0", true)];
        assert_eq!(select_backup_pod(&candidates), Some("analytics-secondary-0".to_string()));
    }

    #[test]
    fn falls_back_to_primary_with_no_secondaries() {
        let candidates = vec![candidate("analytics-primary-1", false), candidate("analytics-primary-0", false)];
        assert_eq!(select_backup_pod(&candidates), Some("analytics-primary-0".to_string()));
    }

    #[test]
    fn empty_candidate_list_yields_none() {
        assert_eq!(select_backup_pod(&[]), None);
    }
}
