//! `ClusterCR` — the desired state of one graph-DB cluster (spec.md §3).

use k8s_openapi::api::core::v1::{
    Affinity, NodeSelectorRequirement, ResourceRequirements as K8sResourceRequirements, Toleration,
};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::types::{
    AuthSpec, AutoScalingSpec, Condition, ImageSpec, IngressSpec, MultiClusterSpec, PluginRef,
    QueryMonitoringSpec, StorageSpec, TlsSpec, Topology, UpgradeStrategySpec,
};

/// Declarative specification of a graph-DB cluster.
#[derive(CustomResource, Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "graphdb.io",
    version = "v1",
    kind = "Cluster",
    plural = "clusters",
    namespaced,
    status = "ClusterStatus",
    shortname = "gdbc",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    pub image: ImageSpec,
    pub topology: Topology,
    #[serde(default)]
    pub storage: Option<StorageSpec>,
    #[serde(default)]
    pub tls: TlsSpec,
    pub auth: AuthSpec,
    #[serde(default)]
    pub auto_scaling: Option<AutoScalingSpec>,
    #[serde(default)]
    pub multi_cluster: Option<MultiClusterSpec>,
    #[serde(default)]
    pub plugins: Vec<PluginRef>,
    #[serde(default)]
    pub query_monitoring: Option<QueryMonitoringSpec>,
    #[serde(default)]
    pub ingress: Option<IngressSpec>,
    #[serde(default)]
    pub upgrade_strategy: Option<UpgradeStrategySpec>,
    #[serde(default)]
    pub resources: Option<K8sResourceRequirements>,
    #[serde(default)]
    pub node_selector: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub tolerations: Option<Vec<Toleration>>,
    #[serde(default)]
    pub affinity: Option<Affinity>,
    #[serde(default)]
    pub suspended: bool,
    /// Set only on the per-remote secondary copy `multicluster::build_remote_cluster_copy`
    /// generates; carries the primary's Bolt endpoint so `builders::workload::build_env`
    /// can point the remote read replicas at it.
    #[serde(default)]
    pub primary_bolt_endpoint: Option<String>,
}

// Re-export so validators/builders can match on selector requirements
// without importing k8s_openapi directly everywhere.
pub type NodeSelectorTerm = NodeSelectorRequirement;

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    #[serde(default)]
    pub phase: String,
    #[serde(default)]
    pub observed_generation: Option<i64>,
    #[serde(default)]
    pub ready_primaries: i32,
    #[serde(default)]
    pub ready_secondaries: i32,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub upgrade: Option<super::upgrade_status::UpgradeStatus>,
    #[serde(default)]
    pub message: Option<String>,
    /// The spec last run through `validate::validate_cluster_update`, so the
    /// next reconcile pass has an "old" spec to diff against without
    /// depending on a client-side last-applied-configuration annotation.
    #[serde(default)]
    pub last_applied_spec: Option<ClusterSpec>,
}

impl ClusterSpec {
    pub fn image_reference(&self) -> String {
        self.image.full_reference()
    }

    pub fn has_secondaries(&self) -> bool {
        self.topology.secondaries > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::types::{AuthProvider, PullPolicy};

    fn sample_spec() -> ClusterSpec {
        ClusterSpec {
            image: ImageSpec {
                repo: "graphdb/core".into(),
                tag: "5.26.0".into(),
                pull_policy: PullPolicy::IfNotPresent,
            },
            topology: Topology {
                primaries: 3,
                secondaries: 2,
            },
            storage: Some(StorageSpec {
                class: "standard".into(),
                size: "100Gi".into(),
                retention: Default::default(),
            }),
            tls: Default::default(),
            auth: AuthSpec {
                provider: AuthProvider::Native,
                admin_secret: "admin-secret".into(),
            },
            auto_scaling: None,
            multi_cluster: None,
            plugins: vec![],
            query_monitoring: None,
            ingress: None,
            upgrade_strategy: None,
            resources: None,
            node_selector: None,
            tolerations: None,
            affinity: None,
            suspended: false,
            primary_bolt_endpoint: None,
        }
    }

    #[test]
    fn image_reference_joins_repo_and_tag() {
        assert_eq!(sample_spec().image_reference(), "graphdb/core:5.26.0");
    }

    #[test]
    fn has_secondaries_reflects_topology() {
        assert!(sample_spec().has_secondaries());
    }
}
