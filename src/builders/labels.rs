//! Name/label schema and ownership helpers shared by every builder
//! (spec.md §4.B). Grounded on `stellar-k8s`'s `resources.rs`
//! (`standard_labels`/`owner_reference`/`resource_name`), generalized from a
//! single node-type label set to the cluster's role-based one.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};

use crate::crd::{Cluster, Role};

pub const MANAGED_BY: &str = "operator";
pub const APP_NAME: &str = "db";

/// Labels applied to every object this operator manages.
pub fn standard_labels(cluster: &Cluster, role: Option<Role>) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("name".to_string(), APP_NAME.to_string());
    labels.insert("instance".to_string(), cluster.name_any());
    labels.insert("managed-by".to_string(), MANAGED_BY.to_string());
    labels.insert("cluster".to_string(), cluster.name_any());
    if let Some(role) = role {
        labels.insert("role".to_string(), role.to_string());
    }
    labels
}

/// True when an arbitrary object's labels carry the operator's managed-by
/// marker; used by the cache manager (`cache`) to filter native-object
/// watches (spec.md §4.D).
pub fn is_managed(labels: &BTreeMap<String, String>) -> bool {
    labels.get("managed-by").map(|v| v == MANAGED_BY).unwrap_or(false)
}

pub fn owner_reference(cluster: &Cluster) -> OwnerReference {
    OwnerReference {
        api_version: Cluster::api_version(&()).to_string(),
        kind: Cluster::kind(&()).to_string(),
        name: cluster.name_any(),
        uid: cluster.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// `<cluster>-<suffix>` object name, per spec.md §4.B's schema.
pub fn resource_name(cluster: &Cluster, suffix: &str) -> String {
    format!("{}-{}", cluster.name_any(), suffix)
}

pub fn workload_name(cluster: &Cluster, role: Role) -> String {
    resource_name(cluster, &role.to_string())
}

pub fn headless_service_name(cluster: &Cluster) -> String {
    resource_name(cluster, "headless")
}

pub fn client_service_name(cluster: &Cluster) -> String {
    resource_name(cluster, "client")
}

pub fn config_map_name(cluster: &Cluster) -> String {
    resource_name(cluster, "internals")
}

pub fn admin_secret_placeholder_name(cluster: &Cluster) -> String {
    resource_name(cluster, "admin-secret")
}

pub fn discovery_service_account_name(cluster: &Cluster) -> String {
    resource_name(cluster, "discovery")
}

pub fn plugin_object_name(cluster: &Cluster, plugin: &str) -> String {
    format!("{}-{}", cluster.name_any(), plugin)
}

pub fn backup_job_name(backup_name: &str) -> String {
    format!("{backup_name}-backup")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{AuthSpec, ClusterSpec, ImageSpec, Topology};
    use kube::api::ObjectMeta;

    fn cluster(name: &str) -> Cluster {
        Cluster::new(
            name,
            ClusterSpec {
                image: ImageSpec {
                    repo: "graphdb/core".into(),
                    tag: "5.26.0".into(),
                    pull_policy: Default::default(),
                },
                topology: Topology {
                    primaries: 3,
                    secondaries: 0,
                },
                storage: None,
                tls: Default::default(),
                auth: AuthSpec {
                    provider: Default::default(),
                    admin_secret: "s".into(),
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
            },
        )
    }

    #[test]
    fn names_follow_cluster_suffix_schema() {
        let c = cluster("analytics");
        assert_eq!(workload_name(&c, Role::Primary), "analytics-primary");
        assert_eq!(workload_name(&c, Role::Secondary), "analytics-secondary");
        assert_eq!(headless_service_name(&c), "analytics-headless");
        assert_eq!(client_service_name(&c), "analytics-client");
        assert_eq!(config_map_name(&c), "analytics-internals");
        assert_eq!(discovery_service_account_name(&c), "analytics-discovery");
        assert_eq!(plugin_object_name(&c, "apoc"), "analytics-apoc");
        assert_eq!(backup_job_name("nightly"), "nightly-backup");
    }

    #[test]
    fn standard_labels_include_required_keys() {
        let c = cluster("analytics");
        let labels = standard_labels(&c, Some(Role::Primary));
        assert_eq!(labels.get("name").unwrap(), APP_NAME);
        assert_eq!(labels.get("instance").unwrap(), "analytics");
        assert_eq!(labels.get("managed-by").unwrap(), MANAGED_BY);
        assert_eq!(labels.get("cluster").unwrap(), "analytics");
        assert_eq!(labels.get("role").unwrap(), "primary");
        assert!(is_managed(&labels));
    }

    #[test]
    fn unmanaged_labels_are_filtered() {
        let mut labels = BTreeMap::new();
        labels.insert("foo".to_string(), "bar".to_string());
        assert!(!is_managed(&labels));
    }

    // ObjectMeta import used only to keep kube's ResourceExt path exercised
    // in tests without constructing a full metadata block elsewhere.
    #[allow(dead_code)]
    fn _unused(_m: ObjectMeta) {}
}
