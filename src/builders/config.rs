//! ConfigMap, admin-secret placeholder, and external-secret objects
//! (spec.md §4.B). Grounded on `stellar-k8s`'s `build_config_map`.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::{DynamicObject, GroupVersionKind, TypeMeta};

use crate::crd::{Cluster, TlsMode};

use super::labels::{admin_secret_placeholder_name, config_map_name, owner_reference, standard_labels};
use super::memory::transaction_memory_budget;

/// Build the cluster's internal configuration ConfigMap (dbms settings
/// derived from the spec, mirroring the original's `neo4j.conf`-style key
/// space without depending on the DB's own config parser).
pub fn build_config_map(cluster: &Cluster) -> ConfigMap {
    let labels = standard_labels(cluster, None);
    let mut data = BTreeMap::new();

    data.insert(
        "dbms.cluster.minimum_initial_system_primaries_count".to_string(),
        cluster.spec.topology.primaries.to_string(),
    );
    data.insert(
        "dbms.tls.mode".to_string(),
        match cluster.spec.tls.mode {
            TlsMode::Disabled => "disabled".to_string(),
            TlsMode::CertManager | TlsMode::ExternalSecrets => "required".to_string(),
        },
    );

    if let Some(resources) = &cluster.spec.resources {
        if let Some(limits) = &resources.limits {
            if let Some(mem) = limits.get("memory") {
                if let Ok(budget) = transaction_memory_budget(&mem.0, None, None) {
                    data.insert(
                        "dbms.memory.transaction.total.max".to_string(),
                        budget.total.format(),
                    );
                    data.insert(
                        "dbms.memory.transaction.max".to_string(),
                        budget.per_transaction.format(),
                    );
                }
            }
        }
    }

    ConfigMap {
        metadata: ObjectMeta {
            name: Some(config_map_name(cluster)),
            namespace: cluster.metadata.namespace.clone(),
            labels: Some(labels),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    }
}

/// Placeholder admin-credentials Secret, created only if the CR's
/// `auth.adminSecret` does not already exist (spec.md §3: admin-credential
/// secrets are referenced, never owned — this is a convenience scaffold for
/// first-run bootstrapping, not a replacement for the user-supplied one).
pub fn build_admin_secret_placeholder(cluster: &Cluster, generated_password: &str) -> Secret {
    let labels = standard_labels(cluster, None);
    let mut string_data = BTreeMap::new();
    string_data.insert("username".to_string(), "admin".to_string());
    string_data.insert("password".to_string(), generated_password.to_string());

    Secret {
        metadata: ObjectMeta {
            name: Some(admin_secret_placeholder_name(cluster)),
            namespace: cluster.metadata.namespace.clone(),
            labels: Some(labels),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        string_data: Some(string_data),
        ..Default::default()
    }
}

/// External-secret object (for `tls.mode = external-secrets` or an
/// `auth.provider` backed by an external store). Represented as a
/// `DynamicObject` since the `external-secrets.io` CRD is an external
/// collaborator (spec.md §6) this crate does not own types for.
pub fn build_external_secret(
    cluster: &Cluster,
    name: &str,
    secret_store_ref: &str,
    remote_key: &str,
) -> DynamicObject {
    let labels = standard_labels(cluster, None);
    let gvk = GroupVersionKind {
        group: "external-secrets.io".to_string(),
        version: "v1beta1".to_string(),
        kind: "ExternalSecret".to_string(),
    };
    let mut obj = DynamicObject::new(name, &kube::discovery::ApiResource::from_gvk(&gvk));
    obj.types = Some(TypeMeta {
        api_version: "external-secrets.io/v1beta1".to_string(),
        kind: "ExternalSecret".to_string(),
    });
    obj.metadata.namespace = cluster.metadata.namespace.clone();
    obj.metadata.labels = Some(labels);
    obj.metadata.owner_references = Some(vec![owner_reference(cluster)]);
    obj.data = serde_json::json!({
        "spec": {
            "secretStoreRef": { "name": secret_store_ref, "kind": "SecretStore" },
            "target": { "name": name },
            "data": [{ "secretKey": "password", "remoteRef": { "key": remote_key } }],
        }
    });
    obj
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{AuthSpec, ClusterSpec, ImageSpec, Topology};

    fn cluster() -> Cluster {
        Cluster::new(
            "analytics",
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
                    admin_secret: "a".into(),
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
    fn config_map_reflects_primary_count() {
        let cm = build_config_map(&cluster());
        assert_eq!(
            cm.data.unwrap().get("dbms.cluster.minimum_initial_system_primaries_count"),
            Some(&"3".to_string())
        );
    }

    #[test]
    fn external_secret_targets_the_right_store() {
        let obj = build_external_secret(&cluster(), "analytics-admin", "vault", "db/admin");
        assert_eq!(obj.data["spec"]["secretStoreRef"]["name"], "vault");
    }
}
