//! Discovery identity (ServiceAccount + Role + RoleBinding) and the
//! cert-manager `CertificateRequest` object (spec.md §4.B).
//!
//! The discovery identity lets each member pod list its sibling pods via
//! the Kubernetes API for cluster formation, grounded on the
//! ServiceAccount/RBAC pattern common across the operator examples (e.g.
//! `microscaler-secret-manager-controller`'s `crd/mod.rs` RBAC scaffolding).

use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{PolicyRule, Role as K8sRole, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::{DynamicObject, GroupVersionKind, TypeMeta};

use crate::crd::Cluster;

use super::labels::{discovery_service_account_name, owner_reference, standard_labels};

pub fn build_discovery_service_account(cluster: &Cluster) -> ServiceAccount {
    ServiceAccount {
        metadata: ObjectMeta {
            name: Some(discovery_service_account_name(cluster)),
            namespace: cluster.metadata.namespace.clone(),
            labels: Some(standard_labels(cluster, None)),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn build_discovery_role(cluster: &Cluster) -> K8sRole {
    K8sRole {
        metadata: ObjectMeta {
            name: Some(discovery_service_account_name(cluster)),
            namespace: cluster.metadata.namespace.clone(),
            labels: Some(standard_labels(cluster, None)),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec!["".to_string()]),
            resources: Some(vec!["pods".to_string(), "endpoints".to_string()]),
            verbs: vec!["get".to_string(), "list".to_string(), "watch".to_string()],
            ..Default::default()
        }]),
    }
}

pub fn build_discovery_role_binding(cluster: &Cluster) -> RoleBinding {
    let name = discovery_service_account_name(cluster);
    RoleBinding {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: cluster.metadata.namespace.clone(),
            labels: Some(standard_labels(cluster, None)),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: name.clone(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name,
            namespace: cluster.metadata.namespace.clone(),
            ..Default::default()
        }]),
    }
}

/// `CertificateRequest`-shaped object for cert-manager (an external
/// collaborator per spec.md §6). Represented as a `DynamicObject` since
/// cert-manager's CRDs are not types this crate owns.
pub fn build_certificate_request(cluster: &Cluster, dns_names: &[String]) -> Option<DynamicObject> {
    let issuer_ref = cluster.spec.tls.issuer_ref.as_ref()?;
    let gvk = GroupVersionKind {
        group: "cert-manager.io".to_string(),
        version: "v1".to_string(),
        kind: "Certificate".to_string(),
    };
    let name = super::labels::resource_name(cluster, "cert");
    let mut obj = DynamicObject::new(&name, &kube::discovery::ApiResource::from_gvk(&gvk));
    obj.types = Some(TypeMeta {
        api_version: "cert-manager.io/v1".to_string(),
        kind: "Certificate".to_string(),
    });
    obj.metadata.namespace = cluster.metadata.namespace.clone();
    obj.metadata.labels = Some(standard_labels(cluster, None));
    obj.metadata.owner_references = Some(vec![owner_reference(cluster)]);
    obj.data = serde_json::json!({
        "spec": {
            "secretName": format!("{name}-tls"),
            "dnsNames": dns_names,
            "issuerRef": { "name": issuer_ref, "kind": "ClusterIssuer" },
        }
    });
    Some(obj)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{AuthSpec, ClusterSpec, ImageSpec, TlsMode, TlsSpec, Topology};

    fn cluster(issuer: Option<&str>) -> Cluster {
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
                tls: TlsSpec {
                    mode: if issuer.is_some() {
                        TlsMode::CertManager
                    } else {
                        TlsMode::Disabled
                    },
                    issuer_ref: issuer.map(String::from),
                },
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
    fn role_binding_references_the_role_and_service_account() {
        let c = cluster(None);
        let rb = build_discovery_role_binding(&c);
        assert_eq!(rb.role_ref.name, "analytics-discovery");
        assert_eq!(rb.subjects.unwrap()[0].name, "analytics-discovery");
    }

    #[test]
    fn certificate_request_requires_issuer_ref() {
        assert!(build_certificate_request(&cluster(None), &[]).is_none());
        assert!(build_certificate_request(&cluster(Some("letsencrypt")), &["a".into()]).is_some());
    }
}
