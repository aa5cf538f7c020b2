//! Headless/client services and the standalone ingress (spec.md §4.B).
//!
//! Grounded on `stellar-k8s`'s `build_service`, generalized to the two
//! services every cluster needs (a headless service for StatefulSet DNS
//! identity, a client-facing service for bolt/http traffic) plus an
//! optional ingress.

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule, IngressServiceBackend,
    IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::crd::{Cluster, Role};

use super::labels::{client_service_name, headless_service_name, owner_reference, standard_labels};
use super::workload::{BOLT_PORT, DISCOVERY_PORT, HTTP_PORT, RAFT_PORT};

fn member_ports() -> Vec<ServicePort> {
    vec![
        ServicePort {
            name: Some("bolt".to_string()),
            port: BOLT_PORT,
            ..Default::default()
        },
        ServicePort {
            name: Some("http".to_string()),
            port: HTTP_PORT,
            ..Default::default()
        },
        ServicePort {
            name: Some("discovery".to_string()),
            port: DISCOVERY_PORT,
            ..Default::default()
        },
        ServicePort {
            name: Some("raft".to_string()),
            port: RAFT_PORT,
            ..Default::default()
        },
    ]
}

/// Headless service backing the primaries' StatefulSet DNS identity. Only
/// primaries get stable per-pod DNS; secondaries are addressed through the
/// client service's load-balanced selector.
pub fn build_headless_service(cluster: &Cluster) -> Service {
    let labels = standard_labels(cluster, Some(Role::Primary));
    Service {
        metadata: ObjectMeta {
            name: Some(headless_service_name(cluster)),
            namespace: cluster.metadata.namespace.clone(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            selector: Some(labels),
            ports: Some(member_ports()),
            publish_not_ready_addresses: Some(true),
            ..Default::default()
        }),
        status: None,
    }
}

/// Client-facing service load-balancing across all members regardless of
/// role (drivers route reads/writes based on bolt routing metadata).
pub fn build_client_service(cluster: &Cluster) -> Service {
    let labels = standard_labels(cluster, None);
    Service {
        metadata: ObjectMeta {
            name: Some(client_service_name(cluster)),
            namespace: cluster.metadata.namespace.clone(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(labels),
            ports: Some(member_ports()),
            ..Default::default()
        }),
        status: None,
    }
}

/// Standalone ingress fronting the client service's http port, built only
/// when the cluster is not part of a multi-cluster deployment (spec.md §4.B
/// names this "standalone only").
pub fn build_ingress(cluster: &Cluster, host: &str, ingress_class: &str) -> Ingress {
    let labels = standard_labels(cluster, None);
    let service_name = client_service_name(cluster);

    Ingress {
        metadata: ObjectMeta {
            name: Some(super::labels::resource_name(cluster, "ingress")),
            namespace: cluster.metadata.namespace.clone(),
            labels: Some(labels),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            ingress_class_name: Some(ingress_class.to_string()),
            rules: Some(vec![IngressRule {
                host: Some(host.to_string()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some("/".to_string()),
                        path_type: "Prefix".to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: service_name,
                                port: Some(ServiceBackendPort {
                                    number: Some(HTTP_PORT),
                                    ..Default::default()
                                }),
                            }),
                            ..Default::default()
                        },
                    }],
                }),
            }]),
            ..Default::default()
        }),
        status: None,
    }
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
                    secondaries: 1,
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
    fn headless_service_has_no_cluster_ip() {
        let svc = build_headless_service(&cluster());
        assert_eq!(svc.spec.unwrap().cluster_ip.as_deref(), Some("None"));
    }

    #[test]
    fn client_service_selects_all_roles() {
        let svc = build_client_service(&cluster());
        let selector = svc.spec.unwrap().selector.unwrap();
        assert!(!selector.contains_key("role"));
    }
}
