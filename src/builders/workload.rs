//! Primary/secondary workload sets (StatefulSets) and their pod template.
//!
//! Grounded on `stellar-k8s`'s `resources.rs` `build_statefulset`/
//! `build_pod_template`/`build_container`, generalized from a single node
//! type to the primary/secondary role split and parameterized rollout
//! (partition/image) that the upgrade orchestrator (`upgrade`) drives.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{
    RollingUpdateStatefulSetStrategy, StatefulSet, StatefulSetSpec, StatefulSetUpdateStrategy,
};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EnvVar, EnvVarSource, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PodSpec, PodTemplateSpec, ResourceRequirements as K8sResources,
    SecretKeySelector, SecurityContext, Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

use crate::crd::{Cluster, Role};

use super::labels::{headless_service_name, owner_reference, standard_labels, workload_name};

pub const BOLT_PORT: i32 = 7687;
pub const HTTP_PORT: i32 = 7474;
pub const DISCOVERY_PORT: i32 = 5000;
pub const RAFT_PORT: i32 = 7000;

/// Ports exposed by every member, regardless of role.
pub fn container_ports() -> Vec<ContainerPort> {
    vec![
        ContainerPort {
            name: Some("bolt".to_string()),
            container_port: BOLT_PORT,
            ..Default::default()
        },
        ContainerPort {
            name: Some("http".to_string()),
            container_port: HTTP_PORT,
            ..Default::default()
        },
        ContainerPort {
            name: Some("discovery".to_string()),
            container_port: DISCOVERY_PORT,
            ..Default::default()
        },
        ContainerPort {
            name: Some("raft".to_string()),
            container_port: RAFT_PORT,
            ..Default::default()
        },
    ]
}

fn replicas_for(cluster: &Cluster, role: Role) -> i32 {
    if cluster.spec.suspended {
        return 0;
    }
    match role {
        Role::Primary => cluster.spec.topology.primaries,
        Role::Secondary => cluster.spec.topology.secondaries,
    }
}

/// Build the desired StatefulSet for a role at the cluster's *current*
/// target image and replica count, with an unmodified `RollingUpdate`
/// strategy (partition 0). The upgrade orchestrator overlays its own
/// image/partition when a rollout is in progress.
pub fn build_workload_set(cluster: &Cluster, role: Role) -> StatefulSet {
    build_workload_set_with(cluster, role, &cluster.spec.image_reference(), 0)
}

/// Build the StatefulSet with an explicit image and partition, used by the
/// rolling upgrade orchestrator to freeze/advance the rollout.
pub fn build_workload_set_with(
    cluster: &Cluster,
    role: Role,
    image: &str,
    partition: i32,
) -> StatefulSet {
    let labels = standard_labels(cluster, Some(role));
    let name = workload_name(cluster, role);
    let replicas = replicas_for(cluster, role);

    StatefulSet {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: cluster.metadata.namespace.clone(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            service_name: headless_service_name(cluster),
            update_strategy: Some(StatefulSetUpdateStrategy {
                type_: Some("RollingUpdate".to_string()),
                rolling_update: Some(RollingUpdateStatefulSetStrategy {
                    partition: Some(partition),
                    ..Default::default()
                }),
            }),
            template: build_pod_template(cluster, role, image, &labels),
            volume_claim_templates: Some(vec![build_data_pvc_template(cluster, &labels)]),
            ..Default::default()
        }),
        status: None,
    }
}

fn build_data_pvc_template(
    cluster: &Cluster,
    labels: &BTreeMap<String, String>,
) -> PersistentVolumeClaim {
    let storage = cluster.spec.storage.clone().unwrap_or_default();
    let mut requests = BTreeMap::new();
    requests.insert("storage".to_string(), Quantity(storage.size.clone()));

    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some("data".to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: Some(storage.class.clone()),
            resources: Some(VolumeResourceRequirements {
                requests: Some(requests),
                ..Default::default()
            }),
            ..Default::default()
        }),
        status: None,
    }
}

fn build_pod_template(
    cluster: &Cluster,
    role: Role,
    image: &str,
    labels: &BTreeMap<String, String>,
) -> PodTemplateSpec {
    let container = build_container(cluster, role, image);
    let mut volumes = vec![
        Volume {
            name: "config".to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: Some(super::labels::config_map_name(cluster)),
                ..Default::default()
            }),
            ..Default::default()
        },
        Volume {
            name: "backup-requests".to_string(),
            empty_dir: Some(Default::default()),
            ..Default::default()
        },
    ];

    if cluster.spec.plugins.iter().any(|_| true) {
        volumes.push(Volume {
            name: "plugins".to_string(),
            empty_dir: Some(Default::default()),
            ..Default::default()
        });
    }

    let annotations = cluster
        .spec
        .query_monitoring
        .as_ref()
        .filter(|qm| qm.enabled)
        .map(|_| super::sidecar::prometheus_scrape_annotations(super::sidecar::QUERY_MONITORING_PORT, super::sidecar::QUERY_MONITORING_PATH));

    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labels.clone()),
            annotations,
            ..Default::default()
        }),
        spec: Some(PodSpec {
            containers: vec![container, super::sidecar::build_backup_sidecar_container("graphdb/backup-driver:latest")],
            init_containers: Some(super::plugin::plugin_init_containers(cluster)),
            security_context: Some(k8s_openapi::api::core::v1::PodSecurityContext {
                fs_group: Some(7474),
                run_as_non_root: Some(true),
                ..Default::default()
            }),
            node_selector: cluster.spec.node_selector.clone(),
            tolerations: cluster.spec.tolerations.clone(),
            affinity: cluster.spec.affinity.clone(),
            volumes: Some(volumes),
            ..Default::default()
        }),
    }
}

fn build_container(cluster: &Cluster, role: Role, image: &str) -> Container {
    let resources = cluster.spec.resources.clone().map(|r| K8sResources {
        requests: r.requests,
        limits: r.limits,
        claims: r.claims,
    });

    let mut volume_mounts = vec![
        VolumeMount {
            name: "data".to_string(),
            mount_path: "/data".to_string(),
            ..Default::default()
        },
        VolumeMount {
            name: "config".to_string(),
            mount_path: "/var/lib/graphdb/conf".to_string(),
            read_only: Some(true),
            ..Default::default()
        },
    ];
    if !cluster.spec.plugins.is_empty() {
        volume_mounts.push(VolumeMount {
            name: "plugins".to_string(),
            mount_path: "/var/lib/graphdb/plugins".to_string(),
            ..Default::default()
        });
    }

    Container {
        name: "graphdb".to_string(),
        image: Some(image.to_string()),
        image_pull_policy: Some(pull_policy_str(cluster).to_string()),
        ports: Some(container_ports()),
        env: Some(build_env(cluster, role)),
        resources,
        volume_mounts: Some(volume_mounts),
        security_context: Some(SecurityContext {
            run_as_non_root: Some(true),
            allow_privilege_escalation: Some(false),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn pull_policy_str(cluster: &Cluster) -> &'static str {
    use crate::crd::PullPolicy;
    match cluster.spec.image.pull_policy {
        PullPolicy::Always => "Always",
        PullPolicy::IfNotPresent => "IfNotPresent",
        PullPolicy::Never => "Never",
    }
}

fn build_env(cluster: &Cluster, role: Role) -> Vec<EnvVar> {
    let mut env = vec![
        EnvVar {
            name: "GRAPHDB_ROLE".to_string(),
            value: Some(role.to_string()),
            ..Default::default()
        },
        EnvVar {
            name: "GRAPHDB_CLUSTER_NAME".to_string(),
            value: cluster.metadata.name.clone(),
            ..Default::default()
        },
        EnvVar {
            name: "GRAPHDB_ADMIN_PASSWORD".to_string(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: Some(cluster.spec.auth.admin_secret.clone()),
                    key: "password".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
    ];

    if role == Role::Secondary {
        env.push(EnvVar {
            name: "GRAPHDB_MODE".to_string(),
            value: Some("READ_REPLICA".to_string()),
            ..Default::default()
        });
        if let Some(endpoint) = &cluster.spec.primary_bolt_endpoint {
            env.push(EnvVar {
                name: "GRAPHDB_PRIMARY_BOLT_ENDPOINT".to_string(),
                value: Some(endpoint.clone()),
                ..Default::default()
            });
        }
    }

    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{AuthSpec, ClusterSpec, ImageSpec, StorageSpec, Topology};

    fn cluster(primaries: i32, secondaries: i32) -> Cluster {
        let mut c = Cluster::new(
            "analytics",
            ClusterSpec {
                image: ImageSpec {
                    repo: "graphdb/core".into(),
                    tag: "5.26.0".into(),
                    pull_policy: Default::default(),
                },
                topology: Topology {
                    primaries,
                    secondaries,
                },
                storage: Some(StorageSpec {
                    class: "standard".into(),
                    size: "50Gi".into(),
                    retention: Default::default(),
                }),
                tls: Default::default(),
                auth: AuthSpec {
                    provider: Default::default(),
                    admin_secret: "admin".into(),
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
        );
        c.metadata.namespace = Some("default".to_string());
        c
    }

    // §8.1: builder determinism.
    #[test]
    fn builder_is_deterministic() {
        let c = cluster(3, 2);
        let a = build_workload_set(&c, Role::Primary);
        let b = build_workload_set(&c, Role::Primary);
        assert_eq!(
            serde_json::to_value(&a).unwrap(),
            serde_json::to_value(&b).unwrap()
        );
    }

    #[test]
    fn changing_topology_changes_the_object() {
        let a = build_workload_set(&cluster(3, 2), Role::Primary);
        let b = build_workload_set(&cluster(5, 2), Role::Primary);
        assert_ne!(
            serde_json::to_value(&a).unwrap(),
            serde_json::to_value(&b).unwrap()
        );
    }

    #[test]
    fn suspended_cluster_scales_to_zero() {
        let mut c = cluster(3, 2);
        c.spec.suspended = true;
        let set = build_workload_set(&c, Role::Primary);
        assert_eq!(set.spec.unwrap().replicas, Some(0));
    }

    #[test]
    fn secondary_env_sets_read_replica_mode() {
        let c = cluster(3, 2);
        let set = build_workload_set(&c, Role::Secondary);
        let container = &set.spec.unwrap().template.spec.unwrap().containers[0];
        let env = container.env.as_ref().unwrap();
        assert!(env
            .iter()
            .any(|e| e.name == "GRAPHDB_MODE" && e.value.as_deref() == Some("READ_REPLICA")));
    }

    #[test]
    fn secondary_env_carries_primary_bolt_endpoint_when_set() {
        let mut c = cluster(3, 2);
        c.spec.primary_bolt_endpoint = Some("analytics-client.default.svc:7687".to_string());
        let set = build_workload_set(&c, Role::Secondary);
        let container = &set.spec.unwrap().template.spec.unwrap().containers[0];
        let env = container.env.as_ref().unwrap();
        assert!(env.iter().any(
            |e| e.name == "GRAPHDB_PRIMARY_BOLT_ENDPOINT" && e.value.as_deref() == Some("analytics-client.default.svc:7687")
        ));
    }

    #[test]
    fn pod_template_always_carries_backup_sidecar() {
        let c = cluster(3, 2);
        let set = build_workload_set(&c, Role::Primary);
        let containers = set.spec.unwrap().template.spec.unwrap().containers;
        assert!(containers.iter().any(|c| c.name == "backup-sidecar"));
    }

    #[test]
    fn pod_template_has_no_scrape_annotations_when_query_monitoring_unset() {
        let c = cluster(3, 2);
        let set = build_workload_set(&c, Role::Primary);
        let metadata = set.spec.unwrap().template.metadata.unwrap();
        assert!(metadata.annotations.is_none());
    }

    #[test]
    fn pod_template_carries_scrape_annotations_when_query_monitoring_enabled() {
        let mut c = cluster(3, 2);
        c.spec.query_monitoring = Some(crate::crd::QueryMonitoringSpec {
            enabled: true,
            ..Default::default()
        });
        let set = build_workload_set(&c, Role::Primary);
        let annotations = set.spec.unwrap().template.metadata.unwrap().annotations.unwrap();
        assert_eq!(annotations.get("prometheus.io/port").unwrap(), "2004");
    }

    #[test]
    fn partition_override_is_applied() {
        let c = cluster(5, 0);
        let set = build_workload_set_with(&c, Role::Primary, "graphdb/core:5.27.0", 3);
        let spec = set.spec.unwrap();
        assert_eq!(
            spec.update_strategy.unwrap().rolling_update.unwrap().partition,
            Some(3)
        );
        assert_eq!(spec.template.spec.unwrap().containers[0].image.as_deref(), Some("graphdb/core:5.27.0"));
    }
}
