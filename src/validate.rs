//! Cluster-spec validators (spec.md §4.E).
//!
//! Each stage is a plain function from `&ClusterSpec` (plus, for the
//! fail-fast stages, the already-validated context) to a list of
//! [`FieldError`]s and [`FieldWarning`]s. `validate_cluster_spec` sequences
//! them the way spec.md prescribes: edition, topology, and image are
//! fail-fast — a failure there aborts the remaining stages since they'd
//! only produce noise against a spec that's already structurally wrong —
//! while storage/TLS/auth/memory/cloud-identity all run and accumulate
//! regardless of each other's outcome. Grounded on kube-rs's admission
//! validation style (`other_examples/`) generalized to a pure, testable
//! function rather than a webhook handler.

use crate::builders::memory::MemorySize;
use crate::crd::{AuthProvider, ClusterSpec, TlsMode};
use crate::version;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldWarning {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    pub errors: Vec<FieldError>,
    pub warnings: Vec<FieldWarning>,
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.to_string(),
            message: message.into(),
        });
    }

    fn warning(&mut self, field: &str, message: impl Into<String>) {
        self.warnings.push(FieldWarning {
            field: field.to_string(),
            message: message.into(),
        });
    }

    fn merge(&mut self, other: ValidationOutcome) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

/// `image.tag` suffix marking a Community-edition build, which does not
/// support causal clustering. There is no dedicated `edition` field on
/// `ClusterSpec` (spec.md §3's data model does not define one); this
/// convention mirrors how graph-DB vendor images actually tag editions.
const COMMUNITY_TAG_MARKERS: [&str; 2] = ["-community", "community-"];

fn is_community_edition(tag: &str) -> bool {
    let lower = tag.to_ascii_lowercase();
    COMMUNITY_TAG_MARKERS.iter().any(|m| lower.contains(m))
}

fn validate_edition(spec: &ClusterSpec) -> ValidationOutcome {
    let mut out = ValidationOutcome::default();
    if spec.topology.secondaries > 0 && is_community_edition(&spec.image.tag) {
        out.error(
            "image.tag",
            "community edition does not support causal clustering; secondaries must be 0",
        );
    }
    out
}

fn validate_topology(spec: &ClusterSpec) -> ValidationOutcome {
    let mut out = ValidationOutcome::default();
    if spec.topology.primaries < 1 {
        out.error("topology.primaries", "primaries must be >= 1");
    }
    if spec.topology.secondaries < 0 {
        out.error("topology.secondaries", "secondaries must be >= 0");
    }
    if spec.topology.primaries >= 1 && spec.topology.primaries % 2 == 0 {
        out.warning(
            "topology.primaries",
            "an even primary count risks split votes; an odd count is recommended",
        );
    }
    out
}

fn validate_image(spec: &ClusterSpec) -> ValidationOutcome {
    let mut out = ValidationOutcome::default();
    if spec.image.repo.trim().is_empty() {
        out.error("image.repo", "image.repo must not be empty");
    }
    if spec.image.tag.trim().is_empty() {
        out.error("image.tag", "image.tag must not be empty");
    }
    out
}

fn validate_storage(spec: &ClusterSpec) -> ValidationOutcome {
    let mut out = ValidationOutcome::default();
    let Some(storage) = &spec.storage else {
        out.warning("storage", "no storage class configured; data is ephemeral");
        return out;
    };
    if storage.class.trim().is_empty() {
        out.error("storage.class", "storage.class must not be empty");
    }
    if MemorySize::parse(&storage.size).is_err() {
        out.error("storage.size", format!("'{}' is not a valid size", storage.size));
    }
    out
}

fn validate_tls(spec: &ClusterSpec) -> ValidationOutcome {
    let mut out = ValidationOutcome::default();
    if spec.tls.mode == TlsMode::CertManager && spec.tls.issuer_ref.is_none() {
        out.error("tls.issuerRef", "issuerRef is required when tls.mode is cert-manager");
    }
    if spec.tls.mode == TlsMode::Disabled && spec.tls.issuer_ref.is_some() {
        out.warning("tls.issuerRef", "issuerRef is ignored while tls.mode is disabled");
    }
    out
}

fn validate_auth(spec: &ClusterSpec) -> ValidationOutcome {
    let mut out = ValidationOutcome::default();
    if spec.auth.admin_secret.trim().is_empty() {
        out.error("auth.adminSecret", "auth.adminSecret must reference a secret name");
    }
    if spec.auth.provider == AuthProvider::Ldap && spec.auth.admin_secret.trim().is_empty() {
        out.error("auth.adminSecret", "LDAP provider still requires a bootstrap admin secret");
    }
    out
}

fn validate_memory(spec: &ClusterSpec) -> ValidationOutcome {
    let mut out = ValidationOutcome::default();
    let Some(resources) = &spec.resources else {
        out.warning("resources", "no memory limit set; using database defaults");
        return out;
    };
    let Some(limits) = &resources.limits else {
        return out;
    };
    let Some(memory_qty) = limits.get("memory") else {
        return out;
    };
    match MemorySize::parse(&memory_qty.0) {
        Ok(size) => {
            if size.mib() < crate::builders::memory::PER_TRANSACTION_FLOOR_MIB {
                out.error(
                    "resources.limits.memory",
                    "memory limit is below the minimum viable heap floor",
                );
            }
        }
        Err(_) => out.error(
            "resources.limits.memory",
            format!("'{}' is not a valid memory quantity", memory_qty.0),
        ),
    }
    out
}

fn validate_cloud_identity(spec: &ClusterSpec) -> ValidationOutcome {
    let mut out = ValidationOutcome::default();
    const IDENTITY_ANNOTATION_KEYS: [&str; 2] =
        ["iam.gke.io/gcp-service-account", "eks.amazonaws.com/role-arn"];
    let Some(selector) = &spec.node_selector else {
        return out;
    };
    for key in IDENTITY_ANNOTATION_KEYS {
        if let Some(value) = selector.get(key) {
            if value.trim().is_empty() {
                out.error(
                    "nodeSelector",
                    format!("workload-identity key '{key}' is present but empty"),
                );
            }
        }
    }
    out
}

/// Runs the full create-path validation sequence (spec.md §4.E).
pub fn validate_cluster_spec(spec: &ClusterSpec) -> ValidationOutcome {
    let mut out = ValidationOutcome::default();

    out.merge(validate_edition(spec));
    if !out.is_valid() {
        return out;
    }
    out.merge(validate_topology(spec));
    if !out.is_valid() {
        return out;
    }
    out.merge(validate_image(spec));
    if !out.is_valid() {
        return out;
    }

    out.merge(validate_storage(spec));
    out.merge(validate_tls(spec));
    out.merge(validate_auth(spec));
    out.merge(validate_memory(spec));
    out.merge(validate_cloud_identity(spec));
    out
}

fn total_replicas(spec: &ClusterSpec) -> i32 {
    spec.topology.primaries + spec.topology.secondaries
}

/// Update-path extras (spec.md §4.E): no downgrading primaries below 1, an
/// upgrade-path check when the tag changes, and a resource-availability
/// check when total replica count increases.
pub fn validate_cluster_update(old: &ClusterSpec, new: &ClusterSpec) -> ValidationOutcome {
    let mut out = validate_cluster_spec(new);

    if new.topology.primaries < 1 {
        out.error("topology.primaries", "cannot downgrade primaries below 1");
    }

    if old.image.tag != new.image.tag {
        match (version::Version::parse(&old.image.tag), version::Version::parse(&new.image.tag)) {
            (Ok(from), Ok(to)) => {
                if !version::can_upgrade(&from, &to) {
                    out.error(
                        "image.tag",
                        format!("{} -> {} is not a supported upgrade path", old.image.tag, new.image.tag),
                    );
                }
            }
            _ => out.error("image.tag", "unable to parse version tags for upgrade-path check"),
        }
    }

    if total_replicas(new) > total_replicas(old) && new.resources.is_none() {
        out.warning(
            "resources",
            "replica count is increasing with no resource requests configured; scheduling may fail under pressure",
        );
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{AuthSpec, ImageSpec, PullPolicy, StorageSpec, Topology};

    fn base_spec() -> ClusterSpec {
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
    fn valid_spec_produces_no_errors() {
        let out = validate_cluster_spec(&base_spec());
        assert!(out.is_valid(), "unexpected errors: {:?}", out.errors);
    }

    #[test]
    fn community_edition_with_secondaries_is_rejected() {
        let mut spec = base_spec();
        spec.image.tag = "5.26.0-community".into();
        let out = validate_cluster_spec(&spec);
        assert!(!out.is_valid());
        assert_eq!(out.errors[0].field, "image.tag");
    }

    #[test]
    fn zero_primaries_fails_fast_before_image_checks() {
        let mut spec = base_spec();
        spec.topology.primaries = 0;
        spec.image.repo = String::new();
        let out = validate_cluster_spec(&spec);
        assert_eq!(out.errors.len(), 1);
        assert_eq!(out.errors[0].field, "topology.primaries");
    }

    #[test]
    fn even_primary_count_warns_not_errors() {
        let mut spec = base_spec();
        spec.topology.primaries = 4;
        let out = validate_cluster_spec(&spec);
        assert!(out.is_valid());
        assert!(out.warnings.iter().any(|w| w.field == "topology.primaries"));
    }

    #[test]
    fn cert_manager_without_issuer_is_rejected() {
        let mut spec = base_spec();
        spec.tls.mode = TlsMode::CertManager;
        spec.tls.issuer_ref = None;
        let out = validate_cluster_spec(&spec);
        assert!(out.errors.iter().any(|e| e.field == "tls.issuerRef"));
    }

    #[test]
    fn update_rejects_primary_downgrade_below_one() {
        let old = base_spec();
        let mut new = base_spec();
        new.topology.primaries = 0;
        let out = validate_cluster_update(&old, &new);
        assert!(out.errors.iter().any(|e| e.field == "topology.primaries"));
    }

    #[test]
    fn update_rejects_unsupported_upgrade_path() {
        let mut old = base_spec();
        old.image.tag = "5.25.0".into();
        let mut new = base_spec();
        new.image.tag = "5.26.0".into();
        let out = validate_cluster_update(&old, &new);
        assert!(out.errors.iter().any(|e| e.field == "image.tag"));
    }

    #[test]
    fn update_accepts_supported_upgrade_path() {
        let mut old = base_spec();
        old.image.tag = "5.26.0".into();
        let mut new = base_spec();
        new.image.tag = "5.27.0".into();
        let out = validate_cluster_update(&old, &new);
        assert!(!out.errors.iter().any(|e| e.field == "image.tag"));
    }
}
