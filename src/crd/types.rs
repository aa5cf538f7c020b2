//! Shared leaf types used across the custom resource definitions.
//!
//! These mirror the attribute groups in spec.md §3's data model; they carry
//! no behavior beyond defaults and small accessors.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Container image reference.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImageSpec {
    pub repo: String,
    pub tag: String,
    #[serde(default)]
    pub pull_policy: PullPolicy,
}

impl ImageSpec {
    pub fn full_reference(&self) -> String {
        format!("{}:{}", self.repo, self.tag)
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum PullPolicy {
    Always,
    #[default]
    IfNotPresent,
    Never,
}

/// Primary/secondary replica counts.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Topology {
    pub primaries: i32,
    #[serde(default)]
    pub secondaries: i32,
}

/// A DB member's role.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    Primary,
    Secondary,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Primary => write!(f, "primary"),
            Role::Secondary => write!(f, "secondary"),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum RetentionPolicy {
    #[default]
    Delete,
    Retain,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    pub class: String,
    pub size: String,
    #[serde(default)]
    pub retention: RetentionPolicy,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TlsMode {
    #[default]
    Disabled,
    CertManager,
    ExternalSecrets,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TlsSpec {
    #[serde(default)]
    pub mode: TlsMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer_ref: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthProvider {
    #[default]
    Native,
    Ldap,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthSpec {
    #[serde(default)]
    pub provider: AuthProvider,
    pub admin_secret: String,
}

/// A single metric-based scaling rule (spec.md §4.H).
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MetricSpec {
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    /// Target value (percentage points for cpu/memory utilization).
    pub target: f64,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Cpu,
    Memory,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuorumProtection {
    #[serde(default)]
    pub min_healthy_primaries: i32,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ZoneAwareness {
    #[serde(default)]
    pub min_replicas_per_zone: i32,
    #[serde(default)]
    pub max_zone_skew: i32,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AutoScalingSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub min_primaries: i32,
    #[serde(default)]
    pub max_primaries: i32,
    #[serde(default)]
    pub min_secondaries: i32,
    #[serde(default)]
    pub max_secondaries: i32,
    #[serde(default)]
    pub primary_metrics: Vec<MetricSpec>,
    #[serde(default)]
    pub secondary_metrics: Vec<MetricSpec>,
    #[serde(default)]
    pub quorum_protection: QuorumProtection,
    #[serde(default)]
    pub zone_awareness: ZoneAwareness,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NetworkingMode {
    #[default]
    Cilium,
    Istio,
    Submariner,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CoordinationSpec {
    #[serde(default)]
    pub leader_election: LeaderElectionCoordination,
    #[serde(default)]
    pub state_synchronization: StateSyncCoordination,
    #[serde(default)]
    pub failover_coordination: FailoverCoordination,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LeaderElectionCoordination {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StateSyncCoordination {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_sync_interval")]
    pub interval: String,
}

fn default_sync_interval() -> String {
    "*/5 * * * *".to_string()
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FailoverCoordination {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RemoteClusterSpec {
    pub name: String,
    pub region: Option<String>,
    #[serde(default)]
    pub primary_nodes: i32,
    #[serde(default)]
    pub secondary_nodes: i32,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MultiClusterSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub networking_mode: NetworkingMode,
    #[serde(default)]
    pub remotes: Vec<RemoteClusterSpec>,
    #[serde(default)]
    pub coordination: CoordinationSpec,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PluginRef {
    pub name: String,
    pub version: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueryMonitoringSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub slow_query_threshold_ms: u64,
}

/// Standalone ingress fronting the client service (spec.md §4.B); ignored
/// while `multi_cluster.enabled` is true, since a multi-cluster deployment
/// routes through the per-remote coordination layer instead.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngressSpec {
    pub host: String,
    #[serde(default = "default_ingress_class")]
    pub ingress_class: String,
}

fn default_ingress_class() -> String {
    "nginx".to_string()
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeTimeouts {
    #[serde(default)]
    pub rollout_step_seconds: Option<u64>,
    #[serde(default)]
    pub stabilization_seconds: Option<u64>,
    #[serde(default)]
    pub health_check_seconds: Option<u64>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeStrategySpec {
    #[serde(default)]
    pub auto_pause_on_failure: bool,
    #[serde(default)]
    pub timeouts: UpgradeTimeouts,
}

/// Kubernetes-convention status condition.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    pub last_transition_time: String,
    pub reason: String,
    pub message: String,
}

impl Condition {
    pub fn new(type_: &str, status: bool, reason: &str, message: &str) -> Self {
        Self {
            type_: type_.to_string(),
            status: if status { "True" } else { "False" }.to_string(),
            last_transition_time: chrono::Utc::now().to_rfc3339(),
            reason: reason.to_string(),
            message: message.to_string(),
        }
    }

    pub fn ready(status: bool, reason: &str, message: &str) -> Self {
        Self::new("Ready", status, reason, message)
    }
}

/// Replace (not append) a condition of the same `type_` in place, matching
/// spec.md §4.F's requirement that the Ready condition is replaced, not
/// accumulated.
pub fn upsert_condition(conditions: &mut Vec<Condition>, new: Condition) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == new.type_) {
        *existing = new;
    } else {
        conditions.push(new);
    }
}

pub type OpenMap = BTreeMap<String, serde_json::Value>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_replaces_same_type_in_place() {
        let mut conds = vec![Condition::ready(false, "Init", "starting")];
        upsert_condition(&mut conds, Condition::ready(true, "Ready", "all good"));
        assert_eq!(conds.len(), 1);
        assert_eq!(conds[0].status, "True");
        assert_eq!(conds[0].reason, "Ready");
    }

    #[test]
    fn upsert_appends_new_type() {
        let mut conds = vec![Condition::ready(true, "Ready", "ok")];
        upsert_condition(
            &mut conds,
            Condition::new("Progressing", true, "Upgrading", "in progress"),
        );
        assert_eq!(conds.len(), 2);
    }
}
