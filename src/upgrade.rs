//! Leader-aware rolling upgrade orchestrator (spec.md §4.G).
//!
//! Drives every member from the live image to a target image, partition by
//! partition, preserving write availability and quorum. Grounded on the
//! teacher's StatefulSet-patch idiom (`controller/resources.rs`'s
//! `Patch::Apply` + `PatchParams::apply(...).force()`), generalized into a
//! polling state machine over `StatefulSetUpdateStrategy.rollingUpdate.partition`.

use std::time::Duration;

use k8s_openapi::api::apps::v1::StatefulSet;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};
use tracing::{info, warn};

use crate::builders::labels::workload_name;
use crate::builders::workload::build_workload_set_with;
use crate::crd::{Cluster, Role, UpgradeStatus};
use crate::dbadmin::DbAdminClient;
use crate::error::{Error, Result};
use crate::version::{self, Version};

const APPLY_FIELD_MANAGER: &str = "graphdb-operator";
const DEFAULT_ROLLOUT_STEP_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const DEFAULT_STABILIZATION_TIMEOUT: Duration = Duration::from_secs(3 * 60);
const DEFAULT_HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub struct ResolvedTimeouts {
    pub rollout_step: Duration,
    pub stabilization: Duration,
    pub health_check: Duration,
}

pub fn resolve_timeouts(strategy: Option<&crate::crd::UpgradeStrategySpec>) -> ResolvedTimeouts {
    let t = strategy.map(|s| s.timeouts);
    ResolvedTimeouts {
        rollout_step: t
            .and_then(|t| t.rollout_step_seconds)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_ROLLOUT_STEP_TIMEOUT),
        stabilization: t
            .and_then(|t| t.stabilization_seconds)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_STABILIZATION_TIMEOUT),
        health_check: t
            .and_then(|t| t.health_check_seconds)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_HEALTH_CHECK_TIMEOUT),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeOutcome {
    Completed,
    Paused,
    Failed,
}

/// Entry point invoked by the cluster reconciler when it detects an image
/// drift on a Ready cluster with no upgrade in progress (spec.md §4.F.3).
pub async fn run_upgrade(
    client: &Client,
    cluster: &Cluster,
    dbadmin: &dyn DbAdminClient,
    target_image: &str,
) -> Result<(UpgradeOutcome, UpgradeStatus)> {
    let namespace = cluster.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<StatefulSet> = Api::namespaced(client.clone(), &namespace);
    let timeouts = resolve_timeouts(cluster.spec.upgrade_strategy.as_ref());
    let auto_pause = cluster
        .spec
        .upgrade_strategy
        .as_ref()
        .map(|s| s.auto_pause_on_failure)
        .unwrap_or(false);

    let total = total_replicas(cluster);
    let mut status = UpgradeStatus::new(&cluster.spec.image_reference(), target_image, total);

    match run_steps(&api, cluster, dbadmin, target_image, timeouts, &mut status).await {
        Ok(()) => {
            status.complete();
            Ok((UpgradeOutcome::Completed, status))
        }
        Err(e) => {
            warn!(error = %e, "rolling upgrade failed");
            status.fail(&e.to_string(), auto_pause);
            let outcome = if auto_pause {
                UpgradeOutcome::Paused
            } else {
                UpgradeOutcome::Failed
            };
            Ok((outcome, status))
        }
    }
}

async fn run_steps(
    api: &Api<StatefulSet>,
    cluster: &Cluster,
    dbadmin: &dyn DbAdminClient,
    target_image: &str,
    timeouts: ResolvedTimeouts,
    status: &mut UpgradeStatus,
) -> Result<()> {
    precheck_compatibility(&cluster.spec.image_reference(), target_image)?;
    precheck_replicas_ready(api, cluster, Role::Primary).await?;
    if cluster.spec.has_secondaries() {
        precheck_replicas_ready(api, cluster, Role::Secondary).await?;
    }
    let target_tag = target_image.rsplit(':').next().unwrap_or(target_image);
    dbadmin.validate_upgrade_safety(target_tag).await?;

    if cluster.spec.has_secondaries() {
        status.advance("upgrading-secondaries", status.progress.upgraded);
        roll_role_sequential(api, cluster, Role::Secondary, target_image, timeouts.rollout_step).await?;
    }

    status.advance("upgrading-primaries", status.progress.upgraded);
    roll_primaries_leader_last(api, cluster, dbadmin, target_image, timeouts.rollout_step).await?;

    status.advance("stabilizing", total_replicas(cluster));
    dbadmin.wait_for_cluster_stabilization(timeouts.stabilization).await?;

    verify_post_upgrade(dbadmin, target_image, timeouts.health_check).await
}

fn total_replicas(cluster: &Cluster) -> i32 {
    cluster.spec.topology.primaries + cluster.spec.topology.secondaries
}

fn precheck_compatibility(from_tag: &str, to_image: &str) -> Result<()> {
    let to_tag = to_image.rsplit(':').next().unwrap_or(to_image);
    let from_tag = from_tag.rsplit(':').next().unwrap_or(from_tag);
    let from = Version::parse(from_tag).map_err(|e| Error::ValidationError(e.to_string()))?;
    let to = Version::parse(to_tag).map_err(|e| Error::ValidationError(e.to_string()))?;
    if !version::can_upgrade(&from, &to) {
        return Err(Error::PolicyViolation(format!(
            "{from} -> {to} is not an allowed upgrade path"
        )));
    }
    Ok(())
}

async fn precheck_replicas_ready(api: &Api<StatefulSet>, cluster: &Cluster, role: Role) -> Result<()> {
    let name = workload_name(cluster, role);
    let set = api.get(&name).await?;
    let spec_replicas = set.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0);
    let ready = set.status.as_ref().map(|s| s.ready_replicas.unwrap_or(0)).unwrap_or(0);
    if ready < spec_replicas {
        return Err(Error::Timeout(format!(
            "{name} not fully ready before upgrade: {ready}/{spec_replicas}"
        )));
    }
    Ok(())
}

/// Freeze the rollout at partition=replicas, then decrement the partition
/// one step at a time, waiting for the previous step to finish.
async fn roll_role_sequential(
    api: &Api<StatefulSet>,
    cluster: &Cluster,
    role: Role,
    target_image: &str,
    step_timeout: Duration,
) -> Result<()> {
    let name = workload_name(cluster, role);
    let replicas = match role {
        Role::Primary => cluster.spec.topology.primaries,
        Role::Secondary => cluster.spec.topology.secondaries,
    };
    if replicas == 0 {
        return Ok(());
    }

    apply_set(api, cluster, role, target_image, replicas).await?;

    for partition in (0..replicas).rev() {
        apply_set(api, cluster, role, target_image, partition).await?;
        wait_for_step(api, &name, replicas, partition, step_timeout).await?;
    }

    Ok(())
}

/// Primaries get the same partition-driven rollout, except the current
/// leader's ordinal is skipped until last.
async fn roll_primaries_leader_last(
    api: &Api<StatefulSet>,
    cluster: &Cluster,
    dbadmin: &dyn DbAdminClient,
    target_image: &str,
    step_timeout: Duration,
) -> Result<()> {
    let name = workload_name(cluster, Role::Primary);
    let replicas = cluster.spec.topology.primaries;
    if replicas == 0 {
        return Ok(());
    }

    let leader_ordinal = leader_ordinal(cluster, dbadmin).await?;

    apply_set(api, cluster, Role::Primary, target_image, replicas).await?;

    let mut ordinals: Vec<i32> = (0..replicas).collect();
    ordinals.sort_unstable_by(|a, b| b.cmp(a));
    for ordinal in ordinals {
        if Some(ordinal) == leader_ordinal {
            continue;
        }
        let partition = ordinal;
        apply_set(api, cluster, Role::Primary, target_image, partition).await?;
        wait_for_step(api, &name, replicas, partition, step_timeout).await?;
    }

    if leader_ordinal.is_some() {
        apply_set(api, cluster, Role::Primary, target_image, 0).await?;
        wait_for_step(api, &name, replicas, 0, step_timeout).await?;
    } else {
        apply_set(api, cluster, Role::Primary, target_image, 0).await?;
    }

    Ok(())
}

async fn leader_ordinal(cluster: &Cluster, dbadmin: &dyn DbAdminClient) -> Result<Option<i32>> {
    let leader = dbadmin.get_leader().await?;
    let Some(leader_addr) = leader else { return Ok(None) };
    let name = workload_name(cluster, Role::Primary);
    for ordinal in 0..cluster.spec.topology.primaries {
        if leader_addr.starts_with(&format!("{name}-{ordinal}")) {
            return Ok(Some(ordinal));
        }
    }
    Ok(None)
}

async fn apply_set(api: &Api<StatefulSet>, cluster: &Cluster, role: Role, image: &str, partition: i32) -> Result<()> {
    let name = workload_name(cluster, role);
    let desired = build_workload_set_with(cluster, role, image, partition);
    api.patch(&name, &PatchParams::apply(APPLY_FIELD_MANAGER).force(), &Patch::Apply(&desired))
        .await?;
    Ok(())
}

async fn wait_for_step(api: &Api<StatefulSet>, name: &str, replicas: i32, partition: i32, timeout: Duration) -> Result<()> {
    let min_updated = replicas - partition;
    tokio::time::timeout(timeout, async {
        loop {
            let set = api.get(name).await?;
            let status = set.status.unwrap_or_default();
            let ready = status.ready_replicas.unwrap_or(0);
            let updated = status.updated_replicas.unwrap_or(0);
            if ready == replicas && updated >= min_updated {
                return Ok::<(), Error>(());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    })
    .await
    .map_err(|_| Error::Timeout(format!("{name} rollout step (partition={partition}) timed out")))?
}

async fn verify_post_upgrade(dbadmin: &dyn DbAdminClient, target_image: &str, timeout: Duration) -> Result<()> {
    let target_tag = target_image.rsplit(':').next().unwrap_or(target_image);
    let target = Version::parse(target_tag).map_err(|e| Error::ValidationError(e.to_string()))?;

    tokio::time::timeout(timeout, async {
        loop {
            if dbadmin.is_cluster_healthy().await.unwrap_or(false) {
                break;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        Ok::<(), Error>(())
    })
    .await
    .map_err(|_| Error::Timeout("post-upgrade health check timed out".to_string()))??;

    let reported = dbadmin.get_version().await?;
    let reported_version = Version::parse(&reported).map_err(|e| Error::ValidationError(e.to_string()))?;
    if !reported_version.normalized_eq(&target) {
        return Err(Error::PolicyViolation(format!(
            "post-upgrade version mismatch: reported {reported_version}, expected {target}"
        )));
    }
    info!("upgrade verified at version {}", reported_version);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compatibility_precheck_rejects_illegal_path() {
        let err = precheck_compatibility("5.25.0", "graphdb/core:5.26.0").unwrap_err();
        assert!(matches!(err, Error::PolicyViolation(_)));
    }

    #[test]
    fn compatibility_precheck_allows_legal_path() {
        assert!(precheck_compatibility("5.26.0", "graphdb/core:5.27.0").is_ok());
    }

    #[test]
    fn resolve_timeouts_falls_back_to_defaults() {
        let t = resolve_timeouts(None);
        assert_eq!(t.stabilization, DEFAULT_STABILIZATION_TIMEOUT);
        assert_eq!(t.health_check, DEFAULT_HEALTH_CHECK_TIMEOUT);
    }

    #[test]
    fn resolve_timeouts_honors_overrides() {
        let strategy = crate::crd::UpgradeStrategySpec {
            auto_pause_on_failure: true,
            timeouts: crate::crd::UpgradeTimeouts {
                rollout_step_seconds: Some(10),
                stabilization_seconds: Some(20),
                health_check_seconds: Some(30),
            },
        };
        let t = resolve_timeouts(Some(&strategy));
        assert_eq!(t.rollout_step, Duration::from_secs(10));
        assert_eq!(t.stabilization, Duration::from_secs(20));
        assert_eq!(t.health_check, Duration::from_secs(30));
    }
}
