//! Apply step: patch the workload set's replica count and emit an event
//! carrying the scoring reason (spec.md §4.H "Apply").

use k8s_openapi::api::apps::v1::StatefulSet;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::events::Recorder;
use kube::Client;

use crate::builders::labels::workload_name;
use crate::builders::workload::build_workload_set;
use crate::crd::{Cluster, Role};
use crate::error::Result;
use crate::events;

use super::decision::{ScaleAction, ScaleDecision};

const APPLY_FIELD_MANAGER: &str = "graphdb-operator-autoscaler";

pub async fn apply_scale_decision(
    client: &Client,
    recorder: &Recorder,
    cluster: &Cluster,
    role: Role,
    decision: &ScaleDecision,
) -> Result<()> {
    if decision.action == ScaleAction::None {
        return Ok(());
    }

    let namespace = cluster.metadata.namespace.clone().unwrap_or_else(|| "default".to_string());
    let api: Api<StatefulSet> = Api::namespaced(client.clone(), &namespace);
    let name = workload_name(cluster, role);

    let mut desired = build_workload_set(cluster, role);
    if let Some(spec) = desired.spec.as_mut() {
        spec.replicas = Some(decision.target_replicas);
    }

    api.patch(&name, &PatchParams::apply(APPLY_FIELD_MANAGER).force(), &Patch::Apply(&desired))
        .await?;

    let direction = match decision.action {
        ScaleAction::ScaleUp => "up",
        ScaleAction::ScaleDown => "down",
        ScaleAction::None => unreachable!(),
    };

    #[cfg(feature = "metrics")]
    crate::metrics::METRICS
        .scale_actions_total
        .get_or_create(&crate::metrics::ScaleActionLabels {
            role: role.to_string(),
            direction: direction.to_string(),
        })
        .inc();

    events::normal(
        recorder,
        "ScalingDecision",
        format!("{role} {direction} to {}: {}", decision.target_replicas, decision.reason),
    )
    .await
}
