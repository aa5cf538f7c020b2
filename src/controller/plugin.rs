//! `PluginCR` reconcile loop (spec.md §4.F, §4.B): verifies a URL-sourced
//! artifact's checksum, waits for install-order dependencies to be loaded,
//! then applies the plugin's procedure allow/deny list and sandbox mode.
//! The artifact fetch/install itself happens in the init container
//! `builders::plugin::plugin_init_containers` wires onto the member pods;
//! this loop only gates readiness and pushes the DB-side security policy.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::events::Recorder;
use kube::runtime::finalizer::{finalizer, Event};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Client, ResourceExt};
use tracing::{error, info, instrument, warn};

use crate::builders::plugin::verify_checksum;
use crate::crd::{finalizers, resolve_install_order, Cluster, Condition, Plugin, PluginStatus, PUBLIC_ROLE};
use crate::error::{Error, Result};
use crate::events;

use super::ControllerState;

const APPLY_FIELD_MANAGER: &str = "graphdb-operator";

pub async fn run(state: Arc<ControllerState>) -> Result<()> {
    let client = state.client.clone();
    let plugins: Api<Plugin> = Api::all(client.clone());
    plugins
        .list(&ListParams::default().limit(1))
        .await
        .map_err(|e| Error::ConfigError(format!("Plugin CRD not installed: {e}")))?;

    Controller::new(plugins, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, state)
        .for_each(|res| async move {
            match res {
                Ok(o) => info!(?o, "plugin reconciled"),
                Err(e) => warn!(error = %e, "plugin reconcile failed"),
            }
        })
        .await;
    Ok(())
}

#[instrument(skip(ctx, obj), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile(obj: Arc<Plugin>, ctx: Arc<ControllerState>) -> Result<Action> {
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<Plugin> = Api::namespaced(ctx.client.clone(), &namespace);
    let recorder = events::recorder_for(ctx.client.clone(), obj.as_ref());

    finalizer(&api, finalizers::PLUGIN, obj, |event| async {
        match event {
            Event::Apply(plugin) => apply_plugin(&ctx, &recorder, &plugin).await,
            Event::Cleanup(_plugin) => Ok(Action::await_change()),
        }
    })
    .await
    .map_err(Error::from)
}

fn error_policy(_obj: Arc<Plugin>, error: &Error, _ctx: Arc<ControllerState>) -> Action {
    error!(error = %error, "plugin reconcile error");
    #[cfg(feature = "metrics")]
    crate::metrics::METRICS
        .reconcile_errors_total
        .get_or_create(&crate::metrics::ReconcileErrorLabels { kind: "Plugin".to_string() })
        .inc();
    if error.is_retriable() {
        Action::requeue(Duration::from_secs(15))
    } else {
        Action::requeue(Duration::from_secs(60))
    }
}

async fn resolve_cluster(client: &Client, namespace: &str, cluster_ref: &str) -> Result<Cluster> {
    let api: Api<Cluster> = Api::namespaced(client.clone(), namespace);
    api.get(cluster_ref)
        .await
        .map_err(|_| Error::NotFound(format!("target cluster '{cluster_ref}' not found in namespace '{namespace}'")))
}

fn config_value_to_str(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

async fn apply_plugin(ctx: &ControllerState, recorder: &Recorder, plugin: &Plugin) -> Result<Action> {
    let namespace = plugin.namespace().unwrap_or_else(|| "default".to_string());
    let cluster = match resolve_cluster(&ctx.client, &namespace, &plugin.spec.cluster_ref).await {
        Ok(c) if c.status.as_ref().map(|s| s.phase.as_str()) == Some("Ready") => c,
        _ => {
            update_status(&ctx.client, plugin, "Waiting", "target cluster not ready").await?;
            return Ok(Action::requeue(Duration::from_secs(15)));
        }
    };

    if let Some(url) = plugin.spec.source.url.as_deref() {
        if let Some(checksum) = plugin.spec.source.checksum.as_deref() {
            let artifact = reqwest::get(url)
                .await
                .map_err(|e| Error::ConfigError(format!("failed to fetch plugin artifact: {e}")))?
                .bytes()
                .await
                .map_err(|e| Error::ConfigError(format!("failed to read plugin artifact: {e}")))?;
            if !verify_checksum(&artifact, checksum) {
                let message = format!("checksum mismatch for plugin '{}'", plugin.spec.name);
                events::warning(recorder, events::reason::PLUGIN_INSTALL_FAILED, message.clone()).await?;
                update_status(&ctx.client, plugin, "Failed", &message).await?;
                return Err(Error::PolicyViolation(message));
            }
        }
    }

    let siblings: Api<Plugin> = Api::namespaced(ctx.client.clone(), &namespace);
    let all_plugins = siblings.list(&ListParams::default()).await?;
    let specs: Vec<_> = all_plugins
        .items
        .iter()
        .filter(|p| p.spec.cluster_ref == plugin.spec.cluster_ref)
        .map(|p| p.spec.clone())
        .collect();
    if let Err(cycle) = resolve_install_order(&specs) {
        events::warning(recorder, events::reason::PLUGIN_INSTALL_FAILED, cycle.clone()).await?;
        update_status(&ctx.client, plugin, "Failed", &cycle).await?;
        return Err(Error::ValidationError(cycle));
    }

    let Some(pod) = super::primary_admin_pod(&ctx.client, &cluster).await else {
        update_status(&ctx.client, plugin, "Waiting", "no primary member pod available").await?;
        return Ok(Action::requeue(Duration::from_secs(15)));
    };
    let Some(admin) = ctx.dbadmin_for(&pod) else {
        update_status(&ctx.client, plugin, "Waiting", "admin endpoint unreachable").await?;
        return Ok(Action::requeue(Duration::from_secs(15)));
    };

    let loaded = admin.get_loaded_components().await?;
    for dep in &plugin.spec.dependencies {
        if !loaded.iter().any(|c| c == dep) {
            update_status(&ctx.client, plugin, "Waiting", &format!("dependency '{dep}' not yet loaded")).await?;
            return Ok(Action::requeue(Duration::from_secs(15)));
        }
    }

    for (key, value) in &plugin.spec.config {
        admin.set_configuration(key, &config_value_to_str(value)).await?;
    }

    admin.enable_sandbox_mode(PUBLIC_ROLE, plugin.spec.security.sandbox).await?;
    if !plugin.spec.security.allowed_procedures.is_empty() {
        admin.set_allowed_procedures(PUBLIC_ROLE, &plugin.spec.security.allowed_procedures).await?;
    }

    if !loaded.iter().any(|c| c == &plugin.spec.name) {
        update_status(&ctx.client, plugin, "Installing", "waiting for member pods to load the plugin").await?;
        return Ok(Action::requeue(Duration::from_secs(15)));
    }

    events::normal(recorder, events::reason::PLUGIN_READY, format!("plugin '{}' is loaded and configured", plugin.spec.name)).await?;
    update_status(&ctx.client, plugin, "Ready", "plugin is loaded and configured").await?;
    Ok(Action::requeue(Duration::from_secs(60)))
}

async fn update_status(client: &Client, plugin: &Plugin, phase: &str, message: &str) -> Result<()> {
    let namespace = plugin.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<Plugin> = Api::namespaced(client.clone(), &namespace);

    let mut conditions = plugin.status.as_ref().map(|s| s.conditions.clone()).unwrap_or_default();
    crate::crd::upsert_condition(&mut conditions, Condition::ready(phase == "Ready", phase, message));

    let status = PluginStatus {
        phase: phase.to_string(),
        conditions,
        message: Some(message.to_string()),
    };

    api.patch_status(&plugin.name_any(), &PatchParams::apply(APPLY_FIELD_MANAGER), &Patch::Merge(serde_json::json!({ "status": status })))
        .await?;
    Ok(())
}
