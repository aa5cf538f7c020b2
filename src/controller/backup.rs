//! `BackupCR` / `RestoreCR` reconcile loops (spec.md §4.F, §4.K). Thin
//! finalizer wiring around the already-pure `backup` module: this file owns
//! only the Controller/finalizer plumbing and status patching, and defers
//! every actual decision to `backup::reconcile_backup`/`handle_backup_deletion`/
//! `reconcile_restore`.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::batch::v1::{CronJob, Job};
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::finalizer::{finalizer, Event};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::ResourceExt;
use tracing::{error, info, instrument, warn};

use crate::crd::{finalizers, Backup, Condition, Restore, RestoreStatus};
use crate::error::{Error, Result};
use crate::events;

use super::ControllerState;

const APPLY_FIELD_MANAGER: &str = "graphdb-operator-backup";

pub async fn run(state: Arc<ControllerState>) -> Result<()> {
    let client = state.client.clone();

    let backups: Api<Backup> = Api::all(client.clone());
    backups
        .list(&ListParams::default().limit(1))
        .await
        .map_err(|e| Error::ConfigError(format!("Backup CRD not installed: {e}")))?;

    let backups_fut = Controller::new(backups, WatcherConfig::default())
        .owns::<Job>(Api::all(client.clone()), WatcherConfig::default())
        .owns::<CronJob>(Api::all(client.clone()), WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile_backup, backup_error_policy, state.clone())
        .for_each(|res| async move {
            match res {
                Ok(o) => info!(?o, "backup reconciled"),
                Err(e) => warn!(error = %e, "backup reconcile failed"),
            }
        });

    let restores: Api<Restore> = Api::all(client.clone());
    let restores_fut = Controller::new(restores, WatcherConfig::default())
        .owns::<Job>(Api::all(client.clone()), WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile_restore, restore_error_policy, state)
        .for_each(|res| async move {
            match res {
                Ok(o) => info!(?o, "restore reconciled"),
                Err(e) => warn!(error = %e, "restore reconcile failed"),
            }
        });

    tokio::join!(backups_fut, restores_fut);
    Ok(())
}

fn retry_action(error: &Error, kind: &str) -> Action {
    error!(error = %error, kind, "reconcile error");
    #[cfg(feature = "metrics")]
    crate::metrics::METRICS
        .reconcile_errors_total
        .get_or_create(&crate::metrics::ReconcileErrorLabels { kind: kind.to_string() })
        .inc();
    if error.is_retriable() {
        Action::requeue(Duration::from_secs(15))
    } else {
        Action::requeue(Duration::from_secs(60))
    }
}

#[instrument(skip(ctx, obj), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile_backup(obj: Arc<Backup>, ctx: Arc<ControllerState>) -> Result<Action> {
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<Backup> = Api::namespaced(ctx.client.clone(), &namespace);
    let recorder = events::recorder_for(ctx.client.clone(), obj.as_ref());

    finalizer(&api, finalizers::BACKUP, obj, |event| async {
        match event {
            Event::Apply(backup) => {
                let status = crate::backup::reconcile_backup(&ctx.client, &recorder, &backup).await?;
                update_backup_status(&ctx.client, &backup, status).await?;
                let requeue = if backup.spec.is_scheduled() { 60 } else { 10 };
                Ok(Action::requeue(Duration::from_secs(requeue)))
            }
            Event::Cleanup(backup) => {
                crate::backup::handle_backup_deletion(&ctx.client, &backup).await?;
                Ok(Action::await_change())
            }
        }
    })
    .await
    .map_err(Error::from)
}

fn backup_error_policy(_obj: Arc<Backup>, error: &Error, _ctx: Arc<ControllerState>) -> Action {
    retry_action(error, "Backup")
}

async fn update_backup_status(client: &kube::Client, backup: &Backup, status: crate::crd::BackupStatus) -> Result<()> {
    let namespace = backup.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<Backup> = Api::namespaced(client.clone(), &namespace);
    api.patch_status(
        &backup.name_any(),
        &PatchParams::apply(APPLY_FIELD_MANAGER),
        &Patch::Merge(serde_json::json!({ "status": status })),
    )
    .await?;
    Ok(())
}

#[instrument(skip(ctx, obj), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile_restore(obj: Arc<Restore>, ctx: Arc<ControllerState>) -> Result<Action> {
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<Restore> = Api::namespaced(ctx.client.clone(), &namespace);
    let recorder = events::recorder_for(ctx.client.clone(), obj.as_ref());

    finalizer(&api, finalizers::RESTORE, obj, |event| async {
        match event {
            Event::Apply(restore) => {
                let dbadmin_for = |pod: &str| ctx.dbadmin_for(pod);
                match crate::backup::reconcile_restore(&ctx.client, &recorder, &restore, &dbadmin_for).await {
                    Ok(status) => {
                        update_restore_status(&ctx.client, &restore, status, None).await?;
                        Ok(Action::requeue(Duration::from_secs(15)))
                    }
                    Err(e) => {
                        update_restore_status(&ctx.client, &restore, RestoreStatus::default(), Some(&e.to_string())).await?;
                        Err(e)
                    }
                }
            }
            Event::Cleanup(_restore) => Ok(Action::await_change()),
        }
    })
    .await
    .map_err(Error::from)
}

fn restore_error_policy(_obj: Arc<Restore>, error: &Error, _ctx: Arc<ControllerState>) -> Action {
    retry_action(error, "Restore")
}

async fn update_restore_status(client: &kube::Client, restore: &Restore, status: RestoreStatus, error_message: Option<&str>) -> Result<()> {
    let namespace = restore.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<Restore> = Api::namespaced(client.clone(), &namespace);

    let phase = if error_message.is_some() { "Failed" } else { status.phase.as_str() };
    let message = error_message.map(str::to_string).or_else(|| Some(phase.to_string()));

    let mut conditions = restore.status.as_ref().map(|s| s.conditions.clone()).unwrap_or_default();
    crate::crd::upsert_condition(&mut conditions, Condition::ready(phase == "Completed" || phase == "Running", phase, message.as_deref().unwrap_or(phase)));

    let status = RestoreStatus {
        phase: phase.to_string(),
        conditions,
        message,
        ..status
    };

    api.patch_status(
        &restore.name_any(),
        &PatchParams::apply(APPLY_FIELD_MANAGER),
        &Patch::Merge(serde_json::json!({ "status": status })),
    )
    .await?;
    Ok(())
}
