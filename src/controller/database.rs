//! `DatabaseCR` reconcile loop (spec.md §4.F): creates/ensures a logical
//! database on its target cluster and, on first creation, runs the
//! configured seed statements. Grounded on the same finalizer/Controller
//! wiring as `controller::cluster`, generalized to a loop with no owned
//! Kubernetes objects of its own — every side effect goes through
//! `DbAdminClient` (spec.md §4.C) rather than the Kubernetes API.

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

use crate::crd::{finalizers, Cluster, Condition, Database, DatabaseStatus};
use crate::error::{Error, Result};
use crate::events;

use super::ControllerState;

const APPLY_FIELD_MANAGER: &str = "graphdb-operator";

pub async fn run(state: Arc<ControllerState>) -> Result<()> {
    let client = state.client.clone();
    let databases: Api<Database> = Api::all(client.clone());
    databases
        .list(&ListParams::default().limit(1))
        .await
        .map_err(|e| Error::ConfigError(format!("Database CRD not installed: {e}")))?;

    Controller::new(databases, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, state)
        .for_each(|res| async move {
            match res {
                Ok(o) => info!(?o, "database reconciled"),
                Err(e) => warn!(error = %e, "database reconcile failed"),
            }
        })
        .await;
    Ok(())
}

#[instrument(skip(ctx, obj), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile(obj: Arc<Database>, ctx: Arc<ControllerState>) -> Result<Action> {
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<Database> = Api::namespaced(ctx.client.clone(), &namespace);
    let recorder = events::recorder_for(ctx.client.clone(), obj.as_ref());

    finalizer(&api, finalizers::DATABASE, obj, |event| async {
        match event {
            Event::Apply(db) => apply_database(&ctx, &recorder, &db).await,
            Event::Cleanup(db) => cleanup_database(&ctx, &db).await,
        }
    })
    .await
    .map_err(Error::from)
}

fn error_policy(_obj: Arc<Database>, error: &Error, _ctx: Arc<ControllerState>) -> Action {
    error!(error = %error, "database reconcile error");
    #[cfg(feature = "metrics")]
    crate::metrics::METRICS
        .reconcile_errors_total
        .get_or_create(&crate::metrics::ReconcileErrorLabels { kind: "Database".to_string() })
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

async fn apply_database(ctx: &ControllerState, recorder: &Recorder, db: &Database) -> Result<Action> {
    let namespace = db.namespace().unwrap_or_else(|| "default".to_string());
    let cluster = match resolve_cluster(&ctx.client, &namespace, &db.spec.cluster_ref).await {
        Ok(c) => c,
        Err(_) => {
            update_status(&ctx.client, db, "Waiting", "target cluster not found", false).await?;
            return Ok(Action::requeue(Duration::from_secs(15)));
        }
    };

    if cluster.status.as_ref().map(|s| s.phase.as_str()) != Some("Ready") {
        update_status(&ctx.client, db, "Waiting", "target cluster is not Ready", false).await?;
        return Ok(Action::requeue(Duration::from_secs(15)));
    }

    let Some(pod) = super::primary_admin_pod(&ctx.client, &cluster).await else {
        update_status(&ctx.client, db, "Waiting", "no primary member pod available", false).await?;
        return Ok(Action::requeue(Duration::from_secs(15)));
    };

    let Some(admin) = ctx.dbadmin_for(&pod) else {
        update_status(&ctx.client, db, "Waiting", "admin endpoint unreachable", false).await?;
        return Ok(Action::requeue(Duration::from_secs(15)));
    };

    let name = &db.spec.name;
    let already_imported = db.status.as_ref().map(|s| s.data_imported).unwrap_or(false);

    let exists = admin.database_exists(name).await?;
    if !exists {
        if let Err(e) = admin.create_database(name).await {
            events::warning(recorder, events::reason::DATABASE_CREATION_FAILED, e.to_string()).await?;
            update_status(&ctx.client, db, "Failed", &e.to_string(), already_imported).await?;
            return Err(e);
        }
    }

    let mut data_imported = already_imported;
    if !data_imported {
        if let Some(initial) = &db.spec.initial_data {
            for statement in &initial.cypher_statements {
                admin.execute_cypher(name, statement).await?;
            }
            data_imported = true;
        }
    }

    events::normal(recorder, events::reason::DATABASE_READY, format!("database '{name}' is ready")).await?;
    update_status(&ctx.client, db, "Ready", "database is ready", data_imported).await?;
    Ok(Action::requeue(Duration::from_secs(60)))
}

async fn cleanup_database(ctx: &ControllerState, db: &Database) -> Result<Action> {
    let namespace = db.namespace().unwrap_or_else(|| "default".to_string());
    if let Ok(cluster) = resolve_cluster(&ctx.client, &namespace, &db.spec.cluster_ref).await {
        if let Some(pod) = super::primary_admin_pod(&ctx.client, &cluster).await {
            if let Some(admin) = ctx.dbadmin_for(&pod) {
                if let Err(e) = admin.drop_database(&db.spec.name).await {
                    warn!(error = %e, database = %db.spec.name, "failed to drop database during cleanup, proceeding anyway");
                }
            }
        }
    }
    Ok(Action::await_change())
}

async fn update_status(client: &Client, db: &Database, phase: &str, message: &str, data_imported: bool) -> Result<()> {
    let namespace = db.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<Database> = Api::namespaced(client.clone(), &namespace);

    let mut conditions = db.status.as_ref().map(|s| s.conditions.clone()).unwrap_or_default();
    crate::crd::upsert_condition(&mut conditions, Condition::ready(phase == "Ready", phase, message));

    let status = DatabaseStatus {
        phase: phase.to_string(),
        data_imported,
        conditions,
        message: Some(message.to_string()),
    };

    api.patch_status(
        &db.name_any(),
        &PatchParams::apply(APPLY_FIELD_MANAGER),
        &Patch::Merge(serde_json::json!({ "status": status })),
    )
    .await?;
    Ok(())
}
