//! `UserCR` / `RoleCR` / `GrantCR` reconcile loops (spec.md §4.F, §3).
//! Three independent finalizer-driven loops sharing one module since they
//! all drive the same `DbAdminClient` surface and resolve through the same
//! `clusterRef` pattern as `controller::database`.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::events::Recorder;
use kube::runtime::finalizer::{finalizer, Event};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Client, ResourceExt};
use tracing::{error, info, instrument, warn};

use crate::crd::{diff_roles, finalizers, Cluster, Condition, Grant, GrantStatus, RoleResource, RoleStatus, User, UserStatus};
use crate::error::{Error, Result};
use crate::events;

use super::ControllerState;

const APPLY_FIELD_MANAGER: &str = "graphdb-operator";

pub async fn run(state: Arc<ControllerState>) -> Result<()> {
    let client = state.client.clone();

    let users: Api<User> = Api::all(client.clone());
    users
        .list(&ListParams::default().limit(1))
        .await
        .map_err(|e| Error::ConfigError(format!("User CRD not installed: {e}")))?;

    let users_fut = Controller::new(users, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile_user, user_error_policy, state.clone())
        .for_each(|res| async move {
            match res {
                Ok(o) => info!(?o, "user reconciled"),
                Err(e) => warn!(error = %e, "user reconcile failed"),
            }
        });

    let roles: Api<RoleResource> = Api::all(client.clone());
    let roles_fut = Controller::new(roles, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile_role, role_error_policy, state.clone())
        .for_each(|res| async move {
            match res {
                Ok(o) => info!(?o, "role reconciled"),
                Err(e) => warn!(error = %e, "role reconcile failed"),
            }
        });

    let grants: Api<Grant> = Api::all(client.clone());
    let grants_fut = Controller::new(grants, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile_grant, grant_error_policy, state)
        .for_each(|res| async move {
            match res {
                Ok(o) => info!(?o, "grant reconciled"),
                Err(e) => warn!(error = %e, "grant reconcile failed"),
            }
        });

    tokio::join!(users_fut, roles_fut, grants_fut);
    Ok(())
}

async fn resolve_cluster(client: &Client, namespace: &str, cluster_ref: &str) -> Result<Cluster> {
    let api: Api<Cluster> = Api::namespaced(client.clone(), namespace);
    api.get(cluster_ref)
        .await
        .map_err(|_| Error::NotFound(format!("target cluster '{cluster_ref}' not found in namespace '{namespace}'")))
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

// ---------------------------------------------------------------- User ---

#[instrument(skip(ctx, obj), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile_user(obj: Arc<User>, ctx: Arc<ControllerState>) -> Result<Action> {
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<User> = Api::namespaced(ctx.client.clone(), &namespace);
    let recorder = events::recorder_for(ctx.client.clone(), obj.as_ref());

    finalizer(&api, finalizers::USER, obj, |event| async {
        match event {
            Event::Apply(user) => apply_user(&ctx, &recorder, &user).await,
            Event::Cleanup(user) => cleanup_user(&ctx, &user).await,
        }
    })
    .await
    .map_err(Error::from)
}

fn user_error_policy(_obj: Arc<User>, error: &Error, _ctx: Arc<ControllerState>) -> Action {
    retry_action(error, "User")
}

async fn read_password(client: &Client, namespace: &str, secret_name: &str) -> Result<String> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let secret = api.get(secret_name).await?;
    secret
        .data
        .as_ref()
        .and_then(|d| d.get("password"))
        .map(|b| String::from_utf8_lossy(&b.0).to_string())
        .ok_or_else(|| Error::ConfigError(format!("secret '{secret_name}' has no 'password' key")))
}

async fn apply_user(ctx: &ControllerState, recorder: &Recorder, user: &User) -> Result<Action> {
    let namespace = user.namespace().unwrap_or_else(|| "default".to_string());
    let cluster = match resolve_cluster(&ctx.client, &namespace, &user.spec.cluster_ref).await {
        Ok(c) if c.status.as_ref().map(|s| s.phase.as_str()) == Some("Ready") => c,
        _ => {
            update_user_status(&ctx.client, user, "Waiting", "target cluster not ready", &[]).await?;
            return Ok(Action::requeue(Duration::from_secs(15)));
        }
    };

    let Some(pod) = super::primary_admin_pod(&ctx.client, &cluster).await else {
        update_user_status(&ctx.client, user, "Waiting", "no primary member pod available", &[]).await?;
        return Ok(Action::requeue(Duration::from_secs(15)));
    };
    let Some(admin) = ctx.dbadmin_for(&pod) else {
        update_user_status(&ctx.client, user, "Waiting", "admin endpoint unreachable", &[]).await?;
        return Ok(Action::requeue(Duration::from_secs(15)));
    };

    let username = &user.spec.username;
    let password = read_password(&ctx.client, &namespace, &user.spec.password_secret).await?;

    let current_roles = match admin.get_user_roles(username).await {
        Ok(roles) => roles,
        Err(_) => {
            admin.create_user(username, &password).await?;
            Vec::new()
        }
    };

    if user.spec.suspended {
        admin.suspend_user(username).await?;
    } else {
        admin.activate_user(username).await?;
    }

    let desired = user.spec.desired_roles();
    let diff = diff_roles(&current_roles, &desired);
    for role in &diff.to_grant {
        admin.grant_role_to_user(username, role).await?;
    }
    for role in &diff.to_revoke {
        admin.revoke_role_from_user(username, role).await?;
    }

    events::normal(recorder, events::reason::USER_READY, format!("user '{username}' is in sync")).await?;
    update_user_status(&ctx.client, user, "Ready", "user is in sync", &desired).await?;
    Ok(Action::requeue(Duration::from_secs(60)))
}

async fn cleanup_user(ctx: &ControllerState, user: &User) -> Result<Action> {
    let namespace = user.namespace().unwrap_or_else(|| "default".to_string());
    if let Ok(cluster) = resolve_cluster(&ctx.client, &namespace, &user.spec.cluster_ref).await {
        if let Some(pod) = super::primary_admin_pod(&ctx.client, &cluster).await {
            if let Some(admin) = ctx.dbadmin_for(&pod) {
                if let Err(e) = admin.drop_user(&user.spec.username).await {
                    warn!(error = %e, user = %user.spec.username, "failed to drop user during cleanup, proceeding anyway");
                }
            }
        }
    }
    Ok(Action::await_change())
}

async fn update_user_status(client: &Client, user: &User, phase: &str, message: &str, granted_roles: &[String]) -> Result<()> {
    let namespace = user.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<User> = Api::namespaced(client.clone(), &namespace);

    let mut conditions = user.status.as_ref().map(|s| s.conditions.clone()).unwrap_or_default();
    crate::crd::upsert_condition(&mut conditions, Condition::ready(phase == "Ready", phase, message));

    let status = UserStatus {
        phase: phase.to_string(),
        granted_roles: granted_roles.to_vec(),
        conditions,
        message: Some(message.to_string()),
    };

    api.patch_status(&user.name_any(), &PatchParams::apply(APPLY_FIELD_MANAGER), &Patch::Merge(serde_json::json!({ "status": status })))
        .await?;
    Ok(())
}

// ---------------------------------------------------------------- Role ---

#[instrument(skip(ctx, obj), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile_role(obj: Arc<RoleResource>, ctx: Arc<ControllerState>) -> Result<Action> {
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<RoleResource> = Api::namespaced(ctx.client.clone(), &namespace);
    let recorder = events::recorder_for(ctx.client.clone(), obj.as_ref());

    finalizer(&api, finalizers::ROLE, obj, |event| async {
        match event {
            Event::Apply(role) => apply_role(&ctx, &recorder, &role).await,
            Event::Cleanup(_role) => Ok(Action::await_change()),
        }
    })
    .await
    .map_err(Error::from)
}

fn role_error_policy(_obj: Arc<RoleResource>, error: &Error, _ctx: Arc<ControllerState>) -> Action {
    retry_action(error, "Role")
}

async fn apply_role(ctx: &ControllerState, recorder: &Recorder, role: &RoleResource) -> Result<Action> {
    let namespace = role.namespace().unwrap_or_else(|| "default".to_string());
    let cluster = match resolve_cluster(&ctx.client, &namespace, &role.spec.cluster_ref).await {
        Ok(c) if c.status.as_ref().map(|s| s.phase.as_str()) == Some("Ready") => c,
        _ => {
            update_role_status(&ctx.client, role, "Waiting", "target cluster not ready").await?;
            return Ok(Action::requeue(Duration::from_secs(15)));
        }
    };

    let Some(pod) = super::primary_admin_pod(&ctx.client, &cluster).await else {
        return Ok(Action::requeue(Duration::from_secs(15)));
    };
    let Some(admin) = ctx.dbadmin_for(&pod) else {
        return Ok(Action::requeue(Duration::from_secs(15)));
    };

    let name = &role.spec.name;
    admin.set_allowed_procedures(name, &role.spec.allowed_procedures).await?;
    admin.set_denied_procedures(name, &role.spec.denied_procedures).await?;
    admin.enable_sandbox_mode(name, role.spec.sandbox_mode).await?;

    events::normal(recorder, events::reason::ROLE_READY, format!("role '{name}' procedure policy applied")).await?;
    update_role_status(&ctx.client, role, "Ready", "role procedure policy applied").await?;
    Ok(Action::requeue(Duration::from_secs(60)))
}

async fn update_role_status(client: &Client, role: &RoleResource, phase: &str, message: &str) -> Result<()> {
    let namespace = role.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<RoleResource> = Api::namespaced(client.clone(), &namespace);

    let mut conditions = role.status.as_ref().map(|s| s.conditions.clone()).unwrap_or_default();
    crate::crd::upsert_condition(&mut conditions, Condition::ready(phase == "Ready", phase, message));

    let status = RoleStatus {
        phase: phase.to_string(),
        conditions,
        message: Some(message.to_string()),
    };

    api.patch_status(&role.name_any(), &PatchParams::apply(APPLY_FIELD_MANAGER), &Patch::Merge(serde_json::json!({ "status": status })))
        .await?;
    Ok(())
}

// --------------------------------------------------------------- Grant ---

#[instrument(skip(ctx, obj), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile_grant(obj: Arc<Grant>, ctx: Arc<ControllerState>) -> Result<Action> {
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<Grant> = Api::namespaced(ctx.client.clone(), &namespace);
    let recorder = events::recorder_for(ctx.client.clone(), obj.as_ref());

    finalizer(&api, finalizers::GRANT, obj, |event| async {
        match event {
            Event::Apply(grant) => apply_grant(&ctx, &recorder, &grant).await,
            Event::Cleanup(grant) => cleanup_grant(&ctx, &grant).await,
        }
    })
    .await
    .map_err(Error::from)
}

fn grant_error_policy(_obj: Arc<Grant>, error: &Error, _ctx: Arc<ControllerState>) -> Action {
    retry_action(error, "Grant")
}

async fn apply_grant(ctx: &ControllerState, recorder: &Recorder, grant: &Grant) -> Result<Action> {
    let namespace = grant.namespace().unwrap_or_else(|| "default".to_string());
    let cluster = match resolve_cluster(&ctx.client, &namespace, &grant.spec.cluster_ref).await {
        Ok(c) if c.status.as_ref().map(|s| s.phase.as_str()) == Some("Ready") => c,
        _ => {
            update_grant_status(&ctx.client, grant, "Waiting", "target cluster not ready").await?;
            return Ok(Action::requeue(Duration::from_secs(15)));
        }
    };

    let Some(pod) = super::primary_admin_pod(&ctx.client, &cluster).await else {
        return Ok(Action::requeue(Duration::from_secs(15)));
    };
    let Some(admin) = ctx.dbadmin_for(&pod) else {
        return Ok(Action::requeue(Duration::from_secs(15)));
    };

    admin.grant_role_to_user(&grant.spec.user_ref, &grant.spec.role_ref).await?;

    events::normal(recorder, events::reason::GRANT_APPLIED, format!("granted role '{}' to user '{}'", grant.spec.role_ref, grant.spec.user_ref)).await?;
    update_grant_status(&ctx.client, grant, "Ready", "grant applied").await?;
    Ok(Action::requeue(Duration::from_secs(60)))
}

async fn cleanup_grant(ctx: &ControllerState, grant: &Grant) -> Result<Action> {
    let namespace = grant.namespace().unwrap_or_else(|| "default".to_string());
    if let Ok(cluster) = resolve_cluster(&ctx.client, &namespace, &grant.spec.cluster_ref).await {
        if let Some(pod) = super::primary_admin_pod(&ctx.client, &cluster).await {
            if let Some(admin) = ctx.dbadmin_for(&pod) {
                if let Err(e) = admin.revoke_role_from_user(&grant.spec.user_ref, &grant.spec.role_ref).await {
                    warn!(error = %e, "failed to revoke role during grant cleanup, proceeding anyway");
                }
            }
        }
    }
    Ok(Action::await_change())
}

async fn update_grant_status(client: &Client, grant: &Grant, phase: &str, message: &str) -> Result<()> {
    let namespace = grant.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<Grant> = Api::namespaced(client.clone(), &namespace);

    let mut conditions = grant.status.as_ref().map(|s| s.conditions.clone()).unwrap_or_default();
    crate::crd::upsert_condition(&mut conditions, Condition::ready(phase == "Ready", phase, message));

    let status = GrantStatus {
        phase: phase.to_string(),
        conditions,
        message: Some(message.to_string()),
    };

    api.patch_status(&grant.name_any(), &PatchParams::apply(APPLY_FIELD_MANAGER), &Patch::Merge(serde_json::json!({ "status": status })))
        .await?;
    Ok(())
}
