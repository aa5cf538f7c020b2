//! Backup/restore orchestrator (spec.md §4.K). Grounded on
//! osodevops's kafka-backup-operator job-driven pattern: a controlling
//! `batch/v1` Job/CronJob exec's into the target pod's sidecar rather than
//! running the backup logic in-process.

mod contract;
mod job;
mod restore;
mod retention;
mod target;

pub use contract::{artifact_path, parse_status, BackupRequestFile, SidecarStatus, REQUEST_PATH, STATUS_PATH};
pub use job::{build_backup_cronjob, build_backup_job, job_outcome, JobOutcome};
pub use restore::{build_restore_job, run_hooks};
pub use retention::{build_cleanup_job, should_delete, ArtifactAge};
pub use target::{list_pod_candidates, resolve_target_cluster, select_backup_pod, PodCandidate};

use k8s_openapi::api::batch::v1::{CronJob, Job};
use kube::api::{Api, DeleteParams, ListParams};
use kube::runtime::events::Recorder;
use kube::{Client, ResourceExt};

use crate::builders::labels::backup_job_name;
use crate::crd::{Backup, BackupStatus, Restore, RestoreStatus};
use crate::error::Result;
use crate::events;

/// Reconcile one `BackupCR` through one pass of spec.md §4.K's steps 1-6.
pub async fn reconcile_backup(client: &Client, recorder: &Recorder, backup: &Backup) -> Result<BackupStatus> {
    let default_namespace = backup.namespace().unwrap_or_else(|| "default".to_string());
    let cluster = match resolve_target_cluster(client, &backup.spec.target, &default_namespace).await {
        Ok(c) => c,
        Err(_) => {
            return Ok(BackupStatus {
                phase: "Waiting".to_string(),
                message: Some(format!("target '{}' not found", backup.spec.target.name)),
                ..Default::default()
            })
        }
    };

    if cluster.status.as_ref().map(|s| s.phase.as_str()) != Some("Ready") {
        return Ok(BackupStatus {
            phase: "Waiting".to_string(),
            message: Some("target cluster is not Ready".to_string()),
            ..Default::default()
        });
    }

    if !crate::version::is_min_supported(&cluster.spec.image.tag) {
        events::warning(recorder, events::reason::BACKUP_FAILED, "target cluster image version is not supported for backup").await?;
        return Ok(BackupStatus {
            phase: "Failed".to_string(),
            message: Some(format!("unsupported target version '{}'", cluster.spec.image.tag)),
            ..Default::default()
        });
    }

    let candidates = list_pod_candidates(client, &cluster).await?;
    let Some(pod_name) = select_backup_pod(&candidates) else {
        return Ok(BackupStatus {
            phase: "Waiting".to_string(),
            message: Some("no member pods available to drive backup".to_string()),
            ..Default::default()
        });
    };

    let namespace = backup.namespace().unwrap_or(default_namespace);
    let timestamp = chrono::Utc::now().format("%Y%m%d-%H%M%S").to_string();
    let path = artifact_path(&backup.name_any(), &timestamp);

    if backup.spec.is_scheduled() {
        let schedule = backup.spec.schedule.clone().unwrap_or_default();
        let cron_name = format!("{}-backup-cron", backup.name_any());
        let cronjob = build_backup_cronjob(backup, &cron_name, &pod_name, &path, &schedule);
        job::apply_cronjob(client, &namespace, &cronjob).await?;
        events::normal(recorder, events::reason::BACKUP_SCHEDULED, format!("scheduled backup job '{cron_name}' ({schedule})")).await?;
        return Ok(BackupStatus {
            phase: "Scheduled".to_string(),
            ..Default::default()
        });
    }

    let job_name = backup_job_name(&backup.name_any());
    let existing = job::get_job(client, &namespace, &job_name).await?;

    match existing {
        None => {
            let job = build_backup_job(backup, &job_name, &pod_name, &path);
            job::apply_job(client, &namespace, &job).await?;
            events::normal(recorder, events::reason::BACKUP_STARTED, format!("started backup job '{job_name}'")).await?;
            Ok(BackupStatus {
                phase: "Running".to_string(),
                ..Default::default()
            })
        }
        Some(job) => match job_outcome(&job) {
            JobOutcome::Running => Ok(BackupStatus {
                phase: "Running".to_string(),
                ..Default::default()
            }),
            JobOutcome::Succeeded => {
                events::normal(recorder, events::reason::BACKUP_COMPLETED, format!("backup job '{job_name}' completed")).await?;
                Ok(BackupStatus {
                    phase: "Completed".to_string(),
                    last_backup_time: Some(chrono::Utc::now().to_rfc3339()),
                    ..Default::default()
                })
            }
            JobOutcome::Failed => {
                events::warning(recorder, events::reason::BACKUP_FAILED, format!("backup job '{job_name}' failed")).await?;
                Ok(BackupStatus {
                    phase: "Failed".to_string(),
                    message: Some(format!("job '{job_name}' failed")),
                    ..Default::default()
                })
            }
        },
    }
}

/// Cascade-delete a backup's jobs/cron jobs and, when a retention policy is
/// configured, spawn a cleanup job to reclaim retained artifacts (spec.md
/// §4.K.7).
pub async fn handle_backup_deletion(client: &Client, backup: &Backup) -> Result<()> {
    let namespace = backup.namespace().unwrap_or_else(|| "default".to_string());
    let selector = format!("{}={}", job::BACKUP_LABEL_KEY, backup.name_any());

    let job_api: Api<Job> = Api::namespaced(client.clone(), &namespace);
    job_api.delete_collection(&DeleteParams::default(), &ListParams::default().labels(&selector)).await?;

    let cron_api: Api<CronJob> = Api::namespaced(client.clone(), &namespace);
    cron_api.delete_collection(&DeleteParams::default(), &ListParams::default().labels(&selector)).await?;

    if let Some(policy) = &backup.spec.retention {
        let cleanup = build_cleanup_job(backup, policy);
        job::apply_job(client, &namespace, &cleanup).await?;
    }

    Ok(())
}

/// Reconcile one `RestoreCR`: create the restore job once, run
/// `hooks.pre_restore_cypher` at most once (gated by
/// `status.pre_hooks_executed`, the same once-only pattern
/// `controller::database` uses for `data_imported`), then run
/// `hooks.post_restore_cypher` at most once after the job succeeds.
pub async fn reconcile_restore(
    client: &Client,
    recorder: &Recorder,
    restore: &Restore,
    admin_for: &dyn Fn(&str) -> Option<Box<dyn crate::dbadmin::DbAdminClient>>,
) -> Result<RestoreStatus> {
    let default_namespace = restore.namespace().unwrap_or_else(|| "default".to_string());
    let cluster = resolve_target_cluster(client, &restore.spec.target, &default_namespace).await?;
    let candidates = list_pod_candidates(client, &cluster).await?;
    let Some(pod_name) = select_backup_pod(&candidates) else {
        return Err(crate::error::Error::NotFound("no member pods available to drive restore".to_string()));
    };

    let namespace = restore.namespace().unwrap_or(default_namespace);
    let job_name = format!("{}-restore", restore.name_any());

    let pre_hooks_executed = restore.status.as_ref().is_some_and(|s| s.pre_hooks_executed);
    let mut post_hooks_executed = restore.status.as_ref().is_some_and(|s| s.post_hooks_executed);

    let existing = job::get_job(client, &namespace, &job_name).await?;
    let pre_hooks_executed = if existing.is_none() {
        let job = build_restore_job(restore, &job_name, &pod_name);
        restore::apply_restore_job(client, &namespace, &job).await?;
        events::normal(recorder, "RestoreStarted", format!("started restore job '{job_name}'")).await?;

        if !pre_hooks_executed && !restore.spec.hooks.pre_restore_cypher.is_empty() {
            if let Some(admin) = admin_for(&pod_name) {
                run_hooks(admin.as_ref(), "system", &restore.spec.hooks.pre_restore_cypher).await?;
            }
        }
        true
    } else {
        pre_hooks_executed
    };

    let phase = match existing.as_ref().map(job_outcome) {
        None => "Running".to_string(),
        Some(JobOutcome::Running) => "Running".to_string(),
        Some(JobOutcome::Succeeded) => {
            if !post_hooks_executed && !restore.spec.hooks.post_restore_cypher.is_empty() {
                if let Some(admin) = admin_for(&pod_name) {
                    run_hooks(admin.as_ref(), "system", &restore.spec.hooks.post_restore_cypher).await?;
                }
            }
            post_hooks_executed = true;
            events::normal(recorder, "RestoreCompleted", format!("restore job '{job_name}' completed")).await?;
            "Completed".to_string()
        }
        Some(JobOutcome::Failed) => {
            events::warning(recorder, "RestoreFailed", format!("restore job '{job_name}' failed")).await?;
            "Failed".to_string()
        }
    };

    Ok(RestoreStatus {
        phase,
        pre_hooks_executed,
        post_hooks_executed,
        ..Default::default()
    })
}
