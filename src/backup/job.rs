//! One-shot Job / scheduled CronJob builders and terminal-status reading
//! (spec.md §4.K steps 4/5). Grounded on the osodevops kafka-backup-operator
//! pattern of driving a backup through a plain `batch/v1` Job and reading
//! its terminal condition back into CR status.

use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec, Job, JobSpec, JobTemplateSpec};
use k8s_openapi::api::core::v1::{Container, EnvVar, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use kube::ResourceExt;

use crate::crd::{Backup, BackupType};
use crate::error::Result;

const APPLY_FIELD_MANAGER: &str = "graphdb-operator-backup";
pub const BACKUP_LABEL_KEY: &str = "graphdb.io/backup";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Running,
    Succeeded,
    Failed,
}

/// Derive the terminal outcome from a Job's status conditions, the
/// idiomatic way to read `batch/v1` Job completion without polling pods.
pub fn job_outcome(job: &Job) -> JobOutcome {
    let Some(status) = &job.status else { return JobOutcome::Running };
    if status.succeeded.unwrap_or(0) > 0 {
        return JobOutcome::Succeeded;
    }
    if status.failed.unwrap_or(0) > 0 {
        return JobOutcome::Failed;
    }
    JobOutcome::Running
}

fn driver_container(backup: &Backup, pod_name: &str, artifact_path: &str) -> Container {
    Container {
        name: "backup-driver".to_string(),
        image: Some("graphdb/backup-driver:latest".to_string()),
        env: Some(vec![
            EnvVar {
                name: "BACKUP_TARGET_POD".to_string(),
                value: Some(pod_name.to_string()),
                ..Default::default()
            },
            EnvVar {
                name: "BACKUP_ARTIFACT_PATH".to_string(),
                value: Some(artifact_path.to_string()),
                ..Default::default()
            },
            EnvVar {
                name: "BACKUP_TYPE".to_string(),
                value: Some(backup_type_str(backup.spec.options.backup_type).to_string()),
                ..Default::default()
            },
        ]),
        ..Default::default()
    }
}

fn backup_type_str(t: BackupType) -> &'static str {
    match t {
        BackupType::Full => "FULL",
        BackupType::Diff => "DIFF",
        BackupType::Auto => "AUTO",
    }
}

fn job_template(backup: &Backup, pod_name: &str, artifact_path: &str, labels: std::collections::BTreeMap<String, String>) -> PodTemplateSpec {
    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labels),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            restart_policy: Some("OnFailure".to_string()),
            containers: vec![driver_container(backup, pod_name, artifact_path)],
            ..Default::default()
        }),
    }
}

fn job_labels(backup: &Backup) -> std::collections::BTreeMap<String, String> {
    let mut labels = std::collections::BTreeMap::new();
    labels.insert(BACKUP_LABEL_KEY.to_string(), backup.name_any());
    labels
}

/// Build the one-shot Job for a non-scheduled backup (spec.md §4.K.4).
pub fn build_backup_job(backup: &Backup, job_name: &str, pod_name: &str, artifact_path: &str) -> Job {
    let labels = job_labels(backup);
    Job {
        metadata: ObjectMeta {
            name: Some(job_name.to_string()),
            namespace: backup.namespace(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference_for(backup)]),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(2),
            template: job_template(backup, pod_name, artifact_path, labels),
            ..Default::default()
        }),
        status: None,
    }
}

/// Build the recurring CronJob for a scheduled backup (spec.md §4.K.5),
/// honoring `suspend`.
pub fn build_backup_cronjob(backup: &Backup, cron_name: &str, pod_name: &str, artifact_path: &str, schedule: &str) -> CronJob {
    let labels = job_labels(backup);
    CronJob {
        metadata: ObjectMeta {
            name: Some(cron_name.to_string()),
            namespace: backup.namespace(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference_for(backup)]),
            ..Default::default()
        },
        spec: Some(CronJobSpec {
            schedule: schedule.to_string(),
            suspend: Some(backup.spec.suspend),
            job_template: JobTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels.clone()),
                    ..Default::default()
                }),
                spec: Some(JobSpec {
                    backoff_limit: Some(2),
                    template: job_template(backup, pod_name, artifact_path, labels),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

pub(super) fn owner_reference_for(backup: &Backup) -> k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference {
    use kube::Resource;
    k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference {
        api_version: Backup::api_version(&()).to_string(),
        kind: Backup::kind(&()).to_string(),
        name: backup.name_any(),
        uid: backup.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

pub async fn apply_job(client: &Client, namespace: &str, job: &Job) -> Result<()> {
    let api: Api<Job> = Api::namespaced(client.clone(), namespace);
    let name = job.name_any();
    api.patch(&name, &PatchParams::apply(APPLY_FIELD_MANAGER).force(), &Patch::Apply(job)).await?;
    Ok(())
}

pub async fn apply_cronjob(client: &Client, namespace: &str, cronjob: &CronJob) -> Result<()> {
    let api: Api<CronJob> = Api::namespaced(client.clone(), namespace);
    let name = cronjob.name_any();
    api.patch(&name, &PatchParams::apply(APPLY_FIELD_MANAGER).force(), &Patch::Apply(cronjob)).await?;
    Ok(())
}

pub async fn get_job(client: &Client, namespace: &str, name: &str) -> Result<Option<Job>> {
    let api: Api<Job> = Api::namespaced(client.clone(), namespace);
    match api.get(name).await {
        Ok(job) => Ok(Some(job)),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
        Err(e) => Err(crate::error::Error::KubeError(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::batch::v1::JobStatus;

    fn job_with(succeeded: Option<i32>, failed: Option<i32>) -> Job {
        Job {
            status: Some(JobStatus {
                succeeded,
                failed,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn outcome_reads_terminal_counters() {
        assert_eq!(job_outcome(&job_with(None, None)), JobOutcome::Running);
        assert_eq!(job_outcome(&job_with(Some(1), None)), JobOutcome::Succeeded);
        assert_eq!(job_outcome(&job_with(None, Some(1))), JobOutcome::Failed);
    }

    #[test]
    fn no_status_is_running() {
        assert_eq!(job_outcome(&Job::default()), JobOutcome::Running);
    }
}
