//! Retention cleanup (spec.md §4.K.7). Pure policy predicate plus the
//! cleanup-job builder that acts on it.
//!
//! Open Question (spec.md §9) resolved: when `maxAgeDays` and `maxCount`
//! disagree, the stricter policy wins — an artifact is deleted if it
//! violates *either* bound, not only both. Safer default for a backup
//! retention feature: under-retaining costs restorability, over-retaining
//! only costs storage.

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{Container, EnvVar, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::crd::{Backup, DeletePolicy, RetentionSpec};
use kube::ResourceExt;

/// One retained artifact's age (in days) and recency rank (0 = newest).
#[derive(Debug, Clone, Copy)]
pub struct ArtifactAge {
    pub age_days: u32,
    pub recency_rank: u32,
}

/// Whether an artifact violates the retention policy and should be
/// deleted. No policy configured means nothing is ever cleaned up.
pub fn should_delete(artifact: ArtifactAge, policy: &RetentionSpec) -> bool {
    let age_violates = policy.max_age_days.map(|max| artifact.age_days > max).unwrap_or(false);
    let count_violates = policy.max_count.map(|max| artifact.recency_rank >= max).unwrap_or(false);
    age_violates || count_violates
}

fn cleanup_job_name(backup: &Backup) -> String {
    format!("{}-backup-cleanup", backup.name_any())
}

/// Build the cleanup job that removes artifacts `should_delete` flags.
/// `retain_policy` governs whether the underlying storage objects are
/// actually deleted (`Delete`) or only the BackupCR bookkeeping (`Retain`).
pub fn build_cleanup_job(backup: &Backup, policy: &RetentionSpec) -> Job {
    let mut env = vec![];
    if let Some(max_age) = policy.max_age_days {
        env.push(EnvVar {
            name: "RETENTION_MAX_AGE_DAYS".to_string(),
            value: Some(max_age.to_string()),
            ..Default::default()
        });
    }
    if let Some(max_count) = policy.max_count {
        env.push(EnvVar {
            name: "RETENTION_MAX_COUNT".to_string(),
            value: Some(max_count.to_string()),
            ..Default::default()
        });
    }
    env.push(EnvVar {
        name: "RETENTION_DELETE_POLICY".to_string(),
        value: Some(match policy.delete_policy {
            DeletePolicy::Delete => "Delete".to_string(),
            DeletePolicy::Retain => "Retain".to_string(),
        }),
        ..Default::default()
    });

    Job {
        metadata: ObjectMeta {
            name: Some(cleanup_job_name(backup)),
            namespace: backup.namespace(),
            owner_references: Some(vec![super::job::owner_reference_for(backup)]),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(1),
            template: PodTemplateSpec {
                metadata: None,
                spec: Some(PodSpec {
                    restart_policy: Some("OnFailure".to_string()),
                    containers: vec![Container {
                        name: "retention-cleanup".to_string(),
                        image: Some("graphdb/backup-driver:latest".to_string()),
                        args: Some(vec!["cleanup".to_string()]),
                        env: Some(env),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_age: Option<u32>, max_count: Option<u32>) -> RetentionSpec {
        RetentionSpec {
            max_age_days: max_age,
            max_count,
            delete_policy: DeletePolicy::Delete,
        }
    }

    #[test]
    fn violates_on_age_alone() {
        let p = policy(Some(7), None);
        assert!(should_delete(ArtifactAge { age_days: 8, recency_rank: 0 }, &p));
        assert!(!should_delete(ArtifactAge { age_days: 7, recency_rank: 0 }, &p));
    }

    #[test]
    fn violates_on_count_alone() {
        let p = policy(None, Some(3));
        assert!(should_delete(ArtifactAge { age_days: 1, recency_rank: 3 }, &p));
        assert!(!should_delete(ArtifactAge { age_days: 1, recency_rank: 2 }, &p));
    }

    #[test]
    fn stricter_of_both_bounds_wins() {
        let p = policy(Some(30), Some(2));
        // Young enough by age, but past the count cap: still deleted.
        assert!(should_delete(ArtifactAge { age_days: 1, recency_rank: 2 }, &p));
        // Within count, but past the age cap: still deleted.
        assert!(should_delete(ArtifactAge { age_days: 31, recency_rank: 0 }, &p));
        // Within both: kept.
        assert!(!should_delete(ArtifactAge { age_days: 1, recency_rank: 0 }, &p));
    }

    #[test]
    fn no_policy_never_deletes() {
        let p = policy(None, None);
        assert!(!should_delete(ArtifactAge { age_days: 9999, recency_rank: 9999 }, &p));
    }
}
