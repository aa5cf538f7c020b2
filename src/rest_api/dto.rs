//! Data Transfer Objects for the REST API.

use kube::ResourceExt;
use serde::Serialize;

use crate::crd::{Backup, Cluster, Database};

/// Response for listing clusters.
#[derive(Debug, Serialize)]
pub struct ClusterListResponse {
    pub items: Vec<ClusterSummary>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSummary {
    pub name: String,
    pub namespace: String,
    pub phase: String,
    pub ready_primaries: i32,
    pub ready_secondaries: i32,
    pub desired_primaries: i32,
    pub desired_secondaries: i32,
    pub message: Option<String>,
}

impl From<&Cluster> for ClusterSummary {
    fn from(cluster: &Cluster) -> Self {
        let status = cluster.status.clone().unwrap_or_default();
        Self {
            name: cluster.name_any(),
            namespace: cluster.namespace().unwrap_or_default(),
            phase: status.phase,
            ready_primaries: status.ready_primaries,
            ready_secondaries: status.ready_secondaries,
            desired_primaries: cluster.spec.topology.primaries,
            desired_secondaries: cluster.spec.topology.secondaries,
            message: status.message,
        }
    }
}

/// Response for listing databases.
#[derive(Debug, Serialize)]
pub struct DatabaseListResponse {
    pub items: Vec<DatabaseSummary>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSummary {
    pub name: String,
    pub namespace: String,
    pub cluster_ref: String,
    pub phase: String,
    pub data_imported: bool,
}

impl From<&Database> for DatabaseSummary {
    fn from(db: &Database) -> Self {
        let status = db.status.clone().unwrap_or_default();
        Self {
            name: db.name_any(),
            namespace: db.namespace().unwrap_or_default(),
            cluster_ref: db.spec.cluster_ref.clone(),
            phase: status.phase,
            data_imported: status.data_imported,
        }
    }
}

/// Response for listing backups.
#[derive(Debug, Serialize)]
pub struct BackupListResponse {
    pub items: Vec<BackupSummary>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSummary {
    pub name: String,
    pub namespace: String,
    pub target: String,
    pub phase: String,
    pub last_backup_time: Option<String>,
}

impl From<&Backup> for BackupSummary {
    fn from(backup: &Backup) -> Self {
        let status = backup.status.clone().unwrap_or_default();
        Self {
            name: backup.name_any(),
            namespace: backup.namespace().unwrap_or_default(),
            target: backup.spec.target.name.clone(),
            phase: status.phase,
            last_backup_time: status.last_backup_time,
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
        }
    }
}
