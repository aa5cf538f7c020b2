//! Kubernetes Event emission.
//!
//! Every named event the controller emits goes through this module so the
//! reason strings stay centralized. Grounded on `kube::runtime::events`'s
//! `Recorder`/`Reporter` pair, the idiomatic way this corpus surfaces
//! operator activity to `kubectl describe` without a custom status field.

use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};

use crate::error::Result;

pub const REPORTER_NAME: &str = "graphdb-operator";

pub fn reporter() -> Reporter {
    Reporter {
        controller: REPORTER_NAME.to_string(),
        instance: std::env::var("POD_NAME").ok(),
    }
}

pub fn recorder_for<K>(client: Client, object: &K) -> Recorder
where
    K: Resource<DynamicType = ()>,
{
    Recorder::new(client, reporter(), object.object_ref(&()))
}

pub mod reason {
    pub const VALIDATION_FAILED: &str = "ValidationFailed";
    pub const CLUSTER_READY: &str = "ClusterReady";
    pub const UPGRADE_PAUSED: &str = "UpgradePaused";
    pub const UPGRADE_COMPLETED: &str = "UpgradeCompleted";
    pub const UPGRADE_FAILED: &str = "UpgradeFailed";
    pub const BACKUP_SCHEDULED: &str = "BackupScheduled";
    pub const BACKUP_STARTED: &str = "BackupStarted";
    pub const BACKUP_COMPLETED: &str = "BackupCompleted";
    pub const BACKUP_FAILED: &str = "BackupFailed";
    pub const USER_READY: &str = "UserReady";
    pub const USER_CREATION_FAILED: &str = "UserCreationFailed";
    pub const DATABASE_READY: &str = "DatabaseReady";
    pub const DATABASE_CREATION_FAILED: &str = "DatabaseCreationFailed";
    pub const PLUGIN_READY: &str = "PluginReady";
    pub const PLUGIN_INSTALL_FAILED: &str = "PluginInstallFailed";
    pub const ROLE_READY: &str = "RoleReady";
    pub const GRANT_APPLIED: &str = "GrantApplied";
    pub const SPLIT_BRAIN_DETECTED: &str = "SplitBrainDetected";
    pub const TOPOLOGY_PLACEMENT_CALCULATED: &str = "TopologyPlacementCalculated";
}

async fn publish(recorder: &Recorder, type_: EventType, reason: &str, note: String, action: &str) -> Result<()> {
    recorder
        .publish(Event {
            type_,
            reason: reason.to_string(),
            note: Some(note),
            action: action.to_string(),
            secondary: None,
        })
        .await?;
    Ok(())
}

pub async fn normal(recorder: &Recorder, reason: &str, note: impl Into<String>) -> Result<()> {
    publish(recorder, EventType::Normal, reason, note.into(), reason).await
}

pub async fn warning(recorder: &Recorder, reason: &str, note: impl Into<String>) -> Result<()> {
    publish(recorder, EventType::Warning, reason, note.into(), reason).await
}
