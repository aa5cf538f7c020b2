//! Custom Resource Definitions for the graph-DB operator.
//!
//! This module defines every Kubernetes CRD the operator manages: the
//! cluster itself plus its satellite resources (databases, backups/restores,
//! users/roles/grants, plugins).

mod backup;
mod cluster;
mod database;
mod plugin;
mod types;
mod upgrade_status;
mod user;

pub use backup::{
    Backup, BackupOptions, BackupSpec, BackupStatus, BackupStorageSpec, BackupTarget, BackupType,
    CloudStorageSpec, DeletePolicy, EncryptionSpec, PitrOptions, Restore, RestoreHooks,
    RestoreSource, RestoreSpec, RestoreStatus, RetentionSpec, StorageType, TargetKind,
};
pub use cluster::{Cluster, ClusterSpec, ClusterStatus};
pub use database::{Database, DatabaseSpec, DatabaseStatus, InitialData};
pub use plugin::{
    resolve_install_order, Plugin, PluginSecurity, PluginSource, PluginSourceType, PluginSpec,
    PluginStatus,
};
pub use types::*;
pub use upgrade_status::{UpgradePhase, UpgradeProgress, UpgradeStatus};
pub use user::{diff_roles, Grant, GrantSpec, GrantStatus, Role as RoleResource, RoleDiff, RoleSpec, RoleStatus, User, UserSpec, UserStatus, PUBLIC_ROLE};

/// Finalizer names used across the reconcile loops.
pub mod finalizers {
    pub const CLUSTER: &str = "cluster-finalizer";
    pub const BACKUP: &str = "backup-finalizer";
    pub const RESTORE: &str = "restore-finalizer";
    pub const DATABASE: &str = "database-finalizer";
    pub const USER: &str = "user-finalizer";
    pub const ROLE: &str = "role-finalizer";
    pub const GRANT: &str = "grant-finalizer";
    pub const PLUGIN: &str = "plugin-finalizer";
}
