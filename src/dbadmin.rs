//! Abstract DB admin client (spec.md §4.C).
//!
//! The wire protocol itself (bolt-style client, TLS handshake) is an
//! external collaborator (spec.md §1 Non-goals); this module specifies only
//! the typed operation surface that the rest of the engine programs
//! against, grounded on stackabletech `operator-rs`'s trait-heavy style
//! (`status.rs`) for how a capability set is expressed as a trait in this
//! corpus.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{DbErrorKind, Error, Result};

/// One DB member as seen through `ListServers`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub address: String,
    pub role: ServerRole,
    pub state: ServerState,
    pub health: ServerHealth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerRole {
    Primary,
    Secondary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Enabled,
    Disabled,
    Dropped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerHealth {
    Available,
    Unavailable,
}

/// A pod's reported view of cluster membership, used by the split-brain
/// detector (`splitbrain`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterView {
    pub observer: String,
    pub servers: Vec<ServerInfo>,
}

impl ClusterView {
    pub fn enabled_available_addresses(&self) -> std::collections::BTreeSet<String> {
        self.servers
            .iter()
            .filter(|s| s.state == ServerState::Enabled && s.health == ServerHealth::Available)
            .map(|s| s.address.clone())
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct ClusterOverview {
    pub leader: Option<String>,
    pub servers: Vec<ServerInfo>,
}

/// Result of `ExecuteCypher`/`ExecuteQuery`.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub rows: Vec<BTreeMap<String, serde_json::Value>>,
}

/// Typed operation surface a DB admin connection exposes (spec.md §4.C).
/// One implementation per wire protocol version lives outside this crate's
/// hard core; callers depend only on this trait.
#[async_trait]
pub trait DbAdminClient: Send + Sync {
    async fn list_servers(&self) -> Result<Vec<ServerInfo>>;
    async fn get_leader(&self) -> Result<Option<String>>;
    async fn get_cluster_overview(&self) -> Result<ClusterOverview>;
    async fn is_cluster_healthy(&self) -> Result<bool>;
    async fn wait_for_cluster_stabilization(&self, timeout: Duration) -> Result<()>;
    async fn validate_upgrade_safety(&self, target_version: &str) -> Result<()>;

    async fn create_database(&self, name: &str) -> Result<()>;
    async fn drop_database(&self, name: &str) -> Result<()>;
    async fn database_exists(&self, name: &str) -> Result<bool>;
    async fn execute_cypher(&self, database: &str, statement: &str) -> Result<QueryResult>;

    async fn create_user(&self, username: &str, password: &str) -> Result<()>;
    async fn drop_user(&self, username: &str) -> Result<()>;
    async fn suspend_user(&self, username: &str) -> Result<()>;
    async fn activate_user(&self, username: &str) -> Result<()>;
    async fn set_user_property(&self, username: &str, key: &str, value: &str) -> Result<()>;

    async fn grant_role_to_user(&self, username: &str, role: &str) -> Result<()>;
    async fn revoke_role_from_user(&self, username: &str, role: &str) -> Result<()>;
    async fn get_user_roles(&self, username: &str) -> Result<Vec<String>>;

    async fn set_configuration(&self, key: &str, value: &str) -> Result<()>;
    async fn set_allowed_procedures(&self, role: &str, patterns: &[String]) -> Result<()>;
    async fn set_denied_procedures(&self, role: &str, patterns: &[String]) -> Result<()>;
    async fn enable_sandbox_mode(&self, role: &str, enabled: bool) -> Result<()>;

    async fn get_loaded_components(&self) -> Result<Vec<String>>;
    async fn get_version(&self) -> Result<String>;
    async fn execute_query(&self, raw: &str) -> Result<QueryResult>;
}

/// Helper for implementations to build the right error kind for
/// not-yet-connected/unreachable state.
pub fn connect_error(message: impl Into<String>) -> Error {
    Error::db(DbErrorKind::Connect, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(addr: &str, enabled: bool, available: bool) -> ServerInfo {
        ServerInfo {
            address: addr.to_string(),
            role: ServerRole::Primary,
            state: if enabled {
                ServerState::Enabled
            } else {
                ServerState::Disabled
            },
            health: if available {
                ServerHealth::Available
            } else {
                ServerHealth::Unavailable
            },
        }
    }

    #[test]
    fn enabled_available_addresses_filters_correctly() {
        let view = ClusterView {
            observer: "pod-0".to_string(),
            servers: vec![
                server("s0", true, true),
                server("s1", true, false),
                server("s2", false, true),
            ],
        };
        let addrs = view.enabled_available_addresses();
        assert_eq!(addrs.len(), 1);
        assert!(addrs.contains("s0"));
    }
}
