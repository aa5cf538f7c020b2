//! `UserCR` / `RoleCR` / `GrantCR` — declarative DB users and privileges
//! (spec.md §3). `PUBLIC` is the distinguished role that is never revoked.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;

/// The one role membership that syncing must never revoke.
pub const PUBLIC_ROLE: &str = "PUBLIC";

#[derive(CustomResource, Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "graphdb.io",
    version = "v1",
    kind = "User",
    plural = "users",
    namespaced,
    status = "UserStatus",
    shortname = "gdbu",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct UserSpec {
    pub cluster_ref: String,
    pub username: String,
    pub password_secret: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub suspended: bool,
}

impl UserSpec {
    /// Roles to grant: configured roles plus PUBLIC, deduplicated.
    pub fn desired_roles(&self) -> Vec<String> {
        let mut roles: Vec<String> = self.roles.clone();
        if !roles.iter().any(|r| r == PUBLIC_ROLE) {
            roles.push(PUBLIC_ROLE.to_string());
        }
        roles
    }
}

/// Diff between a user's current and desired role membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleDiff {
    pub to_grant: Vec<String>,
    pub to_revoke: Vec<String>,
}

/// Compute grant/revoke sets idempotently, never revoking PUBLIC.
pub fn diff_roles(current: &[String], desired: &[String]) -> RoleDiff {
    let to_grant = desired
        .iter()
        .filter(|r| !current.contains(r))
        .cloned()
        .collect();
    let to_revoke = current
        .iter()
        .filter(|r| r.as_str() != PUBLIC_ROLE && !desired.contains(r))
        .cloned()
        .collect();
    RoleDiff {
        to_grant,
        to_revoke,
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserStatus {
    #[serde(default)]
    pub phase: String,
    #[serde(default)]
    pub granted_roles: Vec<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(CustomResource, Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "graphdb.io",
    version = "v1",
    kind = "Role",
    plural = "roles",
    namespaced,
    status = "RoleStatus",
    shortname = "gdbrole",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct RoleSpec {
    pub cluster_ref: String,
    pub name: String,
    #[serde(default)]
    pub allowed_procedures: Vec<String>,
    #[serde(default)]
    pub denied_procedures: Vec<String>,
    #[serde(default)]
    pub sandbox_mode: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoleStatus {
    #[serde(default)]
    pub phase: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(CustomResource, Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "graphdb.io",
    version = "v1",
    kind = "Grant",
    plural = "grants",
    namespaced,
    status = "GrantStatus",
    shortname = "gdbg",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct GrantSpec {
    pub cluster_ref: String,
    pub user_ref: String,
    pub role_ref: String,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GrantStatus {
    #[serde(default)]
    pub phase: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_grants_missing_and_revokes_removed() {
        let current = vec!["reader".to_string(), "writer".to_string(), PUBLIC_ROLE.to_string()];
        let desired = vec!["reader".to_string(), "admin".to_string()];
        let diff = diff_roles(&current, &desired);
        assert_eq!(diff.to_grant, vec!["admin".to_string()]);
        assert_eq!(diff.to_revoke, vec!["writer".to_string()]);
    }

    #[test]
    fn diff_never_revokes_public() {
        let current = vec![PUBLIC_ROLE.to_string()];
        let desired: Vec<String> = vec![];
        let diff = diff_roles(&current, &desired);
        assert!(diff.to_revoke.is_empty());
    }

    #[test]
    fn desired_roles_always_includes_public() {
        let spec = UserSpec {
            cluster_ref: "c".into(),
            username: "alice".into(),
            password_secret: "s".into(),
            roles: vec!["reader".into()],
            suspended: false,
        };
        assert!(spec.desired_roles().contains(&PUBLIC_ROLE.to_string()));
    }
}
