//! Backup sidecar file protocol (spec.md §4.K/§6): the JSON request the
//! job writes and the integer status the sidecar writes back. Neither side
//! of the actual exchange (the job's exec client, the sidecar's shell
//! script) lives in this crate; this module is the wire contract both
//! halves agree on.

use serde::{Deserialize, Serialize};

use crate::crd::BackupType;

pub const REQUEST_PATH: &str = "/backup-requests/backup.request";
pub const STATUS_PATH: &str = "/backup-requests/backup.status";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupRequestFile {
    pub path: String,
    #[serde(rename = "type")]
    pub backup_type: BackupType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}

impl BackupRequestFile {
    pub fn new(path: impl Into<String>, backup_type: BackupType, database: Option<String>) -> Self {
        Self {
            path: path.into(),
            backup_type,
            database,
        }
    }

    pub fn to_json(&self) -> crate::error::Result<String> {
        serde_json::to_string(self).map_err(crate::error::Error::SerdeError)
    }
}

/// Outcome read from `backup.status`: absent means pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidecarStatus {
    Pending,
    Success,
    Failure(i32),
}

pub fn parse_status(raw: Option<&str>) -> SidecarStatus {
    match raw.map(str::trim) {
        None | Some("") => SidecarStatus::Pending,
        Some(s) => match s.parse::<i32>() {
            Ok(0) => SidecarStatus::Success,
            Ok(code) => SidecarStatus::Failure(code),
            Err(_) => SidecarStatus::Failure(-1),
        },
    }
}

/// Artifact directory path for a given backup name and timestamp, per
/// spec.md §6's `<name>-YYYYMMDD-HHMMSS` layout.
pub fn artifact_path(backup_name: &str, timestamp: &str) -> String {
    format!("/data/backups/{backup_name}-{timestamp}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_with_contract_keys() {
        let req = BackupRequestFile::new("/data/backups/nightly-20260115-020000", BackupType::Full, Some("neo4j".into()));
        let json = req.to_json().unwrap();
        assert!(json.contains("\"path\""));
        assert!(json.contains("\"type\":\"FULL\""));
        assert!(json.contains("\"database\":\"neo4j\""));
    }

    #[test]
    fn status_parsing() {
        assert_eq!(parse_status(None), SidecarStatus::Pending);
        assert_eq!(parse_status(Some("")), SidecarStatus::Pending);
        assert_eq!(parse_status(Some("0")), SidecarStatus::Success);
        assert_eq!(parse_status(Some("1")), SidecarStatus::Failure(1));
        assert_eq!(parse_status(Some("not-a-number")), SidecarStatus::Failure(-1));
    }

    #[test]
    fn artifact_path_matches_layout() {
        assert_eq!(artifact_path("nightly", "20260115-020000"), "/data/backups/nightly-20260115-020000");
    }
}
