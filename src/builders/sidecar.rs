//! Backup sidecar container spec and Prometheus scrape annotations
//! (spec.md §4.B).

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, VolumeMount};

pub const BACKUP_REQUESTS_MOUNT: &str = "/backup-requests";
pub const QUERY_MONITORING_PORT: i32 = 2004;
pub const QUERY_MONITORING_PATH: &str = "/metrics";

/// Sidecar container co-located in every member pod, driving backups on
/// behalf of a controlling Job (spec.md §4.K / §6 file protocol). The
/// sidecar itself (and its shell implementation) is out of scope; this
/// builds only the container spec exposing the shared
/// `/backup-requests` volume it polls.
pub fn build_backup_sidecar_container(image: &str) -> Container {
    Container {
        name: "backup-sidecar".to_string(),
        image: Some(image.to_string()),
        volume_mounts: Some(vec![
            VolumeMount {
                name: "backup-requests".to_string(),
                mount_path: BACKUP_REQUESTS_MOUNT.to_string(),
                ..Default::default()
            },
            VolumeMount {
                name: "data".to_string(),
                mount_path: "/data".to_string(),
                ..Default::default()
            },
        ]),
        ..Default::default()
    }
}

/// Prometheus scrape annotations applied to member pods when query
/// monitoring is enabled.
pub fn prometheus_scrape_annotations(port: i32, path: &str) -> BTreeMap<String, String> {
    let mut annotations = BTreeMap::new();
    annotations.insert("prometheus.io/scrape".to_string(), "true".to_string());
    annotations.insert("prometheus.io/port".to_string(), port.to_string());
    annotations.insert("prometheus.io/path".to_string(), path.to_string());
    annotations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scrape_annotations_carry_port_and_path() {
        let annotations = prometheus_scrape_annotations(2004, "/metrics");
        assert_eq!(annotations.get("prometheus.io/port").unwrap(), "2004");
        assert_eq!(annotations.get("prometheus.io/scrape").unwrap(), "true");
    }
}
