//! Plugin install init-containers (spec.md §4.B). One init container per
//! configured plugin, each fetching and checksum-verifying its artifact
//! into the shared `plugins` volume before the main container starts.

use k8s_openapi::api::core::v1::{Container, EnvVar, VolumeMount};

use crate::crd::Cluster;

pub fn plugin_init_containers(cluster: &Cluster) -> Vec<Container> {
    cluster
        .spec
        .plugins
        .iter()
        .map(|p| Container {
            name: format!("install-plugin-{}", p.name),
            image: Some("graphdb/plugin-installer:latest".to_string()),
            env: Some(vec![
                EnvVar {
                    name: "PLUGIN_NAME".to_string(),
                    value: Some(p.name.clone()),
                    ..Default::default()
                },
                EnvVar {
                    name: "PLUGIN_VERSION".to_string(),
                    value: Some(p.version.clone()),
                    ..Default::default()
                },
            ]),
            volume_mounts: Some(vec![VolumeMount {
                name: "plugins".to_string(),
                mount_path: "/var/lib/graphdb/plugins".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        })
        .collect()
}

/// Verify a downloaded plugin artifact's SHA-256 checksum against the
/// `PluginCR`'s declared `source.checksum` (hex-encoded, `sha256:`-prefixed
/// or bare). Pure helper used by the plugin reconciler before marking a
/// `PluginCR` Ready.
pub fn verify_checksum(artifact: &[u8], expected: &str) -> bool {
    use sha2::{Digest, Sha256};

    let expected = expected.strip_prefix("sha256:").unwrap_or(expected);
    let mut hasher = Sha256::new();
    hasher.update(artifact);
    let digest = hex::encode(hasher.finalize());
    digest.eq_ignore_ascii_case(expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_rejects_wrong_digest() {
        assert!(!verify_checksum(b"hello", "0000000000000000000000000000000000000000000000000000000000000"));
    }

    #[test]
    fn checksum_accepts_sha256_prefix() {
        let mut hasher = sha2::Sha256::new();
        use sha2::Digest;
        hasher.update(b"payload");
        let digest = hex::encode(hasher.finalize());
        assert!(verify_checksum(b"payload", &format!("sha256:{digest}")));
        assert!(verify_checksum(b"payload", &digest));
    }
}
