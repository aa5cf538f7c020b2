//! `PluginCR` — a named installable DB extension (spec.md §3).

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, OpenMap};

#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PluginSourceType {
    Official,
    Community,
    Custom,
    Url,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PluginSource {
    #[serde(rename = "type")]
    pub source_type: PluginSourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PluginSecurity {
    #[serde(default)]
    pub sandbox: bool,
    #[serde(default)]
    pub allowed_procedures: Vec<String>,
}

#[derive(CustomResource, Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "graphdb.io",
    version = "v1",
    kind = "Plugin",
    plural = "plugins",
    namespaced,
    status = "PluginStatus",
    shortname = "gdbp",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct PluginSpec {
    pub cluster_ref: String,
    pub name: String,
    pub version: String,
    pub source: PluginSource,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub config: OpenMap,
    #[serde(default)]
    pub security: PluginSecurity,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PluginStatus {
    #[serde(default)]
    pub phase: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Resolve a bottom-up install order for a set of plugins, rejecting cycles
/// at validation time (spec.md §9 "Cycle avoidance").
pub fn resolve_install_order(plugins: &[PluginSpec]) -> Result<Vec<String>, String> {
    use std::collections::{HashMap, HashSet};

    let by_name: HashMap<&str, &PluginSpec> =
        plugins.iter().map(|p| (p.name.as_str(), p)).collect();

    let mut order = Vec::new();
    let mut visited: HashSet<&str> = HashSet::new();
    let mut on_stack: HashSet<&str> = HashSet::new();

    fn visit<'a>(
        name: &'a str,
        by_name: &HashMap<&'a str, &'a PluginSpec>,
        visited: &mut HashSet<&'a str>,
        on_stack: &mut HashSet<&'a str>,
        order: &mut Vec<String>,
    ) -> Result<(), String> {
        if visited.contains(name) {
            return Ok(());
        }
        if on_stack.contains(name) {
            return Err(format!("dependency cycle detected at plugin '{name}'"));
        }
        on_stack.insert(name);
        if let Some(spec) = by_name.get(name) {
            for dep in &spec.dependencies {
                visit(dep.as_str(), by_name, visited, on_stack, order)?;
            }
        }
        on_stack.remove(name);
        visited.insert(name);
        order.push(name.to_string());
        Ok(())
    }

    for p in plugins {
        visit(&p.name, &by_name, &mut visited, &mut on_stack, &mut order)?;
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plugin(name: &str, deps: &[&str]) -> PluginSpec {
        PluginSpec {
            cluster_ref: "c".into(),
            name: name.into(),
            version: "1.0.0".into(),
            source: PluginSource {
                source_type: PluginSourceType::Official,
                url: None,
                checksum: None,
                registry: None,
            },
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            config: Default::default(),
            security: Default::default(),
        }
    }

    #[test]
    fn resolves_bottom_up_order() {
        let plugins = vec![plugin("apoc-extended", &["apoc-core"]), plugin("apoc-core", &[])];
        let order = resolve_install_order(&plugins).unwrap();
        let core_idx = order.iter().position(|n| n == "apoc-core").unwrap();
        let ext_idx = order.iter().position(|n| n == "apoc-extended").unwrap();
        assert!(core_idx < ext_idx);
    }

    #[test]
    fn rejects_cycles() {
        let plugins = vec![plugin("a", &["b"]), plugin("b", &["a"])];
        assert!(resolve_install_order(&plugins).is_err());
    }
}
