//! Deterministic, spec->desired-object builder functions for every managed
//! object kind (spec.md §4.B). Pure functions: (ClusterCR, role) -> object;
//! invoking them twice on the same input yields byte-identical output
//! (exercised in each submodule's `builder_is_deterministic`-style test).

pub mod config;
pub mod identity;
pub mod labels;
pub mod memory;
pub mod network;
pub mod plugin;
pub mod sidecar;
pub mod workload;

pub use labels::{is_managed, owner_reference, resource_name, standard_labels};
