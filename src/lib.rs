//! graphdb-operator: a Kubernetes operator control plane for distributed
//! graph-database clusters.
//!
//! Reconciles `Cluster`/`Database`/`User`/`Role`/`Grant`/`Plugin`/`Backup`/
//! `Restore` custom resources into running StatefulSets, drives rolling
//! upgrades, autoscaling, split-brain detection and repair, multi-cluster
//! replication, and backup/restore orchestration.

pub mod autoscale;
pub mod backup;
pub mod builders;
pub mod cache;
pub mod config;
pub mod controller;
pub mod crd;
pub mod dbadmin;
pub mod error;
pub mod events;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod multicluster;
#[cfg(feature = "rest-api")]
pub mod rest_api;
pub mod splitbrain;
pub mod telemetry;
pub mod upgrade;
pub mod validate;
pub mod version;

pub use crate::error::{Error, Result};
