//! Read-only HTTP surface (spec.md §6): health/readiness probes, a
//! Prometheus scrape endpoint, and a JSON summary of managed resources for
//! `kubectl-graphdb` and dashboards. Grounded on the teacher's `axum`
//! server, generalized from one `/api/v1/nodes` route to the full managed
//! CRD set.

pub mod dto;
mod server;

pub use server::run_server;
#[cfg(feature = "metrics")]
pub use server::run_metrics_server;
