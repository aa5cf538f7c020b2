//! Controller wiring: shared state and the five finalizer-driven
//! reconcile loops (spec.md §4.F/§6), one per managed CRD kind.

pub mod backup;
pub mod cluster;
pub mod database;
pub mod plugin;
pub mod user;

use std::sync::Arc;

use kube::Client;

use crate::autoscale::{MetricSample, RateLimiter};
use crate::backup::list_pod_candidates;
use crate::cache::CacheManager;
use crate::crd::{Cluster, Role};
use crate::dbadmin::DbAdminClient;
use crate::error::Result;
use crate::multicluster::RemoteClientRegistry;

/// Resolves a DB admin connection for a member pod name, or `None` if the
/// pod is unreachable/not yet provisioned. Boxed so the controller can be
/// tested against a fake wire client without dialing a real cluster.
pub type DbAdminFactory = Box<dyn Fn(&str) -> Option<Box<dyn DbAdminClient>> + Send + Sync>;

/// Bridges the external metrics backend (spec.md §1 Non-goals) into
/// `autoscale::collect_node_metrics`'s pure aggregator.
pub type MetricsSampler = Box<dyn Fn(&crate::crd::Cluster, Role) -> (MetricSample, MetricSample) + Send + Sync>;

/// Shared state handed to every reconcile loop.
pub struct ControllerState {
    pub client: Client,
    pub scale_limiter: RateLimiter,
    pub remote_registry: RemoteClientRegistry,
    pub cache: Arc<CacheManager>,
    dbadmin_factory: DbAdminFactory,
    metrics_sampler: MetricsSampler,
}

impl ControllerState {
    pub fn new(client: Client, cache: Arc<CacheManager>, dbadmin_factory: DbAdminFactory, metrics_sampler: MetricsSampler) -> Self {
        Self {
            client,
            scale_limiter: RateLimiter::default_window(),
            remote_registry: RemoteClientRegistry::new(),
            cache,
            dbadmin_factory,
            metrics_sampler,
        }
    }

    /// Named differently than the `dbadmin_factory` field it wraps so call
    /// sites never hit the field/method name-collision call-syntax trap.
    pub fn dbadmin_for(&self, pod_name: &str) -> Option<Box<dyn DbAdminClient>> {
        (self.dbadmin_factory)(pod_name)
    }

    fn sample_metrics(&self, cluster: &crate::crd::Cluster, role: Role) -> (MetricSample, MetricSample) {
        (self.metrics_sampler)(cluster, role)
    }
}

/// Resolve a deterministic primary pod name to drive admin operations
/// against, shared by the database/user/plugin reconcile loops. Lowest
/// ordinal wins, matching StatefulSet naming (spec.md §4.K.3 uses the same
/// deterministic-pick idiom for backups, preferring a secondary there since
/// a backup only reads; these loops mutate schema/state and so require a
/// writable primary).
pub(crate) async fn primary_admin_pod(client: &Client, cluster: &Cluster) -> Option<String> {
    let candidates = list_pod_candidates(client, cluster).await.ok()?;
    let mut primaries: Vec<_> = candidates.iter().filter(|c| !c.is_secondary).collect();
    primaries.sort_by(|a, b| a.name.cmp(&b.name));
    primaries.first().map(|c| c.name.clone())
}

/// Start every reconcile loop and run until the first one exits (normally
/// only on shutdown signal or an unrecoverable setup error).
pub async fn run_controllers(state: Arc<ControllerState>) -> Result<()> {
    let (cluster_res, database_res, user_res, plugin_res, backup_res) = tokio::join!(
        cluster::run(state.clone()),
        database::run(state.clone()),
        user::run(state.clone()),
        plugin::run(state.clone()),
        backup::run(state.clone()),
    );
    cluster_res?;
    database_res?;
    user_res?;
    plugin_res?;
    backup_res?;
    Ok(())
}
