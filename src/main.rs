//! graphdb-operator entry point: boots telemetry, leader election, the
//! reconcile loops, and (optionally) the REST API and metrics servers.

use std::sync::Arc;
use std::time::Duration;

use graphdb_operator::autoscale::MetricSample;
use graphdb_operator::cache::{CacheManager, MemoryThresholds};
use graphdb_operator::config::Config;
use graphdb_operator::controller::{self, ControllerState};
use graphdb_operator::{telemetry, Error};
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::load();

    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();
    let fmt_layer = fmt::layer().with_target(true);
    let registry = tracing_subscriber::registry().with(env_filter).with(fmt_layer);

    if config.otlp_endpoint.is_some() {
        let otel_layer = telemetry::init_telemetry();
        registry.with(otel_layer).init();
        info!("OpenTelemetry tracing initialized");
    } else {
        registry.init();
        info!("OpenTelemetry tracing disabled (no OTLP endpoint configured)");
    }

    info!(version = env!("CARGO_PKG_VERSION"), mode = %config.mode, "starting graphdb-operator");

    let client = kube::Client::try_default().await.map_err(Error::KubeError)?;
    info!("connected to Kubernetes cluster");

    let namespace = std::env::var("POD_NAMESPACE").unwrap_or_else(|_| config.lease_namespace.clone());
    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| {
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown-host".to_string())
    });
    info!(holder_id = %hostname, "leader election configured");

    let lock = Arc::new(LeaseLock::new(
        client.clone(),
        &namespace,
        LeaseLockParams {
            lease_name: config.leader_election_id.clone(),
            holder_id: hostname,
            lease_ttl: Duration::from_secs(15),
        },
    ));

    info!("acquiring leader lease before starting reconcile loops");
    loop {
        let lease = lock.try_acquire_or_renew().await.map_err(Error::KubeError)?;
        if lease.acquired_lease {
            info!("acquired leader lease, this replica is now the active controller");
            break;
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
    }

    let renewal_lock = lock.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(5)).await;
            match renewal_lock.try_acquire_or_renew().await {
                Ok(lease) if lease.acquired_lease => {}
                Ok(_) => {
                    tracing::error!("lost leader lease, exiting so another replica can take over");
                    std::process::exit(1);
                }
                Err(e) => tracing::warn!(error = %e, "lease renewal request failed, will retry"),
            }
        }
    });

    let cache = Arc::new(CacheManager::new(config.namespace_prefix.clone(), MemoryThresholds::default()));

    // The wire protocol client (bolt-style driver, TLS handshake) is an
    // external collaborator; no member is reachable until a real driver is
    // wired in here by the deployment integrating this operator.
    let dbadmin_factory: controller::DbAdminFactory = Box::new(|_pod_name: &str| None);

    // External metrics backend integration point (spec.md §1 Non-goals);
    // reports steady-state samples until a real collector is wired in.
    let metrics_sampler: controller::MetricsSampler = Box::new(|_cluster, _role| {
        let sample = MetricSample {
            current: 0.0,
            trend: graphdb_operator::autoscale::Trend::Stable,
        };
        (sample, sample)
    });

    let state = Arc::new(ControllerState::new(client.clone(), cache, dbadmin_factory, metrics_sampler));

    #[cfg(feature = "rest-api")]
    {
        let api_state = state.clone();
        let health_port = config.health_port;
        tokio::spawn(async move {
            if let Err(e) = graphdb_operator::rest_api::run_server(api_state, health_port).await {
                tracing::error!(error = %e, "REST API server exited with error");
            }
        });
    }

    // The Prometheus endpoint is served by the rest_api module's listener
    // machinery, so it only exists when that module is compiled in.
    #[cfg(all(feature = "metrics", feature = "rest-api"))]
    {
        let metrics_port = config.metrics_port;
        tokio::spawn(async move {
            if let Err(e) = graphdb_operator::rest_api::run_metrics_server(metrics_port).await {
                tracing::error!(error = %e, "metrics server exited with error");
            }
        });
    }

    let result = controller::run_controllers(state).await;

    telemetry::shutdown_telemetry();

    result
}
