//! Axum HTTP servers for the read-only REST surface and the Prometheus
//! scrape endpoint. Grounded on the teacher's single-server `axum` setup,
//! split into two listeners so the metrics port can be exposed to a
//! scraper without also exposing the resource-listing API.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::{routing::get, Router};
use kube::api::{Api, ListParams};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::controller::ControllerState;
use crate::crd::{Backup, Cluster, Database};
use crate::error::{Error, Result};

use super::dto::{
    BackupListResponse, BackupSummary, ClusterListResponse, ClusterSummary, DatabaseListResponse, DatabaseSummary,
    ErrorResponse, HealthResponse,
};

/// Run the read-only REST API: health/readiness probes plus resource
/// listing routes for `kubectl-graphdb` and dashboards.
pub async fn run_server(state: Arc<ControllerState>, health_port: u16) -> Result<()> {
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/api/v1/clusters", get(list_clusters))
        .route("/api/v1/clusters/:namespace/:name", get(get_cluster))
        .route("/api/v1/databases", get(list_databases))
        .route("/api/v1/backups", get(list_backups))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], health_port));
    info!("REST API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::ConfigError(format!("failed to bind to {addr}: {e}")))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| Error::ConfigError(format!("REST API server error: {e}")))?;

    Ok(())
}

/// Run the Prometheus scrape endpoint on its own listener.
#[cfg(feature = "metrics")]
pub async fn run_metrics_server(metrics_port: u16) -> Result<()> {
    let app = Router::new().route("/metrics", get(metrics_handler));

    let addr = SocketAddr::from(([0, 0, 0, 0], metrics_port));
    info!("metrics server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::ConfigError(format!("failed to bind to {addr}: {e}")))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| Error::ConfigError(format!("metrics server error: {e}")))?;

    Ok(())
}

#[cfg(feature = "metrics")]
async fn metrics_handler() -> impl IntoResponse {
    crate::metrics::render()
}

async fn healthz() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn readyz(State(state): State<Arc<ControllerState>>) -> impl IntoResponse {
    let clusters: Api<Cluster> = Api::all(state.client.clone());
    match clusters.list(&ListParams::default().limit(1)).await {
        Ok(_) => (StatusCode::OK, Json(HealthResponse { status: "ready".to_string(), version: env!("CARGO_PKG_VERSION").to_string() })).into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse::new("not_ready", &e.to_string())),
        )
            .into_response(),
    }
}

async fn list_clusters(State(state): State<Arc<ControllerState>>) -> impl IntoResponse {
    let api: Api<Cluster> = Api::all(state.client.clone());
    match api.list(&ListParams::default()).await {
        Ok(list) => {
            let items: Vec<ClusterSummary> = list.items.iter().map(ClusterSummary::from).collect();
            Json(ClusterListResponse { total: items.len(), items }).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse::new("list_failed", &e.to_string()))).into_response(),
    }
}

async fn get_cluster(State(state): State<Arc<ControllerState>>, Path((namespace, name)): Path<(String, String)>) -> impl IntoResponse {
    let api: Api<Cluster> = Api::namespaced(state.client.clone(), &namespace);
    match api.get(&name).await {
        Ok(cluster) => Json(ClusterSummary::from(&cluster)).into_response(),
        Err(kube::Error::Api(e)) if e.code == 404 => {
            (StatusCode::NOT_FOUND, Json(ErrorResponse::new("not_found", &format!("cluster '{name}' not found in '{namespace}'")))).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse::new("get_failed", &e.to_string()))).into_response(),
    }
}

async fn list_databases(State(state): State<Arc<ControllerState>>) -> impl IntoResponse {
    let api: Api<Database> = Api::all(state.client.clone());
    match api.list(&ListParams::default()).await {
        Ok(list) => {
            let items: Vec<DatabaseSummary> = list.items.iter().map(DatabaseSummary::from).collect();
            Json(DatabaseListResponse { total: items.len(), items }).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse::new("list_failed", &e.to_string()))).into_response(),
    }
}

async fn list_backups(State(state): State<Arc<ControllerState>>) -> impl IntoResponse {
    let api: Api<Backup> = Api::all(state.client.clone());
    match api.list(&ListParams::default()).await {
        Ok(list) => {
            let items: Vec<BackupSummary> = list.items.iter().map(BackupSummary::from).collect();
            Json(BackupListResponse { total: items.len(), items }).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse::new("list_failed", &e.to_string()))).into_response(),
    }
}
