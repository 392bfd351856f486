//! skydriver-server — the REST admission and control-plane API (spec.md
//! §4.1, §6). Bootstraps the document store, Kubernetes client, and EWMS
//! client, assembles `AppState`, and serves the axum router.

pub mod auth;
pub mod clusters;
pub mod config;
pub mod docker_tags;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod state;
pub mod teardown;
pub mod util;

use anyhow::Result;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use clusters::ClusterRegistry;
use config::Config;
use docker_tags::DockerTagCache;
use metrics::ServerMetrics;
use skydriver_db::{DocumentStore, MongoStore};
use skydriver_ewms::{EwmsClient, HttpEwmsClient};
use skydriver_k8s::{JobLauncher, KubeJobLauncher};
use state::AppState;

pub async fn run() -> Result<()> {
    let config = Config::from_env()?;
    info!("Starting skydriver-server");

    let store: Arc<dyn DocumentStore> =
        Arc::new(MongoStore::connect(&config.mongodb_uri(), &config.db_name).await?);
    info!(
        "Connected to MongoDB at {}:{}",
        config.mongodb_host, config.mongodb_port
    );

    let kube_client = match kube::Client::try_default().await {
        Ok(client) => Some(client),
        Err(e) => {
            warn!("no Kubernetes client available, job creation and log retrieval will fail: {e}");
            None
        }
    };
    let launcher: Arc<dyn JobLauncher> = match &kube_client {
        Some(client) => Arc::new(KubeJobLauncher::new(client.clone(), &config.k8s.namespace)),
        None => Arc::new(skydriver_k8s::FakeJobLauncher::new()),
    };

    let ewms: Arc<dyn EwmsClient> = Arc::new(HttpEwmsClient::new(config.ewms_address.clone()));

    let state = Arc::new(AppState {
        store,
        ewms,
        launcher,
        kube_client,
        clusters: ClusterRegistry::from_env_or_default(),
        docker_tags: DockerTagCache::new(vec!["1.0.0".to_string()]),
        metrics: ServerMetrics::new(),
        config: config.clone(),
    });

    let app = build_router(state);

    let addr = format!("{}:{}", config.rest_host, config.rest_port);
    info!("REST server listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Builds the full route table (spec.md §6). Exposed separately from
/// [`run`] so integration tests can drive it with `tower::ServiceExt::oneshot`
/// against a fake-backed `AppState`, without binding a socket.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::liveness))
        .route("/metrics", get(handlers::metrics))
        .route("/scan", post(handlers::create_scan))
        .route(
            "/scan/:scan_id",
            get(handlers::get_scan).delete(handlers::delete_scan),
        )
        .route(
            "/scan/:scan_id/manifest",
            get(handlers::get_manifest).patch(handlers::patch_manifest),
        )
        .route(
            "/scan/:scan_id/result",
            get(handlers::get_result).put(handlers::put_result),
        )
        .route("/scan/:scan_id/status", get(handlers::get_status))
        .route("/scan/:scan_id/logs", get(handlers::get_logs))
        .route("/scan/:scan_id/actions/rescan", post(handlers::rescan))
        .route(
            "/scan/:scan_id/actions/add-workers",
            post(handlers::add_workers),
        )
        .route(
            "/scan/:scan_id/actions/get-ewms-workflow-ids",
            get(handlers::get_ewms_workflow_ids),
        )
        .route("/scans/find", post(handlers::find_scans))
        .route("/scans/backlog", get(handlers::list_backlog))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
