//! Shared application state: an explicit context record carrying the
//! database handle, k8s client, EWMS client, and config — replacing the
//! source's per-request thread-local/module-singleton pattern (spec.md §9).

use std::sync::Arc;

use crate::clusters::ClusterRegistry;
use crate::config::Config;
use crate::docker_tags::DockerTagCache;
use crate::metrics::ServerMetrics;
use skydriver_db::DocumentStore;
use skydriver_ewms::EwmsClient;
use skydriver_k8s::JobLauncher;

pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub ewms: Arc<dyn EwmsClient>,
    pub launcher: Arc<dyn JobLauncher>,
    pub kube_client: Option<kube::Client>,
    pub clusters: ClusterRegistry,
    pub docker_tags: DockerTagCache,
    pub config: Config,
    pub metrics: ServerMetrics,
}
