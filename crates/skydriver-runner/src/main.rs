//! skydriver-runner — the backlog runner and pod watchdog that keep
//! scan launches flowing without blocking the REST server's request
//! path (spec.md §4.2, §4.3). Mirrors kalla-worker's shape: an axum
//! health/metrics server alongside `tokio::spawn`ed resilient loops.

mod backlog;
mod config;
mod health;
mod interval;
mod metrics;
mod watchdog;

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use backlog::BacklogRunner;
use config::RunnerConfig;
use health::HealthState;
use interval::IntervalTimer;
use metrics::RunnerMetrics;
use skydriver_db::{DocumentStore, MongoStore};
use skydriver_ewms::{EwmsClient, HttpEwmsClient};
use skydriver_k8s::{JobLauncher, KubeJobLauncher, KubePodInspector, PodInspector};
use watchdog::PodWatchdog;

fn now_unix() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = RunnerConfig::from_env()?;
    info!("Starting skydriver-runner");

    let store: Arc<dyn DocumentStore> = Arc::new(
        MongoStore::connect(&config.mongodb_uri(), &config.db_name).await?,
    );
    info!("Connected to MongoDB at {}:{}", config.mongodb_host, config.mongodb_port);

    let kube_client = kube::Client::try_default().await?;
    let launcher: Arc<dyn JobLauncher> = Arc::new(KubeJobLauncher::new(
        kube_client.clone(),
        &config.k8s_namespace,
    ));
    let pods: Arc<dyn PodInspector> = Arc::new(KubePodInspector::new(
        kube_client,
        &config.k8s_namespace,
    ));
    info!("Connected to Kubernetes (namespace {})", config.k8s_namespace);

    let ewms: Arc<dyn EwmsClient> = Arc::new(HttpEwmsClient::new(config.ewms_address.clone()));

    let metrics = RunnerMetrics::new();

    let ready = Arc::new(std::sync::atomic::AtomicBool::new(true));
    let health_state = Arc::new(HealthState {
        metrics: metrics.clone(),
        ready: ready.clone(),
    });
    let metrics_port = config.metrics_port;
    let health_router = health::health_router(health_state);
    tokio::spawn(async move {
        let addr = format!("0.0.0.0:{}", metrics_port);
        info!("Health/metrics server listening on {}", addr);
        let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
        axum::serve(listener, health_router).await.unwrap();
    });

    let backlog_handle = tokio::spawn(run_backlog_loop(
        store.clone(),
        ewms.clone(),
        launcher.clone(),
        config.clone(),
        metrics.clone(),
    ));
    let watchdog_handle = tokio::spawn(run_watchdog_loop(store.clone(), pods.clone(), config.clone(), metrics.clone()));

    tokio::select! {
        res = backlog_handle => {
            error!("backlog runner task exited unexpectedly: {:?}", res);
        }
        res = watchdog_handle => {
            error!("pod watchdog task exited unexpectedly: {:?}", res);
        }
    }

    Ok(())
}

/// Resilient loop around `BacklogRunner::tick`: on the bare-metal
/// `scan_backlog.py` the entire iteration is wrapped in a try/except
/// that sleeps `SCAN_BACKLOG_RUNNER_DELAY` before retrying; a claim
/// failure (store unreachable) gets the same treatment here.
async fn run_backlog_loop(
    store: Arc<dyn DocumentStore>,
    ewms: Arc<dyn EwmsClient>,
    launcher: Arc<dyn JobLauncher>,
    config: RunnerConfig,
    metrics: RunnerMetrics,
) {
    let runner = BacklogRunner {
        store: store.as_ref(),
        ewms: ewms.as_ref(),
        launcher: launcher.as_ref(),
        max_attempts: config.backlog_max_attempts,
        stale_threshold_secs: config.backlog_stale_threshold_secs,
    };
    let mut heartbeat = IntervalTimer::new(Duration::from_secs(config.backlog_runner_delay_secs));
    let mut low_priority_gate =
        IntervalTimer::new(Duration::from_secs(config.backlog_runner_delay_secs));

    loop {
        if heartbeat.has_elapsed() {
            info!("backlog runner heartbeat");
        }

        let include_low_priority = low_priority_gate.has_elapsed();
        match runner.tick(now_unix(), include_low_priority, &metrics).await {
            backlog::BacklogTick::EwmsRequestFailed { .. }
            | backlog::BacklogTick::K8sCreateFailed { .. } => {
                // Nothing was started; don't make the next low-priority
                // window wait a full LONG_DELAY to open again.
                low_priority_gate.fastforward();
            }
            _ => {}
        }

        tokio::time::sleep(Duration::from_secs(config.backlog_runner_short_delay_secs)).await;
    }
}

async fn run_watchdog_loop(
    store: Arc<dyn DocumentStore>,
    pods: Arc<dyn PodInspector>,
    config: RunnerConfig,
    metrics: RunnerMetrics,
) {
    let watchdog = PodWatchdog {
        store: store.as_ref(),
        pods: pods.as_ref(),
        here_url: config.here_url.clone(),
        rest_token: config.skydriver_rest_token.clone(),
        http: reqwest::Client::new(),
    };
    let mut heartbeat = IntervalTimer::new(Duration::from_secs(config.backlog_runner_delay_secs));

    loop {
        if heartbeat.has_elapsed() {
            info!("pod watchdog heartbeat");
        }
        let rescanned = watchdog.tick(now_unix(), &metrics).await;
        if !rescanned.is_empty() {
            warn!("pod watchdog rescanned {} scan(s)", rescanned.len());
        }
        tokio::time::sleep(Duration::from_secs(config.pod_watchdog_delay_secs)).await;
    }
}
