//! Runner configuration from environment variables. Names mirror spec.md
//! §6's tunables exactly so an operator can reuse the same env file as
//! the REST server.

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub mongodb_host: String,
    pub mongodb_port: u16,
    pub mongodb_auth_user: Option<String>,
    pub mongodb_auth_pass: Option<String>,
    pub db_name: String,

    pub k8s_namespace: String,

    pub ewms_address: String,

    /// Where the watchdog POSTs its own rescan requests ("talk to self").
    pub here_url: String,
    pub skydriver_rest_token: String,

    pub metrics_port: u16,

    /// `LONG_DELAY`: heartbeat log cadence and the low-priority gate
    /// period (spec.md §4.2 steps 1 and 2).
    pub backlog_runner_delay_secs: u64,
    /// `SHORT_DELAY`: sleep between backlog claim attempts.
    pub backlog_runner_short_delay_secs: u64,
    pub backlog_max_attempts: u32,
    /// How long a claimed-but-unfinished entry must sit before it is
    /// eligible to be reclaimed (spec.md §4.2 step 2).
    pub backlog_stale_threshold_secs: f64,

    pub pod_watchdog_delay_secs: u64,
}

impl RunnerConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            mongodb_host: std::env::var("MONGODB_HOST")
                .unwrap_or_else(|_| "localhost".to_string()),
            mongodb_port: std::env::var("MONGODB_PORT")
                .unwrap_or_else(|_| "27017".to_string())
                .parse()
                .context("invalid MONGODB_PORT")?,
            mongodb_auth_user: std::env::var("MONGODB_AUTH_USER").ok(),
            mongodb_auth_pass: std::env::var("MONGODB_AUTH_PASS").ok(),
            db_name: std::env::var("MONGODB_DB_NAME")
                .unwrap_or_else(|_| skydriver_db::DB_NAME_DEFAULT.to_string()),

            k8s_namespace: std::env::var("K8S_NAMESPACE")
                .unwrap_or_else(|_| "skydriver".to_string()),

            ewms_address: std::env::var("EWMS_ADDRESS")
                .context("EWMS_ADDRESS required")?,

            here_url: std::env::var("HERE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            skydriver_rest_token: std::env::var("SKYDRIVER_REST_TOKEN").unwrap_or_default(),

            metrics_port: std::env::var("METRICS_PORT")
                .unwrap_or_else(|_| "9090".to_string())
                .parse()
                .context("invalid METRICS_PORT")?,

            backlog_runner_delay_secs: std::env::var("SCAN_BACKLOG_RUNNER_DELAY")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .context("invalid SCAN_BACKLOG_RUNNER_DELAY")?,
            backlog_runner_short_delay_secs: std::env::var("SCAN_BACKLOG_RUNNER_SHORT_DELAY")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("invalid SCAN_BACKLOG_RUNNER_SHORT_DELAY")?,
            backlog_max_attempts: std::env::var("SCAN_BACKLOG_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("invalid SCAN_BACKLOG_MAX_ATTEMPTS")?,
            backlog_stale_threshold_secs: std::env::var("SCAN_BACKLOG_STALE_THRESHOLD_SECS")
                .unwrap_or_else(|_| "120".to_string())
                .parse()
                .context("invalid SCAN_BACKLOG_STALE_THRESHOLD_SECS")?,

            pod_watchdog_delay_secs: std::env::var("SCAN_POD_WATCHDOG_DELAY")
                .unwrap_or_else(|_| "600".to_string())
                .parse()
                .context("invalid SCAN_POD_WATCHDOG_DELAY")?,
        })
    }

    pub fn mongodb_uri(&self) -> String {
        match (&self.mongodb_auth_user, &self.mongodb_auth_pass) {
            (Some(user), Some(pass)) => format!(
                "mongodb://{user}:{pass}@{}:{}",
                self.mongodb_host, self.mongodb_port
            ),
            _ => format!("mongodb://{}:{}", self.mongodb_host, self.mongodb_port),
        }
    }
}
