//! Kubernetes-side configuration, loaded from environment variables,
//! matching spec.md §6's K8s env var group.

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct K8sConfig {
    pub namespace: String,
    pub secret_name: String,
    pub application_name: String,
    pub ttl_seconds_after_finished: i64,
    pub active_deadline_seconds: i64,
    pub scanner_cpu_limit: String,
    pub scanner_cpu_request: String,
    pub scanner_memory_limit: String,
    pub scanner_memory_request: String,
    pub clientmanager_image_with_tag: String,
    pub this_image_with_tag: String,
    pub sidecar_s3_lifetime_seconds: u64,
}

impl K8sConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            namespace: std::env::var("K8S_NAMESPACE").unwrap_or_else(|_| "skydriver".to_string()),
            secret_name: std::env::var("K8S_SECRET_NAME")
                .unwrap_or_else(|_| "skydriver-secrets".to_string()),
            application_name: std::env::var("K8S_APPLICATION_NAME")
                .unwrap_or_else(|_| "skydriver".to_string()),
            ttl_seconds_after_finished: std::env::var("K8S_TTL_SECONDS_AFTER_FINISHED")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()
                .context("invalid K8S_TTL_SECONDS_AFTER_FINISHED")?,
            active_deadline_seconds: std::env::var("K8S_ACTIVE_DEADLINE_SECONDS")
                .unwrap_or_else(|_| "86400".to_string())
                .parse()
                .context("invalid K8S_ACTIVE_DEADLINE_SECONDS")?,
            scanner_cpu_limit: std::env::var("K8S_SCANNER_CPU_LIMIT")
                .unwrap_or_else(|_| "1".to_string()),
            scanner_cpu_request: std::env::var("K8S_SCANNER_CPU_REQUEST")
                .unwrap_or_else(|_| "500m".to_string()),
            scanner_memory_limit: std::env::var("K8S_SCANNER_MEMORY_LIMIT")
                .unwrap_or_else(|_| "1Gi".to_string()),
            scanner_memory_request: std::env::var("K8S_SCANNER_MEMORY_REQUEST")
                .unwrap_or_else(|_| "512Mi".to_string()),
            clientmanager_image_with_tag: std::env::var("CLIENTMANAGER_IMAGE_WITH_TAG")
                .context("CLIENTMANAGER_IMAGE_WITH_TAG required")?,
            this_image_with_tag: std::env::var("THIS_IMAGE_WITH_TAG")
                .unwrap_or_else(|_| "skydriver:latest".to_string()),
            sidecar_s3_lifetime_seconds: std::env::var(
                "K8S_SCANNER_SIDECAR_S3_LIFETIME_SECONDS",
            )
            .unwrap_or_else(|_| "1800".to_string())
            .parse()
            .context("invalid K8S_SCANNER_SIDECAR_S3_LIFETIME_SECONDS")?,
        })
    }
}
