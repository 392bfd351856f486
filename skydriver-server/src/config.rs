//! REST server configuration, loaded from environment variables. The
//! Kubernetes-specific group is delegated to `skydriver_k8s::K8sConfig` so
//! the namespace/image/resource tunables are defined in exactly one place.

use anyhow::{Context, Result};
use skydriver_k8s::K8sConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub rest_host: String,
    pub rest_port: u16,

    pub mongodb_host: String,
    pub mongodb_port: u16,
    pub mongodb_auth_user: Option<String>,
    pub mongodb_auth_pass: Option<String>,
    pub db_name: String,

    pub ewms_address: String,

    pub k8s: K8sConfig,

    /// HS256 secret used to verify bearer tokens' `skydriver_role` claim.
    /// Real deployments point this at the OIDC provider's JWKS instead;
    /// a shared secret is the contract-level stand-in (spec.md §1 scopes
    /// the identity provider itself as an external collaborator).
    pub auth_shared_secret: String,

    /// `CI=true` bypasses bearer-token verification entirely, matching
    /// `original_source`'s `is_testing()` escape hatch.
    pub ci_test_mode: bool,

    /// Seconds to wait after a final result before scheduling teardown
    /// (spec.md §4.7).
    pub wait_before_teardown_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            rest_host: std::env::var("REST_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            rest_port: std::env::var("REST_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("invalid REST_PORT")?,

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

            ewms_address: std::env::var("EWMS_ADDRESS").context("EWMS_ADDRESS required")?,

            k8s: K8sConfig::from_env()?,

            auth_shared_secret: std::env::var("AUTH_SHARED_SECRET")
                .unwrap_or_else(|_| "skydriver-dev-secret".to_string()),
            ci_test_mode: std::env::var("CI")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),

            wait_before_teardown_secs: std::env::var("WAIT_BEFORE_TEARDOWN")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .context("invalid WAIT_BEFORE_TEARDOWN")?,
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
