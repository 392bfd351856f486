//! Kubernetes-side concerns for SkyDriver: the job-spec factory (pure,
//! see `factory`), env var groups (`envvars`), config loading (`config`),
//! and the `JobLauncher`/`PodInspector` traits that the backlog runner
//! and pod watchdog use to talk to a real or fake cluster.

pub mod config;
pub mod envvars;
pub mod factory;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use kube::api::{Api, DeleteParams, PostParams};
use serde_json::Value;
use thiserror::Error;

pub use config::K8sConfig;

#[derive(Debug, Error)]
pub enum K8sError {
    #[error("kubernetes API error: {0}")]
    Api(String),
    #[error("job spec did not deserialize into a valid Job: {0}")]
    InvalidSpec(String),
}

/// The backlog runner's only point of contact with the cluster: create
/// (and, for teardown, delete) a job from its declarative spec. Kept as
/// a trait so the backlog runner's retry/idempotency logic (spec.md
/// §4.2 step 8) can be tested against a fake that simulates API 5xxs.
#[async_trait]
pub trait JobLauncher: Send + Sync {
    async fn create_job(&self, job_spec: &Value) -> Result<(), K8sError>;
    async fn delete_job(&self, job_name: &str) -> Result<(), K8sError>;
}

/// What the pod watchdog needs to know about a scanner server pod to
/// decide whether it was transiently killed (spec.md §4.3 step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodCondition {
    /// No pod found for the job (never scheduled, or already cleaned up).
    Absent,
    /// Pod exists and its main container is currently running.
    Running,
    /// Pod exists, was previously running, and is not running now, but
    /// its exit does not look like a user deletion or an explicit
    /// application failure — i.e. node eviction, OOM-kill reset by the
    /// kubelet, or a transient image-pull failure.
    TransientlyKilled,
    /// Pod exists and not-running, but for a reason that is *not*
    /// transient (explicit non-zero app exit, or the pod was deleted).
    Other,
}

#[async_trait]
pub trait PodInspector: Send + Sync {
    async fn inspect(&self, job_name: &str) -> PodCondition;
}

pub struct KubeJobLauncher {
    jobs: Api<Job>,
}

impl KubeJobLauncher {
    pub fn new(client: kube::Client, namespace: &str) -> Self {
        Self {
            jobs: Api::namespaced(client, namespace),
        }
    }
}

#[async_trait]
impl JobLauncher for KubeJobLauncher {
    async fn create_job(&self, job_spec: &Value) -> Result<(), K8sError> {
        let job: Job = serde_json::from_value(job_spec.clone())
            .map_err(|e| K8sError::InvalidSpec(e.to_string()))?;
        self.jobs
            .create(&PostParams::default(), &job)
            .await
            .map_err(|e| K8sError::Api(e.to_string()))?;
        Ok(())
    }

    async fn delete_job(&self, job_name: &str) -> Result<(), K8sError> {
        self.jobs
            .delete(job_name, &DeleteParams::background())
            .await
            .map_err(|e| K8sError::Api(e.to_string()))?;
        Ok(())
    }
}

pub struct KubePodInspector {
    pods: Api<k8s_openapi::api::core::v1::Pod>,
}

impl KubePodInspector {
    pub fn new(client: kube::Client, namespace: &str) -> Self {
        Self {
            pods: Api::namespaced(client, namespace),
        }
    }
}

#[async_trait]
impl PodInspector for KubePodInspector {
    async fn inspect(&self, job_name: &str) -> PodCondition {
        let list_params =
            kube::api::ListParams::default().labels(&format!("job-name={job_name}"));
        let pods = match self.pods.list(&list_params).await {
            Ok(p) => p,
            Err(_) => return PodCondition::Absent,
        };
        let Some(pod) = pods.items.into_iter().next() else {
            return PodCondition::Absent;
        };

        let Some(status) = pod.status else {
            return PodCondition::Absent;
        };
        let phase = status.phase.unwrap_or_default();
        if phase == "Running" {
            return PodCondition::Running;
        }

        // Look for a prior Running container status whose termination
        // reason indicates eviction/OOM/transient pull failure rather
        // than a clean user-initiated deletion or an explicit app error.
        let was_running = status
            .container_statuses
            .iter()
            .flatten()
            .any(|c| c.state.as_ref().map(|s| s.running.is_some()).unwrap_or(false) || c.restart_count > 0);

        let deleted_by_user = pod.metadata.deletion_timestamp.is_some();
        if deleted_by_user {
            return PodCondition::Other;
        }

        let transient_reason = status
            .reason
            .as_deref()
            .map(|r| matches!(r, "Evicted" | "NodeAffinity" | "NodeLost" | "OOMKilling"))
            .unwrap_or(false)
            || status
                .container_statuses
                .iter()
                .flatten()
                .any(|c| {
                    c.state
                        .as_ref()
                        .and_then(|s| s.terminated.as_ref())
                        .map(|t| matches!(t.reason.as_deref(), Some("OOMKilled") | Some("Error") if t.exit_code == 137))
                        .unwrap_or(false)
                });

        if was_running && (phase == "Failed" || phase == "Unknown") && transient_reason {
            PodCondition::TransientlyKilled
        } else if was_running && phase == "Failed" {
            PodCondition::Other
        } else {
            PodCondition::Absent
        }
    }
}

/// Deterministic in-memory double for the backlog runner and watchdog
/// tests: records every created/deleted job and lets tests force API
/// failures and pod conditions without a live cluster.
#[derive(Default)]
pub struct FakeJobLauncher {
    pub created: std::sync::Mutex<Vec<Value>>,
    pub deleted: std::sync::Mutex<Vec<String>>,
    pub fail_create: std::sync::atomic::AtomicBool,
}

impl FakeJobLauncher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobLauncher for FakeJobLauncher {
    async fn create_job(&self, job_spec: &Value) -> Result<(), K8sError> {
        if self.fail_create.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(K8sError::Api("simulated API failure".to_string()));
        }
        self.created.lock().unwrap().push(job_spec.clone());
        Ok(())
    }

    async fn delete_job(&self, job_name: &str) -> Result<(), K8sError> {
        self.deleted.lock().unwrap().push(job_name.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakePodInspector {
    pub conditions: std::sync::Mutex<std::collections::HashMap<String, PodCondition>>,
}

impl FakePodInspector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, job_name: &str, condition: PodCondition) {
        self.conditions
            .lock()
            .unwrap()
            .insert(job_name.to_string(), condition);
    }
}

#[async_trait]
impl PodInspector for FakePodInspector {
    async fn inspect(&self, job_name: &str) -> PodCondition {
        self.conditions
            .lock()
            .unwrap()
            .get(job_name)
            .copied()
            .unwrap_or(PodCondition::Absent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_launcher_records_created_jobs() {
        let launcher = FakeJobLauncher::new();
        launcher
            .create_job(&serde_json::json!({"metadata": {"name": "skyscan-a"}}))
            .await
            .unwrap();
        assert_eq!(launcher.created.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn fake_launcher_can_simulate_failure() {
        let launcher = FakeJobLauncher::new();
        launcher
            .fail_create
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let err = launcher
            .create_job(&serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, K8sError::Api(_)));
    }

    #[tokio::test]
    async fn fake_pod_inspector_defaults_to_absent() {
        let inspector = FakePodInspector::new();
        assert_eq!(inspector.inspect("skyscan-a").await, PodCondition::Absent);
        inspector.set("skyscan-a", PodCondition::TransientlyKilled);
        assert_eq!(
            inspector.inspect("skyscan-a").await,
            PodCondition::TransientlyKilled
        );
    }
}
