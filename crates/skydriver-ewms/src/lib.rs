//! Client for the External Workflow Management Service (EWMS): cached
//! reads of workflow/taskforce/deactivation state, fire-and-forget
//! abort/finish signals.

mod cache;

use async_trait::async_trait;
use cache::TtlCache;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

/// TTL for workflow-state reads, per spec.md §4.6.
const READ_CACHE_TTL: Duration = Duration::from_secs(60);

pub fn make_s3_object_key(scan_id: &str) -> String {
    format!("{scan_id}-s3-object")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskforceInfo {
    pub taskforce_uuid: String,
    pub cluster_id: String,
    #[serde(default)]
    pub compound_statuses: HashMap<String, HashMap<String, u64>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkforceStatuses {
    /// `{job_status: {pilot_status: count}}`, merged across all taskforces.
    pub statuses: HashMap<String, HashMap<String, u64>>,
    /// Sum of `RUNNING` pilot counts. Only this status is safe to sum
    /// across taskforces — others may double-count pilots transitioning
    /// between taskforces.
    pub n_running: u64,
}

#[async_trait]
pub trait EwmsClient: Send + Sync {
    async fn get_deactivated_type(&self, workflow_id: &str) -> Option<String>;
    async fn get_taskforce_infos(&self, workflow_id: &str) -> Vec<TaskforceInfo>;
    async fn get_workforce_statuses(&self, workflow_id: &str) -> WorkforceStatuses;
    /// Fire-and-forget: errors are logged, never surfaced, because the
    /// scan's local state has already changed and EWMS will eventually
    /// reconcile on its own.
    async fn abort(&self, workflow_id: &str);
    async fn finished(&self, workflow_id: &str);
    /// One HTTP POST that allocates a new workflow; the caller persists
    /// the returned id on the manifest.
    async fn request_workflow(&self, scan_id: &str) -> Result<String, String>;
}

pub struct HttpEwmsClient {
    base_url: String,
    http: reqwest::Client,
    deactivated_cache: TtlCache<Option<String>>,
    taskforce_cache: TtlCache<Vec<TaskforceInfo>>,
}

impl HttpEwmsClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::new(),
            deactivated_cache: TtlCache::new(READ_CACHE_TTL),
            taskforce_cache: TtlCache::new(READ_CACHE_TTL),
        }
    }

    fn is_pending(workflow_id: &str) -> bool {
        workflow_id.is_empty() || workflow_id == skydriver_core::PENDING_EWMS_WORKFLOW
    }

    async fn post_action(&self, workflow_id: &str, action: &str) {
        if Self::is_pending(workflow_id) {
            return;
        }
        let url = format!("{}/v0/workflows/{}/actions/{}", self.base_url, workflow_id, action);
        if let Err(e) = self.http.post(&url).send().await {
            warn!("EWMS {} action failed for workflow {}: {}", action, workflow_id, e);
        }
    }
}

#[async_trait]
impl EwmsClient for HttpEwmsClient {
    async fn get_deactivated_type(&self, workflow_id: &str) -> Option<String> {
        if Self::is_pending(workflow_id) {
            return None;
        }
        if let Some(cached) = self.deactivated_cache.get(workflow_id) {
            return cached;
        }

        let url = format!("{}/v0/workflows/{}", self.base_url, workflow_id);
        let value: Option<String> = match self.http.get(&url).send().await {
            Ok(resp) => match resp.json::<serde_json::Value>().await {
                Ok(body) => body
                    .get("deactivated")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string()),
                Err(e) => {
                    warn!("EWMS workflow read parse failed: {}", e);
                    None
                }
            },
            Err(e) => {
                warn!("EWMS workflow read failed for {}: {}", workflow_id, e);
                None
            }
        };

        self.deactivated_cache
            .set(workflow_id.to_string(), value.clone());
        value
    }

    async fn get_taskforce_infos(&self, workflow_id: &str) -> Vec<TaskforceInfo> {
        if Self::is_pending(workflow_id) {
            return Vec::new();
        }
        if let Some(cached) = self.taskforce_cache.get(workflow_id) {
            return cached;
        }

        let url = format!("{}/v0/query/taskforces", self.base_url);
        let body = serde_json::json!({"query": {"workflow_id": workflow_id}});
        let infos: Vec<TaskforceInfo> = match self.http.post(&url).json(&body).send().await {
            Ok(resp) => match resp.json::<serde_json::Value>().await {
                Ok(v) => v
                    .get("taskforces")
                    .and_then(|t| serde_json::from_value(t.clone()).ok())
                    .unwrap_or_default(),
                Err(e) => {
                    warn!("EWMS taskforce read parse failed: {}", e);
                    Vec::new()
                }
            },
            Err(e) => {
                warn!("EWMS taskforce query failed for {}: {}", workflow_id, e);
                Vec::new()
            }
        };

        self.taskforce_cache.set(workflow_id.to_string(), infos.clone());
        infos
    }

    async fn get_workforce_statuses(&self, workflow_id: &str) -> WorkforceStatuses {
        let infos = self.get_taskforce_infos(workflow_id).await;
        merge_workforce_statuses(&infos)
    }

    async fn abort(&self, workflow_id: &str) {
        self.post_action(workflow_id, "abort").await;
    }

    async fn finished(&self, workflow_id: &str) {
        self.post_action(workflow_id, "finished").await;
    }

    async fn request_workflow(&self, scan_id: &str) -> Result<String, String> {
        let url = format!("{}/v0/workflows", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(&serde_json::json!({"scan_id": scan_id}))
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let body: serde_json::Value = resp.json().await.map_err(|e| e.to_string())?;
        body.get("workflow_id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| "EWMS response missing workflow_id".to_string())
    }
}

fn merge_workforce_statuses(infos: &[TaskforceInfo]) -> WorkforceStatuses {
    let mut merged: HashMap<String, HashMap<String, u64>> = HashMap::new();
    for info in infos {
        for (job_status, pilot_counts) in &info.compound_statuses {
            let entry = merged.entry(job_status.clone()).or_default();
            for (pilot_status, count) in pilot_counts {
                *entry.entry(pilot_status.clone()).or_insert(0) += count;
            }
        }
    }
    let n_running = merged
        .values()
        .filter_map(|pilot_counts| pilot_counts.get("RUNNING"))
        .sum();
    WorkforceStatuses {
        statuses: merged,
        n_running,
    }
}

/// Deterministic in-memory double for tests — no network, no caching
/// delay, so S1-S6-style scenarios can assert exact call counts.
#[derive(Default)]
pub struct FakeEwmsClient {
    pub deactivated: std::sync::Mutex<HashMap<String, String>>,
    pub taskforces: std::sync::Mutex<HashMap<String, Vec<TaskforceInfo>>>,
    pub aborted: std::sync::Mutex<Vec<String>>,
    pub finished_calls: std::sync::Mutex<Vec<String>>,
    pub next_workflow_id: std::sync::Mutex<u64>,
}

impl FakeEwmsClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EwmsClient for FakeEwmsClient {
    async fn get_deactivated_type(&self, workflow_id: &str) -> Option<String> {
        self.deactivated.lock().unwrap().get(workflow_id).cloned()
    }

    async fn get_taskforce_infos(&self, workflow_id: &str) -> Vec<TaskforceInfo> {
        self.taskforces
            .lock()
            .unwrap()
            .get(workflow_id)
            .cloned()
            .unwrap_or_default()
    }

    async fn get_workforce_statuses(&self, workflow_id: &str) -> WorkforceStatuses {
        let infos = self.get_taskforce_infos(workflow_id).await;
        merge_workforce_statuses(&infos)
    }

    async fn abort(&self, workflow_id: &str) {
        self.aborted.lock().unwrap().push(workflow_id.to_string());
    }

    async fn finished(&self, workflow_id: &str) {
        self.finished_calls.lock().unwrap().push(workflow_id.to_string());
    }

    async fn request_workflow(&self, _scan_id: &str) -> Result<String, String> {
        let mut counter = self.next_workflow_id.lock().unwrap();
        *counter += 1;
        Ok(format!("wf-{}", *counter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn taskforce(job_status: &str, pilot_status: &str, count: u64) -> TaskforceInfo {
        let mut statuses = HashMap::new();
        let mut pilot_counts = HashMap::new();
        pilot_counts.insert(pilot_status.to_string(), count);
        statuses.insert(job_status.to_string(), pilot_counts);
        TaskforceInfo {
            taskforce_uuid: "tf-1".into(),
            cluster_id: "sub-2".into(),
            compound_statuses: statuses,
        }
    }

    #[test]
    fn merges_running_counts_across_taskforces() {
        let infos = vec![
            taskforce("running", "RUNNING", 3),
            taskforce("running", "RUNNING", 5),
        ];
        let merged = merge_workforce_statuses(&infos);
        assert_eq!(merged.n_running, 8);
    }

    #[tokio::test]
    async fn fake_client_records_abort_calls() {
        let client = FakeEwmsClient::new();
        client.abort("wf-1").await;
        client.abort("wf-2").await;
        assert_eq!(*client.aborted.lock().unwrap(), vec!["wf-1", "wf-2"]);
    }

    #[tokio::test]
    async fn fake_request_workflow_allocates_distinct_ids() {
        let client = FakeEwmsClient::new();
        let a = client.request_workflow("scan-a").await.unwrap();
        let b = client.request_workflow("scan-b").await.unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn s3_object_key_is_deterministic() {
        assert_eq!(make_s3_object_key("scan-1"), "scan-1-s3-object");
    }
}
