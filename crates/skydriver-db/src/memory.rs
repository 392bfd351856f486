//! In-process `DocumentStore` backed by mutexed maps. Enforces the same
//! invariants as `MongoStore` via the shared helpers in `store.rs`, so the
//! spec.md §8 scenarios can run against it without a live MongoDB.

use crate::error::StoreError;
use crate::patch::ManifestPatch;
use crate::store::{apply_manifest_patch, DocumentStore};
use async_trait::async_trait;
use skydriver_core::{BacklogEntry, K8sJobDoc, Manifest, ScanRequest, ScanResult};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct MemoryStore {
    requests: Mutex<HashMap<String, ScanRequest>>,
    manifests: Mutex<HashMap<String, Manifest>>,
    results: Mutex<HashMap<String, ScanResult>>,
    backlog: Mutex<HashMap<String, BacklogEntry>>,
    jobs: Mutex<HashMap<String, K8sJobDoc>>,
    /// Timestamp of the last entry claimed with `include_low_priority=true`;
    /// drives the backlog runner's low-priority gate fast-forward in tests.
    last_low_priority_admission: Mutex<Option<f64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert_scan_request(&self, request: &ScanRequest) -> Result<(), StoreError> {
        let mut map = self.requests.lock().unwrap();
        if map.contains_key(&request.scan_id) {
            return Err(StoreError::AlreadyExists(request.scan_id.clone()));
        }
        map.insert(request.scan_id.clone(), request.clone());
        Ok(())
    }

    async fn get_scan_request(&self, scan_id: &str) -> Result<ScanRequest, StoreError> {
        self.requests
            .lock()
            .unwrap()
            .get(scan_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(scan_id.to_string()))
    }

    async fn append_rescan_id(
        &self,
        scan_id: &str,
        new_scan_id: &str,
    ) -> Result<(), StoreError> {
        let mut map = self.requests.lock().unwrap();
        let request = map
            .get_mut(scan_id)
            .ok_or_else(|| StoreError::NotFound(scan_id.to_string()))?;
        request.rescan_ids.push(new_scan_id.to_string());
        Ok(())
    }

    async fn insert_manifest(&self, manifest: &Manifest) -> Result<(), StoreError> {
        let mut map = self.manifests.lock().unwrap();
        if map.contains_key(&manifest.scan_id) {
            return Err(StoreError::AlreadyExists(manifest.scan_id.clone()));
        }
        map.insert(manifest.scan_id.clone(), manifest.clone());
        Ok(())
    }

    async fn get_manifest(
        &self,
        scan_id: &str,
        include_deleted: bool,
    ) -> Result<Manifest, StoreError> {
        let map = self.manifests.lock().unwrap();
        let manifest = map
            .get(scan_id)
            .ok_or_else(|| StoreError::NotFound(scan_id.to_string()))?;
        if manifest.is_deleted && !include_deleted {
            return Err(StoreError::NotFound(scan_id.to_string()));
        }
        Ok(manifest.clone())
    }

    async fn patch_manifest(
        &self,
        scan_id: &str,
        patch: ManifestPatch,
        now: f64,
    ) -> Result<Manifest, StoreError> {
        let mut map = self.manifests.lock().unwrap();
        let manifest = map
            .get_mut(scan_id)
            .ok_or_else(|| StoreError::NotFound(scan_id.to_string()))?;
        apply_manifest_patch(manifest, patch, now)?;
        Ok(manifest.clone())
    }

    async fn mark_manifest_deleted(&self, scan_id: &str) -> Result<(), StoreError> {
        let mut map = self.manifests.lock().unwrap();
        let manifest = map
            .get_mut(scan_id)
            .ok_or_else(|| StoreError::NotFound(scan_id.to_string()))?;
        manifest.is_deleted = true;
        Ok(())
    }

    async fn insert_k8s_job_doc(&self, doc: &K8sJobDoc) -> Result<(), StoreError> {
        let mut map = self.jobs.lock().unwrap();
        if map.contains_key(&doc.scan_id) {
            return Err(StoreError::AlreadyExists(doc.scan_id.clone()));
        }
        map.insert(doc.scan_id.clone(), doc.clone());
        Ok(())
    }

    async fn get_k8s_job_doc(&self, scan_id: &str) -> Result<K8sJobDoc, StoreError> {
        self.jobs
            .lock()
            .unwrap()
            .get(scan_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(scan_id.to_string()))
    }

    async fn get_result(
        &self,
        scan_id: &str,
        include_deleted: bool,
    ) -> Result<Option<ScanResult>, StoreError> {
        let _ = include_deleted;
        Ok(self.results.lock().unwrap().get(scan_id).cloned())
    }

    async fn put_result(
        &self,
        scan_id: &str,
        skyscan_result: serde_json::Map<String, serde_json::Value>,
        is_final: bool,
    ) -> Result<ScanResult, StoreError> {
        if skyscan_result.is_empty() {
            return self
                .get_result(scan_id, true)
                .await?
                .ok_or_else(|| StoreError::NotFound(scan_id.to_string()));
        }
        let mut map = self.results.lock().unwrap();
        let entry = map.entry(scan_id.to_string()).or_insert_with(|| ScanResult {
            scan_id: scan_id.to_string(),
            skyscan_result: serde_json::Map::new(),
            is_final: false,
        });
        entry.skyscan_result = skyscan_result;
        // is_final is monotone false -> true; never regress.
        entry.is_final = entry.is_final || is_final;
        Ok(entry.clone())
    }

    async fn enqueue_backlog(&self, entry: &BacklogEntry) -> Result<(), StoreError> {
        let mut map = self.backlog.lock().unwrap();
        if map.contains_key(&entry.scan_id) {
            return Err(StoreError::AlreadyExists(entry.scan_id.clone()));
        }
        map.insert(entry.scan_id.clone(), entry.clone());
        Ok(())
    }

    async fn claim_next_backlog(
        &self,
        now: f64,
        stale_threshold_secs: f64,
        include_low_priority: bool,
    ) -> Result<Option<BacklogEntry>, StoreError> {
        let mut map = self.backlog.lock().unwrap();

        let mut eligible: Vec<&mut BacklogEntry> = map
            .values_mut()
            .filter(|e| {
                let not_recently_pending = e
                    .pending_timestamp
                    .map(|p| now - p >= stale_threshold_secs)
                    .unwrap_or(true);
                let priority_ok = e.is_high_priority() || include_low_priority;
                not_recently_pending && priority_ok
            })
            .collect();

        // High priority first, then FIFO by timestamp within a band.
        eligible.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.timestamp.partial_cmp(&b.timestamp).unwrap())
        });

        if let Some(entry) = eligible.into_iter().next() {
            entry.pending_timestamp = Some(now);
            entry.next_attempt += 1;
            if !entry.is_high_priority() {
                *self.last_low_priority_admission.lock().unwrap() = Some(now);
            }
            Ok(Some(entry.clone()))
        } else {
            Ok(None)
        }
    }

    async fn remove_backlog_entry(&self, scan_id: &str) -> Result<(), StoreError> {
        self.backlog.lock().unwrap().remove(scan_id);
        Ok(())
    }

    async fn list_backlog(&self) -> Result<Vec<BacklogEntry>, StoreError> {
        Ok(self.backlog.lock().unwrap().values().cloned().collect())
    }

    async fn find_manifests_started_between(
        &self,
        after: f64,
        before: f64,
    ) -> Result<Vec<Manifest>, StoreError> {
        Ok(self
            .manifests
            .lock()
            .unwrap()
            .values()
            .filter(|m| m.timestamp >= after && m.timestamp <= before)
            .cloned()
            .collect())
    }

    async fn find_scan_ids(&self, ids: &[String]) -> Result<Vec<String>, StoreError> {
        let map = self.manifests.lock().unwrap();
        Ok(ids
            .iter()
            .filter(|id| map.contains_key(id.as_str()))
            .cloned()
            .collect())
    }
}
