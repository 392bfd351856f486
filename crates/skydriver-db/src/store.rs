//! The `DocumentStore` trait: every persistence operation SkyDriver needs,
//! independent of backend. `MongoStore` (production) and `MemoryStore`
//! (tests, see spec.md §8 scenarios) both implement it and share the
//! invariant-checking logic below so neither backend can drift from the
//! other's semantics.

use crate::error::StoreError;
use crate::patch::ManifestPatch;
use async_trait::async_trait;
use skydriver_core::{BacklogEntry, K8sJobDoc, Manifest, ScanRequest, ScanResult};

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn insert_scan_request(&self, request: &ScanRequest) -> Result<(), StoreError>;
    async fn get_scan_request(&self, scan_id: &str) -> Result<ScanRequest, StoreError>;
    /// Appends `new_scan_id` to the request's `rescan_ids` list.
    async fn append_rescan_id(
        &self,
        scan_id: &str,
        new_scan_id: &str,
    ) -> Result<(), StoreError>;

    async fn insert_manifest(&self, manifest: &Manifest) -> Result<(), StoreError>;
    async fn get_manifest(
        &self,
        scan_id: &str,
        include_deleted: bool,
    ) -> Result<Manifest, StoreError>;
    async fn patch_manifest(
        &self,
        scan_id: &str,
        patch: ManifestPatch,
        now: f64,
    ) -> Result<Manifest, StoreError>;
    async fn mark_manifest_deleted(&self, scan_id: &str) -> Result<(), StoreError>;

    async fn insert_k8s_job_doc(&self, doc: &K8sJobDoc) -> Result<(), StoreError>;
    async fn get_k8s_job_doc(&self, scan_id: &str) -> Result<K8sJobDoc, StoreError>;

    async fn get_result(
        &self,
        scan_id: &str,
        include_deleted: bool,
    ) -> Result<Option<ScanResult>, StoreError>;
    /// Writes the result. An empty `skyscan_result` map is a no-op.
    /// `is_final` is monotone: once true, a later `false` is ignored.
    async fn put_result(
        &self,
        scan_id: &str,
        skyscan_result: serde_json::Map<String, serde_json::Value>,
        is_final: bool,
    ) -> Result<ScanResult, StoreError>;

    async fn enqueue_backlog(&self, entry: &BacklogEntry) -> Result<(), StoreError>;
    /// Atomically claims the oldest eligible entry: not pending within
    /// `stale_threshold_secs` of `now`, and either high-priority or
    /// `include_low_priority` is true. Bumps `next_attempt` and sets
    /// `pending_timestamp = now` on the claimed entry.
    async fn claim_next_backlog(
        &self,
        now: f64,
        stale_threshold_secs: f64,
        include_low_priority: bool,
    ) -> Result<Option<BacklogEntry>, StoreError>;
    async fn remove_backlog_entry(&self, scan_id: &str) -> Result<(), StoreError>;
    async fn list_backlog(&self) -> Result<Vec<BacklogEntry>, StoreError>;

    /// Scan ids started between `after` and `before` (unix seconds),
    /// used by the pod watchdog (spec.md §4.3 step 1).
    async fn find_manifests_started_between(
        &self,
        after: f64,
        before: f64,
    ) -> Result<Vec<Manifest>, StoreError>;

    async fn find_scan_ids(&self, ids: &[String]) -> Result<Vec<String>, StoreError>;
}

/// Shared set-once/monotone validation, applied identically by every
/// backend before it commits a manifest patch.
pub fn apply_manifest_patch(
    manifest: &mut Manifest,
    patch: ManifestPatch,
    now: f64,
) -> Result<(), StoreError> {
    if let Some(event_metadata) = patch.event_metadata {
        match &manifest.event_metadata {
            Some(existing) if !existing.is_empty() && *existing != event_metadata => {
                return Err(StoreError::ImmutableFieldConflict("event_metadata"));
            }
            _ => manifest.event_metadata = Some(event_metadata),
        }
    }
    if let Some(scan_metadata) = patch.scan_metadata {
        match &manifest.scan_metadata {
            Some(existing) if !existing.is_empty() && *existing != scan_metadata => {
                return Err(StoreError::ImmutableFieldConflict("scan_metadata"));
            }
            _ => manifest.scan_metadata = Some(scan_metadata),
        }
    }
    if let Some(progress) = patch.progress {
        manifest.progress = Some(progress);
    }
    if let Some(clusters) = patch.clusters {
        manifest.clusters = clusters;
    }
    if let Some(classifiers) = patch.classifiers {
        manifest.classifiers = classifiers;
    }
    if let Some(ewms_workflow_id) = patch.ewms_workflow_id {
        // Monotone unset -> PENDING -> actual; never regress to unset, and
        // never overwrite an actual id with the pending sentinel.
        let is_regression = matches!(
            &manifest.ewms_workflow_id,
            Some(existing) if existing != skydriver_core::PENDING_EWMS_WORKFLOW
        ) && ewms_workflow_id == skydriver_core::PENDING_EWMS_WORKFLOW;
        if !is_regression {
            manifest.ewms_workflow_id = Some(ewms_workflow_id);
        }
    }
    if let Some(complete) = patch.complete {
        // complete=true is terminal (invariant 4).
        if complete || !manifest.complete {
            manifest.complete = manifest.complete || complete;
        }
    }
    if let Some(replaced_by_scan_id) = patch.replaced_by_scan_id {
        if manifest.replaced_by_scan_id.is_none() {
            manifest.replaced_by_scan_id = Some(replaced_by_scan_id);
        }
    }
    manifest.last_updated = manifest.last_updated.max(now);
    Ok(())
}
