//! Scan backlog runner: the single writer for `ewms_workflow_id`
//! transitions and k8s job creation (spec.md §4.2). `tick` is one
//! iteration of the claim-request-start cycle; `main.rs` drives it in a
//! loop with `SHORT_DELAY` between calls, exactly as the original
//! `scan_backlog.py` does with `asyncio.sleep`.

use crate::metrics::{ResultLabel, RunnerMetrics};
use skydriver_db::{DocumentStore, ManifestPatch};
use skydriver_ewms::EwmsClient;
use skydriver_k8s::JobLauncher;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BacklogTick {
    /// Nothing eligible to claim this round.
    Empty,
    /// Entry purged for exceeding `MAX_ATTEMPTS`.
    AttemptsExhausted { scan_id: String },
    /// Entry purged because its manifest was marked deleted.
    ScanDeleted { scan_id: String },
    /// EWMS workflow request failed; entry left in place for a later claim.
    EwmsRequestFailed { scan_id: String },
    /// Kubernetes job creation failed; entry left in place.
    K8sCreateFailed { scan_id: String },
    /// Job created and the backlog entry removed.
    Started { scan_id: String },
}

pub struct BacklogRunner<'a> {
    pub store: &'a dyn DocumentStore,
    pub ewms: &'a dyn EwmsClient,
    pub launcher: &'a dyn JobLauncher,
    pub max_attempts: u32,
    pub stale_threshold_secs: f64,
}

impl<'a> BacklogRunner<'a> {
    pub async fn tick(
        &self,
        now: f64,
        include_low_priority: bool,
        metrics: &RunnerMetrics,
    ) -> BacklogTick {
        let entry = match self
            .store
            .claim_next_backlog(now, self.stale_threshold_secs, include_low_priority)
            .await
        {
            Ok(Some(e)) => e,
            Ok(None) => return BacklogTick::Empty,
            Err(e) => {
                warn!("backlog claim failed: {e}");
                return BacklogTick::Empty;
            }
        };
        metrics.backlog_claims_total.inc();
        info!(scan_id = %entry.scan_id, next_attempt = entry.next_attempt, "claimed backlog entry");

        if entry.next_attempt > self.max_attempts {
            info!(scan_id = %entry.scan_id, "backlog entry exceeded MAX_ATTEMPTS, purging");
            let _ = self.store.remove_backlog_entry(&entry.scan_id).await;
            metrics.backlog_attempts_exhausted_total.inc();
            return BacklogTick::AttemptsExhausted {
                scan_id: entry.scan_id,
            };
        }

        let manifest = match self.store.get_manifest(&entry.scan_id, true).await {
            Ok(m) => m,
            Err(e) => {
                warn!(scan_id = %entry.scan_id, "backlog entry has no manifest: {e}");
                let _ = self.store.remove_backlog_entry(&entry.scan_id).await;
                return BacklogTick::ScanDeleted {
                    scan_id: entry.scan_id,
                };
            }
        };
        if manifest.is_deleted {
            info!(scan_id = %entry.scan_id, "backlog entry's scan was deleted, purging");
            let _ = self.store.remove_backlog_entry(&entry.scan_id).await;
            return BacklogTick::ScanDeleted {
                scan_id: entry.scan_id,
            };
        }

        let job_doc = match self.store.get_k8s_job_doc(&entry.scan_id).await {
            Ok(d) => d,
            Err(e) => {
                warn!(scan_id = %entry.scan_id, "missing k8s job doc: {e}");
                return BacklogTick::K8sCreateFailed {
                    scan_id: entry.scan_id,
                };
            }
        };

        let workflow_id = match self.ewms.request_workflow(&entry.scan_id).await {
            Ok(id) => id,
            Err(e) => {
                warn!(scan_id = %entry.scan_id, "EWMS workflow request failed: {e}");
                metrics
                    .ewms_workflow_requests
                    .get_or_create(&ResultLabel { result: "error".into() })
                    .inc();
                return BacklogTick::EwmsRequestFailed {
                    scan_id: entry.scan_id,
                };
            }
        };
        metrics
            .ewms_workflow_requests
            .get_or_create(&ResultLabel { result: "ok".into() })
            .inc();

        // Conditional write: the store's monotone ewms_workflow_id rule
        // (unset -> PENDING -> actual) rejects any regression on its own.
        if let Err(e) = self
            .store
            .patch_manifest(
                &entry.scan_id,
                ManifestPatch {
                    ewms_workflow_id: Some(workflow_id),
                    ..Default::default()
                },
                now,
            )
            .await
        {
            warn!(scan_id = %entry.scan_id, "failed to persist ewms_workflow_id: {e}");
        }

        info!(scan_id = %entry.scan_id, "starting scanner instance");
        match self.launcher.create_job(&job_doc.job_spec).await {
            Ok(()) => {
                metrics
                    .k8s_job_creates
                    .get_or_create(&ResultLabel { result: "ok".into() })
                    .inc();
                let _ = self.store.remove_backlog_entry(&entry.scan_id).await;
                BacklogTick::Started {
                    scan_id: entry.scan_id,
                }
            }
            Err(e) => {
                warn!(scan_id = %entry.scan_id, "k8s job creation failed: {e}");
                metrics
                    .k8s_job_creates
                    .get_or_create(&ResultLabel { result: "error".into() })
                    .inc();
                BacklogTick::K8sCreateFailed {
                    scan_id: entry.scan_id,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skydriver_core::{BacklogEntry, K8sJobDoc, Manifest, ScanRequest};
    use skydriver_db::MemoryStore;
    use skydriver_ewms::FakeEwmsClient;
    use skydriver_k8s::FakeJobLauncher;
    use std::collections::BTreeMap;

    fn manifest(scan_id: &str) -> Manifest {
        Manifest {
            scan_id: scan_id.to_string(),
            timestamp: 0.0,
            last_updated: 0.0,
            is_deleted: false,
            priority: 0,
            event_i3live_json_dict_hash: "h".into(),
            ewms_workflow_id: None,
            progress: None,
            event_metadata: None,
            scan_metadata: None,
            clusters: vec![],
            complete: false,
            replaced_by_scan_id: None,
            classifiers: BTreeMap::new(),
        }
    }

    fn request(scan_id: &str) -> ScanRequest {
        ScanRequest {
            scan_id: scan_id.to_string(),
            docker_tag: "1.0.0".into(),
            reco_algo: "algo".into(),
            event_i3live_json_dict: serde_json::Map::new(),
            nsides: BTreeMap::new(),
            is_real_event: true,
            requested_clusters: vec![("sub-2".into(), 1)],
            worker_memory_bytes: 0,
            worker_disk_bytes: 0,
            scanner_server_memory_bytes: 0,
            predictive_scanning_threshold: 1.0,
            max_pixel_reco_time: 60,
            max_worker_runtime: 3600,
            priority: 0,
            classifiers: BTreeMap::new(),
            debug_mode: vec![],
            rescan_ids: vec![],
        }
    }

    async fn seed(store: &MemoryStore, scan_id: &str, priority: i64) {
        let mut m = manifest(scan_id);
        m.priority = priority;
        store.insert_manifest(&m).await.unwrap();
        store.insert_scan_request(&request(scan_id)).await.unwrap();
        store
            .insert_k8s_job_doc(&K8sJobDoc {
                scan_id: scan_id.to_string(),
                job_spec: serde_json::json!({"metadata": {"name": format!("skyscan-{scan_id}")}}),
            })
            .await
            .unwrap();
        store
            .enqueue_backlog(&BacklogEntry {
                scan_id: scan_id.to_string(),
                timestamp: 0.0,
                priority,
                next_attempt: 0,
                pending_timestamp: None,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn starts_job_and_removes_entry_on_success() {
        let store = MemoryStore::new();
        seed(&store, "s1", 0).await;
        let ewms = FakeEwmsClient::new();
        let launcher = FakeJobLauncher::new();
        let runner = BacklogRunner {
            store: &store,
            ewms: &ewms,
            launcher: &launcher,
            max_attempts: 5,
            stale_threshold_secs: 60.0,
        };
        let metrics = RunnerMetrics::new();

        let tick = runner.tick(100.0, true, &metrics).await;
        assert_eq!(tick, BacklogTick::Started { scan_id: "s1".into() });
        assert!(store.list_backlog().await.unwrap().is_empty());
        assert_eq!(launcher.created.lock().unwrap().len(), 1);

        let manifest = store.get_manifest("s1", false).await.unwrap();
        assert_eq!(manifest.ewms_workflow_id, Some("wf-1".to_string()));
    }

    #[tokio::test]
    async fn k8s_failure_leaves_entry_for_retry() {
        let store = MemoryStore::new();
        seed(&store, "s1", 0).await;
        let ewms = FakeEwmsClient::new();
        let launcher = FakeJobLauncher::new();
        launcher
            .fail_create
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let runner = BacklogRunner {
            store: &store,
            ewms: &ewms,
            launcher: &launcher,
            max_attempts: 5,
            stale_threshold_secs: 60.0,
        };
        let metrics = RunnerMetrics::new();

        let tick = runner.tick(100.0, true, &metrics).await;
        assert_eq!(tick, BacklogTick::K8sCreateFailed { scan_id: "s1".into() });
        assert_eq!(store.list_backlog().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn deleted_manifest_purges_entry() {
        let store = MemoryStore::new();
        seed(&store, "s1", 0).await;
        store.mark_manifest_deleted("s1").await.unwrap();
        let ewms = FakeEwmsClient::new();
        let launcher = FakeJobLauncher::new();
        let runner = BacklogRunner {
            store: &store,
            ewms: &ewms,
            launcher: &launcher,
            max_attempts: 5,
            stale_threshold_secs: 60.0,
        };
        let metrics = RunnerMetrics::new();

        let tick = runner.tick(100.0, true, &metrics).await;
        assert_eq!(tick, BacklogTick::ScanDeleted { scan_id: "s1".into() });
        assert!(store.list_backlog().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn exceeding_max_attempts_purges_without_starting() {
        let store = MemoryStore::new();
        seed(&store, "s1", 0).await;
        let ewms = FakeEwmsClient::new();
        let launcher = FakeJobLauncher::new();
        let runner = BacklogRunner {
            store: &store,
            ewms: &ewms,
            launcher: &launcher,
            max_attempts: 1,
            stale_threshold_secs: 0.0,
        };
        let metrics = RunnerMetrics::new();

        // First claim bumps next_attempt to 1 (<=1, allowed); start succeeds
        // and removes the entry, so re-seed to exercise the purge path.
        store.remove_backlog_entry("s1").await.unwrap();
        store
            .enqueue_backlog(&skydriver_core::BacklogEntry {
                scan_id: "s1".into(),
                timestamp: 0.0,
                priority: 0,
                next_attempt: 1,
                pending_timestamp: None,
            })
            .await
            .unwrap();

        let tick = runner.tick(100.0, true, &metrics).await;
        assert_eq!(
            tick,
            BacklogTick::AttemptsExhausted { scan_id: "s1".into() }
        );
        assert!(store.list_backlog().await.unwrap().is_empty());
        assert!(launcher.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_backlog_returns_empty_tick() {
        let store = MemoryStore::new();
        let ewms = FakeEwmsClient::new();
        let launcher = FakeJobLauncher::new();
        let runner = BacklogRunner {
            store: &store,
            ewms: &ewms,
            launcher: &launcher,
            max_attempts: 5,
            stale_threshold_secs: 60.0,
        };
        let metrics = RunnerMetrics::new();
        assert_eq!(runner.tick(100.0, true, &metrics).await, BacklogTick::Empty);
    }
}
