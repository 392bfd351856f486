//! Pod watchdog: finds scans whose scanner-server pod was transiently
//! killed (node eviction, OOM reset, transient image pull failure) and
//! asks the REST server to rescan them, exactly as
//! `scan_pod_watchdog.py` polls and self-calls its own `/actions/rescan`
//! route. One tick covers one reconciliation pass; `main.rs` drives it
//! in a loop with `SCAN_POD_WATCHDOG_DELAY` between calls.

use crate::metrics::RunnerMetrics;
use skydriver_core::Manifest;
use skydriver_db::DocumentStore;
use skydriver_k8s::{PodCondition, PodInspector};
use tracing::{info, warn};

/// How far back to look for started-but-unfinished scans, and how
/// recently a scan must have started to still be worth rescuing —
/// matches `_get_recent_scans()`'s one-hour/ten-minute window.
pub const LOOKBACK_SECS: f64 = 3600.0;
pub const GRACE_PERIOD_SECS: f64 = 600.0;

pub struct PodWatchdog<'a> {
    pub store: &'a dyn DocumentStore,
    pub pods: &'a dyn PodInspector,
    pub here_url: String,
    pub rest_token: String,
    pub http: reqwest::Client,
}

impl<'a> PodWatchdog<'a> {
    /// Returns the scan ids for which a rescan was actually requested.
    pub async fn tick(&self, now: f64, metrics: &RunnerMetrics) -> Vec<String> {
        metrics.watchdog_ticks_total.inc();

        let candidates = match self
            .store
            .find_manifests_started_between(now - LOOKBACK_SECS, now - GRACE_PERIOD_SECS)
            .await
        {
            Ok(manifests) => manifests,
            Err(e) => {
                warn!("pod watchdog failed to list recent scans: {e}");
                return Vec::new();
            }
        };

        let mut rescanned = Vec::new();
        for manifest in candidates {
            if self.has_final_result(&manifest.scan_id).await {
                continue;
            }

            let job_name = format!("skyscan-{}", manifest.scan_id);
            if self.pods.inspect(&job_name).await != PodCondition::TransientlyKilled {
                continue;
            }

            match self.store.get_scan_request(&manifest.scan_id).await {
                Ok(request) if request.has_been_rescanned() => continue,
                Err(e) => {
                    warn!(scan_id = %manifest.scan_id, "watchdog could not load scan request: {e}");
                    continue;
                }
                Ok(_) => {}
            }

            if self.request_rescan(&manifest.scan_id).await {
                info!(scan_id = %manifest.scan_id, "watchdog triggered rescan for transiently killed pod");
                metrics.watchdog_rescans_triggered_total.inc();
                rescanned.push(manifest.scan_id);
            }
        }
        rescanned
    }

    async fn has_final_result(&self, scan_id: &str) -> bool {
        match self.store.get_result(scan_id, false).await {
            Ok(Some(result)) => result.is_final,
            Ok(None) => false,
            Err(e) => {
                warn!(scan_id = %scan_id, "watchdog could not load result: {e}");
                false
            }
        }
    }

    async fn request_rescan(&self, scan_id: &str) -> bool {
        let url = format!("{}/scan/{}/actions/rescan", self.here_url, scan_id);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.rest_token)
            .json(&serde_json::json!({"abort_first": true, "replace_scan": true}))
            .send()
            .await;
        match resp {
            Ok(r) if r.status().is_success() => true,
            Ok(r) => {
                warn!(scan_id = %scan_id, status = %r.status(), "watchdog rescan request rejected");
                false
            }
            Err(e) => {
                warn!(scan_id = %scan_id, "watchdog rescan request failed: {e}");
                false
            }
        }
    }
}

/// Filters a batch of manifests down to ones eligible for the watchdog
/// to even consider, without touching the network — used by tests that
/// don't want to spin up an HTTP mock for the uninteresting cases.
pub fn started_in_window(manifests: &[Manifest], now: f64) -> Vec<&Manifest> {
    manifests
        .iter()
        .filter(|m| m.timestamp > now - LOOKBACK_SECS && m.timestamp < now - GRACE_PERIOD_SECS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use skydriver_db::MemoryStore;
    use skydriver_k8s::FakePodInspector;
    use std::collections::BTreeMap;

    fn manifest(scan_id: &str, timestamp: f64) -> Manifest {
        Manifest {
            scan_id: scan_id.to_string(),
            timestamp,
            last_updated: timestamp,
            is_deleted: false,
            priority: 0,
            event_i3live_json_dict_hash: "h".into(),
            ewms_workflow_id: Some("wf-1".into()),
            progress: None,
            event_metadata: None,
            scan_metadata: None,
            clusters: vec![],
            complete: false,
            replaced_by_scan_id: None,
            classifiers: BTreeMap::new(),
        }
    }

    fn request(scan_id: &str, rescan_ids: Vec<String>) -> skydriver_core::ScanRequest {
        skydriver_core::ScanRequest {
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
            rescan_ids,
        }
    }

    #[test]
    fn started_in_window_excludes_too_recent_and_too_old() {
        let now = 10_000.0;
        let manifests = vec![
            manifest("too-recent", now - 60.0),
            manifest("in-window", now - 1200.0),
            manifest("too-old", now - 7200.0),
        ];
        let windowed = started_in_window(&manifests, now);
        let ids: Vec<_> = windowed.iter().map(|m| m.scan_id.as_str()).collect();
        assert_eq!(ids, vec!["in-window"]);
    }

    #[tokio::test]
    async fn skips_scans_with_final_results() {
        let store = MemoryStore::new();
        let now = 10_000.0;
        store.insert_manifest(&manifest("s1", now - 1200.0)).await.unwrap();
        store.insert_scan_request(&request("s1", vec![])).await.unwrap();
        store
            .put_result("s1", serde_json::json!({"done": true}).as_object().unwrap().clone(), true)
            .await
            .unwrap();
        let pods = FakePodInspector::new();
        pods.set("skyscan-s1", PodCondition::TransientlyKilled);

        let watchdog = PodWatchdog {
            store: &store,
            pods: &pods,
            here_url: "http://unused".into(),
            rest_token: "tok".into(),
            http: reqwest::Client::new(),
        };
        let metrics = RunnerMetrics::new();
        let rescanned = watchdog.tick(now, &metrics).await;
        assert!(rescanned.is_empty());
    }

    #[tokio::test]
    async fn skips_scans_already_rescanned() {
        let store = MemoryStore::new();
        let now = 10_000.0;
        store.insert_manifest(&manifest("s1", now - 1200.0)).await.unwrap();
        store
            .insert_scan_request(&request("s1", vec!["s2".into()]))
            .await
            .unwrap();
        let pods = FakePodInspector::new();
        pods.set("skyscan-s1", PodCondition::TransientlyKilled);

        let watchdog = PodWatchdog {
            store: &store,
            pods: &pods,
            here_url: "http://unused".into(),
            rest_token: "tok".into(),
            http: reqwest::Client::new(),
        };
        let metrics = RunnerMetrics::new();
        let rescanned = watchdog.tick(now, &metrics).await;
        assert!(rescanned.is_empty());
    }

    #[tokio::test]
    async fn skips_scans_with_running_pods() {
        let store = MemoryStore::new();
        let now = 10_000.0;
        store.insert_manifest(&manifest("s1", now - 1200.0)).await.unwrap();
        store.insert_scan_request(&request("s1", vec![])).await.unwrap();
        let pods = FakePodInspector::new();
        pods.set("skyscan-s1", PodCondition::Running);

        let watchdog = PodWatchdog {
            store: &store,
            pods: &pods,
            here_url: "http://unused".into(),
            rest_token: "tok".into(),
            http: reqwest::Client::new(),
        };
        let metrics = RunnerMetrics::new();
        let rescanned = watchdog.tick(now, &metrics).await;
        assert!(rescanned.is_empty());
    }
}
