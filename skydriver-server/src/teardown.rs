//! The "stopper job" mechanic from spec.md §4.7: once a final result
//! lands, wait `wait_before_teardown_secs` (so any last in-flight writes
//! land) before signalling EWMS and deleting the scanner's k8s Job. The
//! wait runs as a spawned task inside this process rather than a
//! separate k8s job; a REST process restart mid-wait simply drops the
//! pending teardown, which is survivable since `complete` was already
//! set true in `put_result` and the job's own `ttlSecondsAfterFinished`
//! still reclaims it eventually (documented as an open item in DESIGN.md).

use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use skydriver_db::ManifestPatch;
use skydriver_k8s::factory;

use crate::state::AppState;
use crate::util::now_unix;

pub fn schedule(state: Arc<AppState>, scan_id: String, wait_secs: u64) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(wait_secs)).await;

        if let Ok(manifest) = state.store.get_manifest(&scan_id, true).await {
            if let Some(workflow_id) = &manifest.ewms_workflow_id {
                state.ewms.finished(workflow_id).await;
            }
        }

        let job_name = factory::job_name(&scan_id);
        if let Err(e) = state.launcher.delete_job(&job_name).await {
            warn!(scan_id = %scan_id, "teardown delete_job failed: {e}");
        }

        let patch = ManifestPatch {
            complete: Some(true),
            ..Default::default()
        };
        if let Err(e) = state.store.patch_manifest(&scan_id, patch, now_unix()).await {
            warn!(scan_id = %scan_id, "teardown patch_manifest failed: {e}");
        }
    });
}
