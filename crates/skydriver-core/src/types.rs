//! Scan documents: `ScanRequest`, `Manifest`, `Result`, `BacklogEntry`,
//! `K8sJobDoc`, and their supporting value types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Scans with `priority >= HIGH_THRESHOLD` skip the backlog entirely.
pub const HIGH_THRESHOLD: i64 = 10;

/// Classifier keys/values are capped to keep the manifest small and to
/// bound what admission ever echoes back in read endpoints.
pub const MAX_CLASSIFIERS_LEN: usize = 15;
pub const MAX_CLASSIFIER_FIELD_CHARS: usize = 15;

/// Sentinel stored in `Manifest.ewms_workflow_id` between "workflow
/// requested" and "workflow id known" — never regresses once the real id
/// is assigned.
pub const PENDING_EWMS_WORKFLOW: &str = "PENDING_EWMS_WORKFLOW";

/// Opaque, chronologically-sortable scan identifier: a high-resolution
/// timestamp prefix plus a random suffix, allocated once at admission.
pub type ScanId = String;

/// A cluster name as registered in the `KNOWN_CLUSTERS` registry.
pub type ClusterName = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterOrchestrator {
    Condor,
    K8s,
}

/// Where a known cluster's work actually runs, keyed by orchestrator kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClusterLocation {
    Condor { collector: String, schedd: String },
    K8s { host: String, namespace: String },
}

/// An entry in the process-wide `KNOWN_CLUSTERS` registry, seeded at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnownCluster {
    pub name: ClusterName,
    pub orchestrator: ClusterOrchestrator,
    pub location: ClusterLocation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_n_clients_during_debug_mode: Option<u32>,
}

/// A cluster actually requested for (or running) one scan's workforce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub name: ClusterName,
    pub n_workers: u32,
    /// Opaque metadata a cluster orchestrator attaches after startup
    /// (submission job id, start time). Never interpreted by SkyDriver.
    #[serde(default)]
    pub starter_info: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DebugMode {
    ClientLogs,
    SaveServerLogs,
}

/// Classifier values are restricted to string/bool/number, per spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClassifierValue {
    Str(String),
    Bool(bool),
    Number(f64),
}

/// Immutable record of what the user asked for. Created once at
/// `POST /scan`, never mutated afterwards; used verbatim as the template
/// for rescans (with user-supplied overrides layered on top).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRequest {
    pub scan_id: ScanId,
    pub docker_tag: String,
    pub reco_algo: String,
    pub event_i3live_json_dict: serde_json::Map<String, serde_json::Value>,
    pub nsides: BTreeMap<i64, i64>,
    pub is_real_event: bool,
    pub requested_clusters: Vec<(ClusterName, u32)>,
    pub worker_memory_bytes: u64,
    pub worker_disk_bytes: u64,
    pub scanner_server_memory_bytes: u64,
    pub predictive_scanning_threshold: f64,
    pub max_pixel_reco_time: u64,
    pub max_worker_runtime: u64,
    pub priority: i64,
    pub classifiers: BTreeMap<String, ClassifierValue>,
    pub debug_mode: Vec<DebugMode>,
    /// Every scan id minted as a rescan of this request, in creation order.
    /// The watchdog consults the *last* entry to decide whether a scan has
    /// already been superseded; more than one rescan can exist over time.
    #[serde(default)]
    pub rescan_ids: Vec<ScanId>,
}

impl ScanRequest {
    /// True once at least one rescan has been issued against this request.
    pub fn has_been_rescanned(&self) -> bool {
        !self.rescan_ids.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingStats {
    pub start_time: f64,
    #[serde(default)]
    pub rate: BTreeMap<String, f64>,
    pub finished: bool,
    #[serde(default)]
    pub predictions: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
    pub summary: String,
    pub epilogue: String,
    #[serde(default)]
    pub tallies: BTreeMap<String, u64>,
    pub processing_stats: ProcessingStats,
}

/// Mutable projection of a scan's life. One document per `scan_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub scan_id: ScanId,
    pub timestamp: f64,
    pub last_updated: f64,
    #[serde(default)]
    pub is_deleted: bool,
    pub priority: i64,
    pub event_i3live_json_dict_hash: String,
    #[serde(default)]
    pub ewms_workflow_id: Option<String>,
    #[serde(default)]
    pub progress: Option<Progress>,
    #[serde(default)]
    pub event_metadata: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub scan_metadata: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub clusters: Vec<Cluster>,
    #[serde(default)]
    pub complete: bool,
    #[serde(default)]
    pub replaced_by_scan_id: Option<ScanId>,
    #[serde(default)]
    pub classifiers: BTreeMap<String, ClassifierValue>,
}

impl Manifest {
    pub fn skips_backlog(&self) -> bool {
        self.priority >= HIGH_THRESHOLD
    }

    /// True once the EWMS workflow id has moved past the pending sentinel.
    pub fn has_actual_workflow_id(&self) -> bool {
        matches!(&self.ewms_workflow_id, Some(id) if id != PENDING_EWMS_WORKFLOW)
    }

    pub fn has_workflow(&self) -> bool {
        self.ewms_workflow_id.is_some()
    }
}

/// Scan output. `is_final` is monotone false -> true; writing an empty
/// `skyscan_result` is a no-op at the store layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub scan_id: ScanId,
    pub skyscan_result: serde_json::Map<String, serde_json::Value>,
    pub is_final: bool,
}

/// An entry in the scan-launch backlog: admitted, not yet started in k8s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacklogEntry {
    pub scan_id: ScanId,
    pub timestamp: f64,
    pub priority: i64,
    pub next_attempt: u32,
    #[serde(default)]
    pub pending_timestamp: Option<f64>,
}

impl BacklogEntry {
    pub fn is_high_priority(&self) -> bool {
        self.priority >= HIGH_THRESHOLD
    }
}

/// The declarative Kubernetes job manifest produced by the job-spec
/// factory, persisted for audit and for the backlog runner to replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct K8sJobDoc {
    pub scan_id: ScanId,
    pub job_spec: serde_json::Value,
}
