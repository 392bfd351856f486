//! Generated "partial update" records: one per mutable entity, replacing
//! the source's dict-based updater plus runtime type-guard with
//! compile-time-checked optional fields.

use skydriver_core::{Cluster, Progress};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct ManifestPatch {
    pub progress: Option<Progress>,
    /// Set-once: a `Some` here is rejected if the manifest already has a
    /// non-empty `event_metadata` with *different* content.
    pub event_metadata: Option<serde_json::Map<String, serde_json::Value>>,
    /// Set-once, same rule as `event_metadata`.
    pub scan_metadata: Option<serde_json::Map<String, serde_json::Value>>,
    pub clusters: Option<Vec<Cluster>>,
    /// Monotone: ignored (not an error) if already `true` and this is `false`.
    pub complete: Option<bool>,
    /// Monotone: once set, attempts to clear it are ignored.
    pub replaced_by_scan_id: Option<String>,
    pub classifiers: Option<BTreeMap<String, skydriver_core::ClassifierValue>>,
    pub ewms_workflow_id: Option<String>,
}
