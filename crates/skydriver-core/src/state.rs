//! Pure derivation of a coarse scan-state enum from persisted facts plus
//! EWMS's deactivation label. See `Manifest::state`.

use crate::types::{Manifest, ScanResult};
use serde::{Deserialize, Serialize};

/// EWMS's terminal label for a workflow, if any. `None` means the
/// workflow (if it exists at all) is still active.
pub type Deactivation = Option<String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanState {
    ScanHasFinalResult,
    InProgressPartialResultGenerated,
    InProgressWaitingOnFirstPixelReco,
    PendingWaitingOnScannerServerStartup,
    PendingPrestartup,
    /// EWMS has deactivated the workflow; `label` is its upper-cased
    /// deactivation type (e.g. "ABORTED", "FINISHED") and `base` is the
    /// state the manifest would otherwise have derived to, kept for
    /// logging and tests (S4: `ABORTED__PARTIAL_RESULT_GENERATED`).
    Deactivated { label: String, base: DeactivatableBase },
}

/// The subset of states that carry a deactivation-label variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeactivatableBase {
    PartialResultGenerated,
    WaitingOnFirstPixelReco,
    WaitingOnScannerServerStartup,
    Prestartup,
}

impl ScanState {
    /// Matches the source's `"{LABEL}__{BASE}"` naming, e.g.
    /// `ABORTED__PARTIAL_RESULT_GENERATED`.
    pub fn as_str(&self) -> String {
        match self {
            ScanState::ScanHasFinalResult => "SCAN_HAS_FINAL_RESULT".to_string(),
            ScanState::InProgressPartialResultGenerated => {
                "IN_PROGRESS__PARTIAL_RESULT_GENERATED".to_string()
            }
            ScanState::InProgressWaitingOnFirstPixelReco => {
                "IN_PROGRESS__WAITING_ON_FIRST_PIXEL_RECO".to_string()
            }
            ScanState::PendingWaitingOnScannerServerStartup => {
                "PENDING__WAITING_ON_SCANNER_SERVER_STARTUP".to_string()
            }
            ScanState::PendingPrestartup => "PENDING__PRESTARTUP".to_string(),
            ScanState::Deactivated { label, base } => {
                let suffix = match base {
                    DeactivatableBase::PartialResultGenerated => "PARTIAL_RESULT_GENERATED",
                    DeactivatableBase::WaitingOnFirstPixelReco => "WAITING_ON_FIRST_PIXEL_RECO",
                    DeactivatableBase::WaitingOnScannerServerStartup => {
                        "WAITING_ON_SCANNER_SERVER_STARTUP"
                    }
                    DeactivatableBase::Prestartup => "PRESTARTUP",
                };
                format!("{}__{}", label, suffix)
            }
        }
    }
}

/// Derive the coarse scan state. Pure: the same triple always yields the
/// same state (testable property 7).
pub fn derive_scan_state(
    manifest: &Manifest,
    result: Option<&ScanResult>,
    deactivation: Deactivation,
) -> ScanState {
    if let Some(r) = result {
        if r.is_final {
            return ScanState::ScanHasFinalResult;
        }
    }

    let base = if !manifest.has_workflow() {
        DeactivatableBase::Prestartup
    } else if manifest.progress.is_none() {
        DeactivatableBase::WaitingOnScannerServerStartup
    } else {
        let has_rate = manifest
            .progress
            .as_ref()
            .map(|p| !p.processing_stats.rate.is_empty())
            .unwrap_or(false);
        if has_rate {
            DeactivatableBase::PartialResultGenerated
        } else {
            DeactivatableBase::WaitingOnFirstPixelReco
        }
    };

    match deactivation {
        Some(label) => ScanState::Deactivated {
            label: label.to_uppercase(),
            base,
        },
        None => match base {
            DeactivatableBase::Prestartup => ScanState::PendingPrestartup,
            DeactivatableBase::WaitingOnScannerServerStartup => {
                ScanState::PendingWaitingOnScannerServerStartup
            }
            DeactivatableBase::WaitingOnFirstPixelReco => {
                ScanState::InProgressWaitingOnFirstPixelReco
            }
            DeactivatableBase::PartialResultGenerated => {
                ScanState::InProgressPartialResultGenerated
            }
        },
    }
}

impl Manifest {
    /// Convenience wrapper so callers can write `manifest.state(result, deactivation)`.
    pub fn state(&self, result: Option<&ScanResult>, deactivation: Deactivation) -> ScanState {
        derive_scan_state(self, result, deactivation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ProcessingStats, Progress};
    use std::collections::BTreeMap;

    fn base_manifest() -> Manifest {
        Manifest {
            scan_id: "abc".into(),
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

    fn progress_with_rate(rate: BTreeMap<String, f64>) -> Progress {
        Progress {
            summary: "s".into(),
            epilogue: "e".into(),
            tallies: BTreeMap::new(),
            processing_stats: ProcessingStats {
                start_time: 0.0,
                rate,
                finished: false,
                predictions: serde_json::Map::new(),
            },
        }
    }

    #[test]
    fn final_result_wins_regardless_of_manifest() {
        let manifest = base_manifest();
        let result = ScanResult {
            scan_id: "abc".into(),
            skyscan_result: serde_json::Map::new(),
            is_final: true,
        };
        let state = derive_scan_state(&manifest, Some(&result), Some("ABORTED".into()));
        assert_eq!(state, ScanState::ScanHasFinalResult);
    }

    #[test]
    fn no_workflow_is_prestartup() {
        let manifest = base_manifest();
        let state = derive_scan_state(&manifest, None, None);
        assert_eq!(state, ScanState::PendingPrestartup);
    }

    #[test]
    fn workflow_no_progress_is_waiting_on_startup() {
        let mut manifest = base_manifest();
        manifest.ewms_workflow_id = Some("wf-1".into());
        let state = derive_scan_state(&manifest, None, None);
        assert_eq!(state, ScanState::PendingWaitingOnScannerServerStartup);
    }

    #[test]
    fn progress_without_rate_is_waiting_on_first_pixel() {
        let mut manifest = base_manifest();
        manifest.ewms_workflow_id = Some("wf-1".into());
        manifest.progress = Some(progress_with_rate(BTreeMap::new()));
        let state = derive_scan_state(&manifest, None, None);
        assert_eq!(state, ScanState::InProgressWaitingOnFirstPixelReco);
    }

    #[test]
    fn s4_progress_with_rate_and_no_deactivation_is_in_progress() {
        let mut manifest = base_manifest();
        manifest.ewms_workflow_id = Some("wf-1".into());
        let mut rate = BTreeMap::new();
        rate.insert("abc".to_string(), 123.0);
        manifest.progress = Some(progress_with_rate(rate));
        let state = derive_scan_state(&manifest, None, None);
        assert_eq!(state, ScanState::InProgressPartialResultGenerated);
        assert_eq!(state.as_str(), "IN_PROGRESS__PARTIAL_RESULT_GENERATED");
    }

    #[test]
    fn s4_same_manifest_with_deactivation_is_aborted() {
        let mut manifest = base_manifest();
        manifest.ewms_workflow_id = Some("wf-1".into());
        let mut rate = BTreeMap::new();
        rate.insert("abc".to_string(), 123.0);
        manifest.progress = Some(progress_with_rate(rate));
        let state = derive_scan_state(&manifest, None, Some("aborted".into()));
        assert_eq!(state.as_str(), "ABORTED__PARTIAL_RESULT_GENERATED");
    }

    #[test]
    fn derivation_is_pure() {
        let mut manifest = base_manifest();
        manifest.ewms_workflow_id = Some("wf-1".into());
        let s1 = derive_scan_state(&manifest, None, None);
        let s2 = derive_scan_state(&manifest, None, None);
        assert_eq!(s1, s2);
    }
}
