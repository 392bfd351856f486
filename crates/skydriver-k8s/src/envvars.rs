//! Env var groups for the scanner server, EWMS-init, and S3 sidecar
//! containers. Each group is a pure function so the factory's determinism
//! (spec.md §8 property 8) can be checked group-by-group.

use crate::config::K8sConfig;
use serde_json::{json, Value};
use skydriver_core::ScanRequest;

pub fn scanner_server_args(scan_id: &str, request: &ScanRequest) -> Vec<String> {
    let mut args = vec![
        "--reco-algo".to_string(),
        request.reco_algo.clone(),
        "--cache-dir".to_string(),
        "/common-space".to_string(),
        "--client-startup-json".to_string(),
        format!("/common-space/startup-{scan_id}.json"),
    ];

    if !request.nsides.is_empty() {
        args.push("--nsides".to_string());
        let pairs: Vec<String> = request
            .nsides
            .iter()
            .map(|(k, v)| format!("{k}:{v}"))
            .collect();
        args.push(pairs.join(" "));
    }

    args.push(
        if request.is_real_event {
            "--real-event"
        } else {
            "--simulated-event"
        }
        .to_string(),
    );

    args.push("--predictive-scanning-threshold".to_string());
    args.push(request.predictive_scanning_threshold.to_string());

    args
}

/// Plain (non-secret) scanner env vars. Secrets are layered on separately
/// via `secretKeyRef` so they never appear in this map.
pub fn scanner_envvars(scan_id: &str, request: &ScanRequest) -> Vec<(String, String)> {
    vec![
        ("SCAN_ID".to_string(), scan_id.to_string()),
        (
            "PREDICTIVE_SCANNING_THRESHOLD".to_string(),
            request.predictive_scanning_threshold.to_string(),
        ),
        (
            "MAX_PIXEL_RECO_TIME".to_string(),
            request.max_pixel_reco_time.to_string(),
        ),
    ]
}

pub fn ewms_envvars(scan_id: &str, request: &ScanRequest, ewms_address: &str) -> Vec<(String, String)> {
    let clusters = request
        .requested_clusters
        .iter()
        .map(|(name, _)| name.clone())
        .collect::<Vec<_>>()
        .join(" ");
    let n_workers = request
        .requested_clusters
        .first()
        .map(|(_, n)| *n)
        .unwrap_or(0);

    vec![
        ("EWMS_ADDRESS".to_string(), ewms_address.to_string()),
        ("EWMS_SCAN_ID".to_string(), scan_id.to_string()),
        ("EWMS_CLUSTERS".to_string(), clusters),
        ("EWMS_N_WORKERS".to_string(), n_workers.to_string()),
        (
            "EWMS_MAX_WORKER_RUNTIME".to_string(),
            request.max_worker_runtime.to_string(),
        ),
    ]
}

pub fn s3_envvars(scan_id: &str, config: &K8sConfig) -> Value {
    json!([
        {"name": "S3_OBJECT_KEY", "value": skydriver_ewms_object_key(scan_id)},
        {"name": "S3_EXPIRES_IN", "value": config.sidecar_s3_lifetime_seconds.to_string()},
        {
            "name": "S3_ACCESS_KEY_ID",
            "valueFrom": {"secretKeyRef": {"name": config.secret_name, "key": "s3-access-key-id"}},
        },
        {
            "name": "S3_SECRET_KEY",
            "valueFrom": {"secretKeyRef": {"name": config.secret_name, "key": "s3-secret-key"}},
        },
    ])
}

// Local re-implementation avoids a circular crate dependency on skydriver-ewms;
// the key format is a stable contract shared by both crates.
fn skydriver_ewms_object_key(scan_id: &str) -> String {
    format!("{scan_id}-s3-object")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn request() -> ScanRequest {
        ScanRequest {
            scan_id: "s1".into(),
            docker_tag: "1.0.0".into(),
            reco_algo: "millipede_wilks".into(),
            event_i3live_json_dict: serde_json::Map::new(),
            nsides: BTreeMap::from([(1, 2), (3, 4)]),
            is_real_event: true,
            requested_clusters: vec![("sub-2".into(), 4)],
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

    #[test]
    fn args_are_deterministic() {
        let a = scanner_server_args("s1", &request());
        let b = scanner_server_args("s1", &request());
        assert_eq!(a, b);
        assert!(a.contains(&"--real-event".to_string()));
    }

    #[test]
    fn nsides_are_space_joined_pairs() {
        let args = scanner_server_args("s1", &request());
        let idx = args.iter().position(|a| a == "--nsides").unwrap();
        assert_eq!(args[idx + 1], "1:2 3:4");
    }
}
