//! Admission validation: turns a raw, untrusted `ScanRequestInput` into a
//! validated `ScanRequest`, accumulating every problem found rather than
//! failing on the first one, so callers get a complete 400 response.

use crate::types::{
    ClassifierValue, ClusterName, DebugMode, ScanRequest, MAX_CLASSIFIERS_LEN,
    MAX_CLASSIFIER_FIELD_CHARS,
};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("docker_tag must resolve to a known tag, got '{0}'")]
    UnknownDockerTag(String),
    #[error("reco_algo must be non-empty and contain no whitespace")]
    InvalidRecoAlgo,
    #[error("event_i3live_json must be a non-empty JSON object")]
    InvalidEventPayload,
    #[error("cluster '{0}' is not in the known-clusters registry")]
    UnknownCluster(String),
    #[error("cluster list must not be empty")]
    EmptyClusterList,
    #[error("could not parse human-readable size '{0}'")]
    InvalidSize(String),
    #[error("predictive_scanning_threshold must be in (0, 1], got {0}")]
    InvalidThreshold(f64),
    #[error("{0} must be a positive integer")]
    NonPositiveInteger(&'static str),
    #[error("classifiers: at most {MAX_CLASSIFIERS_LEN} entries allowed, got {0}")]
    TooManyClassifiers(usize),
    #[error("classifiers: key or value '{0}' exceeds {MAX_CLASSIFIER_FIELD_CHARS} characters")]
    ClassifierFieldTooLong(String),
    #[error("debug_mode CLIENT_LOGS requested but cluster '{0}' exceeds its debug worker cap ({1} > {2})")]
    DebugWorkerCapExceeded(String, u32, u32),
}

/// Raw admission payload, as decoded from the request body before validation.
#[derive(Debug, Clone)]
pub struct ScanRequestInput {
    pub docker_tag: String,
    pub reco_algo: String,
    pub event_i3live_json_dict: serde_json::Map<String, serde_json::Value>,
    pub nsides: BTreeMap<i64, i64>,
    pub is_real_event: bool,
    pub requested_clusters: Vec<(ClusterName, u32)>,
    pub worker_memory: String,
    pub worker_disk: String,
    pub scanner_server_memory: String,
    pub predictive_scanning_threshold: f64,
    pub max_pixel_reco_time: i64,
    pub max_worker_runtime: i64,
    pub priority: i64,
    pub classifiers: BTreeMap<String, ClassifierValue>,
    pub debug_mode: Vec<DebugMode>,
}

/// Human-readable size parsing ("4G", "512M") to bytes. Supports the
/// common binary-ish suffixes used across the cluster configs; an absent
/// suffix is interpreted as raw bytes.
pub fn parse_human_size(s: &str) -> Result<u64, ValidationError> {
    let s = s.trim();
    let (digits, mult): (&str, u64) = if let Some(n) = s.strip_suffix('G') {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = s.strip_suffix('M') {
        (n, 1024 * 1024)
    } else if let Some(n) = s.strip_suffix('K') {
        (n, 1024)
    } else {
        (s, 1)
    };
    digits
        .trim()
        .parse::<u64>()
        .map(|n| n * mult)
        .map_err(|_| ValidationError::InvalidSize(s.to_string()))
}

/// Resolver for the `docker_tag` field: looks up (and caches, per
/// spec.md's 5-minute TTL requirement) the concrete tag a registry alias
/// such as `"latest"` resolves to. Kept as a trait so admission tests can
/// supply a deterministic fake instead of hitting a real registry.
pub trait DockerTagResolver {
    fn resolve(&self, requested: &str) -> Option<String>;
}

/// Cluster membership check, kept as a trait for the same reason: admission
/// logic is pure given the registry, and tests supply a fixed registry.
pub trait KnownClusters {
    fn contains(&self, name: &str) -> bool;
    fn debug_cap(&self, name: &str) -> Option<u32>;
}

pub fn validate_scan_request(
    scan_id: &str,
    input: ScanRequestInput,
    docker_tags: &dyn DockerTagResolver,
    clusters: &dyn KnownClusters,
) -> Result<ScanRequest, Vec<ValidationError>> {
    let mut errors = Vec::new();

    let docker_tag = match docker_tags.resolve(&input.docker_tag) {
        Some(tag) => tag,
        None => {
            errors.push(ValidationError::UnknownDockerTag(input.docker_tag.clone()));
            input.docker_tag.clone()
        }
    };

    if input.reco_algo.trim().is_empty() || input.reco_algo.chars().any(char::is_whitespace) {
        errors.push(ValidationError::InvalidRecoAlgo);
    }

    if input.event_i3live_json_dict.is_empty() {
        errors.push(ValidationError::InvalidEventPayload);
    }

    if input.requested_clusters.is_empty() {
        errors.push(ValidationError::EmptyClusterList);
    }
    for (name, _) in &input.requested_clusters {
        if !clusters.contains(name) {
            errors.push(ValidationError::UnknownCluster(name.clone()));
        }
    }

    let worker_memory_bytes = parse_human_size(&input.worker_memory).unwrap_or_else(|e| {
        errors.push(e);
        0
    });
    let worker_disk_bytes = parse_human_size(&input.worker_disk).unwrap_or_else(|e| {
        errors.push(e);
        0
    });
    let scanner_server_memory_bytes =
        parse_human_size(&input.scanner_server_memory).unwrap_or_else(|e| {
            errors.push(e);
            0
        });

    if !(input.predictive_scanning_threshold > 0.0 && input.predictive_scanning_threshold <= 1.0)
    {
        errors.push(ValidationError::InvalidThreshold(
            input.predictive_scanning_threshold,
        ));
    }

    if input.max_pixel_reco_time <= 0 {
        errors.push(ValidationError::NonPositiveInteger("max_pixel_reco_time"));
    }
    if input.max_worker_runtime <= 0 {
        errors.push(ValidationError::NonPositiveInteger("max_worker_runtime"));
    }

    if input.classifiers.len() > MAX_CLASSIFIERS_LEN {
        errors.push(ValidationError::TooManyClassifiers(input.classifiers.len()));
    }
    for (k, v) in &input.classifiers {
        if k.chars().count() > MAX_CLASSIFIER_FIELD_CHARS {
            errors.push(ValidationError::ClassifierFieldTooLong(k.clone()));
        }
        if let ClassifierValue::Str(s) = v {
            if s.chars().count() > MAX_CLASSIFIER_FIELD_CHARS {
                errors.push(ValidationError::ClassifierFieldTooLong(s.clone()));
            }
        }
    }

    if input.debug_mode.contains(&DebugMode::ClientLogs) {
        for (name, n_workers) in &input.requested_clusters {
            if let Some(cap) = clusters.debug_cap(name) {
                if *n_workers > cap {
                    errors.push(ValidationError::DebugWorkerCapExceeded(
                        name.clone(),
                        *n_workers,
                        cap,
                    ));
                }
            }
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(ScanRequest {
        scan_id: scan_id.to_string(),
        docker_tag,
        reco_algo: input.reco_algo,
        event_i3live_json_dict: input.event_i3live_json_dict,
        nsides: input.nsides,
        is_real_event: input.is_real_event,
        requested_clusters: input.requested_clusters,
        worker_memory_bytes,
        worker_disk_bytes,
        scanner_server_memory_bytes,
        predictive_scanning_threshold: input.predictive_scanning_threshold,
        max_pixel_reco_time: input.max_pixel_reco_time as u64,
        max_worker_runtime: input.max_worker_runtime as u64,
        priority: input.priority,
        classifiers: input.classifiers,
        debug_mode: input.debug_mode,
        rescan_ids: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedTags;
    impl DockerTagResolver for FixedTags {
        fn resolve(&self, requested: &str) -> Option<String> {
            if requested == "latest" {
                Some("1.2.3".to_string())
            } else if requested.starts_with('v') {
                Some(requested.trim_start_matches('v').to_string())
            } else {
                None
            }
        }
    }

    struct FixedClusters;
    impl KnownClusters for FixedClusters {
        fn contains(&self, name: &str) -> bool {
            name == "sub-2"
        }
        fn debug_cap(&self, name: &str) -> Option<u32> {
            if name == "sub-2" {
                Some(5)
            } else {
                None
            }
        }
    }

    fn valid_input() -> ScanRequestInput {
        let mut payload = serde_json::Map::new();
        payload.insert("a".into(), serde_json::json!(1));
        ScanRequestInput {
            docker_tag: "latest".into(),
            reco_algo: "millipede_wilks".into(),
            event_i3live_json_dict: payload,
            nsides: BTreeMap::new(),
            is_real_event: true,
            requested_clusters: vec![("sub-2".into(), 4)],
            worker_memory: "4G".into(),
            worker_disk: "1G".into(),
            scanner_server_memory: "512M".into(),
            predictive_scanning_threshold: 1.0,
            max_pixel_reco_time: 60,
            max_worker_runtime: 3600,
            priority: 0,
            classifiers: BTreeMap::new(),
            debug_mode: vec![],
        }
    }

    #[test]
    fn valid_request_passes() {
        let result =
            validate_scan_request("scan-1", valid_input(), &FixedTags, &FixedClusters);
        assert!(result.is_ok());
        assert_eq!(result.unwrap().docker_tag, "1.2.3");
    }

    #[test]
    fn unknown_cluster_rejected() {
        let mut input = valid_input();
        input.requested_clusters = vec![("not-a-cluster".into(), 1)];
        let errors =
            validate_scan_request("scan-1", input, &FixedTags, &FixedClusters).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::UnknownCluster(_))));
    }

    #[test]
    fn size_parsing() {
        assert_eq!(parse_human_size("4G").unwrap(), 4 * 1024 * 1024 * 1024);
        assert_eq!(parse_human_size("512M").unwrap(), 512 * 1024 * 1024);
        assert!(parse_human_size("nonsense").is_err());
    }

    #[test]
    fn debug_cap_enforced() {
        let mut input = valid_input();
        input.debug_mode = vec![DebugMode::ClientLogs];
        input.requested_clusters = vec![("sub-2".into(), 99)];
        let errors =
            validate_scan_request("scan-1", input, &FixedTags, &FixedClusters).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::DebugWorkerCapExceeded(..))));
    }

    #[test]
    fn too_many_classifiers_rejected() {
        let mut input = valid_input();
        for i in 0..20 {
            input
                .classifiers
                .insert(format!("k{i}"), ClassifierValue::Bool(true));
        }
        let errors =
            validate_scan_request("scan-1", input, &FixedTags, &FixedClusters).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::TooManyClassifiers(_))));
    }

    #[test]
    fn errors_accumulate_across_fields() {
        let mut input = valid_input();
        input.reco_algo = "".into();
        input.requested_clusters = vec![("bogus".into(), 1)];
        input.predictive_scanning_threshold = 2.0;
        let errors =
            validate_scan_request("scan-1", input, &FixedTags, &FixedClusters).unwrap_err();
        assert!(errors.len() >= 3);
    }
}
