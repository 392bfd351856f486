//! Pure factory turning a validated `ScanRequest` into a declarative
//! Kubernetes Job manifest. Deterministic modulo token contents
//! (spec.md §8 property 8) — callers inject the minted token separately
//! so the rest of the spec can be compared byte-for-byte in tests.

use crate::config::K8sConfig;
use crate::envvars::{ewms_envvars, s3_envvars, scanner_envvars, scanner_server_args};
use serde_json::{json, Value};
use skydriver_core::ScanRequest;

pub const COMMON_SPACE_VOLUME_PATH: &str = "/common-space";

pub fn job_name(scan_id: &str) -> String {
    format!("skyscan-{scan_id}")
}

pub fn server_container_name(scan_id: &str) -> String {
    format!("skyscan-server-{scan_id}")
}

pub fn init_container_name(scan_id: &str) -> String {
    format!("init-ewms-{scan_id}")
}

pub fn sidecar_container_name(scan_id: &str) -> String {
    format!("sidecar-s3-{scan_id}")
}

/// Builds the full Job spec. `rest_token` and `ewms_token` are minted by
/// the caller via client-credentials grant immediately before this call;
/// an empty string is valid for the `CI` test mode (spec.md §7).
pub fn build_job_spec(
    scan_id: &str,
    request: &ScanRequest,
    config: &K8sConfig,
    ewms_address: &str,
    rest_token: &str,
    ewms_token: &str,
) -> Value {
    let mut scanner_env: Vec<Value> = scanner_envvars(scan_id, request)
        .into_iter()
        .map(|(k, v)| json!({"name": k, "value": v}))
        .collect();
    scanner_env.push(json!({"name": "SKYDRIVER_REST_TOKEN", "value": rest_token}));

    let mut ewms_env: Vec<Value> = ewms_envvars(scan_id, request, ewms_address)
        .into_iter()
        .map(|(k, v)| json!({"name": k, "value": v}))
        .collect();
    ewms_env.push(json!({"name": "EWMS_TOKEN", "value": ewms_token}));
    ewms_env.push(json!({
        "name": "EWMS_CLIENT_SECRET",
        "valueFrom": {"secretKeyRef": {"name": config.secret_name, "key": "ewms-client-secret"}},
    }));

    json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": {
            "name": job_name(scan_id),
            "namespace": config.namespace,
            "labels": {
                "app": "scanner-instance",
                "app.kubernetes.io/instance": scan_id,
            },
            "annotations": {
                "argocd.argoproj.io/sync-options": "Prune=false",
            },
        },
        "spec": {
            "ttlSecondsAfterFinished": config.ttl_seconds_after_finished,
            "backoffLimit": 0,
            "activeDeadlineSeconds": config.active_deadline_seconds,
            "template": {
                "spec": {
                    "restartPolicy": "Never",
                    "initContainers": [
                        {
                            "name": init_container_name(scan_id),
                            "image": config.clientmanager_image_with_tag,
                            "command": ["python", "-m", "ewms_init_container"],
                            "args": [scan_id, "--json-out", format!("{COMMON_SPACE_VOLUME_PATH}/ewms-init-{scan_id}.json")],
                            "env": ewms_env,
                            "volumeMounts": [
                                {"name": "common-space-volume", "mountPath": COMMON_SPACE_VOLUME_PATH},
                            ],
                        },
                    ],
                    "containers": [
                        {
                            "name": server_container_name(scan_id),
                            "image": config.this_image_with_tag,
                            "args": scanner_server_args(scan_id, request),
                            "env": scanner_env,
                            "resources": {
                                "limits": {"cpu": config.scanner_cpu_limit, "memory": config.scanner_memory_limit},
                                "requests": {"cpu": config.scanner_cpu_request, "memory": config.scanner_memory_request},
                            },
                            "volumeMounts": [
                                {"name": "common-space-volume", "mountPath": COMMON_SPACE_VOLUME_PATH},
                            ],
                        },
                        {
                            "name": sidecar_container_name(scan_id),
                            "image": config.this_image_with_tag,
                            "command": ["python", "-m", "s3_sidecar"],
                            "args": [format!("{COMMON_SPACE_VOLUME_PATH}/startup-{scan_id}.json"), "--wait-indefinitely"],
                            "env": s3_envvars(scan_id, config),
                            "volumeMounts": [
                                {"name": "common-space-volume", "mountPath": COMMON_SPACE_VOLUME_PATH},
                            ],
                        },
                    ],
                    "volumes": [
                        {"name": "common-space-volume", "emptyDir": {}},
                    ],
                },
            },
        },
    })
}
