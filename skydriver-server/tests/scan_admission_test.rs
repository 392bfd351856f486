//! Admission-path tests: validation, priority routing, and auth, driven
//! straight through the axum router with `tower::ServiceExt::oneshot`
//! against fake backends (no live Mongo/k8s/EWMS), per spec.md §8.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use skydriver_db::MemoryStore;
use skydriver_ewms::FakeEwmsClient;
use skydriver_k8s::{FakeJobLauncher, K8sConfig};
use skydriver_server::build_router;
use skydriver_server::clusters::ClusterRegistry;
use skydriver_server::config::Config;
use skydriver_server::docker_tags::DockerTagCache;
use skydriver_server::metrics::ServerMetrics;
use skydriver_server::state::AppState;

fn k8s_config() -> K8sConfig {
    K8sConfig {
        namespace: "skydriver".into(),
        secret_name: "skydriver-secrets".into(),
        application_name: "skydriver".into(),
        ttl_seconds_after_finished: 3600,
        active_deadline_seconds: 86400,
        scanner_cpu_limit: "1".into(),
        scanner_cpu_request: "500m".into(),
        scanner_memory_limit: "1Gi".into(),
        scanner_memory_request: "512Mi".into(),
        clientmanager_image_with_tag: "clientmanager:1.0".into(),
        this_image_with_tag: "skydriver:1.0".into(),
        sidecar_s3_lifetime_seconds: 1800,
    }
}

fn test_config(ci_test_mode: bool) -> Config {
    Config {
        rest_host: "0.0.0.0".into(),
        rest_port: 8080,
        mongodb_host: "localhost".into(),
        mongodb_port: 27017,
        mongodb_auth_user: None,
        mongodb_auth_pass: None,
        db_name: "SkyDriver_DB_test".into(),
        ewms_address: "http://ewms.example.org".into(),
        k8s: k8s_config(),
        auth_shared_secret: "test-secret".into(),
        ci_test_mode,
        wait_before_teardown_secs: 0,
    }
}

fn test_app_with_state(ci_test_mode: bool) -> (axum::Router, Arc<AppState>) {
    let state = Arc::new(AppState {
        store: Arc::new(MemoryStore::new()),
        ewms: Arc::new(FakeEwmsClient::new()),
        launcher: Arc::new(FakeJobLauncher::new()),
        kube_client: None,
        clusters: ClusterRegistry::from_env_or_default(),
        docker_tags: DockerTagCache::new(vec!["1.0.0".to_string()]),
        metrics: ServerMetrics::new(),
        config: test_config(ci_test_mode),
    });
    (build_router(state.clone()), state)
}

fn valid_scan_body() -> Value {
    json!({
        "docker_tag": "latest",
        "reco_algo": "millipede_wilks",
        "event_i3live_json": {"a": 1},
        "nsides": {},
        "real_or_simulated_event": "real",
        "cluster": {"sub-2": 4},
        "worker_memory": "4G",
        "worker_disk": "1G",
        "scanner_server_memory": "512M",
        "predictive_scanning_threshold": 1.0,
        "max_pixel_reco_time": 60,
        "max_worker_runtime": 3600,
        "priority": 0,
    })
}

async fn post_json(app: &axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value: Value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn get(app: &axum::Router, uri: &str) -> Response {
    app.clone()
        .oneshot(Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

fn mint(secret: &str, role: &str) -> String {
    #[derive(serde::Serialize)]
    struct Claims<'a> {
        sub: &'a str,
        skydriver_role: &'a str,
        exp: usize,
    }
    let claims = Claims {
        sub: "tester",
        skydriver_role: role,
        exp: 9_999_999_999,
    };
    jsonwebtoken::encode(
        &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

#[tokio::test]
async fn valid_request_is_admitted_and_tag_resolved() {
    let (app, state) = test_app_with_state(true);
    let (status, body) = post_json(&app, "/scan", valid_scan_body()).await;
    assert_eq!(status, StatusCode::CREATED);
    let scan_id = body["scan_id"].as_str().unwrap().to_string();

    let request = state.store.get_scan_request(&scan_id).await.unwrap();
    assert_eq!(request.docker_tag, "1.0.0");
}

#[tokio::test]
async fn admission_rejects_unknown_cluster() {
    let (app, _state) = test_app_with_state(true);
    let mut body = valid_scan_body();
    body["cluster"] = json!({"not-a-cluster": 1});
    let (status, value) = post_json(&app, "/scan", body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(value["reason"].as_str().unwrap().contains("not-a-cluster"));
}

#[tokio::test]
async fn admission_accumulates_multiple_errors() {
    let (app, _state) = test_app_with_state(true);
    let mut body = valid_scan_body();
    body["reco_algo"] = json!("");
    body["cluster"] = json!({"bogus": 1});
    body["predictive_scanning_threshold"] = json!(5.0);
    let (status, value) = post_json(&app, "/scan", body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let reason = value["reason"].as_str().unwrap();
    assert!(reason.contains("reco_algo"));
    assert!(reason.contains("bogus"));
    assert!(reason.contains("threshold"));
}

#[tokio::test]
async fn low_priority_scan_is_enqueued_in_backlog() {
    let (app, state) = test_app_with_state(true);
    let (_, body) = post_json(&app, "/scan", valid_scan_body()).await;
    let scan_id = body["scan_id"].as_str().unwrap().to_string();

    let backlog = state.store.list_backlog().await.unwrap();
    assert_eq!(backlog.len(), 1);
    assert_eq!(backlog[0].scan_id, scan_id);
}

#[tokio::test]
async fn high_priority_scan_skips_the_backlog() {
    let (app, state) = test_app_with_state(true);
    let mut body = valid_scan_body();
    body["priority"] = json!(20);
    let (status, _) = post_json(&app, "/scan", body).await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(state.store.list_backlog().await.unwrap().is_empty());
}

#[tokio::test]
async fn missing_bearer_token_is_unauthorized_without_ci_bypass() {
    let (app, _state) = test_app_with_state(false);
    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/scan")
                .header("content-type", "application/json")
                .body(Body::from(valid_scan_body().to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn patch_manifest_requires_system_role() {
    let (app, _state) = test_app_with_state(false);
    let user_token = mint("test-secret", "user");

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/scan")
                .header("content-type", "application/json")
                .header("authorization", format!("Bearer {user_token}"))
                .body(Body::from(valid_scan_body().to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let manifest: Value = serde_json::from_slice(&bytes).unwrap();
    let scan_id = manifest["scan_id"].as_str().unwrap().to_string();

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PATCH")
                .uri(format!("/scan/{scan_id}/manifest"))
                .header("content-type", "application/json")
                .header("authorization", format!("Bearer {user_token}"))
                .body(Body::from(json!({}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let system_token = mint("test-secret", "system");
    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PATCH")
                .uri(format!("/scan/{scan_id}/manifest"))
                .header("content-type", "application/json")
                .header("authorization", format!("Bearer {system_token}"))
                .body(Body::from(json!({}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn redirect_on_replacement_preserves_query_string_and_trailing_path() {
    let (app, _state) = test_app_with_state(true);
    let (_, body) = post_json(&app, "/scan", valid_scan_body()).await;
    let old_scan_id = body["scan_id"].as_str().unwrap().to_string();

    let (status, rescan_body) = post_json(
        &app,
        &format!("/scan/{old_scan_id}/actions/rescan"),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let new_scan_id = rescan_body["scan_id"].as_str().unwrap().to_string();

    let resp = get(
        &app,
        &format!("/scan/{old_scan_id}/result?include_deleted=true"),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    let location = resp
        .headers()
        .get(axum::http::header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap();
    assert_eq!(
        location,
        format!("/scan/{new_scan_id}/result?include_deleted=true")
    );
}

#[tokio::test]
async fn find_scans_respects_include_deleted() {
    let (app, _state) = test_app_with_state(true);
    let (_, body) = post_json(&app, "/scan", valid_scan_body()).await;
    let scan_id = body["scan_id"].as_str().unwrap().to_string();

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/scan/{scan_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let find_body = json!({"filter": {"scan_id": {"$in": [scan_id.clone()]}}});
    let (_, found) = post_json(&app, "/scans/find", find_body.clone()).await;
    assert!(found["manifests"].as_array().unwrap().is_empty());

    let mut find_body_with_deleted = find_body;
    find_body_with_deleted["include_deleted"] = json!(true);
    let (_, found) = post_json(&app, "/scans/find", find_body_with_deleted).await;
    let manifests = found["manifests"].as_array().unwrap();
    assert_eq!(manifests.len(), 1);
    assert_eq!(manifests[0]["scan_id"], json!(scan_id));
}
