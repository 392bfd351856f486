//! REST route handlers. Each handler does admission/authorization at the
//! edge, delegates the actual decision to `skydriver-core`/`skydriver-db`,
//! and converts the outcome to a response; no business logic lives here
//! beyond wiring spec.md §4's flows together (admission, redirect-on-
//! replacement, teardown scheduling).

use axum::extract::{Path, Query, RawQuery, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use skydriver_core::validation::{validate_scan_request, ScanRequestInput};
use skydriver_core::{
    BacklogEntry, ClassifierValue, Cluster, DebugMode, K8sJobDoc, Manifest, Progress, ScanRequest,
    ScanResult,
};
use skydriver_db::ManifestPatch;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;
use crate::teardown;
use crate::util::{allocate_scan_id, now_unix};

/// Fields every manifest read omits unless the caller explicitly asks
/// for them via `manifest_projection`, per spec.md §6. `Manifest` never
/// carries the raw event payload itself (only its hash), so this list
/// is mostly a guard against a field being added there later.
const DEFAULT_EXCLUDED_MANIFEST_FIELDS: &[&str] = &["event_i3live_json_dict"];

// ---------------------------------------------------------------------
// Request/response bodies
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum ClusterInput {
    Map(BTreeMap<String, u32>),
    List(Vec<(String, u32)>),
}

impl ClusterInput {
    fn into_pairs(self) -> Vec<(String, u32)> {
        match self {
            ClusterInput::Map(m) => m.into_iter().collect(),
            ClusterInput::List(l) => l,
        }
    }
}

fn default_threshold() -> f64 {
    1.0
}

#[derive(Debug, Deserialize)]
pub struct ScanRequestBody {
    pub docker_tag: String,
    pub reco_algo: String,
    /// Either the parsed i3live JSON object itself or a JSON-encoded
    /// string of one, matching the original's acceptance of both.
    pub event_i3live_json: serde_json::Value,
    #[serde(default)]
    pub nsides: BTreeMap<String, i64>,
    pub real_or_simulated_event: String,
    pub cluster: ClusterInput,
    pub worker_memory: String,
    pub worker_disk: String,
    pub scanner_server_memory: String,
    #[serde(default = "default_threshold")]
    pub predictive_scanning_threshold: f64,
    pub max_pixel_reco_time: i64,
    pub max_worker_runtime: i64,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub classifiers: BTreeMap<String, ClassifierValue>,
    #[serde(default)]
    pub debug_mode: Vec<DebugMode>,
}

impl ScanRequestBody {
    fn into_input(self) -> Result<ScanRequestInput, ApiError> {
        let event_i3live_json_dict = match self.event_i3live_json {
            serde_json::Value::Object(map) => map,
            serde_json::Value::String(s) => serde_json::from_str(&s).map_err(|_| {
                ApiError::Validation(vec!["event_i3live_json is not valid JSON".to_string()])
            })?,
            _ => serde_json::Map::new(),
        };

        let is_real_event = match self.real_or_simulated_event.to_lowercase().as_str() {
            "real" => true,
            "simulated" => false,
            other => {
                return Err(ApiError::Validation(vec![format!(
                    "real_or_simulated_event must be 'real' or 'simulated', got '{other}'"
                )]))
            }
        };

        let nsides = self
            .nsides
            .into_iter()
            .filter_map(|(k, v)| k.parse::<i64>().ok().map(|k| (k, v)))
            .collect();

        Ok(ScanRequestInput {
            docker_tag: self.docker_tag,
            reco_algo: self.reco_algo,
            event_i3live_json_dict,
            nsides,
            is_real_event,
            requested_clusters: self.cluster.into_pairs(),
            worker_memory: self.worker_memory,
            worker_disk: self.worker_disk,
            scanner_server_memory: self.scanner_server_memory,
            predictive_scanning_threshold: self.predictive_scanning_threshold,
            max_pixel_reco_time: self.max_pixel_reco_time,
            max_worker_runtime: self.max_worker_runtime,
            priority: self.priority,
            classifiers: self.classifiers,
            debug_mode: self.debug_mode,
        })
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct ManifestQuery {
    #[serde(default)]
    include_deleted: bool,
    /// Comma-separated field list, or `"*"` for everything.
    #[serde(default)]
    manifest_projection: Option<String>,
    #[serde(default)]
    no_redirect: bool,
}

impl ManifestQuery {
    fn projection_list(&self) -> Vec<String> {
        self.manifest_projection
            .as_deref()
            .map(|s| {
                s.split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct DeleteScanQuery {
    #[serde(default)]
    delete_completed_scan: bool,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct ManifestPatchBody {
    #[serde(default)]
    progress: Option<Progress>,
    #[serde(default)]
    event_metadata: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    scan_metadata: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    cluster: Option<Cluster>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PutResultBody {
    skyscan_result: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    is_final: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct RescanBody {
    #[serde(default)]
    abort_first: bool,
    #[serde(default = "default_true")]
    replace_scan: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AddWorkersBody {
    cluster: String,
    n_workers: u32,
}

#[derive(Debug, Deserialize)]
struct ScanIdFilter {
    #[serde(rename = "$in")]
    in_: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct FindFilter {
    scan_id: ScanIdFilter,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FindScansBody {
    filter: FindFilter,
    #[serde(default)]
    manifest_projection: Vec<String>,
    #[serde(default)]
    include_deleted: bool,
}

// ---------------------------------------------------------------------
// Projection and redirect helpers (spec.md §4.8 / §6 / §9)
// ---------------------------------------------------------------------

fn project_manifest(manifest: &Manifest, projection: &[String]) -> serde_json::Value {
    let mut value = serde_json::to_value(manifest).unwrap_or(serde_json::Value::Null);
    let serde_json::Value::Object(map) = &mut value else {
        return value;
    };
    if projection.iter().any(|p| p == "*") {
        return value;
    }
    if projection.is_empty() {
        map.retain(|k, _| !DEFAULT_EXCLUDED_MANIFEST_FIELDS.contains(&k.as_str()));
    } else {
        map.retain(|k, _| projection.iter().any(|p| p == k));
    }
    value
}

/// Builds the redirect `Location`, preserving the original request's
/// query string and trailing path segment (spec.md §9: "Redirection
/// preserves the rest of the URL").
fn redirect_response(new_scan_id: &str, suffix: &str, query: Option<&str>) -> Response {
    let mut location = format!("/scan/{new_scan_id}{suffix}");
    if let Some(q) = query.filter(|q| !q.is_empty()) {
        location.push('?');
        location.push_str(q);
    }
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

enum ManifestLookup {
    Found(Manifest),
    Redirect(Response),
}

/// Loads a manifest and applies the redirect-on-replacement decorator
/// before any not-found/deleted checks, since redirect semantics take
/// precedence over error codes (spec.md §9).
async fn load_manifest(
    state: &AppState,
    scan_id: &str,
    include_deleted: bool,
    no_redirect: bool,
    suffix: &str,
    query: Option<&str>,
) -> Result<ManifestLookup, ApiError> {
    let manifest = state.store.get_manifest(scan_id, true).await?;
    if let Some(new_id) = &manifest.replaced_by_scan_id {
        if !no_redirect {
            return Ok(ManifestLookup::Redirect(redirect_response(
                new_id, suffix, query,
            )));
        }
    }
    if manifest.is_deleted && !include_deleted {
        return Err(ApiError::NotFound);
    }
    Ok(ManifestLookup::Found(manifest))
}

// ---------------------------------------------------------------------
// Token minting (spec.md §4.5)
// ---------------------------------------------------------------------

#[derive(Serialize)]
struct RestTokenClaims<'a> {
    sub: &'a str,
    skydriver_role: &'a str,
    exp: usize,
}

/// Mints the pair of tokens embedded into a scanner job spec: a
/// SkyDriver-issued REST callback token (signed with the same shared
/// secret `AuthUser` verifies against) and an EWMS client token. Minting
/// the EWMS token is a real OAuth client-credentials grant against an
/// external provider in the original; that provider is out of scope here
/// (spec.md §1), so it is left empty, which `HttpEwmsClient`/the scanner
/// treat the same way `CI=true` does upstream.
fn mint_tokens(state: &AppState, scan_id: &str) -> (String, String) {
    if state.config.ci_test_mode {
        return (String::new(), String::new());
    }
    let claims = RestTokenClaims {
        sub: scan_id,
        skydriver_role: "system",
        exp: now_unix() as usize + 7 * 24 * 3600,
    };
    let rest_token = jsonwebtoken::encode(
        &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(state.config.auth_shared_secret.as_bytes()),
    )
    .unwrap_or_default();
    (rest_token, String::new())
}

// ---------------------------------------------------------------------
// Shared admission + stop flow (spec.md §4.1, §4.8)
// ---------------------------------------------------------------------

async fn admit_scan(state: &AppState, request: ScanRequest) -> Result<Manifest, ApiError> {
    let now = now_unix();
    let hash = skydriver_core::canonical_event_hash(&serde_json::Value::Object(
        request.event_i3live_json_dict.clone(),
    ));
    let manifest = Manifest {
        scan_id: request.scan_id.clone(),
        timestamp: now,
        last_updated: now,
        is_deleted: false,
        priority: request.priority,
        event_i3live_json_dict_hash: hash,
        ewms_workflow_id: None,
        progress: None,
        event_metadata: None,
        scan_metadata: None,
        clusters: Vec::new(),
        complete: false,
        replaced_by_scan_id: None,
        classifiers: request.classifiers.clone(),
    };

    state.store.insert_scan_request(&request).await?;
    state.store.insert_manifest(&manifest).await?;

    let (rest_token, ewms_token) = mint_tokens(state, &request.scan_id);
    let job_spec = skydriver_k8s::factory::build_job_spec(
        &request.scan_id,
        &request,
        &state.config.k8s,
        &state.config.ewms_address,
        &rest_token,
        &ewms_token,
    );
    state
        .store
        .insert_k8s_job_doc(&K8sJobDoc {
            scan_id: request.scan_id.clone(),
            job_spec: job_spec.clone(),
        })
        .await?;

    let backlog_entry = BacklogEntry {
        scan_id: request.scan_id.clone(),
        timestamp: now,
        priority: request.priority,
        next_attempt: 0,
        pending_timestamp: None,
    };

    let started_immediately = manifest.skips_backlog()
        && state.launcher.create_job(&job_spec).await.is_ok();
    if !started_immediately {
        state.store.enqueue_backlog(&backlog_entry).await?;
    }
    state
        .metrics
        .scans_admitted_total
        .get_or_create(&crate::metrics::OutcomeLabel {
            outcome: if started_immediately {
                "started".to_string()
            } else {
                "backlogged".to_string()
            },
        })
        .inc();

    Ok(manifest)
}

async fn stop_scan_instance(state: &AppState, manifest: &Manifest) {
    if let Some(workflow_id) = &manifest.ewms_workflow_id {
        state.ewms.abort(workflow_id).await;
    }
    let job_name = skydriver_k8s::factory::job_name(&manifest.scan_id);
    if let Err(e) = state.launcher.delete_job(&job_name).await {
        tracing::warn!(scan_id = %manifest.scan_id, "delete_job failed while stopping scan: {e}");
    }
}

// ---------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------

pub async fn liveness() -> &'static str {
    "OK"
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> String {
    state.metrics.encode()
}

pub async fn create_scan(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Json(body): Json<ScanRequestBody>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let input = body.into_input()?;
    let scan_id = allocate_scan_id();
    let request = validate_scan_request(&scan_id, input, &state.docker_tags, &state.clusters)
        .map_err(|errs| ApiError::Validation(errs.into_iter().map(|e| e.to_string()).collect()))?;
    let manifest = admit_scan(&state, request).await?;
    Ok((StatusCode::CREATED, Json(project_manifest(&manifest, &[]))))
}

pub async fn get_scan(
    State(state): State<Arc<AppState>>,
    Path(scan_id): Path<String>,
    Query(q): Query<ManifestQuery>,
    RawQuery(query): RawQuery,
    _auth: AuthUser,
) -> Result<Response, ApiError> {
    match load_manifest(
        &state,
        &scan_id,
        q.include_deleted,
        q.no_redirect,
        "",
        query.as_deref(),
    )
    .await?
    {
        ManifestLookup::Redirect(resp) => Ok(resp),
        ManifestLookup::Found(manifest) => {
            let result = state.store.get_result(&scan_id, q.include_deleted).await?;
            Ok(Json(serde_json::json!({
                "manifest": project_manifest(&manifest, &q.projection_list()),
                "result": result,
            }))
            .into_response())
        }
    }
}

pub async fn delete_scan(
    State(state): State<Arc<AppState>>,
    Path(scan_id): Path<String>,
    Query(q): Query<DeleteScanQuery>,
    _auth: AuthUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    let manifest = state.store.get_manifest(&scan_id, true).await?;
    if manifest.complete && !q.delete_completed_scan {
        return Err(ApiError::Conflict(
            "scan has already completed; pass ?delete_completed_scan=true to delete it anyway"
                .to_string(),
        ));
    }

    stop_scan_instance(&state, &manifest).await;
    state.store.mark_manifest_deleted(&scan_id).await?;
    let _ = state.store.remove_backlog_entry(&scan_id).await;
    state.metrics.scans_deleted_total.inc();

    Ok(Json(serde_json::json!({"scan_id": scan_id, "deleted": true})))
}

pub async fn get_manifest(
    State(state): State<Arc<AppState>>,
    Path(scan_id): Path<String>,
    Query(q): Query<ManifestQuery>,
    RawQuery(query): RawQuery,
    _auth: AuthUser,
) -> Result<Response, ApiError> {
    match load_manifest(
        &state,
        &scan_id,
        q.include_deleted,
        q.no_redirect,
        "/manifest",
        query.as_deref(),
    )
    .await?
    {
        ManifestLookup::Redirect(resp) => Ok(resp),
        ManifestLookup::Found(manifest) => {
            Ok(Json(project_manifest(&manifest, &q.projection_list())).into_response())
        }
    }
}

pub async fn patch_manifest(
    State(state): State<Arc<AppState>>,
    Path(scan_id): Path<String>,
    auth: AuthUser,
    Json(body): Json<ManifestPatchBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    auth.require_system()?;

    let clusters = if let Some(update) = body.cluster {
        let mut existing = state.store.get_manifest(&scan_id, true).await?.clusters;
        match existing.iter_mut().find(|c| c.name == update.name) {
            Some(c) => *c = update,
            None => existing.push(update),
        }
        Some(existing)
    } else {
        None
    };

    let patch = ManifestPatch {
        progress: body.progress,
        event_metadata: body.event_metadata,
        scan_metadata: body.scan_metadata,
        clusters,
        ..Default::default()
    };
    let manifest = state.store.patch_manifest(&scan_id, patch, now_unix()).await?;
    Ok(Json(project_manifest(&manifest, &[])))
}

pub async fn get_result(
    State(state): State<Arc<AppState>>,
    Path(scan_id): Path<String>,
    Query(q): Query<ManifestQuery>,
    RawQuery(query): RawQuery,
    _auth: AuthUser,
) -> Result<Response, ApiError> {
    if let ManifestLookup::Redirect(resp) = load_manifest(
        &state,
        &scan_id,
        q.include_deleted,
        q.no_redirect,
        "/result",
        query.as_deref(),
    )
    .await?
    {
        return Ok(resp);
    }
    match state.store.get_result(&scan_id, q.include_deleted).await? {
        Some(result) => Ok(Json(result).into_response()),
        None => Err(ApiError::NotFound),
    }
}

pub async fn put_result(
    State(state): State<Arc<AppState>>,
    Path(scan_id): Path<String>,
    auth: AuthUser,
    Json(body): Json<PutResultBody>,
) -> Result<Json<ScanResult>, ApiError> {
    auth.require_system()?;
    let result = state
        .store
        .put_result(&scan_id, body.skyscan_result, body.is_final)
        .await?;
    if result.is_final {
        teardown::schedule(state.clone(), scan_id, state.config.wait_before_teardown_secs);
    }
    Ok(Json(result))
}

pub async fn get_status(
    State(state): State<Arc<AppState>>,
    Path(scan_id): Path<String>,
    Query(q): Query<ManifestQuery>,
    RawQuery(query): RawQuery,
    _auth: AuthUser,
) -> Result<Response, ApiError> {
    let manifest = match load_manifest(
        &state,
        &scan_id,
        q.include_deleted,
        q.no_redirect,
        "/status",
        query.as_deref(),
    )
    .await?
    {
        ManifestLookup::Redirect(resp) => return Ok(resp),
        ManifestLookup::Found(m) => m,
    };
    let result = state.store.get_result(&scan_id, q.include_deleted).await?;
    let deactivation = if manifest.has_actual_workflow_id() {
        state
            .ewms
            .get_deactivated_type(manifest.ewms_workflow_id.as_deref().unwrap_or_default())
            .await
    } else {
        None
    };
    let scan_state = manifest.state(result.as_ref(), deactivation);
    Ok(Json(serde_json::json!({
        "scan_id": scan_id,
        "scan_state": scan_state.as_str(),
        "is_deleted": manifest.is_deleted,
    }))
    .into_response())
}

pub async fn get_logs(
    State(state): State<Arc<AppState>>,
    Path(scan_id): Path<String>,
    _auth: AuthUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Some(kube_client) = &state.kube_client else {
        return Err(ApiError::Internal(
            "no kubernetes client configured for this deployment".to_string(),
        ));
    };

    let job_name = skydriver_k8s::factory::job_name(&scan_id);
    let pods: kube::Api<k8s_openapi::api::core::v1::Pod> =
        kube::Api::namespaced(kube_client.clone(), &state.config.k8s.namespace);
    let list_params = kube::api::ListParams::default().labels(&format!("job-name={job_name}"));
    let pod_list = pods
        .list(&list_params)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let Some(pod) = pod_list.items.into_iter().next() else {
        return Err(ApiError::NotFound);
    };
    let pod_name = pod.metadata.name.unwrap_or_default();

    let log_params = kube::api::LogParams {
        container: Some(skydriver_k8s::factory::server_container_name(&scan_id)),
        tail_lines: Some(500),
        ..Default::default()
    };
    let logs = pods
        .logs(&pod_name, &log_params)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(serde_json::json!({
        "scan_id": scan_id,
        "pod": pod_name,
        "logs": logs,
    })))
}

pub async fn rescan(
    State(state): State<Arc<AppState>>,
    Path(scan_id): Path<String>,
    _auth: AuthUser,
    Json(body): Json<RescanBody>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let old_manifest = state.store.get_manifest(&scan_id, true).await?;
    let old_request = state.store.get_scan_request(&scan_id).await?;

    if body.abort_first {
        stop_scan_instance(&state, &old_manifest).await;
    }

    let new_scan_id = allocate_scan_id();
    let mut new_request = old_request;
    new_request.scan_id = new_scan_id.clone();
    new_request.rescan_ids = Vec::new();

    let manifest = admit_scan(&state, new_request).await?;
    state.store.append_rescan_id(&scan_id, &new_scan_id).await?;

    if body.replace_scan {
        let patch = ManifestPatch {
            replaced_by_scan_id: Some(new_scan_id),
            ..Default::default()
        };
        state.store.patch_manifest(&scan_id, patch, now_unix()).await?;
    }
    state.metrics.rescans_total.inc();

    Ok((StatusCode::CREATED, Json(project_manifest(&manifest, &[]))))
}

pub async fn add_workers(
    State(state): State<Arc<AppState>>,
    Path(scan_id): Path<String>,
    _auth: AuthUser,
    Json(body): Json<AddWorkersBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let request = state.store.get_scan_request(&scan_id).await?;
    if !request
        .requested_clusters
        .iter()
        .any(|(name, _)| name == &body.cluster)
    {
        return Err(ApiError::Validation(vec![format!(
            "cluster '{}' was not requested for scan {}",
            body.cluster, scan_id
        )]));
    }

    let mut clusters = state.store.get_manifest(&scan_id, false).await?.clusters;
    match clusters.iter_mut().find(|c| c.name == body.cluster) {
        Some(c) => c.n_workers += body.n_workers,
        None => clusters.push(Cluster {
            name: body.cluster.clone(),
            n_workers: body.n_workers,
            starter_info: serde_json::Map::new(),
        }),
    }

    // Manifest-only bookkeeping: no EWMS scale call is made here (see
    // DESIGN.md's Open Question 4 decision) — the scanner's own workload
    // sizing reconciles against what the manifest records.
    let patch = ManifestPatch {
        clusters: Some(clusters),
        ..Default::default()
    };
    let manifest = state.store.patch_manifest(&scan_id, patch, now_unix()).await?;
    Ok(Json(project_manifest(&manifest, &[])))
}

pub async fn get_ewms_workflow_ids(
    State(state): State<Arc<AppState>>,
    Path(scan_id): Path<String>,
    _auth: AuthUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    let manifest = state.store.get_manifest(&scan_id, true).await?;
    Ok(Json(serde_json::json!({
        "scan_id": scan_id,
        "ewms_workflow_id": manifest.ewms_workflow_id,
    })))
}

pub async fn find_scans(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Json(body): Json<FindScansBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let found_ids = state.store.find_scan_ids(&body.filter.scan_id.in_).await?;
    let mut manifests = Vec::with_capacity(found_ids.len());
    for id in &found_ids {
        if let Ok(manifest) = state.store.get_manifest(id, true).await {
            if manifest.is_deleted && !body.include_deleted {
                continue;
            }
            manifests.push(project_manifest(&manifest, &body.manifest_projection));
        }
    }
    Ok(Json(serde_json::json!({"manifests": manifests})))
}

pub async fn list_backlog(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
) -> Result<Json<Vec<BacklogEntry>>, ApiError> {
    Ok(Json(state.store.list_backlog().await?))
}
