//! Orchestration route group: the spec lifecycle over HTTP.
//!
//! Raw reviewer output is parsed into a structured verdict at the boundary;
//! the coordinator only ever sees parsed structures.

use std::path::PathBuf;
use std::sync::Arc;

use aif_core::verdict::parse_verdict;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::coordinator::CoordinatorError;
use crate::server::{api_error, ApiError, AppState};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orchestration/specs", get(list_specs))
        .route("/orchestration/specs/{slug}", get(get_spec))
        .route("/orchestration/busy", get(busy))
        .route("/orchestration/start", post(start))
        .route("/orchestration/assess", post(assess))
        .route("/orchestration/specs/{slug}/approve-plan", post(approve_plan))
        .route("/orchestration/specs/{slug}/tasks/{task}/start", post(start_task))
        .route(
            "/orchestration/specs/{slug}/tasks/{task}/complete",
            post(complete_task),
        )
        .route("/orchestration/specs/{slug}/start-verify", post(start_verify))
        .route("/orchestration/specs/{slug}/verdicts", post(submit_verdict))
        .route("/orchestration/specs/{slug}/resolve-verify", post(resolve_verify))
        .route("/orchestration/specs/{slug}/start-learn", post(start_learn))
        .route("/orchestration/specs/{slug}/complete", post(complete))
        .route("/orchestration/specs/{slug}/abort", post(abort))
        .route("/orchestration/specs/{slug}/worktree", get(worktree_status))
        .route("/orchestration/specs/{slug}/diff", get(diff))
}

fn map_coordinator_error(e: CoordinatorError) -> ApiError {
    match &e {
        CoordinatorError::Validation(_) => api_error(StatusCode::BAD_REQUEST, e.to_string()),
        CoordinatorError::State { .. } => api_error(StatusCode::CONFLICT, e.to_string()),
        CoordinatorError::NotFound(_) => api_error(StatusCode::NOT_FOUND, e.to_string()),
        CoordinatorError::Worktree(_) | CoordinatorError::Persistence(_) => {
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// GET /orchestration/specs
async fn list_specs(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({ "specs": state.coordinator.list() }))
}

/// GET /orchestration/specs/{slug}
async fn get_spec(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let spec = state
        .coordinator
        .load(&slug)
        .map_err(map_coordinator_error)?;
    Ok(Json(serde_json::json!({ "spec": spec })))
}

/// GET /orchestration/busy - session-exit stop-guard.
async fn busy(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({ "busy": state.coordinator.is_busy() }))
}

#[derive(Debug, Deserialize)]
struct StartRequest {
    slug: String,
    #[serde(default)]
    plan_path: Option<PathBuf>,
}

/// POST /orchestration/start
async fn start(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let spec = state
        .coordinator
        .start(&req.slug, req.plan_path.as_deref())
        .await
        .map_err(map_coordinator_error)?;
    Ok((StatusCode::CREATED, Json(serde_json::json!({ "spec": spec }))))
}

#[derive(Debug, Deserialize)]
struct AssessRequest {
    slug: String,
    #[serde(default)]
    files: Vec<String>,
}

/// POST /orchestration/assess - advisory and pure.
async fn assess(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AssessRequest>,
) -> impl IntoResponse {
    let complexity = state.coordinator.assess(&req.slug, &req.files);
    Json(serde_json::json!({ "complexity": complexity.as_str() }))
}

#[derive(Debug, Deserialize)]
struct ApprovePlanRequest {
    total_tasks: u32,
}

/// POST /orchestration/specs/{slug}/approve-plan
async fn approve_plan(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    Json(req): Json<ApprovePlanRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let spec = state
        .coordinator
        .approve_plan(&slug, req.total_tasks)
        .await
        .map_err(map_coordinator_error)?;
    Ok(Json(serde_json::json!({ "spec": spec })))
}

/// POST /orchestration/specs/{slug}/tasks/{task}/start
async fn start_task(
    State(state): State<Arc<AppState>>,
    Path((slug, task)): Path<(String, u32)>,
) -> Result<impl IntoResponse, ApiError> {
    let spec = state
        .coordinator
        .start_task(&slug, task)
        .await
        .map_err(map_coordinator_error)?;
    Ok(Json(serde_json::json!({ "spec": spec })))
}

/// POST /orchestration/specs/{slug}/tasks/{task}/complete
async fn complete_task(
    State(state): State<Arc<AppState>>,
    Path((slug, task)): Path<(String, u32)>,
) -> Result<impl IntoResponse, ApiError> {
    let spec = state
        .coordinator
        .complete_task(&slug, task)
        .await
        .map_err(map_coordinator_error)?;
    Ok(Json(serde_json::json!({ "spec": spec })))
}

/// POST /orchestration/specs/{slug}/start-verify
async fn start_verify(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let spec = state
        .coordinator
        .start_verify(&slug)
        .await
        .map_err(map_coordinator_error)?;
    Ok(Json(serde_json::json!({ "spec": spec })))
}

#[derive(Debug, Deserialize)]
struct SubmitVerdictRequest {
    reviewer_id: String,
    /// Raw reviewer output; parsed against the strict verdict contract.
    output: String,
}

/// POST /orchestration/specs/{slug}/verdicts
async fn submit_verdict(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    Json(req): Json<SubmitVerdictRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let verdict = parse_verdict(&req.reviewer_id, &req.output, 0);
    let count = state
        .coordinator
        .submit_verdict(&slug, verdict.clone())
        .await
        .map_err(map_coordinator_error)?;
    Ok(Json(serde_json::json!({
        "verdict": verdict,
        "submitted": count,
    })))
}

/// POST /orchestration/specs/{slug}/resolve-verify
async fn resolve_verify(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let (spec, outcome) = state
        .coordinator
        .resolve_verify(&slug)
        .await
        .map_err(map_coordinator_error)?;
    Ok(Json(serde_json::json!({ "spec": spec, "outcome": outcome })))
}

/// POST /orchestration/specs/{slug}/start-learn
async fn start_learn(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let spec = state
        .coordinator
        .start_learn(&slug)
        .await
        .map_err(map_coordinator_error)?;
    Ok(Json(serde_json::json!({ "spec": spec })))
}

/// POST /orchestration/specs/{slug}/complete
async fn complete(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let spec = state
        .coordinator
        .complete(&slug)
        .await
        .map_err(map_coordinator_error)?;
    Ok(Json(serde_json::json!({ "spec": spec })))
}

#[derive(Debug, Deserialize, Default)]
struct AbortRequest {
    #[serde(default)]
    reason: Option<String>,
}

/// POST /orchestration/specs/{slug}/abort
async fn abort(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    Json(req): Json<AbortRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let spec = state
        .coordinator
        .abort(&slug, req.reason.as_deref())
        .await
        .map_err(map_coordinator_error)?;
    Ok(Json(serde_json::json!({ "spec": spec })))
}

/// GET /orchestration/specs/{slug}/worktree
async fn worktree_status(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let spec = state
        .coordinator
        .load(&slug)
        .map_err(map_coordinator_error)?;
    let status = state
        .coordinator
        .worktree_status(&slug, &spec.worktree_sha8)
        .await
        .map_err(map_coordinator_error)?;
    Ok(Json(serde_json::json!({ "worktree": status })))
}

/// GET /orchestration/specs/{slug}/diff
async fn diff(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .coordinator
        .load(&slug)
        .map_err(map_coordinator_error)?;
    let diff = state
        .coordinator
        .worktree_diff(&slug)
        .await
        .map_err(map_coordinator_error)?;
    Ok(Json(serde_json::json!({ "diff": diff })))
}
