//! Learning and analytics route group.
//!
//! Analyze is explicit (the commit-observer hook posts here); decisions
//! are idempotent; failure ingest is best-effort so hooks never block.

use std::sync::Arc;

use aif_core::types::{Decision, FailureCategory};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tracing::warn;

use crate::learning::LearningError;
use crate::server::{api_error, ApiError, AppState};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/learning/analyze", post(analyze))
        .route("/learning/proposals", get(list_proposals))
        .route("/learning/proposals/{id}/decide", post(decide))
        .route("/learning/stats", get(stats))
        .route("/learning/config", get(config))
        .route(
            "/learning/analytics/failures",
            get(failures_summary).post(record_failure),
        )
        .route("/learning/analytics/trend", get(trend))
        .route("/learning/analytics/hotspots", get(hotspots))
        .route("/learning/analytics/effectiveness", get(effectiveness))
}

fn map_learning_error(e: LearningError) -> ApiError {
    match &e {
        LearningError::ProposalNotFound(_) => api_error(StatusCode::NOT_FOUND, e.to_string()),
        LearningError::InvalidDecision(_) => api_error(StatusCode::BAD_REQUEST, e.to_string()),
        LearningError::Git(_) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        LearningError::Storage(_) | LearningError::Database(_) => {
            api_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
        _ => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[derive(Debug, Deserialize, Default)]
struct AnalyzeRequest {
    #[serde(default)]
    since_commit: Option<String>,
}

/// POST /learning/analyze
async fn analyze(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let report = state
        .learning
        .analyze(&state.config, req.since_commit.as_deref())
        .await
        .map_err(map_learning_error)?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize, Default)]
struct ListProposalsQuery {
    #[serde(default)]
    max_count: Option<u32>,
    #[serde(default)]
    min_confidence: Option<f64>,
    /// Include decided proposals too.
    #[serde(default)]
    all: bool,
}

/// GET /learning/proposals
async fn list_proposals(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListProposalsQuery>,
) -> impl IntoResponse {
    let result = state
        .learning
        .store
        .list_proposals(
            query.max_count.unwrap_or(20),
            query.min_confidence.unwrap_or(0.0),
            !query.all,
        )
        .await;
    match result {
        Ok(proposals) => Json(serde_json::json!({ "proposals": proposals })),
        Err(e) => {
            warn!(error = %e, "proposal list failed");
            Json(serde_json::json!({ "proposals": [] }))
        }
    }
}

#[derive(Debug, Deserialize)]
struct DecideRequest {
    decision: String,
    #[serde(default)]
    edited_content: Option<String>,
}

/// POST /learning/proposals/{id}/decide - idempotent on decided proposals.
async fn decide(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<DecideRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let decision = Decision::parse(&req.decision).ok_or_else(|| {
        api_error(
            StatusCode::BAD_REQUEST,
            format!("unknown decision: {} (expected accept|reject|ignore|snooze)", req.decision),
        )
    })?;

    let outcome = state
        .learning
        .decide(&state.config, &id, decision, req.edited_content)
        .await
        .map_err(map_learning_error)?;
    Ok(Json(outcome))
}

/// GET /learning/stats
async fn stats(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let stats = state.learning.stats().await.map_err(map_learning_error)?;
    Ok(Json(stats))
}

/// GET /learning/config - effective learning settings.
async fn config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "global_enabled": state.config.learning.global_enabled,
        "sensitivity": state.config.learning.sensitivity.as_str(),
        "min_confidence": state.config.min_confidence(),
        "max_proposals_per_session": state.config.learning.max_proposals_per_session,
        "cooldown_days": state.config.learning.cooldown_days,
        "warmup_hours": state.config.learning.warmup_hours,
        "commits_per_trigger": state.config.learning.commits_per_trigger,
    }))
}

#[derive(Debug, Deserialize, Default)]
struct WindowQuery {
    #[serde(default)]
    days: Option<u32>,
    #[serde(default)]
    top: Option<u32>,
}

/// GET /learning/analytics/failures
async fn failures_summary(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WindowQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let summary = state
        .learning
        .analytics()
        .summary(query.days.unwrap_or(7))
        .await
        .map_err(|e| api_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
struct RecordFailureRequest {
    category: String,
    file_path: String,
    detail: String,
}

/// POST /learning/analytics/failures - hook ingest, best-effort.
async fn record_failure(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RecordFailureRequest>,
) -> impl IntoResponse {
    let category = FailureCategory::parse(&req.category);
    match state
        .learning
        .analytics()
        .record_failure(category, &req.file_path, &req.detail)
        .await
    {
        Ok(inserted) => Json(serde_json::json!({ "accepted": true, "deduped": !inserted })),
        Err(e) => {
            warn!(error = %e, "failure ingest failed; swallowing for hook");
            Json(serde_json::json!({ "accepted": false }))
        }
    }
}

/// GET /learning/analytics/trend
async fn trend(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WindowQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let trend = state
        .learning
        .analytics()
        .trend(query.days.unwrap_or(30))
        .await
        .map_err(|e| api_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;
    Ok(Json(serde_json::json!({ "trend": trend })))
}

/// GET /learning/analytics/hotspots
async fn hotspots(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WindowQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let hotspots = state
        .learning
        .analytics()
        .hotspots(query.days.unwrap_or(30), query.top.unwrap_or(10))
        .await
        .map_err(|e| api_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;
    Ok(Json(serde_json::json!({ "hotspots": hotspots })))
}

/// GET /learning/analytics/effectiveness - per accepted rule.
async fn effectiveness(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let baselines = state
        .learning
        .store
        .list_baselines()
        .await
        .map_err(map_learning_error)?;
    let scored = state
        .learning
        .analytics()
        .effectiveness(&baselines)
        .await
        .map_err(|e| api_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;
    Ok(Json(serde_json::json!({ "rules": scored })))
}
