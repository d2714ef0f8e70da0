//! HTTP control plane for the daemon.
//!
//! Local-only REST API over axum. Memory, session, and retrieval routes
//! live here; the learning and orchestration groups are under `handlers`.
//! Hook-origin writes are best-effort: they log failures and answer 200 so
//! the user workflow never blocks on the daemon.

use std::net::SocketAddr;
use std::sync::Arc;

use aif_core::config::Config;
use aif_core::types::{Corpus, EventKind, Id, MemoryEvent};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::code_search::CodeSearch;
use crate::coordinator::Coordinator;
use crate::governance::GovernanceIndex;
use crate::handlers;
use crate::learning::LearningPipeline;
use crate::memory::MemoryStore;
use crate::retriever::Retriever;

/// Shared state for HTTP handlers.
#[derive(Debug)]
pub struct AppState {
    pub config: Config,
    pub memory: MemoryStore,
    pub governance: Option<GovernanceIndex>,
    pub code: Option<CodeSearch>,
    pub retriever: Retriever,
    pub learning: Arc<LearningPipeline>,
    pub coordinator: Arc<Coordinator>,
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// Create the HTTP router with all endpoints.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        // Memory
        .route("/memory/events", post(save_event))
        .route("/memory/events/fetch", post(fetch_events))
        .route("/memory/search", get(search_memory))
        .route("/memory/timeline", get(timeline))
        // Sessions
        .route("/sessions/init", post(init_session))
        .route("/sessions", get(list_sessions))
        // Retrieval
        .route("/retrieval/status", get(retrieval_status))
        .route("/retrieval/search", get(retrieval_search))
        .route("/retrieval/reindex", post(retrieval_reindex))
        // Learning & analytics
        .merge(handlers::learning::routes())
        // Orchestration
        .merge(handlers::orchestration::routes())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve on localhost only.
pub async fn start_server(
    state: Arc<AppState>,
    port: u16,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let router = create_router(state);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("HTTP server listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

// --- Handlers ---

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
struct SaveEventRequest {
    #[serde(default)]
    kind: Option<String>,
    text: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    refs: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    importance: Option<f64>,
    #[serde(default)]
    session_id: Option<String>,
}

/// POST /memory/events - hook-origin, best-effort.
async fn save_event(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SaveEventRequest>,
) -> impl IntoResponse {
    let mut event = MemoryEvent::new(
        req.kind.as_deref().map_or(EventKind::Event, EventKind::parse),
        req.text,
    )
    .with_tags(req.tags)
    .with_importance(req.importance.unwrap_or(0.5));
    for (key, value) in req.refs {
        event = event.with_ref(key, value);
    }
    if let Some(session_id) = req.session_id {
        event = event.with_session(session_id);
    }

    match state.memory.save_event(&event).await {
        Ok(()) => Json(serde_json::json!({ "accepted": true, "id": event.id })),
        Err(e) => {
            warn!(error = %e, "memory save failed; swallowing for hook");
            Json(serde_json::json!({ "accepted": false }))
        }
    }
}

#[derive(Debug, Deserialize)]
struct FetchEventsRequest {
    ids: Vec<String>,
}

/// POST /memory/events/fetch - fetch observations by id.
async fn fetch_events(
    State(state): State<Arc<AppState>>,
    Json(req): Json<FetchEventsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let ids: Vec<Id> = req.ids.into_iter().map(Id::from_string).collect();
    let events = state
        .memory
        .fetch_events(&ids)
        .await
        .map_err(|e| api_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;
    Ok(Json(serde_json::json!({ "events": events })))
}

#[derive(Debug, Deserialize, Default)]
struct SearchMemoryQuery {
    query: String,
    #[serde(default)]
    limit: Option<u32>,
}

/// GET /memory/search - full-text search over events.
async fn search_memory(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchMemoryQuery>,
) -> impl IntoResponse {
    match state.memory.search(&query.query, query.limit.unwrap_or(20)).await {
        Ok(hits) => {
            let results: Vec<serde_json::Value> = hits
                .into_iter()
                .map(|h| serde_json::json!({ "event": h.event, "score": h.score }))
                .collect();
            Json(serde_json::json!({ "results": results }))
        }
        Err(e) => {
            // Listing endpoints degrade to empty rather than erroring.
            warn!(error = %e, "memory search failed");
            Json(serde_json::json!({ "results": [] }))
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct TimelineQuery {
    #[serde(default)]
    since: Option<i64>,
    #[serde(default)]
    until: Option<i64>,
    #[serde(default)]
    limit: Option<u32>,
}

/// GET /memory/timeline - events between two timestamps (ms since epoch).
async fn timeline(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TimelineQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let events = state
        .memory
        .timeline(
            query.since.and_then(DateTime::from_timestamp_millis),
            query.until.and_then(DateTime::from_timestamp_millis),
            query.limit.unwrap_or(100),
        )
        .await
        .map_err(|e| api_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;
    Ok(Json(serde_json::json!({ "events": events })))
}

#[derive(Debug, Deserialize, Default)]
struct InitSessionRequest {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    initial_prompt: Option<String>,
}

/// POST /sessions/init
async fn init_session(
    State(state): State<Arc<AppState>>,
    Json(req): Json<InitSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .memory
        .init_session(
            req.session_id.as_deref(),
            req.project.as_deref(),
            req.initial_prompt.as_deref(),
        )
        .await
        .map_err(|e| api_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;
    Ok(Json(serde_json::json!({ "session": session })))
}

#[derive(Debug, Deserialize, Default)]
struct ListSessionsQuery {
    #[serde(default)]
    limit: Option<u32>,
}

/// GET /sessions
async fn list_sessions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListSessionsQuery>,
) -> impl IntoResponse {
    match state.memory.list_sessions(query.limit.unwrap_or(20)).await {
        Ok(sessions) => Json(serde_json::json!({ "sessions": sessions })),
        Err(e) => {
            warn!(error = %e, "session list failed");
            Json(serde_json::json!({ "sessions": [] }))
        }
    }
}

/// GET /retrieval/status
async fn retrieval_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let code = match &state.code {
        Some(code) => serde_json::to_value(code.status().await).unwrap_or_default(),
        None => serde_json::json!({ "available": false }),
    };
    let governance = match &state.governance {
        Some(index) => {
            let chunks = index.chunk_count().await.unwrap_or(0);
            serde_json::json!({ "available": true, "chunks": chunks })
        }
        None => serde_json::json!({ "available": false }),
    };
    Json(serde_json::json!({ "code": code, "governance": governance }))
}

#[derive(Debug, Deserialize, Default)]
struct RetrievalSearchQuery {
    query: String,
    #[serde(default)]
    corpus: Option<String>,
    #[serde(default)]
    top_k: Option<u32>,
}

/// GET /retrieval/search - unified search with optional corpus override.
async fn retrieval_search(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RetrievalSearchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let corpus = match query.corpus.as_deref() {
        Some(raw) => Some(Corpus::parse(raw).ok_or_else(|| {
            api_error(
                StatusCode::BAD_REQUEST,
                format!("unknown corpus: {raw} (expected code|governance|hybrid)"),
            )
        })?),
        None => None,
    };
    let result = state
        .retriever
        .search(&query.query, corpus, query.top_k.unwrap_or(10))
        .await;
    Ok(Json(result))
}

#[derive(Debug, Deserialize, Default)]
struct ReindexRequest {
    #[serde(default)]
    full: bool,
}

/// POST /retrieval/reindex - governance always; code backend best-effort.
async fn retrieval_reindex(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReindexRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let governance = match &state.governance {
        Some(index) => Some(
            index
                .reindex()
                .await
                .map_err(|e| api_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?,
        ),
        None => None,
    };

    let mut code_ok = false;
    if let Some(code) = &state.code {
        match code.reindex(req.full).await {
            Ok(()) => code_ok = true,
            Err(e) => warn!(error = %e, "code reindex skipped"),
        }
    }

    Ok(Json(serde_json::json!({
        "governance": governance,
        "code_reindexed": code_ok,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::CoordinatorConfig;
    use crate::learning::LearningStore;
    use crate::worktree::WorktreeManager;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tower::ServiceExt;

    pub(crate) async fn create_test_state(dir: &TempDir) -> Arc<AppState> {
        let memory = MemoryStore::open_in_memory().await.unwrap();
        let governance = GovernanceIndex::open_in_memory(dir.path()).await.unwrap();
        let learning_store = LearningStore::open_in_memory().await.unwrap();
        let learning = Arc::new(LearningPipeline::new(
            learning_store,
            memory.clone(),
            dir.path(),
        ));
        let coordinator = Arc::new(Coordinator::new(
            dir.path(),
            CoordinatorConfig::default(),
            WorktreeManager::new(dir.path(), "main"),
            memory.clone(),
        ));
        Arc::new(AppState {
            config: Config::default(),
            memory,
            retriever: Retriever::new(None, Some(governance.clone())),
            governance: Some(governance),
            code: None,
            learning,
            coordinator,
        })
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_check_returns_ok() {
        let dir = TempDir::new().unwrap();
        let app = create_router(create_test_state(&dir).await);
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn save_then_search_event_over_http() {
        let dir = TempDir::new().unwrap();
        let app = create_router(create_test_state(&dir).await);

        let body = serde_json::json!({
            "kind": "lesson",
            "text": "stash before syncing worktrees",
            "tags": ["Git"],
            "importance": 0.8
        });
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/memory/events")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let saved = body_json(response).await;
        assert_eq!(saved["accepted"], serde_json::Value::Bool(true));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/memory/search?query=worktrees")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let results = body_json(response).await;
        assert_eq!(results["results"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn sessions_init_and_list() {
        let dir = TempDir::new().unwrap();
        let app = create_router(create_test_state(&dir).await);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/sessions/init")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"session_id":"s1","project":"demo"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/sessions?limit=5")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let sessions = body_json(response).await;
        assert_eq!(sessions["sessions"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn hybrid_search_with_degraded_code_backend_returns_ok() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".claude/rules")).unwrap();
        std::fs::write(
            dir.path().join(".claude/rules/errors.md"),
            "# Error handling convention\nPropagate errors upward.\n",
        )
        .unwrap();
        let state = create_test_state(&dir).await;
        state.governance.as_ref().unwrap().reindex().await.unwrap();
        let app = create_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/retrieval/search?query=error%20handling%20convention&corpus=hybrid&top_k=10")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let result = body_json(response).await;
        assert_eq!(result["hits"].as_array().unwrap().len(), 1);
        assert_eq!(result["degraded"][0], "code");
    }

    #[tokio::test]
    async fn retrieval_search_rejects_unknown_corpus() {
        let dir = TempDir::new().unwrap();
        let app = create_router(create_test_state(&dir).await);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/retrieval/search?query=x&corpus=docs")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn reindex_reports_governance_counts() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".claude/rules")).unwrap();
        std::fs::write(dir.path().join(".claude/rules/a.md"), "# A\nbody\n").unwrap();
        let app = create_router(create_test_state(&dir).await);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/retrieval/reindex")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let report = body_json(response).await;
        assert_eq!(report["governance"]["files_indexed"], 1);
        assert_eq!(report["code_reindexed"], serde_json::Value::Bool(false));
    }
}
