//! HTTP query façade (C10, §6).
//!
//! Exposes file upload, knowledge-asset management, retrieval, and RAG-query
//! endpoints over JSON. Error responses follow one schema everywhere:
//!
//! ```json
//! { "error": { "code": "not_found", "message": "asset not found" } }
//! ```
//!
//! `code` is one of [`crate::error::CoreError::code`]'s stable values
//! (§7 "Error code mapping"). CORS is wide open to support browser-based and
//! cross-origin tooling against this façade.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use uuid::Uuid;

use crate::chunk::estimate_tokens;
use crate::config::Config;
use crate::error::CoreError;
use crate::ingest::{self, IngestRequest};
use crate::models::{Citation, Confidence, Visibility};
use crate::object_store::{content_hash, create_object_store, ObjectStore};
use crate::retriever::{self, RetrievalRequest};
use crate::synthesis::{self, EvidenceChunk};
use crate::workflow::{Envelope, InlineWorkflowEngine, WorkflowEngine};

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    pool: SqlitePool,
    object_store: Arc<dyn ObjectStore>,
    workflow_engine: Arc<dyn WorkflowEngine>,
}

pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let pool = crate::db::connect(config).await?;
    let object_store = create_object_store(config)?;

    let state = AppState {
        config: Arc::new(config.clone()),
        pool,
        object_store,
        workflow_engine: Arc::new(InlineWorkflowEngine::new()),
    };

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let app = Router::new()
        .route("/files", post(handle_upload_file))
        .route("/knowledge/assets", post(handle_create_asset))
        .route("/knowledge/assets", get(handle_list_assets))
        .route("/knowledge/assets/{id}", get(handle_get_asset))
        .route("/knowledge/assets/{id}", delete(handle_delete_asset))
        .route("/knowledge/search", post(handle_search))
        .route("/rag/query", post(handle_rag_query))
        .route("/workflows/rag-query", post(handle_start_rag_workflow))
        .route("/workflows/rag-query/{id}/status", get(handle_rag_workflow_status))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    info!(bind = %bind_addr, "RAG core listening");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError(CoreError);

impl From<CoreError> for AppError {
    fn from(e: CoreError) -> Self {
        AppError(e)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError(CoreError::Internal(e.to_string()))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CoreError::Validation(_) => StatusCode::BAD_REQUEST,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::Forbidden(_) => StatusCode::FORBIDDEN,
            CoreError::DependencyUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::DependencyMismatch(_) => StatusCode::CONFLICT,
            CoreError::Conflict(_) => StatusCode::CONFLICT,
            CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if matches!(status, StatusCode::INTERNAL_SERVER_ERROR) {
            error!(error = %self.0, "internal error serving request");
        }
        let body = ErrorBody {
            error: ErrorDetail { code: self.0.code().to_string(), message: self.0.message().to_string() },
        };
        (status, Json(body)).into_response()
    }
}

// ============ POST /files ============

#[derive(Deserialize)]
struct UploadFileRequest {
    project_id: String,
    filename: String,
    content_type: String,
    #[serde(default)]
    visibility: Option<String>,
    /// Base64-encoded file bytes (§6 "POST /files").
    content_base64: String,
    #[serde(default = "default_created_by")]
    created_by: String,
}

fn default_created_by() -> String {
    "api".to_string()
}

#[derive(Serialize)]
struct UploadFileResponse {
    id: Uuid,
    content_hash: String,
    size: i64,
}

async fn handle_upload_file(
    State(state): State<AppState>,
    Json(req): Json<UploadFileRequest>,
) -> Result<Json<UploadFileResponse>, AppError> {
    if req.project_id.trim().is_empty() || req.filename.trim().is_empty() {
        return Err(CoreError::Validation("project_id and filename are required".to_string()).into());
    }

    let bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &req.content_base64)
        .map_err(|e| CoreError::Validation(format!("invalid base64 content: {}", e)))?;

    let visibility: Visibility = req
        .visibility
        .as_deref()
        .unwrap_or("private")
        .parse()
        .map_err(|_| CoreError::Validation("invalid visibility".to_string()))?;

    let hash = content_hash(&bytes);
    state.object_store.put(&hash, &bytes).await?;

    let file_id = Uuid::new_v4();
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        "INSERT INTO files (id, project_id, filename, content_type, size, content_hash, object_key, visibility, created_at, created_by) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(file_id.to_string())
    .bind(&req.project_id)
    .bind(&req.filename)
    .bind(&req.content_type)
    .bind(bytes.len() as i64)
    .bind(&hash)
    .bind(&hash)
    .bind(visibility.as_str())
    .bind(now)
    .bind(&req.created_by)
    .execute(&state.pool)
    .await
    .map_err(CoreError::from)?;

    Ok(Json(UploadFileResponse { id: file_id, content_hash: hash, size: bytes.len() as i64 }))
}

// ============ POST /knowledge/assets ============

#[derive(Deserialize)]
struct CreateAssetRequest {
    file_id: Uuid,
    #[serde(default = "default_embedding_provider_id")]
    embedding_provider_id: String,
}

fn default_embedding_provider_id() -> String {
    "default".to_string()
}

#[derive(Serialize)]
struct CreateAssetResponse {
    asset_id: Uuid,
    chunk_count: i64,
    reused_existing: bool,
}

async fn handle_create_asset(
    State(state): State<AppState>,
    Json(req): Json<CreateAssetRequest>,
) -> Result<Json<CreateAssetResponse>, AppError> {
    let outcome = ingest::ingest(
        &state.config,
        &state.pool,
        state.object_store.as_ref(),
        IngestRequest { file_id: req.file_id, embedding_provider_id: req.embedding_provider_id },
    )
    .await
    .map_err(|e| CoreError::DependencyUnavailable(e.to_string()))?;

    Ok(Json(CreateAssetResponse {
        asset_id: outcome.asset_id,
        chunk_count: outcome.chunk_count,
        reused_existing: outcome.reused_existing,
    }))
}

// ============ GET /knowledge/assets ============

#[derive(Deserialize)]
struct ListAssetsQuery {
    project_id: String,
}

#[derive(Serialize)]
struct AssetSummary {
    id: Uuid,
    title: String,
    status: String,
    chunk_count: i64,
}

async fn handle_list_assets(
    State(state): State<AppState>,
    axum::extract::Query(q): axum::extract::Query<ListAssetsQuery>,
) -> Result<Json<Vec<AssetSummary>>, AppError> {
    use sqlx::Row;
    let rows = sqlx::query(
        "SELECT id, title, status, chunk_count FROM knowledge_assets WHERE project_id = ? ORDER BY created_at DESC",
    )
    .bind(&q.project_id)
    .fetch_all(&state.pool)
    .await
    .map_err(CoreError::from)?;

    let assets = rows
        .into_iter()
        .filter_map(|row| {
            let id: String = row.get("id");
            Some(AssetSummary {
                id: id.parse().ok()?,
                title: row.get("title"),
                status: row.get("status"),
                chunk_count: row.get("chunk_count"),
            })
        })
        .collect();
    Ok(Json(assets))
}

// ============ GET /knowledge/assets/{id} ============

#[derive(Serialize)]
struct AssetDetail {
    id: Uuid,
    title: String,
    status: String,
    chunk_count: i64,
    chunks: Vec<ChunkDetail>,
}

#[derive(Serialize)]
struct ChunkDetail {
    sequence: i64,
    chunk_type: String,
    section_path: String,
    page: Option<i64>,
    content: String,
}

async fn handle_get_asset(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AssetDetail>, AppError> {
    use sqlx::Row;
    let asset_row = sqlx::query("SELECT id, title, status, chunk_count FROM knowledge_assets WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(&state.pool)
        .await
        .map_err(CoreError::from)?
        .ok_or_else(|| CoreError::NotFound(format!("asset not found: {}", id)))?;

    let chunk_rows = sqlx::query(
        "SELECT sequence, chunk_type, section_path, page, content FROM knowledge_chunks WHERE asset_id = ? ORDER BY sequence ASC",
    )
    .bind(id.to_string())
    .fetch_all(&state.pool)
    .await
    .map_err(CoreError::from)?;

    let chunks = chunk_rows
        .into_iter()
        .map(|row| ChunkDetail {
            sequence: row.get("sequence"),
            chunk_type: row.get("chunk_type"),
            section_path: row.get("section_path"),
            page: row.get("page"),
            content: row.get("content"),
        })
        .collect();

    Ok(Json(AssetDetail {
        id,
        title: asset_row.get("title"),
        status: asset_row.get("status"),
        chunk_count: asset_row.get("chunk_count"),
        chunks,
    }))
}

// ============ DELETE /knowledge/assets/{id} ============

async fn handle_delete_asset(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode, AppError> {
    crate::vector_index::delete_by_asset(&state.pool, id).await.map_err(CoreError::from)?;
    sqlx::query("DELETE FROM knowledge_chunks WHERE asset_id = ?")
        .bind(id.to_string())
        .execute(&state.pool)
        .await
        .map_err(CoreError::from)?;
    let result = sqlx::query("DELETE FROM knowledge_assets WHERE id = ?")
        .bind(id.to_string())
        .execute(&state.pool)
        .await
        .map_err(CoreError::from)?;

    if result.rows_affected() == 0 {
        return Err(CoreError::NotFound(format!("asset not found: {}", id)).into());
    }
    Ok(StatusCode::NO_CONTENT)
}

// ============ POST /knowledge/search ============

#[derive(Deserialize)]
struct SearchRequest {
    project_id: String,
    question: String,
    #[serde(default)]
    top_k: Option<i64>,
    #[serde(default)]
    threshold: Option<f32>,
    #[serde(default = "default_embedding_provider_id")]
    embedding_provider_id: String,
}

#[derive(Serialize)]
struct SearchResponse {
    citations: Vec<Citation>,
}

/// A question must be non-empty and carry at least two tokens' worth of
/// content (§4.4, §8) — "a" or "?" has no retrievable intent.
fn validate_question(question: &str) -> Result<(), AppError> {
    if question.trim().is_empty() {
        return Err(CoreError::Validation("question must not be empty".to_string()).into());
    }
    if estimate_tokens(question) < 2 {
        return Err(CoreError::Validation("question must be at least two tokens".to_string()).into());
    }
    Ok(())
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    validate_question(&req.question)?;
    let provider_config = state
        .config
        .embedding_provider(&req.embedding_provider_id)
        .ok_or_else(|| CoreError::Validation(format!("unknown embedding provider: {}", req.embedding_provider_id)))?;

    let result = retriever::retrieve(
        &state.config,
        &state.pool,
        provider_config,
        RetrievalRequest {
            project_id: req.project_id,
            question: &req.question,
            top_k: req.top_k,
            threshold: req.threshold,
        },
    )
    .await
    .map_err(|e| CoreError::DependencyUnavailable(e.to_string()))?;

    Ok(Json(SearchResponse { citations: result.citations }))
}

// ============ POST /rag/query ============

#[derive(Deserialize)]
struct RagQueryRequest {
    project_id: String,
    user_id: String,
    question: String,
    #[serde(default)]
    top_k: Option<i64>,
    #[serde(default)]
    threshold: Option<f32>,
    #[serde(default = "default_embedding_provider_id")]
    embedding_provider_id: String,
}

#[derive(Serialize)]
struct RagQueryResponse {
    answer: String,
    confidence: String,
    citations: Vec<Citation>,
}

async fn handle_rag_query(
    State(state): State<AppState>,
    Json(req): Json<RagQueryRequest>,
) -> Result<Json<RagQueryResponse>, AppError> {
    let started = std::time::Instant::now();
    let result = run_rag_query(&state, &req).await?;
    let latency_ms = started.elapsed().as_millis() as i64;

    record_query(&state.pool, &req, &result, latency_ms).await.map_err(CoreError::from)?;

    Ok(Json(RagQueryResponse {
        answer: result.answer,
        confidence: result.confidence.as_str().to_string(),
        citations: result.citations,
    }))
}

struct RagQueryOutcome {
    answer: String,
    confidence: Confidence,
    citations: Vec<Citation>,
}

/// Fallback answer text used when retrieval succeeds but synthesis fails
/// (§7, §8 scenario 6): a synthesis outage degrades the answer, it never
/// turns the whole request into an error — the citations retrieval already
/// found are still returned.
const SYNTHESIS_UNAVAILABLE_ANSWER: &str = "Unable to generate a response at this time.";

async fn run_rag_query(state: &AppState, req: &RagQueryRequest) -> Result<RagQueryOutcome, AppError> {
    validate_question(&req.question)?;
    let provider_config = state
        .config
        .embedding_provider(&req.embedding_provider_id)
        .ok_or_else(|| CoreError::Validation(format!("unknown embedding provider: {}", req.embedding_provider_id)))?;

    let retrieval = retriever::retrieve(
        &state.config,
        &state.pool,
        provider_config,
        RetrievalRequest {
            project_id: req.project_id.clone(),
            question: &req.question,
            top_k: req.top_k,
            threshold: req.threshold,
        },
    )
    .await
    .map_err(|e| CoreError::DependencyUnavailable(e.to_string()))?;

    let evidence = fetch_evidence_text(&state.pool, &retrieval.citations).await.map_err(CoreError::from)?;

    match synthesis::synthesize(&state.config.synthesis, &req.question, &evidence).await {
        Ok(synthesis_result) => Ok(RagQueryOutcome {
            answer: synthesis_result.answer,
            confidence: synthesis_result.confidence,
            citations: synthesis_result.citations,
        }),
        Err(_) => Ok(RagQueryOutcome {
            answer: SYNTHESIS_UNAVAILABLE_ANSWER.to_string(),
            confidence: Confidence::Unknown,
            citations: retrieval.citations,
        }),
    }
}

async fn fetch_evidence_text(pool: &SqlitePool, citations: &[Citation]) -> anyhow::Result<Vec<EvidenceChunk>> {
    use sqlx::Row;
    let mut evidence = Vec::with_capacity(citations.len());
    for citation in citations {
        let row = sqlx::query("SELECT content FROM knowledge_chunks WHERE id = ?")
            .bind(citation.chunk_id.to_string())
            .fetch_optional(pool)
            .await?;
        if let Some(row) = row {
            evidence.push(EvidenceChunk { citation: citation.clone(), text: row.get("content") });
        }
    }
    Ok(evidence)
}

async fn record_query(
    pool: &SqlitePool,
    req: &RagQueryRequest,
    result: &RagQueryOutcome,
    latency_ms: i64,
) -> anyhow::Result<()> {
    let citations_json = serde_json::to_string(&result.citations)?;
    sqlx::query(
        "INSERT INTO query_records (id, project_id, user_id, question, top_k, threshold, answer, confidence, citations_json, latency_ms, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&req.project_id)
    .bind(&req.user_id)
    .bind(&req.question)
    .bind(req.top_k.unwrap_or(0))
    .bind(req.threshold.unwrap_or(0.0))
    .bind(&result.answer)
    .bind(result.confidence.as_str())
    .bind(citations_json)
    .bind(latency_ms)
    .bind(chrono::Utc::now().timestamp())
    .execute(pool)
    .await?;
    Ok(())
}

// ============ POST /workflows/rag-query ============

#[derive(Serialize)]
struct StartWorkflowResponse {
    instance_id: String,
}

async fn handle_start_rag_workflow(
    State(state): State<AppState>,
    Json(req): Json<RagQueryRequest>,
) -> Result<Json<StartWorkflowResponse>, AppError> {
    let mut variables = Envelope::new();
    variables.insert("rag_project_id".to_string(), serde_json::Value::String(req.project_id.clone()));
    variables.insert("rag_question".to_string(), serde_json::Value::String(req.question.clone()));

    let result = run_rag_query(&state, &req).await?;

    let key_points: Vec<String> = result
        .citations
        .iter()
        .map(|c| c.section_path.clone())
        .filter(|s| !s.is_empty())
        .collect();
    let llm_response = serde_json::json!({
        "answer": result.answer,
        "confidence": result.confidence.as_str(),
        "key_points": key_points,
        "metadata": { "citation_count": result.citations.len() },
    });
    variables.insert(
        "llm_response".to_string(),
        serde_json::Value::String(llm_response.to_string()),
    );

    record_query(&state.pool, &req, &result, 0).await.map_err(CoreError::from)?;

    let instance_id = state
        .workflow_engine
        .start("rag-query", variables)
        .await
        .map_err(|e| CoreError::DependencyUnavailable(e.to_string()))?;

    Ok(Json(StartWorkflowResponse { instance_id }))
}

// ============ GET /workflows/rag-query/{id}/status ============

#[derive(Serialize)]
struct WorkflowStatusResponse {
    instance_id: String,
    status: String,
    answer: Option<String>,
    confidence: Option<String>,
}

async fn handle_rag_workflow_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<WorkflowStatusResponse>, AppError> {
    let poll_interval = Duration::from_millis(state.config.workflow.poll_interval_ms);
    let deadline = Duration::from_secs(state.config.workflow.instance_deadline_secs);

    let info = crate::workflow::await_completion(state.workflow_engine.as_ref(), &id, poll_interval, deadline)
        .await
        .map_err(|e| CoreError::DependencyUnavailable(e.to_string()))?;

    let llm_response: Option<serde_json::Value> = info
        .variables
        .get("llm_response")
        .and_then(|v| v.as_str())
        .and_then(|s| serde_json::from_str(s).ok());
    let answer = llm_response
        .as_ref()
        .and_then(|v| v.get("answer"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let confidence = llm_response
        .as_ref()
        .and_then(|v| v.get("confidence"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    Ok(Json(WorkflowStatusResponse { instance_id: info.instance_id, status: info.status.as_str().to_string(), answer, confidence }))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok".to_string(), version: env!("CARGO_PKG_VERSION").to_string() })
}
