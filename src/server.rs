//! HTTP API.
//!
//! Exposes retrieval, the review queue and document inspection as a JSON
//! HTTP API. Ingestion stays a CLI concern.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/search` | Hybrid, vector or text search |
//! | `GET`  | `/review` | Open review items |
//! | `POST` | `/review/{id}/resolve` | Resolve a review item (`reprocess` or `reject`) |
//! | `GET`  | `/documents/{id}` | Document with pages, history and chunks |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404),
//! `dimension_mismatch` / `model_mismatch` (409), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use docgate_core::embedding::EmbeddingProvider;
use docgate_core::models::{RetrievalHit, ReviewAction, ReviewItem};
use docgate_core::search::pipeline_error;
use docgate_core::store::Store;

use crate::config::Config;
use crate::documents::{inspect_document, DocumentView};
use crate::embedding;
use crate::review::{list_reviews, resolve_review, Resolution};
use crate::search::{search_documents, SearchQuery};
use crate::sqlite_store;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub embedder: Arc<dyn EmbeddingProvider>,
}

/// Starts the HTTP server on `[server].bind` and runs until the process
/// is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let config = Arc::new(config.clone());
    let store = Arc::new(sqlite_store::open(&config).await?);
    let embedder = embedding::create_provider(&config.embedding)?;

    let app = router(AppState {
        config,
        store,
        embedder,
    });

    println!("docgate server listening on http://{}", bind_addr);
    tracing::info!(bind = %bind_addr, "server started");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Route table with CORS applied.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/search", post(handle_search))
        .route("/review", get(handle_list_reviews))
        .route("/review/{id}/resolve", post(handle_resolve))
        .route("/documents/{id}", get(handle_document))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"not_found"`).
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

/// Maps pipeline errors to their stable code. Index/model mismatches are a
/// configuration conflict (409); everything else is internal.
fn classify_error(err: anyhow::Error) -> AppError {
    if let Some(pe) = pipeline_error(&err) {
        if pe.is_fatal() {
            return AppError {
                status: StatusCode::CONFLICT,
                code: pe.code().to_string(),
                message: pe.to_string(),
            };
        }
    }
    tracing::error!(error = %err, "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: err.to_string(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /search ============

#[derive(Serialize)]
struct SearchResponse {
    hits: Vec<RetrievalHit>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(query): Json<SearchQuery>,
) -> Result<Json<SearchResponse>, AppError> {
    if query.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    if query.top_k == Some(0) {
        return Err(bad_request("top_k must be >= 1"));
    }

    let hits = search_documents(
        &state.config,
        state.store.as_ref(),
        state.embedder.as_ref(),
        &query,
    )
    .await
    .map_err(classify_error)?;

    Ok(Json(SearchResponse { hits }))
}

// ============ GET /review ============

#[derive(Serialize)]
struct ReviewListResponse {
    items: Vec<ReviewItem>,
}

async fn handle_list_reviews(
    State(state): State<AppState>,
) -> Result<Json<ReviewListResponse>, AppError> {
    let items = list_reviews(state.store.as_ref())
        .await
        .map_err(classify_error)?;
    Ok(Json(ReviewListResponse { items }))
}

// ============ POST /review/{id}/resolve ============

#[derive(Deserialize)]
struct ResolveRequest {
    action: ReviewAction,
}

async fn handle_resolve(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ResolveRequest>,
) -> Result<Json<Resolution>, AppError> {
    resolve_review(&state.config, state.store.as_ref(), &id, req.action)
        .await
        .map_err(classify_error)?
        .map(Json)
        .ok_or_else(|| not_found(format!("no review item for document: {}", id)))
}

// ============ GET /documents/{id} ============

async fn handle_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DocumentView>, AppError> {
    inspect_document(state.store.as_ref(), &id)
        .await
        .map_err(classify_error)?
        .map(Json)
        .ok_or_else(|| not_found(format!("document not found: {}", id)))
}
