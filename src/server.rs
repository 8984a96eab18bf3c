//! JSON HTTP server over the index.
//!
//! A thin adapter: every handler calls the same library operations as the
//! CLI and returns their results unchanged.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (version, collection, count) |
//! | `POST` | `/ingest` | Ingest a server-side file or directory, returns the run report |
//! | `POST` | `/search` | Text or image query with optional `where` filter |
//! | `GET`  | `/collection/count` | Number of indexed units |
//! | `GET`  | `/collection/items/{id}` | Fetch one unit |
//! | `DELETE` | `/collection/items/{id}` | Delete one unit |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query text is empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `timeout` (408),
//! `internal` (500), `model_unavailable` (503), `store_unavailable` (503).
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
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::context::AppContext;
use crate::error::IndexError;
use crate::filter::MetadataFilter;
use crate::models::{RunReport, SearchResultItem, UnitResponse};
use crate::search::Query;

#[derive(Clone)]
struct AppState {
    ctx: Arc<AppContext>,
    request_timeout: Duration,
    /// Cancelled when the server shuts down; stops in-flight ingestions.
    shutdown: CancellationToken,
}

/// Builds the router. Exposed so tests can serve it on an ephemeral port.
pub fn router(ctx: Arc<AppContext>, shutdown: CancellationToken) -> Router {
    let request_timeout = Duration::from_secs(ctx.config.server.request_timeout_secs);
    let state = AppState {
        ctx,
        request_timeout,
        shutdown,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/ingest", post(handle_ingest))
        .route("/search", post(handle_search))
        .route("/collection/count", get(handle_count))
        .route(
            "/collection/items/{id}",
            get(handle_get_item).delete(handle_delete_item),
        )
        .layer(cors)
        .with_state(state)
}

/// Serves on `[server].bind` until `shutdown` is cancelled.
pub async fn run_server(ctx: Arc<AppContext>, shutdown: CancellationToken) -> anyhow::Result<()> {
    let bind_addr = ctx.config.server.bind.clone();
    let app = router(ctx, shutdown.clone());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

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

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn timeout_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::REQUEST_TIMEOUT,
        code: "timeout",
        message: message.into(),
    }
}

impl From<IndexError> for AppError {
    fn from(err: IndexError) -> Self {
        let (status, code) = match &err {
            IndexError::InvalidQuery(_)
            | IndexError::InvalidBatch(_)
            | IndexError::Parse { .. }
            | IndexError::Config(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            IndexError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            IndexError::ModelUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "model_unavailable"),
            IndexError::StoreUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    collection: String,
    count: usize,
}

async fn handle_health(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    let store = state.ctx.store();
    let count = store.count().await?;
    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        collection: store.collection().to_string(),
        count,
    }))
}

// ============ POST /ingest ============

#[derive(Deserialize)]
struct IngestRequest {
    path: PathBuf,
}

async fn handle_ingest(
    State(state): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<RunReport>, AppError> {
    let pipeline = state.ctx.pipeline().await?;
    let report = pipeline
        .ingest_path(&req.path, &state.shutdown.child_token())
        .await?;
    Ok(Json(report))
}

// ============ POST /search ============

#[derive(Deserialize)]
struct SearchRequest {
    #[serde(default)]
    query_text: Option<String>,
    #[serde(default)]
    image_path: Option<PathBuf>,
    #[serde(default)]
    n_results: Option<usize>,
    #[serde(default, rename = "where")]
    filter: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchResultItem>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    let query = match (req.query_text, req.image_path) {
        (Some(text), None) => Query::Text(text),
        (None, Some(path)) => {
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| bad_request(format!("cannot read {}: {}", path.display(), e)))?;
            Query::Image(bytes)
        }
        _ => return Err(bad_request("exactly one of query_text or image_path is required")),
    };
    let filter = match &req.filter {
        Some(value) => MetadataFilter::from_json(value)?,
        None => MetadataFilter::new(),
    };
    let k = req
        .n_results
        .unwrap_or(state.ctx.config.retrieval.default_k);

    let retriever = state.ctx.retriever().await?;
    let hits = tokio::time::timeout(state.request_timeout, retriever.search(&query, k, &filter))
        .await
        .map_err(|_| {
            timeout_error(format!(
                "search timed out after {}s",
                state.request_timeout.as_secs()
            ))
        })??;

    Ok(Json(SearchResponse {
        results: hits.iter().map(SearchResultItem::from).collect(),
    }))
}

// ============ /collection ============

#[derive(Serialize)]
struct CountResponse {
    collection: String,
    count: usize,
}

async fn handle_count(State(state): State<AppState>) -> Result<Json<CountResponse>, AppError> {
    let indexer = state.ctx.indexer().await?;
    Ok(Json(CountResponse {
        collection: indexer.store().collection().to_string(),
        count: indexer.count().await?,
    }))
}

async fn handle_get_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<UnitResponse>, AppError> {
    let unit = state.ctx.indexer().await?.fetch(&id).await?;
    Ok(Json(UnitResponse::from(&unit)))
}

#[derive(Serialize)]
struct DeleteResponse {
    deleted: String,
}

async fn handle_delete_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    state.ctx.indexer().await?.delete(&id).await?;
    Ok(Json(DeleteResponse { deleted: id }))
}
