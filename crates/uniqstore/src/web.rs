//! HTTP endpoints for uniqstore.
//!
//! Thin translation between requests and [`StoreCoordinator`] calls. Errors
//! render through [`StoreError`]'s `IntoResponse`.

use crate::catalog::{ReferenceId, ReferenceRecord};
use crate::coordinator::{StoreCoordinator, UploadSource};
use crate::error::{StoreError, StoreResult};
use crate::telemetry;
use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Path, State},
    http::{header, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use cas::Digest;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::Instrument;
use tracing_opentelemetry::OpenTelemetrySpanExt;

const TEXT_UTF8: &str = "text/plain; charset=utf-8";
const DIGEST_HEADER: &str = "x-content-digest";
const REFERENCE_HEADER: &str = "x-reference-id";

/// Shared state for web handlers
#[derive(Clone)]
pub struct WebState {
    pub coordinator: Arc<StoreCoordinator>,
    pub start_time: Instant,
}

impl WebState {
    pub fn new(coordinator: Arc<StoreCoordinator>) -> Self {
        Self {
            coordinator,
            start_time: Instant::now(),
        }
    }
}

pub fn router(state: WebState) -> Router {
    Router::new()
        .route("/upload", post(upload))
        .route("/file-ref/{id}", get(file_ref).delete(delete_file_ref))
        .route("/file-ref/{id}/content", get(file_ref_content))
        .route("/file/{hash}", get(file_by_hash))
        .route("/file_exists/{hash}", get(file_exists))
        .route("/health", get(health))
        .route("/", get(serve_root))
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
            let span = tracing::info_span!(
                "http_request",
                method = %request.method(),
                uri = %request.uri(),
            );
            if let Some(parent) = telemetry::extract_traceparent(request.headers()) {
                span.set_parent(parent);
            }
            span
        }))
        .with_state(state)
}

/// Upload request. Field names match either case, as older clients send `Body`/`Path`/`Hash`.
#[derive(Debug, Default, Deserialize)]
pub struct UploadBody {
    #[serde(default, alias = "Body")]
    pub body: Option<String>,
    #[serde(default, alias = "Path")]
    pub path: Option<String>,
    #[serde(default, alias = "Hash")]
    pub hash: Option<String>,
}

impl UploadBody {
    /// Decide what is being uploaded. Empty strings count as absent.
    pub fn into_source(self) -> StoreResult<(UploadSource, String)> {
        let body = self.body.filter(|b| !b.is_empty());
        let hash = self.hash.filter(|h| !h.is_empty());
        let path = self.path.unwrap_or_default();

        let source = match (body, hash) {
            (Some(content), Some(hash)) => UploadSource::ContentWithDigest {
                content,
                digest: Digest::from_str_checked(&hash)?,
            },
            (Some(content), None) => UploadSource::Content(content),
            (None, Some(hash)) => UploadSource::Digest(Digest::from_str_checked(&hash)?),
            (None, None) => {
                return Err(StoreError::BadInput(
                    "body or hash field must contain a value".to_string(),
                ))
            }
        };
        Ok((source, path))
    }
}

async fn upload(
    State(state): State<WebState>,
    payload: Result<Json<UploadBody>, JsonRejection>,
) -> StoreResult<Json<ReferenceRecord>> {
    let Json(body) = payload.map_err(|e| StoreError::BadInput(e.body_text()))?;
    let (source, path) = body.into_source()?;

    // Detached so a client hanging up cannot cancel a write half-way.
    let coordinator = state.coordinator.clone();
    let record = tokio::spawn(
        async move { coordinator.upload(source, &path).await }.instrument(tracing::Span::current()),
    )
    .await??;

    Ok(Json(record))
}

fn parse_id(raw: &str) -> StoreResult<ReferenceId> {
    raw.parse()
        .map_err(|_| StoreError::BadInput(format!("invalid reference id: {raw:?}")))
}

async fn file_ref(
    State(state): State<WebState>,
    Path(id): Path<String>,
) -> StoreResult<Json<ReferenceRecord>> {
    let id = parse_id(&id)?;
    Ok(Json(state.coordinator.fetch_by_id(id).await?))
}

async fn delete_file_ref(
    State(state): State<WebState>,
    Path(id): Path<String>,
) -> StoreResult<StatusCode> {
    let id = parse_id(&id)?;
    state.coordinator.delete_reference(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn file_ref_content(
    State(state): State<WebState>,
    Path(id): Path<String>,
) -> StoreResult<Response> {
    let id = parse_id(&id)?;
    let (record, bytes) = state.coordinator.fetch_content_by_id(id).await?;

    Ok((
        [
            (header::CONTENT_TYPE.as_str(), TEXT_UTF8.to_string()),
            (DIGEST_HEADER, record.digest.to_string()),
            (REFERENCE_HEADER, record.id.to_string()),
        ],
        bytes,
    )
        .into_response())
}

async fn file_by_hash(
    State(state): State<WebState>,
    Path(hash): Path<String>,
) -> StoreResult<Response> {
    let digest = Digest::from_str_checked(&hash)?;
    let bytes = state.coordinator.fetch_by_digest(&digest).await?;

    Ok((
        [
            (header::CONTENT_TYPE.as_str(), TEXT_UTF8.to_string()),
            (DIGEST_HEADER, digest.to_string()),
        ],
        bytes,
    )
        .into_response())
}

async fn file_exists(
    State(state): State<WebState>,
    Path(hash): Path<String>,
) -> StoreResult<&'static str> {
    let digest = Digest::from_str_checked(&hash)?;
    if state.coordinator.exists(&digest).await? {
        Ok("ok")
    } else {
        Err(StoreError::NotFound(format!("hash {digest} not found")))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub version: String,
    pub digests: usize,
    pub references: usize,
    pub next_id: ReferenceId,
}

async fn health(State(state): State<WebState>) -> StoreResult<Json<HealthResponse>> {
    let stats = state.coordinator.stats()?;
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        digests: stats.digests,
        references: stats.references,
        next_id: stats.next_id,
    }))
}

/// Serve root discovery endpoint
async fn serve_root() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "uniqstore",
        "version": env!("CARGO_PKG_VERSION"),
        "links": {
            "upload": "POST /upload",
            "reference": "/file-ref/{id}",
            "reference_content": "/file-ref/{id}/content",
            "file": "/file/{hash}",
            "exists": "/file_exists/{hash}",
            "health": "/health",
        }
    }))
}
