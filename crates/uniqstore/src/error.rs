//! Store error taxonomy and its HTTP rendering.

use crate::index::IndexError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use cas::DigestError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable code, e.g. `NOT_FOUND`.
    pub code: String,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// Malformed request, or a digest the store never ingested.
    #[error("bad input: {0}")]
    BadInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Blob read/write failed. Nothing was committed; safe to retry.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Index disagreement about a digest's key.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::BadInput(_) => (StatusCode::BAD_REQUEST, "BAD_INPUT"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::StorageUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "STORAGE_UNAVAILABLE"),
            Self::Conflict(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFLICT"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status_and_code().0
    }
}

impl From<IndexError> for StoreError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::Conflict { .. } => Self::Conflict(err.to_string()),
            IndexError::Backend(e) => Self::Internal(format!("{e:#}")),
        }
    }
}

impl From<anyhow::Error> for StoreError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(format!("{err:#}"))
    }
}

impl From<DigestError> for StoreError {
    fn from(err: DigestError) -> Self {
        Self::BadInput(format!("invalid hash: {err}"))
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("task failed: {err}"))
    }
}

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self {
            Self::Internal(_) | Self::Conflict(_) => "an internal error occurred".to_string(),
            Self::BadInput(m) | Self::NotFound(m) | Self::StorageUnavailable(m) => m.clone(),
        };

        match &self {
            Self::Internal(_) => tracing::error!(error = %self, "internal error"),
            Self::Conflict(_) => tracing::error!(error = %self, "digest index conflict"),
            Self::StorageUnavailable(_) => tracing::warn!(error = %self, "storage unavailable"),
            _ => {}
        }

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };
        (status, Json(body)).into_response()
    }
}
