use crate::store::StoreError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

pub type Result<T> = std::result::Result<T, ServiceError>;

/// Errors surfaced by the read API.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        error!(error = ?self, "request failed");
        let body = ErrorBody {
            error: self.to_string(),
        };
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

/// Reasons an ingestion cycle stops early.
///
/// Every variant is handled the same way by the poll loop: the cycle is
/// abandoned, the refresh schedule stays where it was and the next tick
/// tries again.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The external endpoint could not be reached, timed out or answered
    /// with a non-success status.
    #[error("snapshot fetch failed: {0}")]
    Transport(String),

    /// The payload was not valid JSON or did not have the expected shape.
    #[error("malformed snapshot: {0}")]
    Shape(String),

    /// A write against the store failed.
    #[error("store write failed: {0}")]
    Store(#[from] StoreError),
}

impl IngestError {
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Transport(_) => "transport",
            IngestError::Shape(_) => "shape",
            IngestError::Store(_) => "store",
        }
    }
}
