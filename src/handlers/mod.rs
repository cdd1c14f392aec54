pub mod refresh;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::error::SnapshotError;

// ─── Unified error type ──────────────────────────────────────────

/// Errors surfaced to HTTP clients. Messages are fixed strings: internal
/// error text is logged, never sent.
#[derive(Debug)]
pub enum AppError {
    /// No snapshot has been produced yet
    SnapshotMissing,
    /// The snapshot exists but could not be read
    SnapshotUnreadable,
}

impl From<SnapshotError> for AppError {
    fn from(err: SnapshotError) -> Self {
        match err {
            SnapshotError::NotFound => Self::SnapshotMissing,
            other => {
                tracing::error!(error = %other, "Failed to read snapshot");
                Self::SnapshotUnreadable
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::SnapshotMissing => (
                StatusCode::SERVICE_UNAVAILABLE,
                "snapshot not available yet",
            ),
            Self::SnapshotUnreadable => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to read snapshot",
            ),
        };

        let body = serde_json::json!({
            "error":  message,
            "status": status.as_u16(),
        });

        (status, Json(body)).into_response()
    }
}
