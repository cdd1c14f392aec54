use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::refresh::RefreshStatus;
use crate::AppState;

use super::AppError;

// ─── GET /api/refresh ────────────────────────────────────────────

/// Refresh the snapshot if it is stale, then serve whatever is on disk.
/// A failed refresh still serves the previous snapshot.
pub async fn get_refresh(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let outcome = state.coordinator.request_refresh_detached().await;
    tracing::debug!(outcome = outcome.label(), "Refresh requested");

    let snapshot = state.store.read().await?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        snapshot.content,
    )
        .into_response())
}

// ─── GET /api/status ─────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub refresh: RefreshStatus,
    pub snapshot_produced_at: Option<DateTime<Utc>>,
}

/// Coordinator counters. Never triggers a refresh.
pub async fn refresh_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let snapshot_produced_at = state.store.produced_at().await.ok().flatten();
    Json(StatusResponse {
        refresh: state.coordinator.status(),
        snapshot_produced_at,
    })
}
