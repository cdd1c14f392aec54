use axum::{middleware as axum_mw, routing::get, Router};
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::middleware::timing;
use crate::AppState;

/// Builds the full Axum `Router` with the refresh API, middleware, and static serving.
pub fn create_router(state: Arc<AppState>, static_dir: &Path) -> Router {
    Router::new()
        // ── Snapshot refresh ────────────────────────────────────
        .route("/api/refresh", get(handlers::refresh::get_refresh))
        .route("/api/status", get(handlers::refresh::refresh_status))
        // ── Provide shared state to all routes above ────────────
        .with_state(state)
        // ── Everything else comes from the dashboard directory ──
        .fallback_service(ServeDir::new(static_dir))
        // ── Global middleware (applied bottom-up) ───────────────
        .layer(axum_mw::from_fn(timing::timing_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
