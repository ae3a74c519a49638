//! JSON status API.
//!
//! - `GET /api/data` - the latest snapshot
//! - `GET /api/status` - connection status only
//! - `POST /api/refresh` - start a poll cycle now

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use mirrorwatch_core::monitoring::{Snapshot, StatusSummary};
use mirrorwatch_core::scheduler::{RefreshHandle, SnapshotStore};
use serde_json::json;
use tracing::debug;

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: SnapshotStore,
    pub refresh: RefreshHandle,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/data", get(data_handler))
        .route("/api/status", get(status_handler))
        .route("/api/refresh", post(refresh_handler))
        .with_state(Arc::new(state))
}

async fn data_handler(State(state): State<Arc<AppState>>) -> Json<Snapshot> {
    Json(state.store.load().as_ref().clone())
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusSummary> {
    Json(state.store.status())
}

async fn refresh_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    debug!("Refresh requested over HTTP");
    state.refresh.request();
    (StatusCode::ACCEPTED, Json(json!({ "status": "accepted" })))
}
