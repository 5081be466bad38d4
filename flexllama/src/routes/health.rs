//! `GET /health` — the cached aggregate snapshot.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use flexllama_common::HealthResponse;

use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(aggregate_health))
}

async fn aggregate_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(state.health.snapshot().await)
}
