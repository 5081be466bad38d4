//! `POST /v1/chat/completions` and `POST /v1/completions` — the only two
//! endpoints that may stream.

use std::sync::Arc;

use axum::body::Bytes;
use axum::response::Response;
use axum::routing::post;
use axum::{extract::State, Router};

use crate::error::Result;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/completions", post(completions))
}

async fn chat_completions(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Response> {
    super::dispatch(&state, "/v1/chat/completions", body).await
}

async fn completions(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Response> {
    super::dispatch(&state, "/v1/completions", body).await
}
