//! `POST /v1/embeddings` — buffered only, model must be of kind `embedding`.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::response::Response;
use axum::routing::post;
use axum::Router;
use flexllama_common::ModelKind;

use crate::error::Result;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/v1/embeddings", post(embeddings))
}

async fn embeddings(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Response> {
    super::dispatch_buffered(&state, "/v1/embeddings", body, ModelKind::Embedding).await
}
