//! `POST /v1/rerank` — buffered only, model must be of kind `reranking`.

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
    Router::new().route("/v1/rerank", post(rerank))
}

async fn rerank(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Response> {
    super::dispatch_buffered(&state, "/v1/rerank", body, ModelKind::Reranking).await
}
