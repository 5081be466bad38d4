//! `GET /v1/models` — a pure function of the immutable catalog.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use flexllama_common::{ModelObject, ModelsResponse};

use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/v1/models", get(list_models))
}

async fn list_models(State(state): State<Arc<AppState>>) -> Json<ModelsResponse> {
    let data = state
        .supervisor
        .catalog()
        .all()
        .map(|spec| ModelObject::new(spec.alias.clone()))
        .collect();
    Json(ModelsResponse::new(data))
}
