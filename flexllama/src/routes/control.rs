//! `POST /v1/runners/{id}/{start|stop|restart}` — explicit runner control.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;

use crate::error::Error;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/v1/runners/:id/start", post(start))
        .route("/v1/runners/:id/stop", post(stop))
        .route("/v1/runners/:id/restart", post(restart))
}

async fn start(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    control_result(state.supervisor.control_start(&id).await)
}

async fn stop(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    control_result(state.supervisor.control_stop(&id).await)
}

async fn restart(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    control_result(state.supervisor.control_restart(&id).await)
}

/// Control endpoints always answer 200 with `{"success": bool, ...}` per the
/// wire contract — even on failure, the HTTP status itself stays 200 except
/// for `ErrBusy`, which is surfaced as 409 since it signals "try again",
/// not "here is why your request failed".
fn control_result(result: crate::error::Result<()>) -> Response {
    match result {
        Ok(()) => Json(json!({ "success": true })).into_response(),
        Err(Error::Busy(runner_id)) => Error::Busy(runner_id).into_response(),
        Err(e) => Json(json!({
            "success": false,
            "error": { "message": e.to_string() }
        }))
        .into_response(),
    }
}
