//! The HTTP façade: OpenAI-compatible dispatch endpoints, the `/health`
//! aggregate, and runner control. Each handler's job is to extract the
//! model alias, hand off to the supervisor, and reverse-proxy the result —
//! no business logic lives here beyond that dispatch.

mod chat;
mod control;
mod embeddings;
mod health;
mod models;
mod rerank;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::response::Response;
use axum::Router;

use crate::catalog::ModelSpec;
use crate::error::{Error, Result};
use crate::proxy::{self, UpstreamTarget};
use crate::runner::InFlightGuard;
use crate::state::AppState;
use flexllama_common::RequestPeek;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .merge(chat::router())
        .merge(embeddings::router())
        .merge(rerank::router())
        .merge(models::router())
        .merge(health::router())
        .merge(control::router())
}

/// Parse the alias off a request body and resolve it to a ready runner,
/// returning the in-flight guard the caller must hold for the duration of
/// the proxied request.
async fn resolve_target(
    state: &Arc<AppState>,
    body: &Bytes,
) -> Result<(UpstreamTarget, ModelSpec, InFlightGuard)> {
    let peek: RequestPeek = serde_json::from_slice(body)
        .map_err(|e| Error::Internal(format!("invalid request body: {e}")))?;
    let alias = peek
        .model
        .ok_or_else(|| Error::UnknownModel("(no model field in request)".to_string()))?;

    let (runner, spec, port, guard) = state.supervisor.resolve_and_prepare(&alias).await?;
    let target = UpstreamTarget {
        host: runner.listen_host().to_string(),
        port,
        runner_id: runner.id.clone(),
    };
    Ok((target, spec, guard))
}

/// Resolve the alias and reverse-proxy to the matching path — streaming if
/// the request asked for it, buffered (with retry) otherwise.
async fn dispatch(state: &Arc<AppState>, path: &str, body: Bytes) -> Result<Response> {
    let peek: RequestPeek = serde_json::from_slice(&body)
        .map_err(|e| Error::Internal(format!("invalid request body: {e}")))?;
    let streaming = peek.is_streaming();
    let (target, _spec, guard) = resolve_target(state, &body).await?;

    if streaming {
        let timeout = Duration::from_secs(state.config.streaming_timeout_seconds);
        proxy::forward_streaming(&state.http_client, &target, path, body, timeout, guard).await
    } else {
        let timeout = Duration::from_secs(state.config.request_timeout_seconds);
        proxy::forward_buffered(
            &state.http_client,
            &target,
            path,
            body,
            &state.config.retry_config,
            timeout,
            guard,
        )
        .await
    }
}

/// Variant for endpoints that never stream (embeddings, rerank): always
/// buffered, still goes through the retry-on-loading policy. Additionally
/// checks the resolved model is of `expected_kind` before forwarding.
async fn dispatch_buffered(
    state: &Arc<AppState>,
    path: &str,
    body: Bytes,
    expected_kind: flexllama_common::ModelKind,
) -> Result<Response> {
    let peek: RequestPeek = serde_json::from_slice(&body)
        .map_err(|e| Error::Internal(format!("invalid request body: {e}")))?;
    if let Some(alias) = &peek.model {
        if let Some(spec) = state.supervisor.catalog().resolve(alias) {
            if spec.kind != expected_kind {
                return Err(Error::UnknownModel(format!(
                    "'{alias}' is not a {expected_kind} model"
                )));
            }
        }
    }

    let (target, _spec, guard) = resolve_target(state, &body).await?;
    let timeout = Duration::from_secs(state.config.request_timeout_seconds);
    proxy::forward_buffered(
        &state.http_client,
        &target,
        path,
        body,
        &state.config.retry_config,
        timeout,
        guard,
    )
    .await
}
