//! Reverse-proxies one client request to a runner's local HTTP endpoint,
//! buffered or streaming, with the retry-on-loading policy applied to the
//! buffered path only (per the streaming-never-retries rule below).

use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use reqwest::Client;
use serde_json::Value;
use tracing::warn;

use crate::config::RetryConfig;
use crate::error::{Error, Result};
use crate::runner::InFlightGuard;

/// Where a request is headed: one runner's locally bound HTTP endpoint.
pub struct UpstreamTarget {
    pub host: String,
    pub port: u16,
    pub runner_id: String,
}

impl UpstreamTarget {
    fn url(&self, path: &str) -> String {
        format!("http://{}:{}{}", self.host, self.port, path)
    }
}

/// Buffered (non-streaming) proxy: chat/completions with `stream: false`,
/// embeddings, rerank. Retries a 503 "model loading" response with
/// exponential backoff, bounded by `retry_config`.
pub async fn forward_buffered(
    client: &Client,
    target: &UpstreamTarget,
    path: &str,
    body: Bytes,
    retry_config: &RetryConfig,
    request_timeout: Duration,
    _guard: InFlightGuard,
) -> Result<Response> {
    let url = target.url(path);
    let max_attempts = retry_config.max_retries.max(1);
    let mut delay = Duration::from_secs_f64(retry_config.base_delay_seconds.max(0.0));

    for attempt in 1..=max_attempts {
        // Bounded end to end: a runner that returns headers promptly but then
        // stalls mid-body must still hit `request_timeout`, not just the
        // initial `send()`.
        let roundtrip = async {
            let resp = client
                .post(&url)
                .header("content-type", "application/json")
                .body(body.clone())
                .send()
                .await?;
            let content_type = resp
                .headers()
                .get("content-type")
                .cloned()
                .unwrap_or_else(|| HeaderValue::from_static("application/json"));
            let status = resp.status();
            let body_bytes = resp.bytes().await?;
            Ok::<_, reqwest::Error>((status, content_type, body_bytes))
        };

        let (status, content_type, body_bytes) =
            match tokio::time::timeout(request_timeout, roundtrip).await {
                Ok(Ok(triple)) => triple,
                Ok(Err(e)) => {
                    return Err(Error::Upstream {
                        runner_id: target.runner_id.clone(),
                        message: e.to_string(),
                    })
                }
                Err(_) => return Err(Error::Timeout(request_timeout)),
            };

        let retryable = status == StatusCode::SERVICE_UNAVAILABLE
            && retry_config.retry_on_model_loading
            && looks_like_model_loading(&body_bytes);

        if retryable && attempt < max_attempts {
            warn!(
                runner_id = %target.runner_id,
                attempt,
                "model still loading, retrying after backoff"
            );
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(Duration::from_secs_f64(retry_config.max_delay_seconds.max(0.0)));
            continue;
        }

        if !status.is_success() {
            return Err(Error::Upstream {
                runner_id: target.runner_id.clone(),
                message: format!("upstream returned {status}"),
            });
        }

        let mut response = (status, Body::from(body_bytes)).into_response();
        response.headers_mut().insert("content-type", content_type);
        return Ok(response);
    }

    Err(Error::Upstream {
        runner_id: target.runner_id.clone(),
        message: "exhausted retries waiting for model to finish loading".to_string(),
    })
}

/// Streaming proxy: relays upstream bytes to the client verbatim, frame
/// boundaries and all, until upstream end-of-stream, a read timeout, or the
/// client disconnects (which drops this stream and, with it, `guard`,
/// releasing the runner's in-flight count). Never retried once invoked.
pub async fn forward_streaming(
    client: &Client,
    target: &UpstreamTarget,
    path: &str,
    body: Bytes,
    streaming_timeout: Duration,
    guard: InFlightGuard,
) -> Result<Response> {
    let url = target.url(path);
    let resp = client
        .post(&url)
        .header("content-type", "application/json")
        .body(body)
        .send()
        .await
        .map_err(|e| Error::Upstream {
            runner_id: target.runner_id.clone(),
            message: e.to_string(),
        })?;

    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(Error::Upstream {
            runner_id: target.runner_id.clone(),
            message: format!("upstream returned {status}: {text}"),
        });
    }

    let content_type = resp
        .headers()
        .get("content-type")
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("text/event-stream"));

    let runner_id = target.runner_id.clone();
    let mut upstream = resp.bytes_stream();
    let stream = async_stream::stream! {
        // Held until this generator is dropped — normal completion or, on
        // client disconnect, axum dropping the response body.
        let _guard = guard;
        loop {
            let next = if streaming_timeout.is_zero() {
                upstream.next().await
            } else {
                match tokio::time::timeout(streaming_timeout, upstream.next()).await {
                    Ok(item) => item,
                    Err(_) => {
                        warn!(runner_id = %runner_id, "streaming read timed out");
                        break;
                    }
                }
            };
            match next {
                Some(Ok(chunk)) => yield Ok::<_, std::io::Error>(chunk),
                Some(Err(e)) => {
                    warn!(runner_id = %runner_id, error = %e, "upstream stream error");
                    break;
                }
                None => break,
            }
        }
    };

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .body(Body::from_stream(stream))
        .expect("building a streaming response cannot fail");
    response.headers_mut().insert("content-type", content_type);
    response
        .headers_mut()
        .insert("cache-control", HeaderValue::from_static("no-cache"));
    Ok(response)
}

/// A 503 is a "model loading" signal if the body is empty or is a JSON
/// object shaped `{"error": {"message": "..."}}` whose message contains the
/// case-insensitive substring "loading". Anything else is a terminal
/// upstream error and is not retried.
fn looks_like_model_loading(body: &[u8]) -> bool {
    if body.is_empty() {
        return true;
    }
    let Ok(value) = serde_json::from_slice::<Value>(body) else {
        return false;
    };
    value
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .map(|s| s.to_lowercase().contains("loading"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_is_treated_as_loading() {
        assert!(looks_like_model_loading(b""));
    }

    #[test]
    fn json_error_with_loading_message_is_detected_case_insensitively() {
        let body = br#"{"error":{"message":"Model is LOADING, please wait"}}"#;
        assert!(looks_like_model_loading(body));
    }

    #[test]
    fn unrelated_json_error_is_not_loading() {
        let body = br#"{"error":{"message":"out of memory"}}"#;
        assert!(!looks_like_model_loading(body));
    }

    #[test]
    fn non_json_body_is_not_loading() {
        assert!(!looks_like_model_loading(b"internal server error"));
    }
}
