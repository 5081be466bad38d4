//! Error types for the gateway.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Error kinds for the supervisor and router.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration. Fatal at startup, never raised at runtime.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown model alias: {0}")]
    UnknownModel(String),

    #[error("failed to load model on runner {runner_id}: {message}")]
    Load { runner_id: String, message: String },

    #[error("upstream error from runner {runner_id}: {message}")]
    Upstream { runner_id: String, message: String },

    #[error("model still loading on runner {runner_id}")]
    ModelLoading { runner_id: String },

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("request cancelled")]
    Cancelled,

    #[error("runner {0} is busy with another control operation")]
    Busy(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    fn error_type(&self) -> &'static str {
        match self {
            Error::Config(_) => "config_error",
            Error::UnknownModel(_) => "unknown_model",
            Error::Load { .. } => "load_failed",
            Error::Upstream { .. } => "upstream_error",
            Error::ModelLoading { .. } => "model_loading",
            Error::Timeout(_) => "timeout",
            Error::Cancelled => "cancelled",
            Error::Busy(_) => "busy",
            Error::Internal(_) => "internal_error",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::UnknownModel(_) => StatusCode::NOT_FOUND,
            Error::Load { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Error::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Error::ModelLoading { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            // Not a registered IANA status, but widely used (nginx) for a client
            // that disconnected before a response could be produced.
            Error::Cancelled => StatusCode::from_u16(499).unwrap(),
            Error::Busy(_) => StatusCode::CONFLICT,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_type = self.error_type();
        let body = Json(json!({
            "error": {
                "type": error_type,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_model_maps_to_404() {
        let err = Error::UnknownModel("m1".to_string());
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.error_type(), "unknown_model");
    }

    #[test]
    fn load_failure_maps_to_503() {
        let err = Error::Load {
            runner_id: "r1".to_string(),
            message: "spawn failed".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn upstream_error_maps_to_502() {
        let err = Error::Upstream {
            runner_id: "r1".to_string(),
            message: "connection reset".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn timeout_maps_to_504() {
        let err = Error::Timeout(std::time::Duration::from_secs(30));
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn busy_maps_to_409() {
        let err = Error::Busy("r1".to_string());
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn response_body_carries_type_and_message() {
        let err = Error::UnknownModel("ghost".to_string());
        let message = err.to_string();
        assert!(message.contains("ghost"));
    }
}
