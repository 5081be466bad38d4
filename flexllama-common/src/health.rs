//! Shapes produced by the health aggregator and served from `GET /health`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Status of one model alias as last observed by the health aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelHealthStatus {
    Ok,
    Loading,
    Error,
    NotLoaded,
    NotRunning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelHealth {
    pub status: ModelHealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerInfo {
    pub host: String,
    pub port: u16,
    pub auto_unload_timeout_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_unload_countdown_seconds: Option<u64>,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HealthResponse {
    pub active_runners: HashMap<String, bool>,
    pub runner_current_models: HashMap<String, Option<String>>,
    pub runner_info: HashMap<String, RunnerInfo>,
    pub model_health: HashMap<String, ModelHealth>,
}
