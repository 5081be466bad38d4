//! Configuration for the FlexLLama gateway.
//!
//! The on-disk format is a JSON document (see the external-interfaces design
//! notes); the loading *mechanism* — defaults, a config file source, then an
//! environment-variable overlay — follows the `config` crate builder chain
//! this corpus uses throughout.

use std::collections::HashMap;
use std::path::PathBuf;

use config::{Config as ConfigLoader, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

use crate::catalog::ModelSpec;

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_health_endpoint")]
    pub health_endpoint: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            health_endpoint: default_health_endpoint(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay")]
    pub base_delay_seconds: f64,
    #[serde(default = "default_max_delay")]
    pub max_delay_seconds: f64,
    #[serde(default = "default_true")]
    pub retry_on_model_loading: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_seconds: default_base_delay(),
            max_delay_seconds: default_max_delay(),
            retry_on_model_loading: true,
        }
    }
}

/// Static configuration for one runner slot.
#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
    pub id: String,
    pub binary_path: String,
    #[serde(default = "default_runner_host")]
    pub listen_host: String,
    pub listen_port: u16,
    #[serde(default)]
    pub extra_args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_true")]
    pub inherit_env: bool,
    /// Seconds of inactivity before an idle runner is unloaded. 0 disables.
    #[serde(default)]
    pub auto_unload_timeout_secs: u64,
    #[serde(default = "default_launch_deadline")]
    pub launch_deadline_secs: u64,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
    #[serde(default)]
    pub log_server_output: bool,
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub auto_start_runners: bool,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub retry_config: RetryConfig,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default)]
    pub streaming_timeout_seconds: u64,
    pub runners: HashMap<String, RunnerConfig>,
    #[serde(default)]
    pub models: Vec<ModelSpec>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_health_endpoint() -> String {
    "/health".to_string()
}
fn default_runner_host() -> String {
    "127.0.0.1".to_string()
}
fn default_true() -> bool {
    true
}
fn default_max_retries() -> u32 {
    3
}
fn default_base_delay() -> f64 {
    1.0
}
fn default_max_delay() -> f64 {
    10.0
}
fn default_request_timeout() -> u64 {
    1800
}
fn default_launch_deadline() -> u64 {
    30
}
fn default_shutdown_grace() -> u64 {
    5
}

impl Config {
    /// Load configuration from a JSON file and environment variable overlay.
    ///
    /// Sources (lowest to highest precedence):
    /// 1. Built-in defaults.
    /// 2. `path` (or `./config.json` if unset).
    /// 3. `FLEXLLAMA__SECTION__KEY`-style environment variables.
    pub fn load(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let required = path.is_some();
        let file_stem = path
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| "config".to_string());

        let loader = ConfigLoader::builder()
            .set_default("auto_start_runners", false)?
            .set_default("api.host", default_host())?
            .set_default("api.port", default_port() as i64)?
            .set_default("api.health_endpoint", default_health_endpoint())?
            .set_default("retry_config.max_retries", default_max_retries() as i64)?
            .set_default("retry_config.base_delay_seconds", default_base_delay())?
            .set_default("retry_config.max_delay_seconds", default_max_delay())?
            .set_default("retry_config.retry_on_model_loading", true)?
            .set_default(
                "request_timeout_seconds",
                default_request_timeout() as i64,
            )?
            .set_default("streaming_timeout_seconds", 0i64)?
            .add_source(File::new(&file_stem, FileFormat::Json).required(required))
            .add_source(
                Environment::with_prefix("FLEXLLAMA")
                    .separator("__")
                    .try_parsing(true),
            );

        loader.build()?.try_deserialize()
    }
}
