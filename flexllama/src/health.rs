//! Polls runner liveness and per-model readiness on a timer and caches the
//! result for `GET /health`. Read-only with respect to child processes: it
//! never starts or stops a runner itself, only the owning `Runner` may do
//! that, which rules out races between a probe and a restart.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use flexllama_common::{HealthResponse, ModelHealth, ModelHealthStatus, RunnerInfo};
use reqwest::Client;
use tokio::sync::RwLock;
use tracing::debug;

use crate::supervisor::Supervisor;

pub struct HealthAggregator {
    supervisor: Arc<Supervisor>,
    client: Client,
    snapshot: RwLock<HealthResponse>,
}

impl HealthAggregator {
    pub fn new(supervisor: Arc<Supervisor>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .expect("building the health-probe HTTP client cannot fail");
        Self {
            supervisor,
            client,
            snapshot: RwLock::new(HealthResponse::default()),
        }
    }

    pub async fn snapshot(&self) -> HealthResponse {
        self.snapshot.read().await.clone()
    }

    /// Runs until the process exits, refreshing the cached snapshot every
    /// `interval`.
    pub async fn run(self: Arc<Self>, interval: Duration) {
        loop {
            self.tick().await;
            tokio::time::sleep(interval).await;
        }
    }

    async fn tick(&self) {
        let mut active_runners = HashMap::new();
        let mut runner_current_models = HashMap::new();
        let mut runner_info = HashMap::new();
        let mut model_health = HashMap::new();

        for runner in self.supervisor.runners() {
            let alive = runner.is_process_alive().await;
            let current_alias = runner.current_alias().await;

            active_runners.insert(runner.id.clone(), alive);
            runner_current_models.insert(runner.id.clone(), current_alias.clone());

            let timeout_secs = runner.auto_unload_timeout_secs();
            let countdown = if timeout_secs > 0 && current_alias.is_some() {
                let idle_for = runner.idle_seconds().await;
                Some(timeout_secs.saturating_sub(idle_for))
            } else {
                None
            };
            runner_info.insert(
                runner.id.clone(),
                RunnerInfo {
                    host: runner.listen_host().to_string(),
                    port: runner.listen_port(),
                    auto_unload_timeout_seconds: timeout_secs,
                    auto_unload_countdown_seconds: countdown,
                },
            );

            for spec in self.supervisor.catalog().for_runner(&runner.id) {
                let health = self
                    .probe_model(&runner.id, alive, current_alias.as_deref(), &spec.alias, runner.listen_host(), runner.listen_port())
                    .await;
                model_health.insert(spec.alias.clone(), health);
            }
        }

        *self.snapshot.write().await = HealthResponse {
            active_runners,
            runner_current_models,
            runner_info,
            model_health,
        };
    }

    async fn probe_model(
        &self,
        runner_id: &str,
        runner_alive: bool,
        current_alias: Option<&str>,
        alias: &str,
        host: &str,
        port: u16,
    ) -> ModelHealth {
        if !runner_alive {
            return ModelHealth {
                status: ModelHealthStatus::NotRunning,
                message: None,
            };
        }
        if current_alias != Some(alias) {
            return ModelHealth {
                status: ModelHealthStatus::NotLoaded,
                message: None,
            };
        }

        let url = format!("http://{host}:{port}/health");
        match self.client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => ModelHealth {
                status: ModelHealthStatus::Ok,
                message: None,
            },
            Ok(resp) if resp.status() == reqwest::StatusCode::SERVICE_UNAVAILABLE => ModelHealth {
                status: ModelHealthStatus::Loading,
                message: Some("model still loading".to_string()),
            },
            Ok(resp) => ModelHealth {
                status: ModelHealthStatus::Error,
                message: Some(format!("runner health endpoint returned {}", resp.status())),
            },
            Err(e) => {
                debug!(runner_id, alias, error = %e, "health probe failed");
                ModelHealth {
                    status: ModelHealthStatus::Error,
                    message: Some(e.to_string()),
                }
            }
        }
    }
}
