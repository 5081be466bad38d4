//! Owns every runner, resolves model aliases to a ready runner, and drives
//! the idle-unload timer and shutdown sequence. The one process-wide
//! singleton: constructed at startup from configuration and handed to the
//! router and health aggregator. No implicit globals.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::catalog::{Catalog, ModelSpec};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::runner::{InFlightGuard, Runner};

pub struct Supervisor {
    runners: HashMap<String, Arc<Runner>>,
    catalog: Catalog,
}

impl Supervisor {
    pub fn new(config: &Config, catalog: Catalog) -> Self {
        let runners = config
            .runners
            .values()
            .map(|runner_config| {
                (
                    runner_config.id.clone(),
                    Arc::new(Runner::new(runner_config.clone())),
                )
            })
            .collect();
        Self { runners, catalog }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn runner(&self, id: &str) -> Option<Arc<Runner>> {
        self.runners.get(id).cloned()
    }

    pub fn runners(&self) -> impl Iterator<Item = &Arc<Runner>> {
        self.runners.values()
    }

    /// Resolve a public model alias to its runner, ensure that model is
    /// loaded, and return the runner alongside a guard that must be held for
    /// the duration of the proxied request.
    pub async fn resolve_and_prepare(
        &self,
        alias: &str,
    ) -> Result<(Arc<Runner>, ModelSpec, u16, InFlightGuard)> {
        let spec = self
            .catalog
            .resolve(alias)
            .cloned()
            .ok_or_else(|| Error::UnknownModel(alias.to_string()))?;
        let runner = self.runners.get(&spec.runner_id).cloned().ok_or_else(|| {
            Error::Config(format!(
                "model '{alias}' is assigned to unknown runner '{}'",
                spec.runner_id
            ))
        })?;
        let (port, guard) = runner.acquire(&spec).await?;
        Ok((runner, spec, port, guard))
    }

    pub async fn control_start(&self, runner_id: &str) -> Result<()> {
        let runner = self.require_runner(runner_id)?;
        let spec = self.resolve_control_spec(&runner).await?;
        runner.start(&spec).await
    }

    pub async fn control_stop(&self, runner_id: &str) -> Result<()> {
        let runner = self.require_runner(runner_id)?;
        runner.stop().await
    }

    pub async fn control_restart(&self, runner_id: &str) -> Result<()> {
        let runner = self.require_runner(runner_id)?;
        let spec = self.resolve_control_spec(&runner).await?;
        runner.restart(&spec).await
    }

    async fn resolve_control_spec(&self, runner: &Runner) -> Result<ModelSpec> {
        if let Some(alias) = runner.current_alias().await {
            if let Some(spec) = self.catalog.resolve(&alias) {
                return Ok(spec.clone());
            }
        }
        self.catalog
            .default_for_runner(&runner.id)
            .cloned()
            .ok_or_else(|| {
                Error::Config(format!(
                    "runner '{}' has no currently loaded model and no default in the catalog",
                    runner.id
                ))
            })
    }

    fn require_runner(&self, runner_id: &str) -> Result<Arc<Runner>> {
        self.runners
            .get(runner_id)
            .cloned()
            .ok_or_else(|| Error::Config(format!("unknown runner '{runner_id}'")))
    }

    /// At boot, preload each runner's default model if `auto_start_runners`
    /// is set. Failures are logged, not fatal — a runner that fails to
    /// autostart is simply left idle and will retry on its first request.
    pub async fn autostart_defaults(&self) {
        for runner in self.runners.values() {
            let Some(spec) = self.catalog.default_for_runner(&runner.id) else {
                continue;
            };
            info!(runner_id = %runner.id, alias = %spec.alias, "autostarting default model");
            if let Err(e) = runner.start(spec).await {
                warn!(runner_id = %runner.id, error = %e, "autostart failed");
            }
        }
    }

    /// Runs on a single ~1 Hz timer, unloading any runner that has been idle
    /// past its configured timeout with no in-flight requests.
    pub async fn tick_idle_unload(&self) {
        for runner in self.runners.values() {
            runner.tick_idle_unload().await;
        }
    }

    /// Stop every runner concurrently, each bounded by `grace`.
    pub async fn shutdown(&self, grace: Duration) {
        let stops = self.runners.values().map(|runner| {
            let runner = runner.clone();
            async move {
                if tokio::time::timeout(grace, runner.unload()).await.is_err() {
                    warn!(runner_id = %runner.id, "did not shut down within grace deadline");
                }
            }
        });
        futures::future::join_all(stops).await;
        info!("supervisor shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApiConfig, RetryConfig, RunnerConfig};
    use flexllama_common::ModelKind;
    use std::time::Duration;

    fn spec(alias: &str, runner_id: &str) -> ModelSpec {
        ModelSpec {
            alias: alias.to_string(),
            runner_id: runner_id.to_string(),
            model_path: format!("/models/{alias}.gguf"),
            kind: ModelKind::Chat,
            mmproj_path: None,
            env: HashMap::new(),
            launch_opts: crate::catalog::LaunchOpts::default(),
        }
    }

    fn test_config(models: Vec<ModelSpec>) -> Config {
        let mut runners = HashMap::new();
        runners.insert(
            "r1".to_string(),
            RunnerConfig {
                id: "r1".to_string(),
                binary_path: "/bin/true".to_string(),
                listen_host: "127.0.0.1".to_string(),
                listen_port: 0,
                extra_args: vec![],
                env: HashMap::new(),
                inherit_env: false,
                auto_unload_timeout_secs: 0,
                launch_deadline_secs: 1,
                shutdown_grace_secs: 1,
                log_server_output: false,
            },
        );
        Config {
            auto_start_runners: false,
            api: ApiConfig::default(),
            retry_config: RetryConfig::default(),
            request_timeout_seconds: 30,
            streaming_timeout_seconds: 0,
            runners,
            models,
        }
    }

    #[tokio::test]
    async fn resolve_and_prepare_rejects_unknown_alias() {
        let config = test_config(vec![]);
        let supervisor = Supervisor::new(&config, Catalog::new(vec![]));
        let err = supervisor.resolve_and_prepare("ghost").await.unwrap_err();
        assert!(matches!(err, Error::UnknownModel(_)));
    }

    #[tokio::test]
    async fn control_start_on_unknown_runner_is_a_config_error() {
        let config = test_config(vec![]);
        let supervisor = Supervisor::new(&config, Catalog::new(vec![]));
        let err = supervisor.control_start("ghost").await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn control_start_on_a_runner_with_no_catalog_entry_is_a_config_error() {
        let config = test_config(vec![]);
        let supervisor = Supervisor::new(&config, Catalog::new(vec![]));
        let err = supervisor.control_start("r1").await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn control_stop_on_an_idle_runner_is_a_noop_success() {
        let models = vec![spec("m1", "r1")];
        let config = test_config(models.clone());
        let supervisor = Supervisor::new(&config, Catalog::new(models));
        supervisor.control_stop("r1").await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_completes_immediately_when_every_runner_is_idle() {
        let models = vec![spec("m1", "r1")];
        let config = test_config(models.clone());
        let supervisor = Supervisor::new(&config, Catalog::new(models));
        supervisor.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn autostart_defaults_is_a_noop_when_no_runner_has_a_catalog_entry() {
        let config = test_config(vec![]);
        let supervisor = Supervisor::new(&config, Catalog::new(vec![]));
        supervisor.autostart_defaults().await;
        assert!(supervisor.runner("r1").unwrap().is_idle().await);
    }
}
