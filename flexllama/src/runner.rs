//! A runner: one llama.cpp server slot, holding at most one loaded model.
//!
//! Loading, unloading, and swapping the loaded model are serialized through
//! a single `load_lock`, mirroring the startup semaphore in
//! `LlamaCppEngine::ensure_server` — but here there is exactly one process
//! slot per runner rather than an LRU pool, so the lock also covers the
//! generation swap itself.

use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify, RwLock};
use tracing::{info, warn};

use crate::catalog::ModelSpec;
use crate::config::RunnerConfig;
use crate::error::{Error, Result};
use crate::process::ChildProcessHandle;

/// What, if anything, is currently loaded on this runner.
#[derive(Debug, Clone)]
enum LoadState {
    Idle,
    Launching { alias: String, generation: u64 },
    Ready { alias: String, generation: u64, port: u16 },
}

/// Decrements the in-flight counter and wakes drainers on drop. Synchronous,
/// so it runs correctly even when its future is cancelled mid-`.await` (client
/// disconnect during streaming included). Also stamps `last_active` so a
/// request that never completes normally still resets the idle-unload clock.
pub struct InFlightGuard {
    in_flight: Arc<AtomicI64>,
    notify: Arc<Notify>,
    last_active: Arc<RwLock<std::time::Instant>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.notify.notify_waiters();
        let last_active = self.last_active.clone();
        tokio::spawn(async move {
            *last_active.write().await = std::time::Instant::now();
        });
    }
}

/// One runner slot: a single child process that can host any model assigned
/// to this `runner_id`, swapped in and out on demand.
pub struct Runner {
    pub id: String,
    config: RunnerConfig,
    load_lock: Mutex<()>,
    /// Guards only the control-plane entry points (`start`/`stop`/`restart`) so a
    /// second concurrent control call fails fast with `ErrBusy` instead of queuing
    /// silently behind `load_lock`.
    control_lock: Mutex<()>,
    state: RwLock<LoadState>,
    process: RwLock<Option<Arc<ChildProcessHandle>>>,
    generation: AtomicU64,
    in_flight: Arc<AtomicI64>,
    drain_notify: Arc<Notify>,
    last_active: Arc<RwLock<std::time::Instant>>,
}

impl Runner {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            id: config.id.clone(),
            config,
            load_lock: Mutex::new(()),
            control_lock: Mutex::new(()),
            state: RwLock::new(LoadState::Idle),
            process: RwLock::new(None),
            generation: AtomicU64::new(0),
            in_flight: Arc::new(AtomicI64::new(0)),
            drain_notify: Arc::new(Notify::new()),
            last_active: Arc::new(RwLock::new(std::time::Instant::now())),
        }
    }

    pub fn auto_unload_timeout_secs(&self) -> u64 {
        self.config.auto_unload_timeout_secs
    }

    pub fn listen_host(&self) -> &str {
        &self.config.listen_host
    }

    pub fn listen_port(&self) -> u16 {
        self.config.listen_port
    }

    pub async fn current_alias(&self) -> Option<String> {
        match &*self.state.read().await {
            LoadState::Ready { alias, .. } => Some(alias.clone()),
            LoadState::Launching { alias, .. } => Some(alias.clone()),
            LoadState::Idle => None,
        }
    }

    pub async fn is_idle(&self) -> bool {
        matches!(&*self.state.read().await, LoadState::Idle)
    }

    /// Seconds since the last request finished, if idle.
    pub async fn idle_seconds(&self) -> u64 {
        self.last_active.read().await.elapsed().as_secs()
    }

    /// Ensure `spec` is the model loaded on this runner, swapping out
    /// whatever else is loaded if necessary. Returns a guard that must be
    /// held for the duration of the proxied request; dropping it allows a
    /// subsequent unload/swap to proceed.
    ///
    /// The check-and-increment always happens under `load_lock`, released
    /// before returning: a concurrent `unload`/`swap_to` (which also holds
    /// `load_lock` while it drains in-flight and tears down the process)
    /// can never observe `in_flight == 0` and proceed to `stop_current` in
    /// the same window a fresh request bumps it back up.
    pub async fn acquire(&self, spec: &ModelSpec) -> Result<(u16, InFlightGuard)> {
        loop {
            let _permit = self.load_lock.lock().await;

            if let LoadState::Ready { alias, port, .. } = &*self.state.read().await {
                if alias == &spec.alias {
                    let guard = self.begin_request();
                    self.mark_active_now().await;
                    return Ok((*port, guard));
                }
            }

            self.swap_to(spec).await?;
            // Loop back around to re-check state under the lock; `swap_to`
            // leaves the runner `Ready` for `spec.alias` on success.
        }
    }

    fn begin_request(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlightGuard {
            in_flight: self.in_flight.clone(),
            notify: self.drain_notify.clone(),
            last_active: self.last_active.clone(),
        }
    }

    async fn drain_in_flight(&self) {
        loop {
            let notified = self.drain_notify.notified();
            if self.in_flight.load(Ordering::SeqCst) <= 0 {
                break;
            }
            notified.await;
        }
    }

    /// Called with `load_lock` held. Stops whatever is currently loaded (if
    /// anything, after draining in-flight requests), then starts `spec`.
    async fn swap_to(&self, spec: &ModelSpec) -> Result<()> {
        let previously_loaded = !matches!(&*self.state.read().await, LoadState::Idle);
        if previously_loaded {
            self.drain_in_flight().await;
            self.stop_current(self.shutdown_grace()).await;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.state.write().await = LoadState::Launching {
            alias: spec.alias.clone(),
            generation,
        };

        let handle = Arc::new(ChildProcessHandle::new(self.id.clone(), generation));
        let argv = self.build_argv(spec);
        let env = self.build_env(spec);

        if let Err(e) = handle
            .start(
                &PathBuf::from(&self.config.binary_path),
                &argv,
                &env,
                self.config.log_server_output,
            )
            .await
        {
            *self.state.write().await = LoadState::Idle;
            return Err(e);
        }

        let deadline = Duration::from_secs(self.config.launch_deadline_secs);
        if let Err(e) = handle
            .wait_until_port_listens(&self.config.listen_host, self.config.listen_port, deadline)
            .await
        {
            handle.stop(self.shutdown_grace()).await;
            *self.state.write().await = LoadState::Idle;
            return Err(e);
        }

        *self.process.write().await = Some(handle);
        *self.state.write().await = LoadState::Ready {
            alias: spec.alias.clone(),
            generation,
            port: self.config.listen_port,
        };
        info!(runner_id = %self.id, alias = %spec.alias, generation, "model loaded");
        Ok(())
    }

    fn build_argv(&self, spec: &ModelSpec) -> Vec<String> {
        let mut argv = vec![
            "--host".to_string(),
            self.config.listen_host.clone(),
            "--port".to_string(),
            self.config.listen_port.to_string(),
            "--model".to_string(),
            spec.model_path.clone(),
            "--alias".to_string(),
            spec.alias.clone(),
        ];
        if let Some(mmproj) = &spec.mmproj_path {
            argv.push("--mmproj".to_string());
            argv.push(mmproj.clone());
        }
        argv.extend(spec.launch_opts.to_argv());
        argv.extend(self.config.extra_args.clone());
        argv
    }

    fn build_env(&self, spec: &ModelSpec) -> std::collections::HashMap<String, String> {
        let mut env = if self.config.inherit_env {
            std::env::vars().collect()
        } else {
            std::collections::HashMap::new()
        };
        env.extend(self.config.env.clone());
        env.extend(spec.env.clone());
        env
    }

    fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.config.shutdown_grace_secs)
    }

    async fn stop_current(&self, grace: Duration) {
        let handle = self.process.write().await.take();
        if let Some(handle) = handle {
            handle.stop(grace).await;
        }
        *self.state.write().await = LoadState::Idle;
    }

    /// Explicit unload: wait out in-flight requests, then stop the process.
    pub async fn unload(&self) -> Result<()> {
        let _permit = self.load_lock.lock().await;
        if matches!(&*self.state.read().await, LoadState::Idle) {
            return Ok(());
        }
        self.drain_in_flight().await;
        self.stop_current(self.shutdown_grace()).await;
        info!(runner_id = %self.id, "model unloaded");
        Ok(())
    }

    /// Explicit control-plane stop. Fails fast with `ErrBusy` if another
    /// control operation on this runner is already in flight.
    pub async fn stop(&self) -> Result<()> {
        let _control = self
            .control_lock
            .try_lock()
            .map_err(|_| Error::Busy(self.id.clone()))?;
        self.unload().await
    }

    pub async fn start(&self, spec: &ModelSpec) -> Result<()> {
        let _control = self
            .control_lock
            .try_lock()
            .map_err(|_| Error::Busy(self.id.clone()))?;
        let _permit = self.load_lock.lock().await;
        self.swap_to(spec).await
    }

    pub async fn restart(&self, spec: &ModelSpec) -> Result<()> {
        let _control = self
            .control_lock
            .try_lock()
            .map_err(|_| Error::Busy(self.id.clone()))?;
        let _permit = self.load_lock.lock().await;
        if !matches!(&*self.state.read().await, LoadState::Idle) {
            self.drain_in_flight().await;
            self.stop_current(self.shutdown_grace()).await;
        }
        self.swap_to(spec).await
    }

    /// Called roughly once a second by the supervisor's idle-unload timer.
    pub async fn tick_idle_unload(&self) {
        if self.config.auto_unload_timeout_secs == 0 {
            return;
        }
        if !self.is_idle().await && self.in_flight.load(Ordering::SeqCst) == 0 {
            let idle_for = self.idle_seconds().await;
            if idle_for >= self.config.auto_unload_timeout_secs {
                warn!(runner_id = %self.id, idle_for, "auto-unloading idle model");
                let _ = self.unload().await;
            }
        }
    }

    pub async fn mark_active_now(&self) {
        *self.last_active.write().await = std::time::Instant::now();
    }

    pub async fn is_process_alive(&self) -> bool {
        match &*self.process.read().await {
            Some(handle) => handle.is_alive().await,
            None => false,
        }
    }
}
