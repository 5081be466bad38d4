//! One OS child process: spawn, liveness, graceful-then-forceful termination.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

use crate::error::{Error, Result};

const PORT_POLL_INTERVAL: Duration = Duration::from_millis(200);
const FORCEFUL_KILL_GRACE: Duration = Duration::from_secs(2);

/// Owns one external process for one runner generation. A new generation is
/// a new `ChildProcessHandle`; generations are never reused.
pub struct ChildProcessHandle {
    runner_id: String,
    generation: u64,
    child: Mutex<Option<Child>>,
}

impl ChildProcessHandle {
    pub fn new(runner_id: impl Into<String>, generation: u64) -> Self {
        Self {
            runner_id: runner_id.into(),
            generation,
            child: Mutex::new(None),
        }
    }

    /// Spawn the process. Returns once the OS reports the process exists,
    /// not once it is ready to serve traffic.
    pub async fn start(
        &self,
        binary_path: &Path,
        argv: &[String],
        env: &HashMap<String, String>,
        log_output: bool,
    ) -> Result<()> {
        let mut command = Command::new(binary_path);
        command.args(argv);
        command.env_clear();
        command.envs(env);
        command.kill_on_drop(true);

        if log_output {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }

        let mut child = command.spawn().map_err(|e| Error::Load {
            runner_id: self.runner_id.clone(),
            message: format!("spawn failed: {e}"),
        })?;

        if log_output {
            self.drain_stdout(child.stdout.take());
            self.drain_stderr(child.stderr.take());
        }

        *self.child.lock().await = Some(child);
        Ok(())
    }

    fn drain_stdout(&self, stdout: Option<tokio::process::ChildStdout>) {
        let Some(stdout) = stdout else { return };
        let runner_id = self.runner_id.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                info!(runner_id = %runner_id, generation, "stdout: {line}");
            }
        });
    }

    fn drain_stderr(&self, stderr: Option<tokio::process::ChildStderr>) {
        let Some(stderr) = stderr else { return };
        let runner_id = self.runner_id.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!(runner_id = %runner_id, generation, "stderr: {line}");
            }
        });
    }

    /// Poll `host:port` with a plain TCP connect until it accepts, the
    /// deadline elapses, or the process exits first.
    pub async fn wait_until_port_listens(
        &self,
        host: &str,
        port: u16,
        deadline: Duration,
    ) -> Result<()> {
        let start = Instant::now();
        loop {
            if !self.is_alive().await {
                return Err(Error::Load {
                    runner_id: self.runner_id.clone(),
                    message: "process exited during warm-up".to_string(),
                });
            }
            if TcpStream::connect((host, port)).await.is_ok() {
                return Ok(());
            }
            if start.elapsed() >= deadline {
                return Err(Error::Load {
                    runner_id: self.runner_id.clone(),
                    message: format!("port {port} did not accept connections within {deadline:?}"),
                });
            }
            sleep(PORT_POLL_INTERVAL).await;
        }
    }

    pub async fn is_alive(&self) -> bool {
        let mut guard = self.child.lock().await;
        match guard.as_mut() {
            Some(child) => match child.try_wait() {
                Ok(Some(_status)) => {
                    *guard = None;
                    false
                }
                Ok(None) => true,
                Err(_) => false,
            },
            None => false,
        }
    }

    /// Graceful SIGTERM, escalating to a forceful kill after `grace`.
    /// Idempotent: a handle with no live process returns immediately.
    pub async fn stop(&self, grace: Duration) {
        let mut guard = self.child.lock().await;
        let Some(mut child) = guard.take() else {
            return;
        };

        #[cfg(unix)]
        {
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = child.id() {
                let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
                if timeout(grace, child.wait()).await.is_ok() {
                    return;
                }
                warn!(
                    runner_id = %self.runner_id,
                    generation = self.generation,
                    "did not exit within grace period, forcing kill"
                );
            }
        }

        let _ = child.kill().await;
        let _ = timeout(FORCEFUL_KILL_GRACE, child.wait()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn is_alive_false_before_start() {
        let handle = ChildProcessHandle::new("r1", 1);
        assert!(!handle.is_alive().await);
    }

    #[tokio::test]
    async fn stop_on_unstarted_handle_is_a_noop() {
        let handle = ChildProcessHandle::new("r1", 1);
        handle.stop(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn start_and_stop_a_real_process() {
        let handle = ChildProcessHandle::new("r1", 1);
        handle
            .start(Path::new("sleep"), &["5".to_string()], &HashMap::new(), false)
            .await
            .expect("sleep should be on PATH");
        assert!(handle.is_alive().await);
        handle.stop(Duration::from_millis(500)).await;
        assert!(!handle.is_alive().await);
    }

    #[tokio::test]
    async fn spawn_failure_surfaces_as_load_error() {
        let handle = ChildProcessHandle::new("r1", 1);
        let result = handle
            .start(
                Path::new("/nonexistent/binary-that-does-not-exist"),
                &[],
                &HashMap::new(),
                false,
            )
            .await;
        assert!(matches!(result, Err(Error::Load { .. })));
    }

    #[tokio::test]
    async fn wait_until_port_listens_times_out_when_process_never_opens_port() {
        let handle = ChildProcessHandle::new("r1", 1);
        handle
            .start(Path::new("sleep"), &["5".to_string()], &HashMap::new(), false)
            .await
            .unwrap();
        let result = handle
            .wait_until_port_listens("127.0.0.1", 39173, Duration::from_millis(300))
            .await;
        assert!(matches!(result, Err(Error::Load { .. })));
        handle.stop(Duration::from_millis(200)).await;
    }
}
