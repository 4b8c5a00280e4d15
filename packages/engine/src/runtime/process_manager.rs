// packages/engine/src/runtime/process_manager.rs
//! Process manager for spawning and managing agent processes
//!
//! Starts the agent executable with the launch contract from
//! [`LaunchOptions`], and signals agents that do not stop on request.

use crate::agent::launch::LaunchOptions;
use crate::utils::config::AgencySettings;
use crate::utils::errors::{EngineError, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info};

pub const AGENT_EXECUTABLE: &str = "agency-agent";

/// Process manager for spawning agent processes
#[derive(Debug, Clone)]
pub struct ProcessManager {
    executable: PathBuf,
    kill_grace: Duration,
}

impl ProcessManager {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            kill_grace: Duration::from_secs(2),
        }
    }

    /// Use the configured executable, or `agency-agent` beside this binary
    pub fn from_settings(settings: &AgencySettings) -> Result<Self> {
        let executable = match &settings.agent_executable {
            Some(path) => path.clone(),
            None => {
                let current = std::env::current_exe()?;
                current
                    .parent()
                    .map(|dir| dir.join(AGENT_EXECUTABLE))
                    .ok_or_else(|| EngineError::ProcessSpawnFailed("cannot locate agent executable".into()))?
            }
        };
        Ok(Self::new(executable))
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    pub fn kill_grace(&self) -> Duration {
        self.kill_grace
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Spawn an agent process
    pub fn spawn(&self, options: &LaunchOptions) -> Result<Child> {
        debug!("Spawning agent {} from {:?}", options.agent_id, self.executable);

        let mut command = Command::new(&self.executable);
        command.args(options.to_args());

        if !options.work_directory.as_os_str().is_empty() {
            command.current_dir(&options.work_directory);
        }

        // the agent logs to its own file; keep its stdio out of ours
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let child = command
            .spawn()
            .map_err(|e| EngineError::ProcessSpawnFailed(format!("{:?}: {}", self.executable, e)))?;

        info!(agent_id = %options.agent_id, pid = ?child.id(), "Agent process spawned");
        Ok(child)
    }

    /// Stop a child we still own: SIGTERM, then SIGKILL after the grace period
    ///
    /// The child is not reaped before this returns, so its pid cannot have
    /// been reused by another process.
    pub async fn terminate(&self, child: &mut Child) -> Result<ExitStatus> {
        if let Some(pid) = child.id() {
            debug!("Sending SIGTERM to PID {}", pid);
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                debug!("SIGTERM to PID {} failed: {}", pid, e);
            }
        }

        match tokio::time::timeout(self.kill_grace, child.wait()).await {
            Ok(status) => Ok(status?),
            Err(_) => {
                debug!("Process still alive, sending SIGKILL to PID {:?}", child.id());
                child.start_kill()?;
                Ok(child.wait().await?)
            }
        }
    }

    /// Check if a process is running
    pub fn is_running(&self, pid: u32) -> bool {
        kill(Pid::from_raw(pid as i32), None).is_ok()
    }
}
