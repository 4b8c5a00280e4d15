// packages/engine/src/agent/executor.rs
//! Test execution collaborator
//!
//! The agent does not know how tests are discovered or run; it hands each
//! [`RunRequest`] to a [`TestExecutor`]. [`ProcessExecutor`] is the default:
//! every assembly is a self-contained test executable whose exit status
//! decides pass or fail.

use crate::transport::protocol::{AssemblyResult, RunRequest, RunResult, TestStatus};
use crate::utils::errors::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

#[async_trait]
pub trait TestExecutor: Send + Sync {
    async fn execute(&self, agent_id: Uuid, request: RunRequest) -> Result<RunResult>;
}

/// Runs each assembly as a child process
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    default_timeout: Duration,
    work_dir: Option<PathBuf>,
}

impl ProcessExecutor {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            default_timeout,
            work_dir: None,
        }
    }

    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(work_dir.into());
        self
    }

    async fn run_assembly(&self, assembly: &str, filter: Option<&str>, timeout: Duration) -> AssemblyResult {
        let started = Instant::now();
        let mut command = Command::new(assembly);
        if let Some(filter) = filter {
            command.arg(filter);
        }
        if let Some(dir) = &self.work_dir {
            command.current_dir(dir);
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(assembly, "Running test assembly");
        let outcome = match command.spawn() {
            Ok(child) => tokio::time::timeout(timeout, child.wait_with_output()).await,
            Err(e) => {
                warn!(assembly, "Failed to start test assembly: {}", e);
                return AssemblyResult {
                    assembly: assembly.to_string(),
                    status: TestStatus::Error,
                    exit_code: None,
                    duration_ms: started.elapsed().as_millis() as u64,
                    output: e.to_string(),
                };
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(Ok(output)) => {
                let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                text.push_str(&String::from_utf8_lossy(&output.stderr));
                AssemblyResult {
                    assembly: assembly.to_string(),
                    status: if output.status.success() { TestStatus::Passed } else { TestStatus::Failed },
                    exit_code: output.status.code(),
                    duration_ms,
                    output: text,
                }
            }
            Ok(Err(e)) => AssemblyResult {
                assembly: assembly.to_string(),
                status: TestStatus::Error,
                exit_code: None,
                duration_ms,
                output: e.to_string(),
            },
            // the child is killed when its future is dropped
            Err(_) => AssemblyResult {
                assembly: assembly.to_string(),
                status: TestStatus::TimedOut,
                exit_code: None,
                duration_ms,
                output: format!("timed out after {:?}", timeout),
            },
        }
    }
}

#[async_trait]
impl TestExecutor for ProcessExecutor {
    async fn execute(&self, agent_id: Uuid, request: RunRequest) -> Result<RunResult> {
        let timeout = request
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout);

        let mut assemblies = Vec::with_capacity(request.package.assemblies.len());
        for assembly in &request.package.assemblies {
            assemblies.push(self.run_assembly(assembly, request.filter.as_deref(), timeout).await);
        }

        Ok(RunResult { agent_id, assemblies })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runners::package::TestPackage;

    #[tokio::test]
    async fn test_exit_status_decides_outcome() {
        let executor = ProcessExecutor::new(Duration::from_secs(10));
        let request = RunRequest::new(TestPackage::new(["true", "false"]));
        let result = executor.execute(Uuid::nil(), request).await.unwrap();

        assert_eq!(result.assemblies[0].status, TestStatus::Passed);
        assert_eq!(result.assemblies[1].status, TestStatus::Failed);
        assert!(!result.passed());
    }

    #[tokio::test]
    async fn test_missing_executable_is_error() {
        let executor = ProcessExecutor::new(Duration::from_secs(10));
        let request = RunRequest::new(TestPackage::new(["/nonexistent/agency-test-binary"]));
        let result = executor.execute(Uuid::nil(), request).await.unwrap();
        assert_eq!(result.assemblies[0].status, TestStatus::Error);
    }

    #[tokio::test]
    async fn test_timeout() {
        let executor = ProcessExecutor::new(Duration::from_secs(10));
        let request = RunRequest::new(TestPackage::new(["sleep"]))
            .with_filter("5")
            .with_timeout_ms(100);
        let result = executor.execute(Uuid::nil(), request).await.unwrap();
        assert_eq!(result.assemblies[0].status, TestStatus::TimedOut);
    }
}
